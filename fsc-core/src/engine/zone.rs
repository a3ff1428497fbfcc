//! Zone controller
//!
//! A zone turns one control expression into one duty cycle per cycle:
//!
//! 1. Every external variable of the expression is looked up in the sensor
//!    snapshot. A sensor reporting `ucr` raises the floor to the
//!    transitional duty cycle; with a fail-sensor policy, a sensor reporting
//!    `na` raises it to boost (storage devices are counted instead). A
//!    sensor missing for more than two consecutive cycles is asserted once
//!    and deasserted when it reports again.
//! 2. The expression is evaluated. A result that is absent, zero or not
//!    finite selects the transitional duty cycle, and the fallback flag is
//!    asserted. ASSERT and DEASSERT are logged only on flag edges.
//! 3. Failed storage devices add the first matching progressive offset, or
//!    force boost when their count exceeds the offset table.
//! 4. The result is `clamp(max(raw, floor), 0, 100)`.

use std::collections::{BTreeMap, BTreeSet};

use serde::Deserialize;
use tracing::{debug, error, info, warn};

use crate::constants::{pwm, sensor, status};
use crate::expr::{is_truthy, EvalContext, EvalTree, ExpressionInfo, ExtVar};
use crate::machine::Snapshot;

/// Which sensor failures raise the floor
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
pub struct FailSensorPolicy {
    /// Boost when a sensor reports `na`
    #[serde(default)]
    pub standby_sensor_fail: bool,
    /// Count failed storage devices instead of boosting
    #[serde(default, rename = "SSD_sensor_fail")]
    pub ssd_sensor_fail: bool,
}

/// Offsets applied per number of failed storage devices
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct SsdProgressiveAlgorithm {
    /// `(max_failed_count, offset)` pairs in ascending order
    pub offset_algorithm: Vec<(u32, f64)>,
}

impl SsdProgressiveAlgorithm {
    /// Offset of the first entry whose threshold is at least `count`
    pub fn offset_for(&self, count: u32) -> Option<f64> {
        self.offset_algorithm
            .iter()
            .find(|(threshold, _)| count <= *threshold)
            .map(|(_, offset)| *offset)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FanMode {
    Normal,
    Transitional,
    Boost,
    Progressive,
}

impl FanMode {
    pub fn as_str(self) -> &'static str {
        match self {
            FanMode::Normal => "normal",
            FanMode::Transitional => "transitional",
            FanMode::Boost => "boost",
            FanMode::Progressive => "progressive",
        }
    }
}

/// Fallback flag transition observed in a cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FallbackEdge {
    Asserted,
    Deasserted,
}

/// Decision of one zone cycle
#[derive(Debug, Clone, PartialEq)]
pub struct ZoneOutcome {
    pub pwm: f64,
    pub mode: FanMode,
    pub edge: Option<FallbackEdge>,
    /// External variables without a reading this cycle
    pub missing: Vec<String>,
    pub fail_ssd_count: u32,
}

/// Static zone configuration
#[derive(Debug, Clone, PartialEq)]
pub struct ZoneSettings {
    pub pwm_output: Vec<String>,
    pub transitional: f64,
    pub boost: f64,
    pub counter: usize,
    pub fail_sensor_type: Option<FailSensorPolicy>,
    pub ssd_progressive_algorithm: Option<SsdProgressiveAlgorithm>,
}

/// Per-sensor missing alarms with a retry debounce
#[derive(Debug, Default)]
struct MissingSensorAlarms {
    retries: BTreeMap<String, u32>,
    asserted: BTreeSet<String>,
}

impl MissingSensorAlarms {
    fn missing(&mut self, zone: usize, var: &str) {
        let retries = self.retries.entry(var.to_string()).or_insert(0);
        if *retries >= sensor::MISSING_ASSERT_RETRIES && self.asserted.insert(var.to_string()) {
            error!("ASSERT: Zone{} Missing sensors: {}", zone, var);
        }
        if *retries < sensor::MISSING_ASSERT_RETRIES {
            *retries += 1;
        }
    }

    fn present(&mut self, zone: usize, var: &str) {
        self.retries.remove(var);
        if self.asserted.remove(var) {
            error!("DEASSERT: Zone{} Missing sensors: {}", zone, var);
        }
    }
}

#[derive(Debug)]
pub struct Zone {
    pwm_output: Vec<String>,
    transitional: f64,
    boost: f64,
    counter: usize,
    last_pwm: f64,
    expr: EvalTree,
    expr_meta: ExpressionInfo,
    expr_str: String,
    transitional_assert_flag: bool,
    missing_alarms: MissingSensorAlarms,
    fail_sensor_type: Option<FailSensorPolicy>,
    ssd_progressive_algorithm: Option<SsdProgressiveAlgorithm>,
    verbose: bool,
}

/// Storage-device sensors are counted rather than boosted on failure
fn is_ssd_sensor(display_name: &str, symbolic: &str) -> bool {
    display_name.starts_with(sensor::SSD_NAME_PREFIX) || symbolic.contains(sensor::SSD_SYMBOLIC_MARKER)
}

impl Zone {
    pub fn new(settings: ZoneSettings, expr: EvalTree, expr_meta: ExpressionInfo) -> Self {
        let expr_str = expr.to_string();
        Self {
            pwm_output: settings.pwm_output,
            transitional: settings.transitional,
            boost: settings.boost,
            counter: settings.counter,
            last_pwm: settings.transitional,
            expr,
            expr_meta,
            expr_str,
            transitional_assert_flag: false,
            missing_alarms: MissingSensorAlarms::default(),
            fail_sensor_type: settings.fail_sensor_type,
            ssd_progressive_algorithm: settings.ssd_progressive_algorithm,
            verbose: false,
        }
    }

    /// Log a per-node trace of every evaluation
    pub fn set_verbose(&mut self, verbose: bool) {
        self.verbose = verbose;
    }

    pub fn pwm_output(&self) -> &[String] {
        &self.pwm_output
    }

    pub fn transitional(&self) -> f64 {
        self.transitional
    }

    pub fn boost(&self) -> f64 {
        self.boost
    }

    pub fn counter(&self) -> usize {
        self.counter
    }

    pub fn last_pwm(&self) -> f64 {
        self.last_pwm
    }

    /// Record the duty cycle actually applied after ramping and limits
    pub fn set_last_pwm(&mut self, pwm: f64) {
        self.last_pwm = pwm;
    }

    pub fn expr_meta(&self) -> &ExpressionInfo {
        &self.expr_meta
    }

    pub fn expr_str(&self) -> &str {
        &self.expr_str
    }

    pub fn is_transitional_asserted(&self) -> bool {
        self.transitional_assert_flag
    }

    pub fn is_missing_asserted(&self, var: &str) -> bool {
        self.missing_alarms.asserted.contains(var)
    }

    /// Clear the fallback and missing-sensor flags without logging (fan rearm)
    pub fn reset_alarms(&mut self) {
        self.transitional_assert_flag = false;
        self.missing_alarms.asserted.clear();
    }

    /// Compute this cycle's duty cycle
    pub fn run(&mut self, snapshot: &Snapshot, dt: f64) -> f64 {
        self.evaluate(snapshot, dt).pwm
    }

    /// Compute this cycle's duty cycle and report how it was reached
    pub fn evaluate(&mut self, snapshot: &Snapshot, dt: f64) -> ZoneOutcome {
        let mut ctx = EvalContext::new(dt);
        let mut floor = pwm::MIN_PERCENT;
        let mut fail_ssd_count = 0u32;
        let mut missing = Vec::new();
        let policy = self.fail_sensor_type.filter(|p| p.standby_sensor_fail);

        for var in &self.expr_meta.ext_vars {
            let reading = ExtVar::parse(var).and_then(|v| snapshot.get(v.fru, v.sensor).map(|r| (v, r)));
            let Some((parts, reading)) = reading else {
                ctx.set(var.as_str(), None);
                missing.push(var.clone());
                self.missing_alarms.missing(self.counter, var);
                continue;
            };
            self.missing_alarms.present(self.counter, var);
            ctx.set(var.as_str(), reading.value);

            if reading.status_is(status::UCR) {
                warn!(
                    zone = self.counter,
                    sensor = %var,
                    "Sensor {} reporting status {}",
                    reading.name,
                    status::UCR
                );
                floor = floor.max(self.transitional);
            } else if let Some(policy) = policy {
                if reading.status_is(status::NA) {
                    if is_ssd_sensor(&reading.name, parts.sensor) {
                        if policy.ssd_sensor_fail {
                            fail_ssd_count += 1;
                            warn!(zone = self.counter, sensor = %var, "M.2 device {} fail", var);
                        }
                    } else {
                        warn!(zone = self.counter, sensor = %var, "Sensor {} fail, boosting", var);
                        floor = floor.max(self.boost);
                        break;
                    }
                }
            }
        }

        if !missing.is_empty() {
            warn!(
                zone = self.counter,
                "Zone{} missing sensors: {}",
                self.counter,
                missing.join(", ")
            );
        }

        let value = if self.verbose {
            let (value, trace) = self.expr.dbgeval(&ctx);
            info!(zone = self.counter, "{} = {}", trace, value);
            value
        } else {
            let value = self.expr.eval(&ctx);
            debug!(zone = self.counter, "{} = {}", self.expr_str, value);
            value
        };

        let result = value.as_scalar().filter(|v| v.is_finite());
        let failing = !is_truthy(result);
        let edge = self.update_fallback(failing);
        let mut raw = match result {
            Some(v) if !failing => v,
            _ => self.transitional,
        };

        let mut progressive = false;
        if fail_ssd_count > 0 && self.fail_sensor_type.is_some() {
            if let Some(table) = &self.ssd_progressive_algorithm {
                match table.offset_for(fail_ssd_count) {
                    Some(offset) => {
                        raw += offset;
                        progressive = true;
                    }
                    None => {
                        warn!(
                            zone = self.counter,
                            failed = fail_ssd_count,
                            "Failed M.2 devices exceed progressive table, boosting"
                        );
                        floor = floor.max(self.boost);
                    }
                }
            }
        }

        let pwm = raw.max(floor).clamp(pwm::MIN_PERCENT, pwm::MAX_PERCENT);
        let mode = if floor > pwm::MIN_PERCENT && floor >= raw {
            if floor >= self.boost {
                FanMode::Boost
            } else {
                FanMode::Transitional
            }
        } else if progressive {
            FanMode::Progressive
        } else if failing {
            FanMode::Transitional
        } else {
            FanMode::Normal
        };

        self.last_pwm = pwm;
        ZoneOutcome {
            pwm,
            mode,
            edge,
            missing,
            fail_ssd_count,
        }
    }

    fn update_fallback(&mut self, failing: bool) -> Option<FallbackEdge> {
        match (failing, self.transitional_assert_flag) {
            (true, false) => {
                self.transitional_assert_flag = true;
                error!(
                    "ASSERT: Zone{} No sane fan speed could be calculated! Using transitional speed.",
                    self.counter
                );
                Some(FallbackEdge::Asserted)
            }
            (false, true) => {
                self.transitional_assert_flag = false;
                error!(
                    "DEASSERT: Zone{} No sane fan speed could be calculated! Stop using transitional speed.",
                    self.counter
                );
                Some(FallbackEdge::Deasserted)
            }
            _ => None,
        }
    }
}
