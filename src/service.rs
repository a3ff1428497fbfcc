/*
 * This file is part of fscd.
 *
 * Copyright (C) 2025 fscd contributors
 *
 * fscd is free software: you can redistribute it and/or modify
 * it under the terms of the GNU General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * fscd is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
 * GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License
 * along with fscd. If not, see <https://www.gnu.org/licenses/>.
 */

//! Polling service
//!
//! Owns the fans, the sensor machine and the zones built from the
//! configuration, and drives them once per sample interval until asked to
//! stop. Fans are left at the transitional duty cycle on start-up and on
//! shutdown.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use fsc_core::hw::CommandRunner;
use fsc_core::{
    read_fans, Fan, FanMode, Machine, Profiles, SensorSource, ShellRunner, SourceSpec,
    SysfsSource, UtilSource, Zone, ZoneSettings,
};
use fsc_error::{FscError, Result};
use serde_json::json;
use tracing::{debug, error, info, warn};

use crate::config::{FscConfig, WriteSourceConfig};
use crate::logger;

/// Granularity of the shutdown check while sleeping
const SHUTDOWN_POLL: Duration = Duration::from_millis(100);

/// Factory for the command runner of each utility-based source
pub type RunnerFactory<'a> = &'a dyn Fn() -> Box<dyn CommandRunner>;

/// Step at most `ramp_rate` from `last` towards `target`
pub fn apply_ramp(last: f64, target: f64, ramp_rate: f64) -> f64 {
    if target > last {
        target.min(last + ramp_rate)
    } else {
        target.max(last - ramp_rate)
    }
}

/// Keep `pwm` within the configured fan limits
pub fn apply_limits(pwm: f64, upper: Option<f64>, lower: Option<f64>) -> f64 {
    let pwm = upper.map_or(pwm, |u| pwm.min(u));
    lower.map_or(pwm, |l| pwm.max(l))
}

fn build_source(
    name: &str,
    read: &SourceSpec,
    write: Option<&WriteSourceConfig>,
    make_runner: RunnerFactory<'_>,
) -> Result<Box<dyn SensorSource>> {
    let write_target = match write {
        Some(w) => {
            let target = w.target().ok_or_else(|| {
                FscError::invalid_config(format!("fans.{}.write_source", name), "no target")
            })?;
            if target.kind() != read.kind() {
                return Err(FscError::invalid_config(
                    format!("fans.{}.write_source", name),
                    "read and write sources must be of the same type",
                ));
            }
            Some((target, w.max_duty_register))
        }
        None => None,
    };

    let source: Box<dyn SensorSource> = match read {
        SourceSpec::Sysfs(path) => {
            let mut source = SysfsSource::new(name, path.as_str());
            if let Some((target, max_duty)) = write_target {
                source = source.with_write(target.target(), max_duty);
            }
            Box::new(source)
        }
        SourceSpec::Util(cmd) => {
            let mut source = UtilSource::new(name, cmd.as_str()).with_runner(make_runner());
            if let Some((target, max_duty)) = write_target {
                source = source.with_write(target.target(), max_duty);
            }
            Box::new(source)
        }
    };
    Ok(source)
}

pub struct Fscd {
    config: FscConfig,
    fans: BTreeMap<String, Fan>,
    machine: Machine,
    zones: Vec<Zone>,
    modes: Vec<FanMode>,
    dead_fans: BTreeSet<String>,
}

impl Fscd {
    /// Build the service with shell-backed utility sources
    pub fn build(config: FscConfig, zone_dir: &Path) -> Result<Self> {
        Self::build_with_runner(config, zone_dir, &|| -> Box<dyn CommandRunner> {
            Box::new(ShellRunner)
        })
    }

    pub fn build_with_runner(
        config: FscConfig,
        zone_dir: &Path,
        make_runner: RunnerFactory<'_>,
    ) -> Result<Self> {
        let mut fans = BTreeMap::new();
        for (name, fan_cfg) in &config.fans {
            let source = build_source(
                name,
                &fan_cfg.read_source,
                fan_cfg.write_source.as_ref(),
                make_runner,
            )?;
            fans.insert(name.clone(), Fan::new(name.as_str(), fan_cfg.label.clone(), source));
        }

        let mut machine = Machine::new(build_source(
            "sensor_source",
            &config.sensor_source,
            None,
            make_runner,
        )?);

        let mut profiles = Profiles::new();
        for (name, profile) in config.profile_configs()? {
            profiles.insert_spec(name.as_str(), &profile.spec);
            if let Some(read) = &profile.read_source {
                let source = build_source(&name, read, None, make_runner)?;
                debug!(profile = %name, fru = %profile.fru, "STARTUP: path sensor {}", profile.sensor);
                machine.add_path_sensor(profile.fru, profile.sensor, source);
            }
        }

        if config.fail_sensor_type.is_some() && !config.boost.sensor_fail {
            warn!("STARTUP: fail_sensor_type is ignored without boost.sensor_fail");
        }
        let fail_sensor_type = config.effective_fail_sensor_type();
        let ssd_algorithm = config.effective_ssd_algorithm();

        let mut zones = Vec::with_capacity(config.zones.len());
        for (counter, (zone_name, zone_cfg)) in config.zones.iter().enumerate() {
            let (tree, info) = zone_cfg.build_expression(zone_dir, &profiles)?;
            machine.register_expression(&info);
            let settings = ZoneSettings {
                pwm_output: zone_cfg.pwm_output.fan_names(),
                transitional: config.pwm_transition_value,
                boost: config.pwm_boost_value,
                counter,
                fail_sensor_type,
                ssd_progressive_algorithm: ssd_algorithm.clone(),
            };
            let zone = Zone::new(settings, tree, info);
            info!(
                zone = counter,
                name = %zone_name,
                fans = ?zone.pwm_output(),
                "STARTUP: Zone{}: {}",
                counter,
                zone.expr_str()
            );
            zones.push(zone);
        }

        let modes = vec![FanMode::Transitional; zones.len()];
        Ok(Self {
            config,
            fans,
            machine,
            zones,
            modes,
            dead_fans: BTreeSet::new(),
        })
    }

    pub fn set_verbose(&mut self, verbose: bool) {
        for zone in &mut self.zones {
            zone.set_verbose(verbose);
        }
    }

    pub fn config(&self) -> &FscConfig {
        &self.config
    }

    pub fn zones(&self) -> &[Zone] {
        &self.zones
    }

    /// Nominal `dt` of one cycle in seconds
    pub fn sample_interval_secs(&self) -> f64 {
        Duration::from_millis(self.config.sample_interval_ms).as_secs_f64()
    }

    pub fn dead_fans(&self) -> &BTreeSet<String> {
        &self.dead_fans
    }

    /// Write one duty cycle to every fan; failures are logged
    pub fn set_all_pwm(&mut self, percent: f64) {
        for fan in self.fans.values_mut() {
            if let Err(e) = fan.set_pwm(percent) {
                warn!(fan = %fan.name(), error = %e, "CONTROL: Failed to set fan speed");
            }
        }
    }

    /// Put every fan at the transitional duty cycle before the first cycle
    pub fn start(&mut self) {
        let transitional = self.config.pwm_transition_value;
        info!(
            fans = self.fans.len(),
            zones = self.zones.len(),
            "STARTUP: Setting all fans to transitional speed {}%",
            transitional
        );
        self.set_all_pwm(transitional);
        logger::log_event("startup", json!({ "pwm": transitional }));
    }

    /// Leave the fans at the transitional duty cycle on exit
    pub fn shutdown(&mut self) {
        let transitional = self.config.pwm_transition_value;
        warn!("SHUTDOWN: Setting all fans to transitional speed {}%", transitional);
        self.set_all_pwm(transitional);
        logger::log_event("shutdown", json!({ "pwm": transitional }));
    }

    /// Track fans below `min_rpm` or, with a threshold, without tachometer
    /// readings for that many consecutive cycles
    fn update_dead_fans(&mut self) {
        let speeds = read_fans(self.fans.values_mut());
        let threshold = self.config.fan_read_fail_threshold;
        let status: Vec<(String, String, Option<u32>, u32)> = self
            .fans
            .values()
            .map(|fan| {
                (
                    fan.name().to_string(),
                    fan.label().to_string(),
                    speeds.get(fan.name()).copied(),
                    fan.read_fail_counter(),
                )
            })
            .collect();

        for (name, label, rpm, failures) in status {
            match rpm {
                Some(rpm) if rpm >= self.config.min_rpm => {
                    if self.dead_fans.remove(&name) {
                        error!(fan = %name, rpm, "FAN: {} has recovered", label);
                        logger::log_event("fan_recovered", json!({ "fan": name, "rpm": rpm }));
                        for zone in &mut self.zones {
                            zone.reset_alarms();
                        }
                    }
                }
                Some(rpm) => {
                    if self.dead_fans.insert(name.clone()) {
                        error!(fan = %name, rpm, "FAN: {} dead, {} RPM", label, rpm);
                        logger::log_event("fan_dead", json!({ "fan": name, "rpm": rpm }));
                    }
                }
                None => {
                    let exceeded = threshold.is_some_and(|t| failures >= t);
                    if exceeded && self.dead_fans.insert(name.clone()) {
                        error!(
                            fan = %name,
                            failures,
                            "FAN: {} tachometer unreadable {} times",
                            label,
                            failures
                        );
                        logger::log_event(
                            "fan_read_fail",
                            json!({ "fan": name, "failures": failures }),
                        );
                    }
                }
            }
        }
    }

    /// Run one control cycle and return the duty cycle written per zone
    pub fn run_cycle(&mut self, dt: f64) -> Vec<f64> {
        if self.config.boost.fan_fail {
            self.update_dead_fans();
        }
        let fan_fail_boost = self.config.boost.fan_fail && !self.dead_fans.is_empty();

        let shared = if self.config.sensor_filter_all {
            None
        } else {
            Some(self.machine.read_sensors(None))
        };

        let mut applied = Vec::with_capacity(self.zones.len());
        for (idx, zone) in self.zones.iter_mut().enumerate() {
            let own;
            let snapshot = match &shared {
                Some(snapshot) => snapshot,
                None => {
                    own = self.machine.read_sensors(Some(zone.expr_meta()));
                    &own
                }
            };

            let previous = zone.last_pwm();
            let outcome = zone.evaluate(snapshot, dt);
            let (mut pwm, mut mode) = (outcome.pwm, outcome.mode);
            if fan_fail_boost {
                pwm = zone.boost();
                mode = FanMode::Boost;
            }
            pwm = apply_limits(
                pwm,
                self.config.fan_limit_upper_pwm,
                self.config.fan_limit_lower_pwm,
            );
            let ramped = apply_ramp(previous, pwm, self.config.ramp_rate);
            zone.set_last_pwm(ramped);

            if self.modes[idx] != mode {
                info!(zone = idx, mode = mode.as_str(), pwm = ramped, "CONTROL: Zone{} mode change", idx);
                logger::log_event(
                    "zone_mode",
                    json!({ "zone": idx, "mode": mode.as_str(), "pwm": ramped }),
                );
                if mode == FanMode::Boost && !fan_fail_boost {
                    logger::log_event("sensor_fail_boost", json!({ "zone": idx }));
                }
                self.modes[idx] = mode;
            }

            for name in zone.pwm_output() {
                match self.fans.get_mut(name) {
                    Some(fan) => {
                        if let Err(e) = fan.set_pwm(ramped) {
                            warn!(zone = idx, fan = %name, error = %e, "CONTROL: Failed to set fan speed");
                        }
                    }
                    None => warn!(zone = idx, fan = %name, "CONTROL: Unknown fan"),
                }
            }
            applied.push(ramped);
        }
        applied
    }

    /// Poll until `shutdown` is set
    pub fn run(&mut self, shutdown: &AtomicBool) {
        let interval = Duration::from_millis(self.config.sample_interval_ms);
        let mut last = Instant::now();
        while sleep_interruptible(interval, shutdown) {
            let now = Instant::now();
            let dt = now.duration_since(last).as_secs_f64();
            last = now;
            self.run_cycle(dt);
        }
        info!("SHUTDOWN: Control loop stopped");
    }
}

/// Sleep for `total`; false if shutdown was requested meanwhile
fn sleep_interruptible(total: Duration, shutdown: &AtomicBool) -> bool {
    let deadline = Instant::now() + total;
    loop {
        if shutdown.load(Ordering::SeqCst) {
            return false;
        }
        let now = Instant::now();
        if now >= deadline {
            return true;
        }
        thread::sleep(SHUTDOWN_POLL.min(deadline - now));
    }
}
