//! Sensor source abstraction
//!
//! A source is anything that can produce a raw text blob of readings and,
//! for fan outputs, accept a duty cycle. Parsing the blob is the job of the
//! machine layer.

use std::fmt;

use fsc_error::Result;
use serde::Deserialize;

use crate::constants::pwm;

/// What a read should cover
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadScope<'a> {
    /// Whatever the source reads by itself
    All,
    /// Every sensor of one FRU
    Fru(&'a str),
    /// Only the named sensors of one FRU
    Filtered { fru: &'a str, sensors: &'a [String] },
    /// One read per explicit sensor number on one FRU
    Numbers { fru: &'a str, numbers: &'a [String] },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    Sysfs,
    Util,
}

/// Source configuration: `{"sysfs": "<path>"}` or `{"util": "<command>"}`
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceSpec {
    Sysfs(String),
    Util(String),
}

impl SourceSpec {
    pub fn kind(&self) -> SourceKind {
        match self {
            SourceSpec::Sysfs(_) => SourceKind::Sysfs,
            SourceSpec::Util(_) => SourceKind::Util,
        }
    }

    pub fn target(&self) -> &str {
        match self {
            SourceSpec::Sysfs(s) | SourceSpec::Util(s) => s,
        }
    }
}

pub trait SensorSource: fmt::Debug {
    /// Identifier used in logs
    fn name(&self) -> &str;

    fn kind(&self) -> SourceKind;

    /// Raw reading text; empty when the read failed
    fn read(&mut self, scope: &ReadScope<'_>) -> String;

    /// Drive the output with a duty cycle in percent
    fn write(&mut self, value: f64) -> Result<()>;

    /// Consecutive failed reads since the last success
    fn read_fail_counter(&self) -> u32;
}

/// Scale a duty-cycle percentage to the output register range
///
/// The percentage is clamped to 0-100; the scaled register value is truncated.
pub fn scale_to_register(value: f64, max_duty_register: u32) -> u64 {
    let pct = value.clamp(pwm::MIN_PERCENT, pwm::MAX_PERCENT);
    (pct * f64::from(max_duty_register) / pwm::MAX_PERCENT) as u64
}
