//! Constants and configuration values for fscd
//!
//! Centralizes magic numbers, status tags, and defaults shared by the
//! evaluator, the zone controller and the sensor sources.

/// Sensor status tags reported by the sensor utility
pub mod status {
    /// Upper critical threshold breached
    pub const UCR: &str = "ucr";
    /// Reading not available
    pub const NA: &str = "na";
    pub const OK: &str = "ok";
}

/// Expression language reserved names
pub mod expr {
    /// Seconds since the previous evaluation of the same tree
    pub const DT_KEY: &str = "dt";
    pub const BUILTIN_HOLD: &str = "hold";
    pub const BUILTIN_MAX: &str = "max";
}

/// PWM duty-cycle limits
pub mod pwm {
    pub const MIN_PERCENT: f64 = 0.0;
    pub const MAX_PERCENT: f64 = 100.0;
    /// Register value written for a 100% duty cycle unless configured
    pub const DEFAULT_MAX_DUTY_REGISTER: u32 = 100;
}

/// Sensor source and parser constants
pub mod sensor {
    /// Late-bound hwmon directory marker in sysfs path templates
    pub const HWMON_GLOB: &str = "hwmon*";
    /// Directory entries considered when resolving `HWMON_GLOB`
    pub const HWMON_PREFIX: &str = "hwmon";
    /// Substring in a write-command response that marks a failed write
    pub const WRITE_ERROR_MARKER: &str = "Error";
    /// Placeholder for the register value in write-command templates
    pub const WRITE_VALUE_PLACEHOLDER: &str = "%d";
    /// Lines emitted by utility wrappers instead of sensor data
    pub const NOISE_MARKERS: &[&str] = &["failed", "SDR is missing", "not present"];
    /// Display-name prefix of storage-device sensors
    pub const SSD_NAME_PREFIX: &str = "SSD";
    /// Symbolic-name marker of M.2 device temperature sensors
    pub const SSD_SYMBOLIC_MARKER: &str = "temp_dev";
    /// Path-based temperature sensors report millidegrees
    pub const MILLIDEGREES_PER_DEGREE: f64 = 1000.0;
    /// Consecutive missing cycles tolerated before the missing-sensor ASSERT
    pub const MISSING_ASSERT_RETRIES: u32 = 2;
}

/// Daemon-level defaults
pub mod defaults {
    pub const BOOST_PERCENT: f64 = 100.0;
    pub const TRANSITIONAL_PERCENT: f64 = 70.0;
    /// Maximum duty-cycle step per poll cycle
    pub const RAMP_RATE_PERCENT: f64 = 10.0;
    /// FRU name for path-based sensors registered without one
    pub const PATH_SENSOR_FRU: &str = "sys";
}
