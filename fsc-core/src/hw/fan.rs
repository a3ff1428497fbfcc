//! Fan outputs

use fsc_error::Result;
use tracing::debug;

use super::source::{ReadScope, SensorSource, SourceKind};

/// A fan: a tachometer to read and an output to drive
#[derive(Debug)]
pub struct Fan {
    name: String,
    label: String,
    number: Option<u32>,
    source: Box<dyn SensorSource>,
    missed_reads: u32,
}

impl Fan {
    /// Create a fan from its configuration key
    ///
    /// Numeric keys double as the fan index used by the fan utility output.
    pub fn new(name: impl Into<String>, label: Option<String>, source: Box<dyn SensorSource>) -> Self {
        let name = name.into();
        let number = name.parse().ok();
        let label = label.unwrap_or_else(|| format!("Fan {}", name));
        Self {
            name,
            label,
            number,
            source,
            missed_reads: 0,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn number(&self) -> Option<u32> {
        self.number
    }

    pub fn kind(&self) -> SourceKind {
        self.source.kind()
    }

    /// Raw tachometer text from the underlying source
    pub fn read_raw(&mut self) -> String {
        self.source.read(&ReadScope::All)
    }

    pub fn set_pwm(&mut self, percent: f64) -> Result<()> {
        debug!(fan = %self.name, percent, "Setting fan duty cycle");
        self.source.write(percent)
    }

    /// Record whether this cycle produced an RPM for the fan
    pub fn record_reading(&mut self, ok: bool) {
        if ok {
            self.missed_reads = 0;
        } else {
            self.missed_reads = self.missed_reads.saturating_add(1);
        }
    }

    /// Consecutive cycles without a tachometer reading
    ///
    /// Utility-backed fans share one read, so a fan missing from that output
    /// counts here even when the command itself succeeded.
    pub fn read_fail_counter(&self) -> u32 {
        self.missed_reads.max(self.source.read_fail_counter())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hw::SysfsSource;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_numeric_name_sets_number() {
        let fan = Fan::new("2", None, Box::new(SysfsSource::new("2", "/nonexistent")));
        assert_eq!(fan.number(), Some(2));
        assert_eq!(fan.label(), "Fan 2");

        let named = Fan::new("rear", Some("Rear Fan".into()), Box::new(SysfsSource::new("rear", "/x")));
        assert_eq!(named.number(), None);
        assert_eq!(named.label(), "Rear Fan");
    }

    #[test]
    fn test_set_pwm_writes_through_source() {
        let tmp = TempDir::new().unwrap();
        let tach = tmp.path().join("fan1_input");
        let pwm = tmp.path().join("pwm1");
        fs::write(&tach, "4800\n").unwrap();
        fs::write(&pwm, "0").unwrap();

        let source = SysfsSource::new("0", tach.display().to_string())
            .with_write(pwm.display().to_string(), 100);
        let mut fan = Fan::new("0", None, Box::new(source));
        fan.set_pwm(65.0).unwrap();
        assert_eq!(fs::read_to_string(&pwm).unwrap(), "65");
        assert_eq!(fan.read_raw().trim(), "4800");
    }

    #[test]
    fn test_read_fail_counter_tracks_missed_cycles() {
        let mut fan = Fan::new("3", None, Box::new(SysfsSource::new("3", "/nonexistent/fan3_input")));
        fan.record_reading(false);
        fan.record_reading(false);
        assert_eq!(fan.read_fail_counter(), 2);
        fan.record_reading(true);
        assert_eq!(fan.read_fail_counter(), 0);

        // I/O failures of the source count as well
        fan.read_raw();
        fan.read_raw();
        fan.read_raw();
        assert_eq!(fan.read_fail_counter(), 3);
    }
}
