//! File-path sensor sources
//!
//! Paths may contain one `hwmon*` component. The kernel numbers hwmon
//! devices in probe order, so the concrete directory is only known at
//! runtime; it is resolved on first use and memoized. An unresolved path
//! is retried on every call until the device shows up.

use std::fs;
use std::path::{Path, PathBuf};

use fsc_error::{FscError, Result};
use tracing::{debug, warn};

use crate::constants::{pwm, sensor};

use super::source::{scale_to_register, ReadScope, SensorSource, SourceKind};

/// Resolve the `hwmon*` component of `template` against the filesystem.
///
/// Templates without the marker resolve to themselves. Otherwise the
/// directory before the marker is scanned for `hwmon` entries in name
/// order and the first candidate whose full path exists wins.
pub fn resolve_hwmon_path(template: &str) -> Option<PathBuf> {
    let Some(idx) = template.find(sensor::HWMON_GLOB) else {
        return Some(PathBuf::from(template));
    };
    let prefix = &template[..idx];
    let rest = &template[idx + sensor::HWMON_GLOB.len()..];
    let dir = if prefix.is_empty() { Path::new(".") } else { Path::new(prefix) };

    let mut candidates: Vec<PathBuf> = fs::read_dir(dir)
        .ok()?
        .flatten()
        .filter(|ent| {
            ent.file_name()
                .to_str()
                .is_some_and(|name| name.starts_with(sensor::HWMON_PREFIX))
        })
        .map(|ent| ent.path())
        .collect();
    candidates.sort();

    candidates
        .into_iter()
        .map(|dir| PathBuf::from(format!("{}{}", dir.display(), rest)))
        .find(|path| path.exists())
}

/// Sensor or fan backed by sysfs files
#[derive(Debug, Clone)]
pub struct SysfsSource {
    name: String,
    read_source: String,
    write_source: Option<String>,
    max_duty_register: u32,
    resolved_read: Option<PathBuf>,
    resolved_write: Option<PathBuf>,
    read_fail_counter: u32,
}

impl SysfsSource {
    pub fn new(name: impl Into<String>, read_source: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            read_source: read_source.into(),
            write_source: None,
            max_duty_register: pwm::DEFAULT_MAX_DUTY_REGISTER,
            resolved_read: None,
            resolved_write: None,
            read_fail_counter: 0,
        }
    }

    pub fn with_write(mut self, write_source: impl Into<String>, max_duty_register: u32) -> Self {
        self.write_source = Some(write_source.into());
        self.max_duty_register = max_duty_register;
        self
    }

    fn read_path(&mut self) -> Option<PathBuf> {
        if self.resolved_read.is_none() {
            self.resolved_read = resolve_hwmon_path(&self.read_source);
        }
        self.resolved_read.clone()
    }

    fn write_path(&mut self, template: &str) -> Option<PathBuf> {
        if self.resolved_write.is_none() {
            self.resolved_write = resolve_hwmon_path(template);
        }
        self.resolved_write.clone()
    }
}

impl SensorSource for SysfsSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> SourceKind {
        SourceKind::Sysfs
    }

    fn read(&mut self, _scope: &ReadScope<'_>) -> String {
        let Some(path) = self.read_path() else {
            self.read_fail_counter += 1;
            debug!(source = %self.name, path = %self.read_source, "hwmon path not resolved yet");
            return String::new();
        };

        match fs::read_to_string(&path) {
            Ok(text) => {
                self.read_fail_counter = 0;
                text
            }
            Err(e) => {
                self.read_fail_counter += 1;
                warn!(
                    source = %self.name,
                    path = %path.display(),
                    error = %e,
                    failures = self.read_fail_counter,
                    "Failed to read sysfs source"
                );
                String::new()
            }
        }
    }

    fn write(&mut self, value: f64) -> Result<()> {
        let Some(template) = self.write_source.clone() else {
            return Ok(());
        };
        let path = self
            .write_path(&template)
            .ok_or_else(|| FscError::sensor_write(&template, "hwmon path not resolved"))?;

        let raw = scale_to_register(value, self.max_duty_register);
        debug!(source = %self.name, path = %path.display(), raw, "Writing duty cycle");
        fs::write(&path, raw.to_string())
            .map_err(|e| FscError::sensor_write(path.display().to_string(), e.to_string()))
    }

    fn read_fail_counter(&self) -> u32 {
        self.read_fail_counter
    }
}
