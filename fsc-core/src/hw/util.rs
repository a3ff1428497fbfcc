//! Sources backed by external utility commands
//!
//! Reads run `<read_source> [fru] [--filter names | number]` and return the
//! concatenated standard output. Writes fill a command template with the
//! scaled register value: `%d` is replaced when present, otherwise the
//! value is appended.

use std::fmt;
use std::io;
use std::process::Command;

use fsc_error::{FscError, Result};
use tracing::{debug, warn};

use crate::constants::{pwm, sensor};

use super::source::{scale_to_register, ReadScope, SensorSource, SourceKind};

/// Executes a shell command line and returns its standard output
#[cfg_attr(test, mockall::automock)]
pub trait CommandRunner {
    fn run(&self, command: &str) -> io::Result<String>;
}

/// Runs commands through `sh -c`
#[derive(Debug, Default, Clone, Copy)]
pub struct ShellRunner;

impl CommandRunner for ShellRunner {
    fn run(&self, command: &str) -> io::Result<String> {
        let output = Command::new("sh").arg("-c").arg(command).output()?;
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

/// Fill a write template with a register value
pub fn format_write_command(template: &str, raw: u64) -> String {
    if template.contains(sensor::WRITE_VALUE_PLACEHOLDER) {
        template.replacen(sensor::WRITE_VALUE_PLACEHOLDER, &raw.to_string(), 1)
    } else {
        format!("{} {}", template, raw)
    }
}

pub struct UtilSource {
    name: String,
    read_source: String,
    write_source: Option<String>,
    max_duty_register: u32,
    runner: Box<dyn CommandRunner>,
    read_fail_counter: u32,
}

impl UtilSource {
    pub fn new(name: impl Into<String>, read_source: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            read_source: read_source.into(),
            write_source: None,
            max_duty_register: pwm::DEFAULT_MAX_DUTY_REGISTER,
            runner: Box::new(ShellRunner),
            read_fail_counter: 0,
        }
    }

    pub fn with_write(mut self, write_source: impl Into<String>, max_duty_register: u32) -> Self {
        self.write_source = Some(write_source.into());
        self.max_duty_register = max_duty_register;
        self
    }

    pub fn with_runner(mut self, runner: Box<dyn CommandRunner>) -> Self {
        self.runner = runner;
        self
    }

    /// Command lines a read of `scope` executes, in order
    pub fn read_commands(&self, scope: &ReadScope<'_>) -> Vec<String> {
        let base = &self.read_source;
        match scope {
            ReadScope::All => vec![base.clone()],
            ReadScope::Fru(fru) => vec![format!("{} {}", base, fru)],
            ReadScope::Filtered { fru, sensors } => {
                let mut cmd = format!("{} {} --filter", base, fru);
                for name in sensors.iter() {
                    cmd.push(' ');
                    cmd.push_str(name);
                }
                vec![cmd]
            }
            ReadScope::Numbers { fru, numbers } => numbers
                .iter()
                .map(|num| format!("{} {} {}", base, fru, num))
                .collect(),
        }
    }
}

impl fmt::Debug for UtilSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UtilSource")
            .field("name", &self.name)
            .field("read_source", &self.read_source)
            .field("write_source", &self.write_source)
            .field("max_duty_register", &self.max_duty_register)
            .field("read_fail_counter", &self.read_fail_counter)
            .finish()
    }
}

impl SensorSource for UtilSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> SourceKind {
        SourceKind::Util
    }

    fn read(&mut self, scope: &ReadScope<'_>) -> String {
        let mut blob = String::new();
        let mut failed = false;
        for cmd in self.read_commands(scope) {
            debug!(source = %self.name, command = %cmd, "Running read command");
            match self.runner.run(&cmd) {
                Ok(out) => blob.push_str(&out),
                Err(e) => {
                    failed = true;
                    warn!(source = %self.name, command = %cmd, error = %e, "Read command failed");
                }
            }
        }
        if failed {
            self.read_fail_counter += 1;
        } else {
            self.read_fail_counter = 0;
        }
        blob
    }

    fn write(&mut self, value: f64) -> Result<()> {
        let Some(template) = &self.write_source else {
            return Ok(());
        };
        let cmd = format_write_command(template, scale_to_register(value, self.max_duty_register));
        debug!(source = %self.name, command = %cmd, "Running write command");

        let response = self
            .runner
            .run(&cmd)
            .map_err(|e| FscError::sensor_write(&cmd, e.to_string()))?;
        if response.contains(sensor::WRITE_ERROR_MARKER) {
            return Err(FscError::sensor_write(
                &cmd,
                format!("response={}", response.trim()),
            ));
        }
        Ok(())
    }

    fn read_fail_counter(&self) -> u32 {
        self.read_fail_counter
    }
}
