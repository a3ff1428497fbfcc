//! Unified error handling for fscd
//!
//! This crate provides the single error type shared by the control core and
//! the daemon. It uses thiserror for the Display and Error trait impls.

use std::io;
use std::path::PathBuf;

/// Result type alias using FscError
pub type Result<T> = std::result::Result<T, FscError>;

/// Unified error type for all fscd operations
#[derive(thiserror::Error, Debug)]
pub enum FscError {
    // ============================================================================
    // File System Errors
    // ============================================================================
    #[error("Failed to read file {path}: {source}")]
    FileRead {
        path: PathBuf,
        source: io::Error,
    },

    // ============================================================================
    // Expression Errors (fatal at config load)
    // ============================================================================
    #[error("Invalid expression: {0}")]
    InvalidExpression(String),

    #[error("Expression syntax error: {0}")]
    ExpressionSyntax(String),

    // ============================================================================
    // Sensor Source Errors
    // ============================================================================
    #[error("Failed to write sensor source {target}: {reason}")]
    SensorWrite {
        target: String,
        reason: String,
    },

    // ============================================================================
    // Configuration Errors
    // ============================================================================
    #[error("Failed to parse JSON: {0}")]
    JsonParse(#[from] serde_json::Error),

    #[error("Invalid configuration value for {field}: {reason}")]
    InvalidConfig {
        field: String,
        reason: String,
    },

    #[error("Missing required configuration: {0}")]
    MissingConfig(String),
}

impl FscError {
    /// Create an invalid expression error
    pub fn invalid_expression(msg: impl Into<String>) -> Self {
        Self::InvalidExpression(msg.into())
    }

    /// Create an invalid config value error
    pub fn invalid_config(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Create a sensor write error
    pub fn sensor_write(target: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::SensorWrite {
            target: target.into(),
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_expression_display() {
        let err = FscError::invalid_expression("unknown operator '%'");
        assert_eq!(err.to_string(), "Invalid expression: unknown operator '%'");
    }

    #[test]
    fn test_file_read_display() {
        let err = FscError::FileRead {
            path: PathBuf::from("/etc/fsc/zone1.fsc"),
            source: io::Error::new(io::ErrorKind::NotFound, "gone"),
        };
        assert_eq!(err.to_string(), "Failed to read file /etc/fsc/zone1.fsc: gone");
    }

    #[test]
    fn test_sensor_write_display() {
        let err = FscError::sensor_write("fan-util --set 60 0", "response=Error");
        assert_eq!(
            err.to_string(),
            "Failed to write sensor source fan-util --set 60 0: response=Error"
        );
    }

    #[test]
    fn test_invalid_config_display() {
        let err = FscError::invalid_config("pwm_boost_value", "must be 0-100");
        assert_eq!(
            err.to_string(),
            "Invalid configuration value for pwm_boost_value: must be 0-100"
        );
    }
}
