//! Error types for configuration loading and validation.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Primary error type for configuration operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Field contained an invalid value.
    #[error("invalid value for '{field}': {reason}")]
    InvalidField {
        /// Field that failed validation.
        field: &'static str,
        /// Offending value when available.
        value: Option<String>,
        /// Machine-readable reason for the failure.
        reason: &'static str,
    },
    /// Reading the configuration file failed.
    #[error("failed to read configuration file {path}")]
    Io {
        /// File that could not be read.
        path: PathBuf,
        /// Source IO error.
        #[source]
        source: io::Error,
    },
    /// The configuration file was not valid JSON for the model.
    #[error("failed to parse configuration file {path}")]
    Parse {
        /// File that could not be parsed.
        path: PathBuf,
        /// Source serde error.
        #[source]
        source: serde_json::Error,
    },
}

impl ConfigError {
    pub(crate) fn invalid(field: &'static str, value: impl ToString, reason: &'static str) -> Self {
        Self::InvalidField {
            field,
            value: Some(value.to_string()),
            reason,
        }
    }
}

/// Convenience alias for configuration results.
pub type ConfigResult<T> = Result<T, ConfigError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_field_renders_field_and_reason() {
        let err = ConfigError::invalid("debounce_ms", 0, "must be positive");
        assert_eq!(err.to_string(), "invalid value for 'debounce_ms': must be positive");
        match err {
            ConfigError::InvalidField { value, .. } => assert_eq!(value.as_deref(), Some("0")),
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
