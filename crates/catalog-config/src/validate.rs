//! Validation helpers for engine configuration.

use url::Url;

use crate::defaults::MAX_DEBOUNCE_MS;
use crate::error::{ConfigError, ConfigResult};
use crate::model::EngineConfig;

/// Validate a fully merged configuration.
///
/// # Errors
///
/// Returns [`ConfigError::InvalidField`] for the first field that fails.
pub fn validate(config: &EngineConfig) -> ConfigResult<()> {
    validate_base_url(&config.base_url)?;
    if config.request_timeout_ms == 0 {
        return Err(ConfigError::invalid(
            "request_timeout_ms",
            config.request_timeout_ms,
            "must be positive",
        ));
    }
    if config.debounce_ms > MAX_DEBOUNCE_MS {
        return Err(ConfigError::invalid(
            "debounce_ms",
            config.debounce_ms,
            "must not exceed 10000",
        ));
    }
    if config.max_page_size == 0 {
        return Err(ConfigError::invalid(
            "max_page_size",
            config.max_page_size,
            "must be positive",
        ));
    }
    if config.default_page_size == 0 || config.default_page_size > config.max_page_size {
        return Err(ConfigError::invalid(
            "default_page_size",
            config.default_page_size,
            "must be between 1 and max_page_size",
        ));
    }
    validate_delimiter(&config.list_delimiter)?;
    if config.job_poll_interval_ms == 0 {
        return Err(ConfigError::invalid(
            "job_poll_interval_ms",
            config.job_poll_interval_ms,
            "must be positive",
        ));
    }
    if config.job_max_attempts == 0 {
        return Err(ConfigError::invalid(
            "job_max_attempts",
            config.job_max_attempts,
            "must be positive",
        ));
    }
    if config.event_buffer == 0 {
        return Err(ConfigError::invalid(
            "event_buffer",
            config.event_buffer,
            "must be positive",
        ));
    }
    Ok(())
}

fn validate_base_url(value: &str) -> ConfigResult<()> {
    let url =
        Url::parse(value).map_err(|_| ConfigError::invalid("base_url", value, "not a URL"))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(ConfigError::invalid(
            "base_url",
            value,
            "scheme must be http or https",
        ));
    }
    Ok(())
}

/// Whether `value` can join list items in a query string.
///
/// Encoded items never contain the delimiter, so it must be non-empty and
/// built only from characters percent-encoding always escapes. Query
/// separators and `+` (read back as a space) are excluded as well.
#[must_use]
pub fn is_usable_delimiter(value: &str) -> bool {
    !value.is_empty()
        && value.chars().all(|ch| {
            !(ch.is_alphanumeric()
                || ch.is_whitespace()
                || ch.is_control()
                || matches!(ch, '-' | '_' | '.' | '~' | '&' | '=' | '%' | '+' | '#'))
        })
}

fn validate_delimiter(value: &str) -> ConfigResult<()> {
    if value.is_empty() {
        return Err(ConfigError::invalid(
            "list_delimiter",
            value,
            "must not be empty",
        ));
    }
    if !is_usable_delimiter(value) {
        return Err(ConfigError::invalid(
            "list_delimiter",
            value,
            "must only use characters that are escaped inside values",
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn field_of(err: ConfigError) -> &'static str {
        match err {
            ConfigError::InvalidField { field, .. } => field,
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn defaults_are_valid() {
        assert!(validate(&EngineConfig::default()).is_ok());
    }

    #[test]
    fn rejects_non_http_base_url() {
        let config = EngineConfig {
            base_url: "ftp://catalog".into(),
            ..EngineConfig::default()
        };
        assert_eq!(field_of(validate(&config).unwrap_err()), "base_url");
    }

    #[test]
    fn rejects_page_size_above_ceiling() {
        let config = EngineConfig {
            default_page_size: 500,
            ..EngineConfig::default()
        };
        assert_eq!(field_of(validate(&config).unwrap_err()), "default_page_size");
    }

    #[test]
    fn rejects_delimiters_that_collide_with_values() {
        for bad in ["", "a", "&", "1", "+", "-", "_", ".", "~", " ", "#"] {
            let config = EngineConfig {
                list_delimiter: bad.into(),
                ..EngineConfig::default()
            };
            assert_eq!(field_of(validate(&config).unwrap_err()), "list_delimiter");
        }
        for good in ["|", ";", "||"] {
            let config = EngineConfig {
                list_delimiter: good.into(),
                ..EngineConfig::default()
            };
            assert!(validate(&config).is_ok(), "{good} should be accepted");
        }
    }

    #[test]
    fn rejects_zero_poll_budget() {
        let config = EngineConfig {
            job_max_attempts: 0,
            ..EngineConfig::default()
        };
        assert_eq!(field_of(validate(&config).unwrap_err()), "job_max_attempts");
    }
}
