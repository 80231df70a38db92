//! Layered configuration loading.
//!
//! # Design
//! - Layers apply lowest to highest: defaults, JSON file, `CATALOG_*` variables.
//! - The environment is an injected map so tests never mutate process state.
//! - Validation runs once, after every layer has been merged.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use tracing::debug;

use crate::error::{ConfigError, ConfigResult};
use crate::model::{EngineConfig, LogFormatChoice};
use crate::validate::validate;

/// Prefix shared by every recognised environment variable.
pub const ENV_PREFIX: &str = "CATALOG_";
/// Variable naming an optional JSON configuration file.
pub const ENV_CONFIG_FILE: &str = "CATALOG_CONFIG";

/// Builder that merges configuration layers into an [`EngineConfig`].
#[derive(Debug, Clone, Default)]
pub struct ConfigLoader {
    env: HashMap<String, String>,
    file: Option<PathBuf>,
}

impl ConfigLoader {
    /// Loader backed by the `CATALOG_*` variables of the current process.
    #[must_use]
    pub fn from_process_env() -> Self {
        Self::with_env(std::env::vars().filter(|(key, _)| key.starts_with(ENV_PREFIX)))
    }

    /// Loader backed by an explicit set of variables.
    #[must_use]
    pub fn with_env<I, K, V>(vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let env: HashMap<String, String> = vars
            .into_iter()
            .map(|(key, value)| (key.into(), value.into()))
            .collect();
        let file = env.get(ENV_CONFIG_FILE).map(PathBuf::from);
        Self { env, file }
    }

    /// Override the configuration file location.
    #[must_use]
    pub fn file(mut self, path: impl Into<PathBuf>) -> Self {
        self.file = Some(path.into());
        self
    }

    /// Merge every layer and validate the result.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] or [`ConfigError::Parse`] when the file layer
    /// cannot be read, and [`ConfigError::InvalidField`] when an override or the
    /// merged document fails validation.
    pub fn load(&self) -> ConfigResult<EngineConfig> {
        let mut config = match &self.file {
            Some(path) => read_file(path)?,
            None => EngineConfig::default(),
        };
        self.apply_env(&mut config)?;
        validate(&config)?;
        debug!(
            base_url = %config.base_url,
            debounce_ms = config.debounce_ms,
            job_poll_interval_ms = config.job_poll_interval_ms,
            job_max_attempts = config.job_max_attempts,
            "engine configuration loaded"
        );
        Ok(config)
    }

    fn apply_env(&self, config: &mut EngineConfig) -> ConfigResult<()> {
        if let Some(value) = self.var("BASE_URL") {
            config.base_url = value.to_string();
        }
        if let Some(value) = self.var("API_KEY") {
            config.api_key = Some(value.to_string()).filter(|key| !key.trim().is_empty());
        }
        if let Some(value) = self.var("REQUEST_TIMEOUT_MS") {
            config.request_timeout_ms = parse_number("request_timeout_ms", value)?;
        }
        if let Some(value) = self.var("DEBOUNCE_MS") {
            config.debounce_ms = parse_number("debounce_ms", value)?;
        }
        if let Some(value) = self.var("PAGE_SIZE") {
            config.default_page_size = parse_number("default_page_size", value)?;
        }
        if let Some(value) = self.var("MAX_PAGE_SIZE") {
            config.max_page_size = parse_number("max_page_size", value)?;
        }
        if let Some(value) = self.var("LIST_DELIMITER") {
            config.list_delimiter = value.to_string();
        }
        if let Some(value) = self.var("JOB_POLL_INTERVAL_MS") {
            config.job_poll_interval_ms = parse_number("job_poll_interval_ms", value)?;
        }
        if let Some(value) = self.var("JOB_MAX_ATTEMPTS") {
            config.job_max_attempts = parse_number("job_max_attempts", value)?;
        }
        if let Some(value) = self.var("EVENT_BUFFER") {
            config.event_buffer = parse_number("event_buffer", value)?;
        }
        if let Some(value) = self.var("LOG_LEVEL") {
            config.log_level = value.to_string();
        }
        if let Some(value) = self.var("LOG_FORMAT") {
            config.log_format = match value.to_ascii_lowercase().as_str() {
                "json" => LogFormatChoice::Json,
                "pretty" => LogFormatChoice::Pretty,
                "auto" => LogFormatChoice::Auto,
                _ => {
                    return Err(ConfigError::invalid(
                        "log_format",
                        value,
                        "must be json, pretty or auto",
                    ));
                }
            };
        }
        Ok(())
    }

    fn var(&self, suffix: &str) -> Option<&str> {
        self.env
            .get(&format!("{ENV_PREFIX}{suffix}"))
            .map(|value| value.trim())
    }
}

fn read_file(path: &Path) -> ConfigResult<EngineConfig> {
    let raw = fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

fn parse_number<T: FromStr>(field: &'static str, value: &str) -> ConfigResult<T> {
    value
        .parse()
        .map_err(|_| ConfigError::invalid(field, value, "must be a non-negative integer"))
}
