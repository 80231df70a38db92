//! Typed configuration model for list-view engines.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::defaults;

/// Preferred log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormatChoice {
    /// Pick based on the build profile.
    #[default]
    Auto,
    /// Structured JSON lines.
    Json,
    /// Human-readable output.
    Pretty,
}

/// Engine configuration shared by every list view in a console process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Data service root URL.
    pub base_url: String,
    /// Optional API key sent with every request.
    pub api_key: Option<String>,
    /// Per-request HTTP timeout in milliseconds.
    pub request_timeout_ms: u64,
    /// Search debounce delay in milliseconds.
    pub debounce_ms: u64,
    /// Default page size for list views.
    pub default_page_size: u32,
    /// Largest page size a view may request.
    pub max_page_size: u32,
    /// Delimiter joining multi-valued query fields.
    pub list_delimiter: String,
    /// Job status poll interval in milliseconds.
    pub job_poll_interval_ms: u64,
    /// Job poll attempt ceiling.
    pub job_max_attempts: u32,
    /// Event bus capacity per view.
    pub event_buffer: usize,
    /// Log level used when `RUST_LOG` is absent.
    pub log_level: String,
    /// Log output format.
    pub log_format: LogFormatChoice,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            base_url: defaults::BASE_URL.to_string(),
            api_key: None,
            request_timeout_ms: defaults::REQUEST_TIMEOUT_MS,
            debounce_ms: defaults::DEBOUNCE_MS,
            default_page_size: defaults::PAGE_SIZE,
            max_page_size: defaults::MAX_PAGE_SIZE,
            list_delimiter: defaults::LIST_DELIMITER.to_string(),
            job_poll_interval_ms: defaults::JOB_POLL_INTERVAL_MS,
            job_max_attempts: defaults::JOB_MAX_ATTEMPTS,
            event_buffer: defaults::EVENT_BUFFER,
            log_level: defaults::LOG_LEVEL.to_string(),
            log_format: LogFormatChoice::Auto,
        }
    }
}

impl EngineConfig {
    /// Per-request HTTP timeout.
    #[must_use]
    pub const fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// Search debounce delay.
    #[must_use]
    pub const fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    /// Job status poll interval.
    #[must_use]
    pub const fn job_poll_interval(&self) -> Duration {
        Duration::from_millis(self.job_poll_interval_ms)
    }
}
