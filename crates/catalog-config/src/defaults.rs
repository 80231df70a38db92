//! Default values for engine configuration.
//!
//! # Design
//! - Centralize defaults so the model, loader and tests agree.
//! - Keep time-based defaults in milliseconds for direct `Duration` conversion.

/// Data service root used when nothing else is configured.
pub const BASE_URL: &str = "http://127.0.0.1:8080";
/// Per-request HTTP timeout.
pub const REQUEST_TIMEOUT_MS: u64 = 15_000;
/// Search debounce delay.
pub const DEBOUNCE_MS: u64 = 300;
/// Upper bound accepted for the debounce delay.
pub const MAX_DEBOUNCE_MS: u64 = 10_000;
/// Default page size for list views.
pub const PAGE_SIZE: u32 = 25;
/// Largest page size a view may request.
pub const MAX_PAGE_SIZE: u32 = 200;
/// Delimiter joining multi-valued query fields.
pub const LIST_DELIMITER: &str = ",";
/// Job status poll interval.
pub const JOB_POLL_INTERVAL_MS: u64 = 5_000;
/// Job poll attempt ceiling (30 minutes at the default interval).
pub const JOB_MAX_ATTEMPTS: u32 = 360;
/// Event bus capacity per view.
pub const EVENT_BUFFER: usize = 256;
/// Log level used when `RUST_LOG` is absent.
pub const LOG_LEVEL: &str = "info";
