//! Errors raised while constructing an HTTP data service.
//!
//! Failures of individual calls are reported as engine errors instead, so
//! the engine can classify and surface them.

use thiserror::Error;

/// Convenience alias for client construction results.
pub type ClientResult<T> = Result<T, ClientError>;

/// Construction failures of [`crate::HttpDataService`].
#[derive(Debug, Error)]
pub enum ClientError {
    /// The configured base URL cannot be used as a request root.
    #[error("invalid base URL '{value}': {reason}")]
    InvalidBaseUrl {
        /// Offending value.
        value: String,
        /// Why the value was rejected.
        reason: String,
    },
    /// The API key contains characters not allowed in a header.
    #[error("API key is not a valid header value")]
    InvalidApiKey,
    /// The underlying HTTP client could not be built.
    #[error("failed to build HTTP client")]
    HttpClient {
        /// Source error from reqwest.
        #[source]
        source: reqwest::Error,
    },
}
