//! Error taxonomy shared by every engine component.

use thiserror::Error;

/// Failures surfaced by engine components and endpoint adapters.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum EngineError {
    /// Transport-level failure; the operator may retry the action.
    #[error("{operation} failed: {message}")]
    Network {
        /// Operation that was in flight.
        operation: String,
        /// Transport error description.
        message: String,
    },
    /// The request was superseded or torn down.
    #[error("request cancelled")]
    Cancelled,
    /// Input was rejected before dispatch.
    #[error("invalid value for '{field}': {reason}")]
    Validation {
        /// Field that failed validation.
        field: String,
        /// Reason for the rejection.
        reason: String,
    },
    /// The endpoint answered with a non-success status.
    #[error("{message}")]
    Server {
        /// HTTP status code.
        status: u16,
        /// Message taken from the response body when present.
        message: String,
    },
    /// A background job exceeded its poll budget.
    #[error("job did not finish after {attempts} status checks")]
    Timeout {
        /// Number of polls performed before giving up.
        attempts: u32,
    },
}

impl EngineError {
    pub(crate) fn validation(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Construct a transport failure for `operation`.
    #[must_use]
    pub fn network(operation: impl Into<String>, message: impl ToString) -> Self {
        Self::Network {
            operation: operation.into(),
            message: message.to_string(),
        }
    }

    /// Whether the error only records that work was abandoned.
    #[must_use]
    pub const fn is_cancellation(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// Whether re-triggering the action may succeed.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        match self {
            Self::Network { .. } | Self::Timeout { .. } => true,
            Self::Server { status, .. } => *status >= 500,
            Self::Cancelled | Self::Validation { .. } => false,
        }
    }

    /// Message suitable for a per-view error banner.
    ///
    /// Cancellations are never shown to the operator.
    #[must_use]
    pub fn user_message(&self) -> Option<String> {
        match self {
            Self::Cancelled => None,
            other => Some(other.to_string()),
        }
    }
}

/// Convenience alias for engine results.
pub type EngineResult<T> = Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancellation_is_never_shown() {
        assert!(EngineError::Cancelled.is_cancellation());
        assert_eq!(EngineError::Cancelled.user_message(), None);
    }

    #[test]
    fn server_errors_surface_body_message() {
        let err = EngineError::Server {
            status: 409,
            message: "product already archived".into(),
        };
        assert_eq!(err.user_message().as_deref(), Some("product already archived"));
        assert!(!err.is_retryable());
        assert!(
            EngineError::Server {
                status: 503,
                message: "busy".into()
            }
            .is_retryable()
        );
    }

    #[test]
    fn timeout_names_the_attempt_count() {
        let err = EngineError::Timeout { attempts: 360 };
        assert_eq!(err.to_string(), "job did not finish after 360 status checks");
        assert!(err.is_retryable());
    }
}
