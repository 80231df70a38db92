//! Event payload types emitted by list views.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Identifier assigned to each event published on a bus.
pub type EventId = u64;

/// Default buffer size for the in-memory replay ring.
pub const DEFAULT_REPLAY_CAPACITY: usize = 256;

/// Typed engine events surfaced to views and diagnostics.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EngineEvent {
    /// A list request was dispatched.
    FetchIssued {
        /// Sequence number of the request.
        seq: u64,
    },
    /// A list response replaced the visible page.
    FetchApplied {
        /// Sequence number of the applied response.
        seq: u64,
        /// Total matching items reported by the server.
        total: u64,
    },
    /// A response arrived after a newer request had already been issued.
    FetchDiscarded {
        /// Sequence number of the stale response.
        seq: u64,
        /// Latest sequence number issued at the time.
        latest: u64,
    },
    /// A list request failed for a reason other than cancellation.
    FetchFailed {
        /// Sequence number of the failed request.
        seq: u64,
        /// Human-readable failure message.
        message: String,
    },
    /// Filter state was restored from the location.
    UrlRestored {
        /// Query string that was decoded.
        query: String,
    },
    /// A new location entry was pushed.
    UrlPushed {
        /// Query string that was written.
        query: String,
    },
    /// An optimistic change was applied locally.
    MutationApplied {
        /// Target row identifier.
        row_id: String,
        /// Mutated projection field.
        field: String,
    },
    /// The server confirmed an optimistic change.
    MutationConfirmed {
        /// Target row identifier.
        row_id: String,
        /// Mutated projection field.
        field: String,
    },
    /// An optimistic change was reverted after a failure.
    MutationRolledBack {
        /// Target row identifier.
        row_id: String,
        /// Mutated projection field.
        field: String,
        /// Failure message surfaced to the operator.
        message: String,
    },
    /// A background job changed state.
    JobStatusChanged {
        /// New status tag (`idle`, `running`, `done`, `error`).
        status: String,
        /// Optional summary or failure message.
        message: Option<String>,
    },
}

impl EngineEvent {
    /// Machine-friendly discriminator for log filters.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::FetchIssued { .. } => "fetch_issued",
            Self::FetchApplied { .. } => "fetch_applied",
            Self::FetchDiscarded { .. } => "fetch_discarded",
            Self::FetchFailed { .. } => "fetch_failed",
            Self::UrlRestored { .. } => "url_restored",
            Self::UrlPushed { .. } => "url_pushed",
            Self::MutationApplied { .. } => "mutation_applied",
            Self::MutationConfirmed { .. } => "mutation_confirmed",
            Self::MutationRolledBack { .. } => "mutation_rolled_back",
            Self::JobStatusChanged { .. } => "job_status_changed",
        }
    }
}

/// Metadata wrapper around events.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EventEnvelope {
    /// Sequential identifier assigned by the bus.
    pub id: EventId,
    /// Emission timestamp.
    pub timestamp: DateTime<Utc>,
    /// Name of the view that emitted the event.
    pub view: String,
    /// Event payload.
    pub event: EngineEvent,
}
