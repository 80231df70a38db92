#![forbid(unsafe_code)]
#![deny(
    unused_must_use,
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    rustdoc::broken_intra_doc_links,
    rustdoc::bare_urls,
    missing_docs
)]
#![allow(clippy::module_name_repetitions)]
//! Shared HTTP DTOs for the catalog data service.
//!
//! These types describe the list, mutation and job endpoints exactly as they
//! appear on the wire. Field names follow the service's camelCase contract;
//! unknown fields are ignored on every response so newer servers stay
//! compatible with older consoles.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Page of items returned by a list endpoint.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ListResponse {
    /// Raw item records in display order.
    #[serde(default)]
    pub items: Vec<Value>,
    /// Total number of items matching the filter across all pages.
    #[serde(default)]
    pub total: u64,
    /// One-based page number the server actually returned.
    #[serde(default = "default_page")]
    pub page: u32,
    /// Page size the server actually applied.
    #[serde(default)]
    pub page_size: u32,
}

const fn default_page() -> u32 {
    1
}

/// Body sent to a mutation endpoint.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MutationRequest {
    /// Identifier of the target row.
    pub id: String,
    /// Name of the projection field being changed.
    pub field: String,
    /// Requested next value.
    pub value: Value,
}

/// Keys that only signal success and never describe row state.
const ACK_KEYS: [&str; 2] = ["ok", "success"];

/// Successful mutation reply.
///
/// A JSON object body carries authoritative field values; anything else is a
/// bare acknowledgement.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum MutationReply {
    /// The server accepted the change without echoing fields.
    #[default]
    Acknowledged,
    /// The server echoed the authoritative state of the changed fields.
    Authoritative(Map<String, Value>),
}

impl MutationReply {
    /// Interpret a raw response body.
    #[must_use]
    pub fn from_body(body: &[u8]) -> Self {
        if body.iter().all(u8::is_ascii_whitespace) {
            return Self::Acknowledged;
        }
        match serde_json::from_slice::<Value>(body) {
            Ok(Value::Object(mut fields)) => {
                fields.retain(|key, _| !ACK_KEYS.contains(&key.as_str()));
                if fields.is_empty() {
                    Self::Acknowledged
                } else {
                    Self::Authoritative(fields)
                }
            }
            _ => Self::Acknowledged,
        }
    }
}

/// Request body used to start a generation job.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct GenerateJobRequest {
    /// Optional subset of target identifiers; omitted means "all".
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ids: Option<Vec<String>>,
}

/// Lifecycle state reported by a job status endpoint.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    /// No job has been started.
    Idle,
    /// The job is in progress.
    Running,
    /// The job finished successfully.
    Done,
    /// The job failed.
    Error,
}

/// Response body of `GET <job>/status`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct JobStatusResponse {
    /// Reported lifecycle state.
    pub status: JobState,
    /// Optional human-readable summary or failure message.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Items still waiting to be generated.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub missing_count: Option<u64>,
    /// Items targeted by the job.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_count: Option<u64>,
}

/// Error body returned with non-2xx statuses.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ErrorBody {
    /// Human-readable failure message.
    pub error: String,
}
