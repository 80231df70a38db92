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
//! Query-state orchestration and optimistic-action engine for catalog list views.
//!
//! Layout: `filter.rs` (schema and state), `codec.rs` (query-string codec),
//! `debounce.rs` (trailing debounce), `fetch.rs` (paginated fetch controller),
//! `store.rs` (state/location bridge), `rows.rs` (row list and selection),
//! `optimistic.rs` (optimistic mutations), `poller.rs` (job poller),
//! `view.rs` (per-view composition).

pub mod codec;
pub mod context;
pub mod debounce;
pub mod error;
pub mod fetch;
pub mod filter;
pub mod optimistic;
pub mod poller;
pub mod rows;
pub mod store;
pub mod view;

pub use catalog_api_models::{JobState, MutationReply};
pub use context::ViewContext;
pub use debounce::DebouncedValue;
pub use error::{EngineError, EngineResult};
pub use fetch::{
    FetchRequest, FetchResult, FetchStatus, ListSource, PaginatedFetchController, RefreshTarget,
    ViewState, page_count,
};
pub use filter::{FieldKind, FieldSpec, FieldValue, FilterSchema, FilterState};
pub use optimistic::{
    AggregateDelta, Mutation, MutationEndpoint, MutationHandle, MutationIntent, MutationOutcome,
    OptimisticActionManager,
};
pub use poller::{JobEndpoint, JobPoller, JobStatus, PollSettings, ProgressCounts};
pub use rows::{Row, RowId, RowKey, RowList, Selection};
pub use store::{Location, MemoryLocation, QueryStateStore, StorePhase, SyncOutcome};
pub use tokio_util::sync::CancellationToken;
pub use view::{ListView, ListViewBuilder};
