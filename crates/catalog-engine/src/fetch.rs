//! Cancellable, race-safe paginated fetching.
//!
//! # Design
//! - Every filter change (by value) cancels the in-flight request and issues
//!   a new one tagged with the next sequence number.
//! - Only the response for the latest issued sequence number may touch view
//!   state; anything older is discarded even if it arrives last.
//! - Cancelled requests are inert. Failures keep the last good page and set
//!   the error.
//! - Status lives in a `watch` channel so observers never need the
//!   controller's bookkeeping lock.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use catalog_events::EngineEvent;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::codec;
use crate::context::ViewContext;
use crate::error::{EngineError, EngineResult};
use crate::filter::{FilterSchema, FilterState};
use crate::rows::{Row, RowList};

/// Immutable snapshot of one list request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRequest {
    /// Monotonic sequence number assigned by the controller.
    pub seq: u64,
    /// Filter state the request was built from.
    pub filter: FilterState,
    /// Encoded query, paging fields always included.
    pub query: String,
    /// Requested page.
    pub page: u32,
    /// Requested page size.
    pub page_size: u32,
}

/// One page of results.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct FetchResult {
    /// Rows in display order.
    pub items: Vec<Row>,
    /// Total matching rows across all pages.
    pub total: u64,
    /// Page the server returned.
    pub page: u32,
    /// Page size the server applied.
    pub page_size: u32,
}

impl FetchResult {
    /// Number of pages needed to show `total` rows.
    #[must_use]
    pub fn page_count(&self) -> u32 {
        page_count(self.total, self.page_size)
    }
}

/// `ceil(total / page_size)`, with a zero page size treated as one.
#[must_use]
pub fn page_count(total: u64, page_size: u32) -> u32 {
    let size = u64::from(page_size.max(1));
    u32::try_from(total.div_ceil(size)).unwrap_or(u32::MAX)
}

/// Producer of list pages.
#[async_trait]
pub trait ListSource: Send + Sync {
    /// Fetch the page described by `request`.
    ///
    /// Implementations should stop early and return
    /// [`EngineError::Cancelled`] once `cancel` fires.
    async fn fetch(
        &self,
        request: &FetchRequest,
        cancel: CancellationToken,
    ) -> EngineResult<FetchResult>;
}

/// Something that can re-run its current query on demand.
pub trait RefreshTarget: Send + Sync {
    /// Re-issue the current query.
    fn request_refresh(&self);
}

/// Fetch bookkeeping visible to observers.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FetchStatus {
    /// Total from the last applied page.
    pub total: u64,
    /// Page from the last applied page.
    pub page: u32,
    /// Page size from the last applied page.
    pub page_size: u32,
    /// Whether a request is in flight.
    pub is_loading: bool,
    /// Error from the latest request, cleared by the next success.
    pub error: Option<EngineError>,
    /// Highest sequence number issued.
    pub issued_seq: u64,
    /// Sequence number of the page currently shown.
    pub applied_seq: u64,
}

/// Rendered state of a list view.
#[derive(Debug, Clone, PartialEq)]
pub struct ViewState {
    /// Visible rows.
    pub items: Vec<Row>,
    /// Total matching rows.
    pub total: u64,
    /// Current page.
    pub page: u32,
    /// Current page size.
    pub page_size: u32,
    /// Whether a request is in flight.
    pub is_loading: bool,
    /// Error banner contents.
    pub error: Option<EngineError>,
}

impl ViewState {
    /// Number of pages for the current total.
    #[must_use]
    pub fn page_count(&self) -> u32 {
        page_count(self.total, self.page_size)
    }
}

#[derive(Debug, Default)]
struct Bookkeeping {
    filter: Option<FilterState>,
    in_flight: Option<CancellationToken>,
}

struct ControllerInner {
    schema: Arc<FilterSchema>,
    source: Arc<dyn ListSource>,
    rows: RowList,
    ctx: ViewContext,
    book: Mutex<Bookkeeping>,
    status: watch::Sender<FetchStatus>,
}

/// Owns which page of which filtered collection is shown.
#[derive(Clone)]
pub struct PaginatedFetchController {
    inner: Arc<ControllerInner>,
}

impl std::fmt::Debug for PaginatedFetchController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PaginatedFetchController")
            .field("view", &self.inner.ctx.view())
            .field("status", &*self.inner.status.borrow())
            .finish_non_exhaustive()
    }
}

impl PaginatedFetchController {
    /// Controller writing fetched rows into `rows`.
    #[must_use]
    pub fn new(
        schema: Arc<FilterSchema>,
        source: Arc<dyn ListSource>,
        rows: RowList,
        ctx: ViewContext,
    ) -> Self {
        let defaults = schema.defaults();
        let status = watch::Sender::new(FetchStatus {
            page: defaults.page(&schema),
            page_size: defaults.page_size(&schema),
            ..FetchStatus::default()
        });
        Self {
            inner: Arc::new(ControllerInner {
                schema,
                source,
                rows,
                ctx,
                book: Mutex::new(Bookkeeping::default()),
                status,
            }),
        }
    }

    /// Apply a new input filter.
    ///
    /// Returns the sequence number of the issued request, or `None` when the
    /// filter equals the current one. Must be called within a Tokio runtime.
    pub fn set_filter(&self, filter: FilterState) -> Option<u64> {
        let mut book = self.inner.lock_book();
        if book.filter.as_ref() == Some(&filter) {
            trace!(view = self.inner.ctx.view(), "filter unchanged; no fetch");
            return None;
        }
        book.filter = Some(filter.clone());
        Some(self.issue(&mut book, filter))
    }

    /// Re-issue the current filter even though it did not change.
    ///
    /// Returns `None` before the first filter has been applied.
    pub fn refresh(&self) -> Option<u64> {
        let mut book = self.inner.lock_book();
        let filter = book.filter.clone()?;
        Some(self.issue(&mut book, filter))
    }

    /// Cancel any in-flight request and clear the loading flag.
    pub fn cancel(&self) {
        let mut book = self.inner.lock_book();
        if let Some(token) = book.in_flight.take() {
            token.cancel();
        }
        self.inner.status.send_if_modified(|status| {
            let was_loading = status.is_loading;
            status.is_loading = false;
            was_loading
        });
    }

    /// Current fetch status.
    #[must_use]
    pub fn status(&self) -> FetchStatus {
        self.inner.status.borrow().clone()
    }

    /// Receiver notified on every status change.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<FetchStatus> {
        self.inner.status.subscribe()
    }

    /// Filter of the latest issued request.
    #[must_use]
    pub fn filter(&self) -> Option<FilterState> {
        self.inner.lock_book().filter.clone()
    }

    /// Visible rows combined with the fetch status.
    #[must_use]
    pub fn view_state(&self) -> ViewState {
        let status = self.status();
        ViewState {
            items: self.inner.rows.visible(),
            total: status.total,
            page: status.page,
            page_size: status.page_size,
            is_loading: status.is_loading,
            error: status.error,
        }
    }

    /// Row list this controller writes into.
    #[must_use]
    pub fn rows(&self) -> &RowList {
        &self.inner.rows
    }

    fn issue(&self, book: &mut Bookkeeping, filter: FilterState) -> u64 {
        if let Some(previous) = book.in_flight.take() {
            previous.cancel();
        }
        let token = CancellationToken::new();
        book.in_flight = Some(token.clone());

        let mut seq = 0;
        self.inner.status.send_modify(|status| {
            status.issued_seq += 1;
            status.is_loading = true;
            seq = status.issued_seq;
        });

        let schema = &self.inner.schema;
        let request = FetchRequest {
            seq,
            query: codec::encode_request(schema, &filter),
            page: filter.page(schema),
            page_size: filter.page_size(schema),
            filter,
        };
        debug!(view = self.inner.ctx.view(), seq, query = %request.query, "fetch issued");
        self.inner.ctx.emit(EngineEvent::FetchIssued { seq });
        self.inner.ctx.record(catalog_telemetry::Metrics::inc_fetch_issued);

        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            let outcome = tokio::select! {
                biased;
                () = token.cancelled() => Err(EngineError::Cancelled),
                result = inner.source.fetch(&request, token.clone()) => result,
            };
            inner.complete(seq, outcome);
        });
        seq
    }
}

impl ControllerInner {
    fn lock_book(&self) -> MutexGuard<'_, Bookkeeping> {
        self.book.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn complete(&self, seq: u64, outcome: EngineResult<FetchResult>) {
        let mut book = self.lock_book();
        let latest = self.status.borrow().issued_seq;

        if let Err(err) = &outcome
            && err.is_cancellation()
        {
            trace!(view = self.ctx.view(), seq, "fetch cancelled");
            return;
        }
        if seq != latest {
            debug!(view = self.ctx.view(), seq, latest, "stale fetch discarded");
            self.ctx.emit(EngineEvent::FetchDiscarded { seq, latest });
            self.ctx.record(catalog_telemetry::Metrics::inc_fetch_stale);
            return;
        }
        book.in_flight = None;

        match outcome {
            Ok(result) => {
                let total = result.total;
                self.rows.replace(result.items);
                self.status.send_modify(|status| {
                    status.total = result.total;
                    status.page = result.page;
                    status.page_size = result.page_size;
                    status.is_loading = false;
                    status.error = None;
                    status.applied_seq = seq;
                });
                debug!(view = self.ctx.view(), seq, total, "fetch applied");
                self.ctx.emit(EngineEvent::FetchApplied { seq, total });
            }
            Err(err) => {
                warn!(view = self.ctx.view(), seq, error = %err, "fetch failed");
                self.ctx.emit(EngineEvent::FetchFailed {
                    seq,
                    message: err.to_string(),
                });
                self.ctx.record(catalog_telemetry::Metrics::inc_fetch_failed);
                self.status.send_modify(|status| {
                    status.is_loading = false;
                    status.error = Some(err);
                });
            }
        }
    }
}

impl RefreshTarget for PaginatedFetchController {
    fn request_refresh(&self) {
        if let Some(seq) = self.refresh() {
            debug!(view = self.inner.ctx.view(), seq, "refresh requested");
        }
    }
}
