//! Per-view composition of the engine components.
//!
//! # Design
//! - One `ListView` per rendered list; nothing is shared between views.
//! - Search keystrokes flow through the debounce into the store (page reset,
//!   location push) and from there into the fetch controller.
//! - Navigation restores the store and feeds the controller directly.
//! - A finished job refreshes the controller.
//! - Dropping the view cancels the in-flight fetch, stops polling and tears
//!   down the debounce.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use catalog_config::EngineConfig;
use catalog_events::EventBus;
use catalog_telemetry::Metrics;
use serde_json::Value;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::context::ViewContext;
use crate::debounce::DebouncedValue;
use crate::error::{EngineError, EngineResult};
use crate::fetch::{FetchStatus, ListSource, PaginatedFetchController, ViewState};
use crate::filter::{FieldKind, FieldValue, FilterSchema, FilterState};
use crate::optimistic::{MutationEndpoint, MutationHandle, OptimisticActionManager};
use crate::poller::{JobEndpoint, JobPoller, JobStatus, PollSettings};
use crate::rows::{RowId, RowList, Selection};
use crate::store::{Location, QueryStateStore, SyncOutcome};

/// Builder for a [`ListView`].
pub struct ListViewBuilder {
    name: String,
    schema: FilterSchema,
    location: Option<Arc<dyn Location>>,
    source: Option<Arc<dyn ListSource>>,
    mutations: Option<Arc<dyn MutationEndpoint>>,
    jobs: Option<Arc<dyn JobEndpoint>>,
    search_field: Option<String>,
    debounce: Duration,
    poll: PollSettings,
    events: Option<EventBus>,
    metrics: Option<Metrics>,
    config: Option<EngineConfig>,
}

impl ListViewBuilder {
    /// Navigation location the view mirrors its filters into.
    #[must_use]
    pub fn location(mut self, location: Arc<dyn Location>) -> Self {
        self.location = Some(location);
        self
    }

    /// Producer of list pages.
    #[must_use]
    pub fn list_source(mut self, source: Arc<dyn ListSource>) -> Self {
        self.source = Some(source);
        self
    }

    /// Endpoint persisting row actions.
    #[must_use]
    pub fn mutations(mut self, endpoint: Arc<dyn MutationEndpoint>) -> Self {
        self.mutations = Some(endpoint);
        self
    }

    /// Endpoint for the view's generation job.
    #[must_use]
    pub fn jobs(mut self, endpoint: Arc<dyn JobEndpoint>) -> Self {
        self.jobs = Some(endpoint);
        self
    }

    /// Text field fed by debounced search input.
    #[must_use]
    pub fn search_field(mut self, field: impl Into<String>) -> Self {
        self.search_field = Some(field.into());
        self
    }

    /// Take debounce, polling, list shape and event buffer settings from
    /// `config`.
    ///
    /// The schema picks up the list delimiter and page size bounds when the
    /// view is built. Without an explicit bus, one is created with room for
    /// `event_buffer` events.
    #[must_use]
    pub fn config(mut self, config: &EngineConfig) -> Self {
        self.debounce = config.debounce();
        self.poll = PollSettings::from_config(config);
        self.config = Some(config.clone());
        self
    }

    /// Override the search debounce delay.
    #[must_use]
    pub fn debounce(mut self, delay: Duration) -> Self {
        self.debounce = delay;
        self
    }

    /// Override job polling settings.
    #[must_use]
    pub fn poll_settings(mut self, settings: PollSettings) -> Self {
        self.poll = settings;
        self
    }

    /// Publish engine events on `bus`.
    #[must_use]
    pub fn events(mut self, bus: EventBus) -> Self {
        self.events = Some(bus);
        self
    }

    /// Record engine counters in `metrics`.
    #[must_use]
    pub fn metrics(mut self, metrics: Metrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Mount the view: restore filters from the location and issue the
    /// first fetch.
    ///
    /// Must be called within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns a validation error when the location or list source is
    /// missing, the search field is not a text field of the schema, or the
    /// configured list shape does not fit the schema.
    pub fn build(self) -> EngineResult<ListView> {
        let location = self
            .location
            .ok_or_else(|| EngineError::validation("location", "a location is required"))?;
        let source = self
            .source
            .ok_or_else(|| EngineError::validation("list_source", "a list source is required"))?;
        if let Some(field) = &self.search_field
            && !matches!(self.schema.field(field).map(|spec| spec.kind()), Some(FieldKind::Text))
        {
            return Err(EngineError::validation(field, "search field must be a text field"));
        }
        let schema = match &self.config {
            Some(config) => self.schema.with_config(config)?,
            None => self.schema,
        };

        let mut ctx = ViewContext::new(self.name);
        let bus = self.events.or_else(|| {
            self.config
                .as_ref()
                .map(|config| EventBus::with_capacity(config.event_buffer))
        });
        if let Some(bus) = bus {
            ctx = ctx.with_events(bus);
        }
        if let Some(metrics) = self.metrics {
            ctx = ctx.with_metrics(metrics);
        }

        let schema = Arc::new(schema);
        let rows = RowList::new();
        let store = Arc::new(QueryStateStore::new(Arc::clone(&schema), location, ctx.clone()));
        let controller =
            PaginatedFetchController::new(Arc::clone(&schema), source, rows.clone(), ctx.clone());
        let actions = self
            .mutations
            .map(|endpoint| OptimisticActionManager::new(rows.clone(), endpoint, ctx.clone()));
        let jobs = self.jobs.map(|endpoint| {
            let poller = JobPoller::new(endpoint, self.poll, ctx.clone());
            poller.on_done(Arc::new(controller.clone()));
            poller
        });

        let restored = store.restore();
        controller.set_filter(restored.clone());

        let search = self.search_field.map(|field| {
            let initial = restored.text(&field).unwrap_or_default().to_string();
            let debounced = DebouncedValue::new(initial, self.debounce);
            let task = spawn_search_sync(
                debounced.subscribe(),
                field.clone(),
                Arc::clone(&store),
                controller.clone(),
            );
            SearchInput {
                field,
                debounced,
                task,
            }
        });

        debug!(view = ctx.view(), "list view mounted");
        Ok(ListView {
            ctx,
            schema,
            rows,
            store,
            controller,
            actions,
            jobs,
            search,
            selection: Mutex::new(Selection::default()),
        })
    }
}

fn spawn_search_sync(
    mut debounced: tokio::sync::watch::Receiver<String>,
    field: String,
    store: Arc<QueryStateStore>,
    controller: PaginatedFetchController,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while debounced.changed().await.is_ok() {
            let text = debounced.borrow_and_update().clone();
            match store.set_field(&field, FieldValue::Text(text)) {
                Ok(_) => {
                    controller.set_filter(store.state());
                }
                Err(err) => warn!(field = %field, error = %err, "search input rejected"),
            }
        }
    })
}

struct SearchInput {
    field: String,
    debounced: DebouncedValue<String>,
    task: JoinHandle<()>,
}

/// A mounted list view.
pub struct ListView {
    ctx: ViewContext,
    schema: Arc<FilterSchema>,
    rows: RowList,
    store: Arc<QueryStateStore>,
    controller: PaginatedFetchController,
    actions: Option<OptimisticActionManager>,
    jobs: Option<JobPoller>,
    search: Option<SearchInput>,
    selection: Mutex<Selection>,
}

impl std::fmt::Debug for ListView {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ListView")
            .field("view", &self.ctx.view())
            .field("filter", &self.store.state())
            .field("status", &self.controller.status())
            .finish_non_exhaustive()
    }
}

impl ListView {
    /// Start building a view called `name` over `schema`.
    #[must_use]
    pub fn builder(name: impl Into<String>, schema: FilterSchema) -> ListViewBuilder {
        ListViewBuilder {
            name: name.into(),
            schema,
            location: None,
            source: None,
            mutations: None,
            jobs: None,
            search_field: None,
            debounce: EngineConfig::default().debounce(),
            poll: PollSettings::default(),
            events: None,
            metrics: None,
            config: None,
        }
    }

    fn selection(&self) -> MutexGuard<'_, Selection> {
        self.selection.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn actions(&self) -> EngineResult<&OptimisticActionManager> {
        self.actions
            .as_ref()
            .ok_or_else(|| EngineError::validation("mutations", "view has no mutation endpoint"))
    }

    fn jobs(&self) -> EngineResult<&JobPoller> {
        self.jobs
            .as_ref()
            .ok_or_else(|| EngineError::validation("jobs", "view has no job endpoint"))
    }

    /// Feed a search keystroke; the filter follows after the debounce delay.
    ///
    /// # Errors
    ///
    /// Returns a validation error when the view has no search field.
    pub fn type_search(&self, text: impl Into<String>) -> EngineResult<()> {
        let search = self
            .search
            .as_ref()
            .ok_or_else(|| EngineError::validation("search", "view has no search field"))?;
        search.debounced.set(text.into());
        Ok(())
    }

    /// Set a filter field immediately.
    ///
    /// # Errors
    ///
    /// Returns a validation error for unknown fields or invalid values.
    pub fn set_field(&self, name: &str, value: FieldValue) -> EngineResult<SyncOutcome> {
        let outcome = self.store.set_field(name, value)?;
        if let Some(search) = &self.search
            && search.field == name
        {
            search
                .debounced
                .reset(self.store.state().text(name).unwrap_or_default().to_string());
        }
        self.controller.set_filter(self.store.state());
        Ok(outcome)
    }

    /// Re-read the location after back/forward navigation.
    pub fn navigate(&self) -> FilterState {
        let restored = self.store.restore();
        if let Some(search) = &self.search {
            search
                .debounced
                .reset(restored.text(&search.field).unwrap_or_default().to_string());
        }
        self.controller.set_filter(restored.clone());
        restored
    }

    /// Jump to `page`, clamped to the known page range.
    ///
    /// # Errors
    ///
    /// Returns a validation error when the schema has no page field.
    pub fn go_to_page(&self, page: u32) -> EngineResult<SyncOutcome> {
        let field = self
            .schema
            .page_field()
            .ok_or_else(|| EngineError::validation("page", "view is not paginated"))?
            .to_string();
        let last = self.state().page_count().max(1);
        let page = page.clamp(1, last);
        self.set_field(&field, FieldValue::Integer(i64::from(page)))
    }

    /// Advance one page, staying on the last page.
    ///
    /// # Errors
    ///
    /// Returns a validation error when the schema has no page field.
    pub fn next_page(&self) -> EngineResult<SyncOutcome> {
        let current = self.store.state().page(&self.schema);
        self.go_to_page(current.saturating_add(1))
    }

    /// Go back one page, staying on the first page.
    ///
    /// # Errors
    ///
    /// Returns a validation error when the schema has no page field.
    pub fn prev_page(&self) -> EngineResult<SyncOutcome> {
        let current = self.store.state().page(&self.schema);
        self.go_to_page(current.saturating_sub(1))
    }

    /// Re-fetch the current filter.
    pub fn refresh(&self) -> Option<u64> {
        self.controller.refresh()
    }

    /// Rendered state.
    #[must_use]
    pub fn state(&self) -> ViewState {
        self.controller.view_state()
    }

    /// Receiver notified on fetch status changes.
    #[must_use]
    pub fn subscribe(&self) -> tokio::sync::watch::Receiver<FetchStatus> {
        self.controller.subscribe()
    }

    /// Current filter state.
    #[must_use]
    pub fn filter(&self) -> FilterState {
        self.store.state()
    }

    /// Minimal query string for the current filter.
    #[must_use]
    pub fn query(&self) -> String {
        self.store.query()
    }

    /// Bus this view publishes on, if any.
    #[must_use]
    pub const fn events(&self) -> Option<&EventBus> {
        self.ctx.events()
    }

    /// Rows owned by this view.
    #[must_use]
    pub const fn rows(&self) -> &RowList {
        &self.rows
    }

    /// Flip selection of `id`, returning whether it is now selected.
    pub fn toggle_selected(&self, id: &RowId) -> bool {
        let visible = self.rows.visible_ids();
        let mut selection = self.selection();
        selection.retain_visible(&visible);
        if visible.contains(id) {
            selection.toggle(id)
        } else {
            false
        }
    }

    /// Select every visible row, or clear when all are selected.
    pub fn select_all_or_clear(&self) {
        let visible = self.rows.visible_ids();
        let mut selection = self.selection();
        selection.retain_visible(&visible);
        selection.select_all_or_clear(&visible);
    }

    /// Selected ids still visible on the current page.
    #[must_use]
    pub fn selected(&self) -> Vec<RowId> {
        let visible = self.rows.visible_ids();
        let mut selection = self.selection();
        selection.retain_visible(&visible);
        selection.ids().to_vec()
    }

    /// Toggle the `liked` flag of a row.
    ///
    /// # Errors
    ///
    /// Returns a validation error when the view has no mutation endpoint or
    /// the row is not loaded.
    pub fn toggle_like(&self, id: &RowId) -> EngineResult<MutationHandle> {
        self.actions()?.toggle_like(id)
    }

    /// Optimistically remove a row.
    ///
    /// # Errors
    ///
    /// Returns a validation error when the view has no mutation endpoint or
    /// the row is not loaded.
    pub fn remove(&self, id: &RowId) -> EngineResult<MutationHandle> {
        self.actions()?.remove(id)
    }

    /// Apply one field change to every selected row.
    ///
    /// # Errors
    ///
    /// Returns a validation error when the view has no mutation endpoint or
    /// a selected row is no longer loaded.
    pub fn apply_to_selected(&self, field: &str, value: &Value) -> EngineResult<Vec<MutationHandle>> {
        let selected = self.selected();
        self.actions()?.apply_bulk(&selected, field, value)
    }

    /// Optimistic action manager, when the view has a mutation endpoint.
    #[must_use]
    pub const fn action_manager(&self) -> Option<&OptimisticActionManager> {
        self.actions.as_ref()
    }

    /// Start the view's job for the selection, or for everything when
    /// `selected_only` is false or nothing is selected.
    ///
    /// Returns `false` when a job is already running.
    ///
    /// # Errors
    ///
    /// Returns a validation error when the view has no job endpoint.
    pub fn start_job(&self, selected_only: bool) -> EngineResult<bool> {
        let jobs = self.jobs()?;
        let targets = if selected_only {
            Some(self.selected()).filter(|ids| !ids.is_empty())
        } else {
            None
        };
        Ok(jobs.start(targets))
    }

    /// Current job status.
    ///
    /// # Errors
    ///
    /// Returns a validation error when the view has no job endpoint.
    pub fn job_status(&self) -> EngineResult<JobStatus> {
        Ok(self.jobs()?.status())
    }

    /// Job poller, when the view has a job endpoint.
    #[must_use]
    pub const fn job_poller(&self) -> Option<&JobPoller> {
        self.jobs.as_ref()
    }
}

impl Drop for ListView {
    fn drop(&mut self) {
        if let Some(search) = &self.search {
            search.task.abort();
        }
        self.controller.cancel();
        if let Some(jobs) = &self.jobs {
            jobs.stop();
        }
        debug!(view = self.ctx.view(), "list view torn down");
    }
}
