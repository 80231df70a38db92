//! Two-way bridge between filter state and the location query string.
//!
//! # Design
//! - `restore` (mount, back/forward) decodes the location into state inside a
//!   `Restoring` phase and arms a one-shot guard; the sync pass that follows
//!   consumes the guard instead of pushing, so restores never write history.
//! - Local changes run a `Syncing` pass that pushes only when the encoded
//!   query differs from the location's current query.
//! - Both passes run under one lock, so pushes are serialised.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use catalog_events::EngineEvent;
use tokio::sync::watch;
use tracing::{debug, trace};

use crate::codec;
use crate::context::ViewContext;
use crate::error::EngineResult;
use crate::filter::{FieldValue, FilterSchema, FilterState};

/// Navigation location holding the shareable query string.
pub trait Location: Send + Sync {
    /// Current query string, without the leading `?`.
    fn query(&self) -> String;

    /// Record a new history entry with `query` without reloading.
    fn push(&self, query: &str);
}

#[derive(Debug)]
struct History {
    path: String,
    entries: Vec<String>,
    index: usize,
}

/// In-memory history stack, used by headless consoles and tests.
#[derive(Debug, Clone)]
pub struct MemoryLocation {
    inner: Arc<Mutex<History>>,
}

impl MemoryLocation {
    /// Location at `path` whose current query is `query`.
    #[must_use]
    pub fn new(path: impl Into<String>, query: impl Into<String>) -> Self {
        let query: String = query.into();
        Self {
            inner: Arc::new(Mutex::new(History {
                path: path.into(),
                entries: vec![query.trim_start_matches('?').to_string()],
                index: 0,
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, History> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Step back one entry, returning the new query.
    pub fn back(&self) -> Option<String> {
        let mut history = self.lock();
        history.index = history.index.checked_sub(1)?;
        Some(history.entries[history.index].clone())
    }

    /// Step forward one entry, returning the new query.
    pub fn forward(&self) -> Option<String> {
        let mut history = self.lock();
        if history.index + 1 >= history.entries.len() {
            return None;
        }
        history.index += 1;
        Some(history.entries[history.index].clone())
    }

    /// Number of history entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    /// Whether the history is empty (never true; one entry always exists).
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().entries.is_empty()
    }

    /// Every entry's query, oldest first.
    #[must_use]
    pub fn entries(&self) -> Vec<String> {
        self.lock().entries.clone()
    }

    /// Path plus query, as shown in an address bar.
    #[must_use]
    pub fn href(&self) -> String {
        let history = self.lock();
        let query = &history.entries[history.index];
        if query.is_empty() {
            history.path.clone()
        } else {
            format!("{}?{query}", history.path)
        }
    }
}

impl Location for MemoryLocation {
    fn query(&self) -> String {
        let history = self.lock();
        history.entries[history.index].clone()
    }

    fn push(&self, query: &str) {
        let mut history = self.lock();
        let keep = history.index + 1;
        history.entries.truncate(keep);
        history.entries.push(query.to_string());
        history.index = keep;
    }
}

/// Store phase; observable only while a pass is running.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StorePhase {
    /// No pass in progress.
    #[default]
    Idle,
    /// Location is being decoded into state.
    Restoring,
    /// State is being encoded into the location.
    Syncing,
}

/// Result of a state-to-location pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    /// A new history entry was pushed with this query.
    Pushed(String),
    /// The encoded query already matched the location.
    Unchanged,
    /// The pass was consumed by the restore guard.
    Skipped,
}

#[derive(Debug, Default)]
struct Machine {
    phase: StorePhase,
    skip_next_sync: bool,
}

/// Keeps one view's filter state and its location in step.
pub struct QueryStateStore {
    schema: Arc<FilterSchema>,
    location: Arc<dyn Location>,
    ctx: ViewContext,
    machine: Mutex<Machine>,
    state: watch::Sender<FilterState>,
}

impl std::fmt::Debug for QueryStateStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryStateStore")
            .field("view", &self.ctx.view())
            .field("state", &*self.state.borrow())
            .finish_non_exhaustive()
    }
}

impl QueryStateStore {
    /// Store starting at schema defaults; call [`Self::restore`] on mount.
    #[must_use]
    pub fn new(schema: Arc<FilterSchema>, location: Arc<dyn Location>, ctx: ViewContext) -> Self {
        let state = watch::Sender::new(schema.defaults());
        Self {
            schema,
            location,
            ctx,
            machine: Mutex::new(Machine::default()),
            state,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Machine> {
        self.machine.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Decode the location into state without writing history.
    ///
    /// Called on mount and after external navigation.
    pub fn restore(&self) -> FilterState {
        let mut machine = self.lock();
        machine.phase = StorePhase::Restoring;
        let query = self.location.query();
        let restored = codec::decode(&self.schema, &query);
        machine.skip_next_sync = true;
        self.state.send_if_modified(|current| {
            if *current == restored {
                false
            } else {
                current.clone_from(&restored);
                true
            }
        });
        let outcome = self.sync(&mut machine, &restored);
        debug_assert_eq!(outcome, SyncOutcome::Skipped);
        machine.phase = StorePhase::Idle;

        debug!(view = self.ctx.view(), query = %query, "filter state restored");
        self.ctx.emit(EngineEvent::UrlRestored { query });
        restored
    }

    /// Replace the state and sync the location.
    pub fn set(&self, next: FilterState) -> SyncOutcome {
        let mut machine = self.lock();
        let changed = self.state.send_if_modified(|current| {
            if *current == next {
                false
            } else {
                current.clone_from(&next);
                true
            }
        });
        if !changed {
            return SyncOutcome::Unchanged;
        }
        self.sync(&mut machine, &next)
    }

    /// Set one field (resetting the page when another field changes) and
    /// sync the location.
    ///
    /// # Errors
    ///
    /// Returns a validation error when the field is unknown or the value
    /// does not satisfy the schema; state and location are left untouched.
    pub fn set_field(&self, name: &str, value: FieldValue) -> EngineResult<SyncOutcome> {
        let next = self.state().with_field(&self.schema, name, value)?;
        Ok(self.set(next))
    }

    /// Current filter state.
    #[must_use]
    pub fn state(&self) -> FilterState {
        self.state.borrow().clone()
    }

    /// Receiver notified on every state change.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<FilterState> {
        self.state.subscribe()
    }

    /// Current phase.
    #[must_use]
    pub fn phase(&self) -> StorePhase {
        self.lock().phase
    }

    /// Minimal query string for the current state.
    #[must_use]
    pub fn query(&self) -> String {
        codec::encode(&self.schema, &self.state.borrow())
    }

    /// Schema this store encodes with.
    #[must_use]
    pub fn schema(&self) -> &Arc<FilterSchema> {
        &self.schema
    }

    fn sync(&self, machine: &mut Machine, state: &FilterState) -> SyncOutcome {
        if std::mem::take(&mut machine.skip_next_sync) {
            trace!(view = self.ctx.view(), "sync skipped after restore");
            return SyncOutcome::Skipped;
        }
        machine.phase = StorePhase::Syncing;
        let encoded = codec::encode(&self.schema, state);
        let outcome = if encoded == self.location.query() {
            SyncOutcome::Unchanged
        } else {
            self.location.push(&encoded);
            debug!(view = self.ctx.view(), query = %encoded, "location pushed");
            self.ctx.emit(EngineEvent::UrlPushed {
                query: encoded.clone(),
            });
            self.ctx.record(catalog_telemetry::Metrics::inc_url_push);
            SyncOutcome::Pushed(encoded)
        };
        machine.phase = StorePhase::Idle;
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::FieldSpec;

    fn store(query: &str) -> (QueryStateStore, MemoryLocation) {
        let schema = FilterSchema::new(vec![
            FieldSpec::text("q", ""),
            FieldSpec::boolean("liked", false),
            FieldSpec::page("page"),
            FieldSpec::page_size("pageSize", 25, 100),
        ])
        .and_then(|schema| schema.with_pagination("page", "pageSize"))
        .expect("schema");
        let location = MemoryLocation::new("/products", query);
        let store = QueryStateStore::new(
            Arc::new(schema),
            Arc::new(location.clone()),
            ViewContext::new("products"),
        );
        (store, location)
    }

    #[test]
    fn restore_never_pushes() {
        let (store, location) = store("?q=sofa&page=3");
        let state = store.restore();
        assert_eq!(state.text("q"), Some("sofa"));
        assert_eq!(state.integer("page"), Some(3));
        assert_eq!(location.len(), 1);
        assert_eq!(store.phase(), StorePhase::Idle);
    }

    #[test]
    fn guard_is_consumed_by_the_restore_pass_only() {
        let (store, location) = store("q=sofa");
        store.restore();
        let outcome = store.set_field("liked", FieldValue::Boolean(true));
        assert_eq!(
            outcome.expect("valid"),
            SyncOutcome::Pushed("q=sofa&liked=true".into())
        );
        assert_eq!(location.href(), "/products?q=sofa&liked=true");
        assert_eq!(location.len(), 2);
    }

    #[test]
    fn toggling_back_does_not_duplicate_history() {
        let (store, location) = store("");
        store.restore();
        assert!(matches!(
            store.set_field("liked", FieldValue::Boolean(true)),
            Ok(SyncOutcome::Pushed(_))
        ));
        assert!(matches!(
            store.set_field("liked", FieldValue::Boolean(false)),
            Ok(SyncOutcome::Pushed(ref query)) if query.is_empty()
        ));
        assert_eq!(
            store.set_field("liked", FieldValue::Boolean(false)).expect("same"),
            SyncOutcome::Unchanged
        );
        assert_eq!(location.len(), 3);
    }

    #[test]
    fn state_matching_the_location_is_not_pushed() {
        let (store, location) = store("q=lamp");
        let next = store
            .state()
            .with_field(store.schema(), "q", FieldValue::from("lamp"))
            .expect("valid");
        assert_eq!(store.set(next), SyncOutcome::Unchanged);
        assert_eq!(location.len(), 1);
    }

    #[test]
    fn back_then_restore_reloads_previous_state() {
        let (store, location) = store("");
        store.restore();
        store
            .set_field("q", FieldValue::from("lamp"))
            .expect("valid");
        assert_eq!(location.back(), Some(String::new()));
        let state = store.restore();
        assert_eq!(state.text("q"), Some(""));
        assert_eq!(location.len(), 2);
        assert_eq!(location.forward(), Some("q=lamp".into()));
        assert_eq!(store.restore().text("q"), Some("lamp"));
    }

    #[test]
    fn invalid_fields_leave_state_and_location_alone() {
        let (store, location) = store("");
        store.restore();
        assert!(store.set_field("page", FieldValue::Integer(0)).is_err());
        assert_eq!(store.query(), "");
        assert_eq!(location.len(), 1);
    }
}
