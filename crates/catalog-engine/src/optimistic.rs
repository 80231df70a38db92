//! Optimistic row mutations with exact rollback.
//!
//! # Design
//! - `apply` snapshots the field, writes the new value at once and settles
//!   the server call on a background task.
//! - Pending mutations are tracked per `(row, field)` in generation order.
//!   A failure restores the snapshot only when it is the newest pending
//!   change on that field; otherwise its snapshot is handed to the next
//!   change so the chain stays intact.
//! - Authoritative reply fields overwrite the row only where no other change
//!   to that field is still pending.
//! - Aggregate adjustments are reversed on rollback.
//! - A fetched page replacing the rows keeps every pending optimistic value;
//!   the fetched value becomes the rollback target of the oldest live change.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use async_trait::async_trait;
use catalog_api_models::MutationReply;
use catalog_events::EngineEvent;
use serde_json::{Map, Value};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::context::ViewContext;
use crate::error::{EngineError, EngineResult};
use crate::rows::{LIKED, REMOVED, Row, RowId, RowList, RowOverlay};

/// Snapshot of one optimistic change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MutationIntent {
    /// Target row.
    pub target: RowId,
    /// Changed projection field.
    pub field: String,
    /// Value written optimistically.
    pub next_value: Value,
    /// Value before the change; `None` when the field was absent.
    pub previous_value: Option<Value>,
}

/// Adjustment to a displayed cross-entity count.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AggregateDelta {
    /// Aggregate name, e.g. `wishlist:42`.
    pub aggregate: String,
    /// Signed change applied with the mutation.
    pub delta: i64,
}

/// Requested change to one row field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mutation {
    row_id: RowId,
    field: String,
    value: Value,
    aggregate: Option<AggregateDelta>,
}

impl Mutation {
    /// Set `field` on `row_id` to `value`.
    #[must_use]
    pub fn set(row_id: RowId, field: impl Into<String>, value: Value) -> Self {
        Self {
            row_id,
            field: field.into(),
            value,
            aggregate: None,
        }
    }

    /// Also shift `aggregate` by `delta` while the change stands.
    #[must_use]
    pub fn with_aggregate(mut self, aggregate: impl Into<String>, delta: i64) -> Self {
        self.aggregate = Some(AggregateDelta {
            aggregate: aggregate.into(),
            delta,
        });
        self
    }
}

/// Final state of an optimistic change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MutationOutcome {
    /// The server acknowledged; the optimistic value stands.
    Confirmed,
    /// The server returned authoritative fields, written to the row.
    Reconciled(Map<String, Value>),
    /// The change was reverted.
    RolledBack(EngineError),
}

impl MutationOutcome {
    const fn label(&self) -> &'static str {
        match self {
            Self::Confirmed => "confirmed",
            Self::Reconciled(_) => "reconciled",
            Self::RolledBack(_) => "rolled_back",
        }
    }
}

/// Server side of optimistic mutations.
#[async_trait]
pub trait MutationEndpoint: Send + Sync {
    /// Persist `intent`.
    async fn mutate(&self, intent: &MutationIntent) -> EngineResult<MutationReply>;
}

/// Handle to a mutation settling in the background.
#[derive(Debug)]
pub struct MutationHandle {
    intent: MutationIntent,
    task: JoinHandle<MutationOutcome>,
}

impl MutationHandle {
    /// Snapshot captured when the change was applied.
    #[must_use]
    pub const fn intent(&self) -> &MutationIntent {
        &self.intent
    }

    /// Wait for the server call to settle.
    ///
    /// # Errors
    ///
    /// Returns a network error when the settling task was aborted or panicked.
    pub async fn outcome(self) -> EngineResult<MutationOutcome> {
        self.task
            .await
            .map_err(|err| EngineError::network("mutation", err))
    }
}

#[derive(Debug)]
struct Pending {
    generation: u64,
    value: Value,
    previous: Option<Value>,
    /// A newer change to the same field was confirmed first.
    superseded: bool,
}

type FieldKey = (RowId, String);

#[derive(Debug, Default)]
struct Ledger {
    generation: u64,
    pending: HashMap<FieldKey, Vec<Pending>>,
}

struct ManagerInner {
    rows: RowList,
    endpoint: Arc<dyn MutationEndpoint>,
    ctx: ViewContext,
    ledger: Mutex<Ledger>,
}

/// Applies row changes optimistically and reconciles them with the server.
#[derive(Clone)]
pub struct OptimisticActionManager {
    inner: Arc<ManagerInner>,
}

impl std::fmt::Debug for OptimisticActionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OptimisticActionManager")
            .field("view", &self.inner.ctx.view())
            .field("pending", &self.pending_count())
            .finish_non_exhaustive()
    }
}

impl OptimisticActionManager {
    /// Manager patching `rows` and persisting through `endpoint`.
    #[must_use]
    pub fn new(rows: RowList, endpoint: Arc<dyn MutationEndpoint>, ctx: ViewContext) -> Self {
        let inner = Arc::new(ManagerInner {
            rows,
            endpoint,
            ctx,
            ledger: Mutex::new(Ledger::default()),
        });
        let overlay: Weak<dyn RowOverlay> = Arc::downgrade(&inner) as Weak<ManagerInner>;
        inner.rows.attach_overlay(overlay);
        Self { inner }
    }

    /// Apply `mutation` locally and persist it in the background.
    ///
    /// Must be called within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns a validation error when the target row is not in the list.
    pub fn apply(&self, mutation: Mutation) -> EngineResult<MutationHandle> {
        let (intent, generation) = self.inner.begin(&mutation)?;
        let inner = Arc::clone(&self.inner);
        let task_intent = intent.clone();
        let aggregate = mutation.aggregate;
        let task = tokio::spawn(async move {
            let result = inner.endpoint.mutate(&task_intent).await;
            inner.settle(&task_intent, generation, aggregate.as_ref(), result)
        });
        Ok(MutationHandle { intent, task })
    }

    /// Apply the same field change to several rows, each with its own
    /// snapshot.
    ///
    /// # Errors
    ///
    /// Returns a validation error, before changing anything, when any target
    /// row is missing.
    pub fn apply_bulk(
        &self,
        row_ids: &[RowId],
        field: &str,
        value: &Value,
    ) -> EngineResult<Vec<MutationHandle>> {
        if let Some(missing) = row_ids
            .iter()
            .find(|id| self.inner.rows.field(id, field).is_none())
        {
            return Err(missing_row(missing));
        }
        row_ids
            .iter()
            .map(|id| self.apply(Mutation::set(id.clone(), field, value.clone())))
            .collect()
    }

    /// Flip the boolean `liked` flag of a row.
    ///
    /// # Errors
    ///
    /// Returns a validation error when the row is not in the list.
    pub fn toggle_like(&self, row_id: &RowId) -> EngineResult<MutationHandle> {
        let current = self
            .inner
            .rows
            .field(row_id, LIKED)
            .ok_or_else(|| missing_row(row_id))?
            .and_then(|value| value.as_bool())
            .unwrap_or(false);
        self.apply(Mutation::set(row_id.clone(), LIKED, Value::Bool(!current)))
    }

    /// Hide a row until the server confirms its removal.
    ///
    /// # Errors
    ///
    /// Returns a validation error when the row is not in the list.
    pub fn remove(&self, row_id: &RowId) -> EngineResult<MutationHandle> {
        self.apply(Mutation::set(row_id.clone(), REMOVED, Value::Bool(true)))
    }

    /// Number of changes still waiting for the server.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.inner.lock().pending.values().map(Vec::len).sum()
    }
}

fn missing_row(row_id: &RowId) -> EngineError {
    EngineError::validation("row", format!("row {row_id} is not loaded"))
}

impl RowOverlay for ManagerInner {
    fn replace_rows(&self, list: &RowList, mut rows: Vec<Row>) {
        // Held until the rows are stored so no change can start in between.
        let mut ledger = self.lock();
        let mut kept = 0_usize;
        for ((row_id, field), chain) in &mut ledger.pending {
            let Some(live) = chain.iter().position(|pending| !pending.superseded) else {
                continue;
            };
            let Some(row) = rows.iter_mut().find(|row| row.id() == row_id) else {
                continue;
            };
            chain[live].previous = row.get(field).cloned();
            if let Some(newest) = chain.last() {
                row.set(field, Some(newest.value.clone()));
                kept += 1;
            }
        }
        list.store(rows);
        drop(ledger);
        if kept > 0 {
            debug!(view = self.ctx.view(), kept, "pending changes kept over fetched rows");
        }
    }
}

impl ManagerInner {
    fn lock(&self) -> MutexGuard<'_, Ledger> {
        self.ledger.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn begin(&self, mutation: &Mutation) -> EngineResult<(MutationIntent, u64)> {
        let mut ledger = self.lock();
        let previous = self
            .rows
            .field(&mutation.row_id, &mutation.field)
            .ok_or_else(|| missing_row(&mutation.row_id))?;

        ledger.generation += 1;
        let generation = ledger.generation;
        ledger
            .pending
            .entry((mutation.row_id.clone(), mutation.field.clone()))
            .or_default()
            .push(Pending {
                generation,
                value: mutation.value.clone(),
                previous: previous.clone(),
                superseded: false,
            });

        self.rows
            .set_field(&mutation.row_id, &mutation.field, Some(mutation.value.clone()));
        if let Some(delta) = &mutation.aggregate {
            self.rows.adjust_aggregate(&delta.aggregate, delta.delta);
        }

        debug!(
            view = self.ctx.view(),
            row_id = %mutation.row_id,
            field = %mutation.field,
            generation,
            "optimistic change applied"
        );
        self.ctx.emit(EngineEvent::MutationApplied {
            row_id: mutation.row_id.to_string(),
            field: mutation.field.clone(),
        });

        Ok((
            MutationIntent {
                target: mutation.row_id.clone(),
                field: mutation.field.clone(),
                next_value: mutation.value.clone(),
                previous_value: previous,
            },
            generation,
        ))
    }

    fn settle(
        &self,
        intent: &MutationIntent,
        generation: u64,
        aggregate: Option<&AggregateDelta>,
        result: EngineResult<MutationReply>,
    ) -> MutationOutcome {
        let mut ledger = self.lock();
        let key = (intent.target.clone(), intent.field.clone());
        let Some((position, entry)) = ledger.pending.get_mut(&key).and_then(|chain| {
            let position = chain.iter().position(|item| item.generation == generation)?;
            Some((position, chain.remove(position)))
        }) else {
            return MutationOutcome::Confirmed;
        };

        let outcome = match result {
            Ok(reply) => {
                if !entry.superseded
                    && let Some(chain) = ledger.pending.get_mut(&key)
                {
                    // Older changes to this field can no longer win.
                    for older in &mut chain[..position] {
                        older.superseded = true;
                    }
                }
                match reply {
                    MutationReply::Acknowledged => MutationOutcome::Confirmed,
                    MutationReply::Authoritative(fields) => {
                        let written =
                            self.reconcile(&mut ledger, intent, position, &entry, fields);
                        if written.is_empty() {
                            MutationOutcome::Confirmed
                        } else {
                            MutationOutcome::Reconciled(written)
                        }
                    }
                }
            }
            Err(err) => {
                if !entry.superseded {
                    self.roll_back(&mut ledger, &key, position, entry.previous);
                }
                if let Some(delta) = aggregate {
                    self.rows
                        .adjust_aggregate(&delta.aggregate, delta.delta.saturating_neg());
                }
                MutationOutcome::RolledBack(err)
            }
        };
        if ledger.pending.get(&key).is_some_and(Vec::is_empty) {
            ledger.pending.remove(&key);
        }
        drop(ledger);

        self.report(intent, &outcome);
        outcome
    }

    /// Write authoritative fields where no other live change to them is pending.
    fn reconcile(
        &self,
        ledger: &mut Ledger,
        intent: &MutationIntent,
        position: usize,
        entry: &Pending,
        fields: Map<String, Value>,
    ) -> Map<String, Value> {
        let mut written = Map::new();
        for (field, value) in fields {
            let own = field == intent.field;
            if own && entry.superseded {
                continue;
            }
            let key = (intent.target.clone(), field);
            if let Some(chain) = ledger.pending.get_mut(&key)
                && chain.iter().any(|pending| !pending.superseded)
            {
                // A newer change to our own field now snapshots the confirmed value.
                if own && let Some(next) = chain.get_mut(position) {
                    next.previous = Some(value);
                }
                continue;
            }
            if self.rows.set_field(&intent.target, &key.1, Some(value.clone())) {
                written.insert(key.1, value);
            }
        }
        written
    }

    fn roll_back(
        &self,
        ledger: &mut Ledger,
        key: &FieldKey,
        position: usize,
        previous: Option<Value>,
    ) {
        match ledger.pending.get_mut(key).and_then(|chain| chain.get_mut(position)) {
            Some(next) => next.previous = previous,
            None => {
                self.rows.set_field(&key.0, &key.1, previous);
            }
        }
    }

    fn report(&self, intent: &MutationIntent, outcome: &MutationOutcome) {
        let row_id = intent.target.to_string();
        let field = intent.field.clone();
        match outcome {
            MutationOutcome::RolledBack(err) => {
                warn!(
                    view = self.ctx.view(),
                    row_id = %row_id,
                    field = %field,
                    error = %err,
                    "optimistic change rolled back"
                );
                self.ctx.emit(EngineEvent::MutationRolledBack {
                    row_id,
                    field,
                    message: err.user_message().unwrap_or_else(|| err.to_string()),
                });
            }
            MutationOutcome::Confirmed | MutationOutcome::Reconciled(_) => {
                debug!(
                    view = self.ctx.view(),
                    row_id = %row_id,
                    field = %field,
                    outcome = outcome.label(),
                    "optimistic change settled"
                );
                self.ctx
                    .emit(EngineEvent::MutationConfirmed { row_id, field });
            }
        }
        self.ctx
            .record(|metrics| metrics.inc_mutation(outcome.label()));
    }
}
