//! Row records, the shared row list, and row selection.
//!
//! # Design
//! - Rows are opaque JSON objects; the engine only reads the identifier and
//!   writes projection fields such as [`LIKED`], [`REMOVED`] and [`STATUS`].
//! - [`RowList`] is the single owner of a view's rows. Fetches replace it,
//!   optimistic mutations patch it, and aggregates ride along with it.
//! - A replacement passes through the attached overlay first, so fetched
//!   pages never erase changes that are still waiting for the server.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Projection field flagging a row the operator liked.
pub const LIKED: &str = "liked";
/// Projection field hiding a row removed from the view.
pub const REMOVED: &str = "removed";
/// Projection field carrying a workflow status.
pub const STATUS: &str = "status";

/// Separator used for composite identifiers.
pub const COMPOSITE_SEPARATOR: &str = ":";

/// Stable identifier of a row.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RowId(String);

impl RowId {
    /// Identifier from a single key.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Identifier joining several key parts, e.g. provider and product id.
    #[must_use]
    pub fn composite<I, S>(parts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let parts: Vec<String> = parts
            .into_iter()
            .map(|part| part.as_ref().to_string())
            .collect();
        Self(parts.join(COMPOSITE_SEPARATOR))
    }

    /// Identifier as sent to endpoints.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RowId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for RowId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Which item fields make up a row identifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowKey {
    fields: Vec<String>,
}

impl RowKey {
    /// Key read from a single field.
    #[must_use]
    pub fn single(field: impl Into<String>) -> Self {
        Self {
            fields: vec![field.into()],
        }
    }

    /// Key joining several fields in order.
    #[must_use]
    pub fn composite<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            fields: fields.into_iter().map(Into::into).collect(),
        }
    }

    /// Identifier of `item`, or `None` when a key field is missing or not a
    /// string or number.
    #[must_use]
    pub fn extract(&self, item: &Map<String, Value>) -> Option<RowId> {
        let parts = self
            .fields
            .iter()
            .map(|field| match item.get(field)? {
                Value::String(text) if !text.is_empty() => Some(text.clone()),
                Value::Number(number) => Some(number.to_string()),
                _ => None,
            })
            .collect::<Option<Vec<_>>>()?;
        Some(RowId::composite(parts))
    }

    /// Convert a raw item into a row.
    #[must_use]
    pub fn row(&self, item: Value) -> Option<Row> {
        match item {
            Value::Object(fields) => {
                let id = self.extract(&fields)?;
                Some(Row { id, fields })
            }
            _ => None,
        }
    }
}

/// Opaque record keyed by a stable identifier.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    id: RowId,
    fields: Map<String, Value>,
}

impl Row {
    /// Row with the given identifier and fields.
    #[must_use]
    pub const fn new(id: RowId, fields: Map<String, Value>) -> Self {
        Self { id, fields }
    }

    /// Row identifier.
    #[must_use]
    pub const fn id(&self) -> &RowId {
        &self.id
    }

    /// Value of `field`, if present.
    #[must_use]
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    /// All fields.
    #[must_use]
    pub const fn fields(&self) -> &Map<String, Value> {
        &self.fields
    }

    /// Whether the row is hidden by an optimistic removal.
    #[must_use]
    pub fn is_removed(&self) -> bool {
        self.get(REMOVED).and_then(Value::as_bool).unwrap_or(false)
    }

    /// Set `field`, removing it when `value` is `None`.
    pub fn set(&mut self, field: &str, value: Option<Value>) {
        match value {
            Some(value) => {
                self.fields.insert(field.to_string(), value);
            }
            None => {
                self.fields.remove(field);
            }
        }
    }
}

/// Patches freshly fetched rows before they are stored.
pub(crate) trait RowOverlay: Send + Sync {
    /// Patch `rows` and store them with [`RowList::store`].
    fn replace_rows(&self, list: &RowList, rows: Vec<Row>);
}

#[derive(Debug, Default)]
struct RowListInner {
    rows: Vec<Row>,
    aggregates: HashMap<String, i64>,
    overlay: Option<Weak<dyn RowOverlay>>,
}

/// Shared, ordered row list owned by one view.
#[derive(Debug, Clone, Default)]
pub struct RowList {
    inner: Arc<Mutex<RowListInner>>,
}

impl RowList {
    /// Empty list.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, RowListInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Replace every row, e.g. with a freshly fetched page.
    ///
    /// Fields with optimistic changes still in flight keep their optimistic
    /// value.
    pub fn replace(&self, rows: Vec<Row>) {
        let overlay = self.lock().overlay.as_ref().and_then(Weak::upgrade);
        match overlay {
            Some(overlay) => overlay.replace_rows(self, rows),
            None => self.store(rows),
        }
    }

    pub(crate) fn store(&self, rows: Vec<Row>) {
        self.lock().rows = rows;
    }

    pub(crate) fn attach_overlay(&self, overlay: Weak<dyn RowOverlay>) {
        self.lock().overlay = Some(overlay);
    }

    /// Copy of every row, removed ones included.
    #[must_use]
    pub fn snapshot(&self) -> Vec<Row> {
        self.lock().rows.clone()
    }

    /// Copy of the rows that are not removed.
    #[must_use]
    pub fn visible(&self) -> Vec<Row> {
        self.lock()
            .rows
            .iter()
            .filter(|row| !row.is_removed())
            .cloned()
            .collect()
    }

    /// Identifiers of the visible rows.
    #[must_use]
    pub fn visible_ids(&self) -> Vec<RowId> {
        self.lock()
            .rows
            .iter()
            .filter(|row| !row.is_removed())
            .map(|row| row.id.clone())
            .collect()
    }

    /// Copy of the row with `id`.
    #[must_use]
    pub fn get(&self, id: &RowId) -> Option<Row> {
        self.lock().rows.iter().find(|row| &row.id == id).cloned()
    }

    /// Number of rows, removed ones included.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().rows.len()
    }

    /// Whether the list holds no rows.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().rows.is_empty()
    }

    /// Current value of `field` on row `id`.
    ///
    /// The outer `None` means the row does not exist; the inner one means the
    /// field is absent.
    #[must_use]
    pub fn field(&self, id: &RowId, field: &str) -> Option<Option<Value>> {
        self.lock()
            .rows
            .iter()
            .find(|row| &row.id == id)
            .map(|row| row.get(field).cloned())
    }

    /// Write `field` on row `id`. Returns `false` when the row is gone.
    pub fn set_field(&self, id: &RowId, field: &str, value: Option<Value>) -> bool {
        let mut inner = self.lock();
        match inner.rows.iter_mut().find(|row| &row.id == id) {
            Some(row) => {
                row.set(field, value);
                true
            }
            None => false,
        }
    }

    /// Displayed value of a cross-entity aggregate (0 when unknown).
    #[must_use]
    pub fn aggregate(&self, name: &str) -> i64 {
        self.lock().aggregates.get(name).copied().unwrap_or(0)
    }

    /// Seed an aggregate, e.g. from a collection summary.
    pub fn set_aggregate(&self, name: &str, value: i64) {
        self.lock().aggregates.insert(name.to_string(), value);
    }

    /// Shift an aggregate by `delta`, returning the new value.
    pub fn adjust_aggregate(&self, name: &str, delta: i64) -> i64 {
        let mut inner = self.lock();
        let entry = inner.aggregates.entry(name.to_string()).or_insert(0);
        *entry = entry.saturating_add(delta);
        *entry
    }
}

/// Ordered set of selected row identifiers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Selection {
    ids: Vec<RowId>,
}

impl Selection {
    /// Toggle `id`, returning whether it is now selected.
    pub fn toggle(&mut self, id: &RowId) -> bool {
        if let Some(index) = self.ids.iter().position(|selected| selected == id) {
            self.ids.remove(index);
            false
        } else {
            self.ids.push(id.clone());
            true
        }
    }

    /// Select every visible row, or clear when all of them are selected.
    pub fn select_all_or_clear(&mut self, visible: &[RowId]) {
        if !visible.is_empty() && visible.iter().all(|id| self.contains(id)) {
            self.ids.clear();
        } else {
            self.ids = visible.to_vec();
        }
    }

    /// Drop selected ids that are no longer visible.
    pub fn retain_visible(&mut self, visible: &[RowId]) {
        self.ids.retain(|id| visible.contains(id));
    }

    /// Whether `id` is selected.
    #[must_use]
    pub fn contains(&self, id: &RowId) -> bool {
        self.ids.contains(id)
    }

    /// Selected ids in selection order.
    #[must_use]
    pub fn ids(&self) -> &[RowId] {
        &self.ids
    }

    /// Number of selected rows.
    #[must_use]
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    /// Whether nothing is selected.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Clear the selection.
    pub fn clear(&mut self) {
        self.ids.clear();
    }
}
