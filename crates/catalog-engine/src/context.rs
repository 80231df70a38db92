//! Per-view instrumentation handle.
//!
//! Every component of a view carries the same context so events and counters
//! are tagged with the owning view. Both sinks are optional.

use std::fmt;
use std::sync::Arc;

use catalog_events::{EngineEvent, EventBus};
use catalog_telemetry::Metrics;

/// View name plus optional event bus and metrics registry.
#[derive(Clone)]
pub struct ViewContext {
    view: Arc<str>,
    events: Option<EventBus>,
    metrics: Option<Metrics>,
}

impl ViewContext {
    /// Context for the named view with no sinks attached.
    #[must_use]
    pub fn new(view: impl Into<Arc<str>>) -> Self {
        Self {
            view: view.into(),
            events: None,
            metrics: None,
        }
    }

    /// Publish events on `bus`.
    #[must_use]
    pub fn with_events(mut self, bus: EventBus) -> Self {
        self.events = Some(bus);
        self
    }

    /// Record counters in `metrics`.
    #[must_use]
    pub fn with_metrics(mut self, metrics: Metrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Name of the owning view.
    #[must_use]
    pub fn view(&self) -> &str {
        &self.view
    }

    /// Attached event bus.
    #[must_use]
    pub const fn events(&self) -> Option<&EventBus> {
        self.events.as_ref()
    }

    pub(crate) fn emit(&self, event: EngineEvent) {
        if let Some(bus) = &self.events {
            bus.publish(&self.view, event);
        }
    }

    pub(crate) fn record(&self, update: impl FnOnce(&Metrics)) {
        if let Some(metrics) = &self.metrics {
            update(metrics);
        }
    }
}

impl fmt::Debug for ViewContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ViewContext")
            .field("view", &self.view)
            .field("events", &self.events.is_some())
            .field("metrics", &self.metrics.is_some())
            .finish()
    }
}
