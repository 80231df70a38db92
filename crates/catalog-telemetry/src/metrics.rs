//! Prometheus-backed counters for list-view engines.
//!
//! # Design
//! - Encapsulates collector registration to keep the public API small.
//! - One registry per engine handle; views sharing a handle share counters.

use std::sync::Arc;

use prometheus::{Encoder, IntCounter, IntCounterVec, Opts, Registry, TextEncoder};
use serde::Serialize;

use crate::error::{TelemetryError, TelemetryResult};

/// Prometheus-backed metrics registry shared by the views of one console.
#[derive(Clone)]
pub struct Metrics {
    inner: Arc<MetricsInner>,
}

struct MetricsInner {
    registry: Registry,
    fetches_issued_total: IntCounter,
    fetches_stale_discarded_total: IntCounter,
    fetches_failed_total: IntCounter,
    url_pushes_total: IntCounter,
    mutations_total: IntCounterVec,
    job_polls_total: IntCounter,
    jobs_finished_total: IntCounterVec,
}

/// Snapshot of the scalar counters, for health reporting and tests.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    /// List fetches started.
    pub fetches_issued_total: u64,
    /// Fetch results dropped because a newer request superseded them.
    pub fetches_stale_discarded_total: u64,
    /// Fetches that ended in an error.
    pub fetches_failed_total: u64,
    /// Location entries pushed by query-state synchronisation.
    pub url_pushes_total: u64,
    /// Job status polls performed.
    pub job_polls_total: u64,
}

impl std::fmt::Debug for Metrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Metrics")
            .field("snapshot", &self.snapshot())
            .finish()
    }
}

impl Metrics {
    /// Construct a new registry with the engine collectors registered.
    ///
    /// # Errors
    ///
    /// Returns an error if any of the Prometheus collectors cannot be
    /// built or registered.
    pub fn new() -> TelemetryResult<Self> {
        let registry = Registry::new();

        let fetches_issued_total = counter(
            &registry,
            "fetches_issued_total",
            "List fetches started by paginated controllers",
        )?;
        let fetches_stale_discarded_total = counter(
            &registry,
            "fetches_stale_discarded_total",
            "Fetch results discarded as stale or cancelled",
        )?;
        let fetches_failed_total =
            counter(&registry, "fetches_failed_total", "List fetches that failed")?;
        let url_pushes_total = counter(
            &registry,
            "url_pushes_total",
            "Location entries pushed by query-state sync",
        )?;
        let mutations_total = counter_vec(
            &registry,
            "mutations_total",
            "Optimistic mutations settled by outcome",
            &["outcome"],
        )?;
        let job_polls_total =
            counter(&registry, "job_polls_total", "Background job status polls")?;
        let jobs_finished_total = counter_vec(
            &registry,
            "jobs_finished_total",
            "Background jobs that reached a terminal status",
            &["status"],
        )?;

        Ok(Self {
            inner: Arc::new(MetricsInner {
                registry,
                fetches_issued_total,
                fetches_stale_discarded_total,
                fetches_failed_total,
                url_pushes_total,
                mutations_total,
                job_polls_total,
                jobs_finished_total,
            }),
        })
    }

    /// Count a list fetch being issued.
    pub fn inc_fetch_issued(&self) {
        self.inner.fetches_issued_total.inc();
    }

    /// Count a fetch result discarded as stale.
    pub fn inc_fetch_stale(&self) {
        self.inner.fetches_stale_discarded_total.inc();
    }

    /// Count a failed fetch.
    pub fn inc_fetch_failed(&self) {
        self.inner.fetches_failed_total.inc();
    }

    /// Count a location push.
    pub fn inc_url_push(&self) {
        self.inner.url_pushes_total.inc();
    }

    /// Count a settled mutation (`confirmed`, `reconciled`, `rolled_back`).
    pub fn inc_mutation(&self, outcome: &str) {
        self.inner
            .mutations_total
            .with_label_values(&[outcome])
            .inc();
    }

    /// Count a job status poll.
    pub fn inc_job_poll(&self) {
        self.inner.job_polls_total.inc();
    }

    /// Count a job reaching a terminal status (`done`, `error`, `timeout`).
    pub fn inc_job_finished(&self, status: &str) {
        self.inner
            .jobs_finished_total
            .with_label_values(&[status])
            .inc();
    }

    /// Current value of the mutation counter for `outcome`.
    #[must_use]
    pub fn mutation_count(&self, outcome: &str) -> u64 {
        self.inner
            .mutations_total
            .with_label_values(&[outcome])
            .get()
    }

    /// Current value of the job completion counter for `status`.
    #[must_use]
    pub fn job_finished_count(&self, status: &str) -> u64 {
        self.inner
            .jobs_finished_total
            .with_label_values(&[status])
            .get()
    }

    /// Render the registry using the Prometheus text exposition format.
    ///
    /// # Errors
    ///
    /// Returns an error if the metrics cannot be encoded or if the encoded
    /// buffer is not valid UTF-8.
    pub fn render(&self) -> TelemetryResult<String> {
        let encoder = TextEncoder::new();
        let metric_families = self.inner.registry.gather();
        let mut buffer = Vec::new();
        encoder
            .encode(&metric_families, &mut buffer)
            .map_err(|source| TelemetryError::MetricsEncode { source })?;
        String::from_utf8(buffer).map_err(|source| TelemetryError::MetricsUtf8 { source })
    }

    /// Take a point-in-time snapshot of the scalar counters.
    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            fetches_issued_total: self.inner.fetches_issued_total.get(),
            fetches_stale_discarded_total: self.inner.fetches_stale_discarded_total.get(),
            fetches_failed_total: self.inner.fetches_failed_total.get(),
            url_pushes_total: self.inner.url_pushes_total.get(),
            job_polls_total: self.inner.job_polls_total.get(),
        }
    }
}

fn counter(registry: &Registry, name: &'static str, help: &str) -> TelemetryResult<IntCounter> {
    let collector = IntCounter::with_opts(Opts::new(name, help))
        .map_err(|source| TelemetryError::MetricsRegister { name, source })?;
    registry
        .register(Box::new(collector.clone()))
        .map_err(|source| TelemetryError::MetricsRegister { name, source })?;
    Ok(collector)
}

fn counter_vec(
    registry: &Registry,
    name: &'static str,
    help: &str,
    labels: &[&str],
) -> TelemetryResult<IntCounterVec> {
    let collector = IntCounterVec::new(Opts::new(name, help), labels)
        .map_err(|source| TelemetryError::MetricsRegister { name, source })?;
    registry
        .register(Box::new(collector.clone()))
        .map_err(|source| TelemetryError::MetricsRegister { name, source })?;
    Ok(collector)
}
