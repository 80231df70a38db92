//! Bounded background-job poller.
//!
//! # Design
//! - `idle --start--> running --terminal poll--> done | error`; a terminal
//!   state may be restarted.
//! - While running, the status endpoint is polled once per interval. Every
//!   poll counts as an attempt, failed polls included, and the poller gives
//!   up with a timeout once the ceiling is reached.
//! - Reaching `done` is the only path that refreshes dependent data.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use catalog_api_models::{JobState, JobStatusResponse};
use catalog_config::EngineConfig;
use catalog_events::EngineEvent;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::context::ViewContext;
use crate::error::{EngineError, EngineResult};
use crate::fetch::RefreshTarget;
use crate::rows::RowId;

/// Items remaining versus items targeted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ProgressCounts {
    /// Items still waiting to be processed.
    pub missing: u64,
    /// Items targeted by the job.
    pub total: u64,
}

/// Observable job status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobStatus {
    /// Lifecycle state.
    pub state: JobState,
    /// Summary or failure message.
    pub message: Option<String>,
    /// Latest progress reported by the server.
    pub progress: Option<ProgressCounts>,
    /// Polls performed for the current run.
    pub attempts: u32,
    /// Engine failure that ended the run, such as a timeout or a rejected
    /// start. `None` when the server itself reported the error.
    pub error: Option<EngineError>,
}

impl Default for JobStatus {
    fn default() -> Self {
        Self {
            state: JobState::Idle,
            message: None,
            progress: None,
            attempts: 0,
            error: None,
        }
    }
}

impl JobStatus {
    /// Whether polling is in progress.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.state == JobState::Running
    }

    /// Whether the job reached `done` or `error`.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self.state, JobState::Done | JobState::Error)
    }
}

/// Server side of a generation job.
#[async_trait]
pub trait JobEndpoint: Send + Sync {
    /// Start the job for `targets`, or for everything when `None`.
    async fn start(&self, targets: Option<&[RowId]>) -> EngineResult<()>;

    /// Current job status.
    async fn status(&self) -> EngineResult<JobStatusResponse>;
}

/// Poll cadence and budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollSettings {
    /// Delay between polls.
    pub interval: Duration,
    /// Polls allowed before timing out.
    pub max_attempts: u32,
}

impl PollSettings {
    /// Settings taken from the engine configuration.
    #[must_use]
    pub const fn from_config(config: &EngineConfig) -> Self {
        Self {
            interval: config.job_poll_interval(),
            max_attempts: config.job_max_attempts,
        }
    }
}

impl Default for PollSettings {
    fn default() -> Self {
        Self::from_config(&EngineConfig::default())
    }
}

struct PollerInner {
    endpoint: Arc<dyn JobEndpoint>,
    settings: PollSettings,
    ctx: ViewContext,
    status: watch::Sender<JobStatus>,
    refresh: Mutex<Option<Arc<dyn RefreshTarget>>>,
    run: Mutex<Option<CancellationToken>>,
}

/// Starts a job and follows it to a terminal state.
#[derive(Clone)]
pub struct JobPoller {
    inner: Arc<PollerInner>,
}

impl std::fmt::Debug for JobPoller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobPoller")
            .field("view", &self.inner.ctx.view())
            .field("settings", &self.inner.settings)
            .field("status", &*self.inner.status.borrow())
            .finish_non_exhaustive()
    }
}

impl JobPoller {
    /// Idle poller for `endpoint`.
    #[must_use]
    pub fn new(endpoint: Arc<dyn JobEndpoint>, settings: PollSettings, ctx: ViewContext) -> Self {
        Self {
            inner: Arc::new(PollerInner {
                endpoint,
                settings,
                ctx,
                status: watch::Sender::new(JobStatus::default()),
                refresh: Mutex::new(None),
                run: Mutex::new(None),
            }),
        }
    }

    /// Refresh `target` whenever a job finishes with `done`.
    pub fn on_done(&self, target: Arc<dyn RefreshTarget>) {
        *lock(&self.inner.refresh) = Some(target);
    }

    /// Start a job and begin polling.
    ///
    /// Returns `false` without doing anything when a job is already running.
    /// Must be called within a Tokio runtime.
    pub fn start(&self, targets: Option<Vec<RowId>>) -> bool {
        let mut run = lock(&self.inner.run);
        let started = self.inner.status.send_if_modified(|status| {
            if status.is_running() {
                return false;
            }
            *status = JobStatus {
                state: JobState::Running,
                ..JobStatus::default()
            };
            true
        });
        if !started {
            debug!(view = self.inner.ctx.view(), "job already running; start ignored");
            return false;
        }

        let token = CancellationToken::new();
        if let Some(previous) = run.replace(token.clone()) {
            previous.cancel();
        }
        drop(run);

        info!(
            view = self.inner.ctx.view(),
            targets = targets.as_ref().map_or(0, Vec::len),
            "job started"
        );
        self.inner.ctx.emit(EngineEvent::JobStatusChanged {
            status: "running".into(),
            message: None,
        });

        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            inner.run(token, targets).await;
        });
        true
    }

    /// Stop polling and return to idle without a terminal transition.
    pub fn stop(&self) {
        if let Some(token) = lock(&self.inner.run).take() {
            token.cancel();
        }
        let stopped = self.inner.status.send_if_modified(|status| {
            if status.is_running() {
                *status = JobStatus::default();
                true
            } else {
                false
            }
        });
        if stopped {
            debug!(view = self.inner.ctx.view(), "job polling stopped");
            self.inner.ctx.emit(EngineEvent::JobStatusChanged {
                status: "idle".into(),
                message: None,
            });
        }
    }

    /// Current status.
    #[must_use]
    pub fn status(&self) -> JobStatus {
        self.inner.status.borrow().clone()
    }

    /// Receiver notified on every status change.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<JobStatus> {
        self.inner.status.subscribe()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

const fn state_label(state: JobState) -> &'static str {
    match state {
        JobState::Idle => "idle",
        JobState::Running => "running",
        JobState::Done => "done",
        JobState::Error => "error",
    }
}

/// Terminal transition of one run.
struct Terminal {
    state: JobState,
    message: Option<String>,
    error: Option<EngineError>,
    metric: &'static str,
}

impl Terminal {
    /// State reported by the status endpoint.
    const fn reported(state: JobState, message: Option<String>) -> Self {
        Self {
            state,
            message,
            error: None,
            metric: state_label(state),
        }
    }

    fn failed(error: EngineError) -> Self {
        let metric = if matches!(error, EngineError::Timeout { .. }) {
            "timeout"
        } else {
            "error"
        };
        Self {
            state: JobState::Error,
            message: Some(error.to_string()),
            error: Some(error),
            metric,
        }
    }
}

impl PollerInner {
    async fn run(&self, token: CancellationToken, targets: Option<Vec<RowId>>) {
        let started = tokio::select! {
            biased;
            () = token.cancelled() => return,
            result = self.endpoint.start(targets.as_deref()) => result,
        };
        if let Err(err) = started {
            self.finish(&token, 0, Terminal::failed(err));
            return;
        }

        let mut attempts: u32 = 0;
        loop {
            tokio::select! {
                biased;
                () = token.cancelled() => return,
                () = tokio::time::sleep(self.settings.interval) => {}
            }
            let polled = tokio::select! {
                biased;
                () = token.cancelled() => return,
                result = self.endpoint.status() => result,
            };
            attempts = attempts.saturating_add(1);
            self.ctx.record(catalog_telemetry::Metrics::inc_job_poll);

            match polled {
                Ok(response) => match response.status {
                    state @ (JobState::Done | JobState::Error) => {
                        let terminal = Terminal::reported(state, response.message);
                        let applied = self.finish(&token, attempts, terminal);
                        if applied && state == JobState::Done {
                            self.request_refresh();
                        }
                        return;
                    }
                    JobState::Running | JobState::Idle => {
                        debug!(view = self.ctx.view(), attempt = attempts, "job still running");
                        self.update_running(&token, attempts, &response);
                    }
                },
                Err(err) => {
                    warn!(view = self.ctx.view(), attempt = attempts, error = %err, "job status poll failed");
                    self.update_running(&token, attempts, &JobStatusResponse {
                        status: JobState::Running,
                        message: None,
                        missing_count: None,
                        total_count: None,
                    });
                }
            }

            if attempts >= self.settings.max_attempts {
                warn!(view = self.ctx.view(), attempts, "job polling timed out");
                self.finish(&token, attempts, Terminal::failed(EngineError::Timeout { attempts }));
                return;
            }
        }
    }

    fn update_running(&self, token: &CancellationToken, attempts: u32, response: &JobStatusResponse) {
        self.status.send_if_modified(|status| {
            if token.is_cancelled() {
                return false;
            }
            status.attempts = attempts;
            if let (Some(missing), Some(total)) = (response.missing_count, response.total_count) {
                status.progress = Some(ProgressCounts { missing, total });
            }
            if response.message.is_some() {
                status.message.clone_from(&response.message);
            }
            true
        });
    }

    fn request_refresh(&self) {
        let target = lock(&self.refresh).clone();
        if let Some(target) = target {
            target.request_refresh();
        }
    }

    /// Publish `terminal` unless the run was stopped; returns whether it was.
    fn finish(&self, token: &CancellationToken, attempts: u32, terminal: Terminal) -> bool {
        let Terminal {
            state,
            message,
            error,
            metric,
        } = terminal;
        // Checked under the status lock so a concurrent `stop` always wins.
        let applied = self.status.send_if_modified(|status| {
            if token.is_cancelled() {
                return false;
            }
            status.state = state;
            status.attempts = attempts;
            status.message.clone_from(&message);
            status.error.clone_from(&error);
            true
        });
        if !applied {
            debug!(view = self.ctx.view(), status = state_label(state), "stopped run finished late");
            return false;
        }
        info!(
            view = self.ctx.view(),
            status = state_label(state),
            message = message.as_deref().unwrap_or_default(),
            "job finished"
        );
        self.ctx.emit(EngineEvent::JobStatusChanged {
            status: state_label(state).to_string(),
            message,
        });
        self.ctx.record(|metrics| metrics.inc_job_finished(metric));
        true
    }
}

#[cfg(test)]
mod tests {
    use std::sync::OnceLock;
    use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};

    use super::*;

    struct FixedEndpoint {
        answer: JobState,
        polls: AtomicU32,
    }

    #[async_trait]
    impl JobEndpoint for FixedEndpoint {
        async fn start(&self, _targets: Option<&[RowId]>) -> EngineResult<()> {
            Ok(())
        }

        async fn status(&self) -> EngineResult<JobStatusResponse> {
            self.polls.fetch_add(1, Ordering::SeqCst);
            Ok(JobStatusResponse {
                status: self.answer,
                message: Some("42 of 100 generated".into()),
                missing_count: Some(58),
                total_count: Some(100),
            })
        }
    }

    #[derive(Default)]
    struct CountingRefresh(AtomicUsize);

    impl RefreshTarget for CountingRefresh {
        fn request_refresh(&self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn poller(answer: JobState, max_attempts: u32) -> (JobPoller, Arc<FixedEndpoint>) {
        let endpoint = Arc::new(FixedEndpoint {
            answer,
            polls: AtomicU32::new(0),
        });
        let poller = JobPoller::new(
            endpoint.clone(),
            PollSettings {
                interval: Duration::from_secs(5),
                max_attempts,
            },
            ViewContext::new("drafts"),
        );
        (poller, endpoint)
    }

    #[tokio::test(start_paused = true)]
    async fn start_is_a_no_op_while_running() {
        let (poller, _) = poller(JobState::Running, 10);
        assert!(poller.start(None));
        assert!(!poller.start(None));
        assert!(poller.status().is_running());
        poller.stop();
        assert_eq!(poller.status().state, JobState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn running_polls_record_progress() -> anyhow::Result<()> {
        let (poller, endpoint) = poller(JobState::Running, 10);
        poller.start(Some(vec![RowId::new("a")]));
        let mut rx = poller.subscribe();
        rx.wait_for(|status| status.attempts == 2).await?;
        let status = poller.status();
        assert_eq!(status.progress, Some(ProgressCounts { missing: 58, total: 100 }));
        assert_eq!(endpoint.polls.load(Ordering::SeqCst), 2);
        poller.stop();
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn done_triggers_a_single_refresh() -> anyhow::Result<()> {
        let (poller, _) = poller(JobState::Done, 10);
        let refresh = Arc::new(CountingRefresh::default());
        poller.on_done(refresh.clone());
        poller.start(None);
        let mut rx = poller.subscribe();
        rx.wait_for(JobStatus::is_terminal).await?;
        assert_eq!(poller.status().state, JobState::Done);
        assert_eq!(refresh.0.load(Ordering::SeqCst), 1);

        assert!(poller.start(None));
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn error_state_is_terminal_without_refresh() -> anyhow::Result<()> {
        let (poller, _) = poller(JobState::Error, 10);
        let refresh = Arc::new(CountingRefresh::default());
        poller.on_done(refresh.clone());
        poller.start(None);
        let mut rx = poller.subscribe();
        rx.wait_for(JobStatus::is_terminal).await?;
        let status = poller.status();
        assert_eq!(status.state, JobState::Error);
        assert_eq!(status.message.as_deref(), Some("42 of 100 generated"));
        assert_eq!(status.error, None, "server-reported failures carry no engine error");
        assert_eq!(refresh.0.load(Ordering::SeqCst), 0);
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn endless_running_times_out_at_the_ceiling() -> anyhow::Result<()> {
        let (poller, endpoint) = poller(JobState::Running, 3);
        poller.start(None);
        let mut rx = poller.subscribe();
        rx.wait_for(JobStatus::is_terminal).await?;
        let status = poller.status();
        assert_eq!(status.state, JobState::Error);
        assert_eq!(status.attempts, 3);
        assert_eq!(
            status.message.as_deref(),
            Some("job did not finish after 3 status checks")
        );
        assert_eq!(status.error, Some(EngineError::Timeout { attempts: 3 }));
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(endpoint.polls.load(Ordering::SeqCst), 3);
        Ok(())
    }

    /// Reports `done` while stopping the poller from inside the call.
    #[derive(Default)]
    struct StoppingEndpoint {
        poller: OnceLock<JobPoller>,
    }

    #[async_trait]
    impl JobEndpoint for StoppingEndpoint {
        async fn start(&self, _targets: Option<&[RowId]>) -> EngineResult<()> {
            Ok(())
        }

        async fn status(&self) -> EngineResult<JobStatusResponse> {
            if let Some(poller) = self.poller.get() {
                poller.stop();
            }
            Ok(JobStatusResponse {
                status: JobState::Done,
                message: None,
                missing_count: None,
                total_count: None,
            })
        }
    }

    #[tokio::test(start_paused = true)]
    async fn done_after_stop_does_not_refresh() {
        let endpoint = Arc::new(StoppingEndpoint::default());
        let poller = JobPoller::new(
            endpoint.clone(),
            PollSettings {
                interval: Duration::from_secs(5),
                max_attempts: 10,
            },
            ViewContext::new("drafts"),
        );
        assert!(endpoint.poller.set(poller.clone()).is_ok());
        let refresh = Arc::new(CountingRefresh::default());
        poller.on_done(refresh.clone());

        assert!(poller.start(None));
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(refresh.0.load(Ordering::SeqCst), 0);
        assert_eq!(poller.status(), JobStatus::default());
    }
}
