//! In-memory fakes of the engine's endpoint traits.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use catalog_api_models::{JobState, JobStatusResponse, MutationReply};
use catalog_engine::{
    CancellationToken, EngineError, EngineResult, FetchRequest, FetchResult, JobEndpoint,
    ListSource, MutationEndpoint, MutationIntent, RowId,
};
use tokio::sync::{Notify, oneshot};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

type Gate = oneshot::Sender<EngineResult<FetchResult>>;

/// List source whose responses are released by the test, per sequence number.
#[derive(Default)]
pub struct GatedListSource {
    requests: Mutex<Vec<FetchRequest>>,
    gates: Mutex<HashMap<u64, Gate>>,
    arrived: Notify,
}

impl GatedListSource {
    /// Shared source ready to hand to a controller.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Every request received so far, in arrival order.
    #[must_use]
    pub fn requests(&self) -> Vec<FetchRequest> {
        lock(&self.requests).clone()
    }

    /// Wait until at least `count` requests have arrived.
    pub async fn wait_for_requests(&self, count: usize) {
        loop {
            let arrived = self.arrived.notified();
            if lock(&self.requests).len() >= count {
                return;
            }
            arrived.await;
        }
    }

    /// Release the request with sequence number `seq`.
    ///
    /// Returns `false` when no such request is waiting, e.g. because the
    /// controller already cancelled it.
    pub fn resolve(&self, seq: u64, result: EngineResult<FetchResult>) -> bool {
        lock(&self.gates)
            .remove(&seq)
            .is_some_and(|gate| gate.send(result).is_ok())
    }
}

#[async_trait]
impl ListSource for GatedListSource {
    async fn fetch(
        &self,
        request: &FetchRequest,
        cancel: CancellationToken,
    ) -> EngineResult<FetchResult> {
        let (tx, rx) = oneshot::channel();
        lock(&self.gates).insert(request.seq, tx);
        lock(&self.requests).push(request.clone());
        self.arrived.notify_waiters();

        tokio::select! {
            () = cancel.cancelled() => Err(EngineError::Cancelled),
            released = rx => released.unwrap_or(Err(EngineError::Cancelled)),
        }
    }
}

/// Mutation endpoint answering from a queue of scripted replies.
pub struct ScriptedMutationEndpoint {
    calls: Mutex<Vec<MutationIntent>>,
    replies: Mutex<VecDeque<EngineResult<MutationReply>>>,
    fallback: EngineResult<MutationReply>,
}

impl ScriptedMutationEndpoint {
    /// Endpoint acknowledging every call once the script runs out.
    #[must_use]
    pub fn acknowledging() -> Arc<Self> {
        Arc::new(Self::with_fallback(Ok(MutationReply::Acknowledged)))
    }

    /// Endpoint failing every call with `error` once the script runs out.
    #[must_use]
    pub fn failing(error: EngineError) -> Arc<Self> {
        Arc::new(Self::with_fallback(Err(error)))
    }

    fn with_fallback(fallback: EngineResult<MutationReply>) -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            replies: Mutex::new(VecDeque::new()),
            fallback,
        }
    }

    /// Queue the reply for the next unanswered call.
    pub fn push_reply(&self, reply: EngineResult<MutationReply>) {
        lock(&self.replies).push_back(reply);
    }

    /// Every intent received so far.
    #[must_use]
    pub fn calls(&self) -> Vec<MutationIntent> {
        lock(&self.calls).clone()
    }
}

#[async_trait]
impl MutationEndpoint for ScriptedMutationEndpoint {
    async fn mutate(&self, intent: &MutationIntent) -> EngineResult<MutationReply> {
        lock(&self.calls).push(intent.clone());
        let scripted = lock(&self.replies).pop_front();
        scripted.unwrap_or_else(|| self.fallback.clone())
    }
}

type ReplyGate = oneshot::Sender<EngineResult<MutationReply>>;

/// Mutation endpoint holding every call until the test releases it.
#[derive(Default)]
pub struct GatedMutationEndpoint {
    calls: Mutex<Vec<MutationIntent>>,
    gates: Mutex<Vec<Option<ReplyGate>>>,
    arrived: Notify,
}

impl GatedMutationEndpoint {
    /// Shared endpoint ready to hand to a view.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Every intent received so far.
    #[must_use]
    pub fn calls(&self) -> Vec<MutationIntent> {
        lock(&self.calls).clone()
    }

    /// Wait until at least `count` calls have arrived.
    pub async fn wait_for_calls(&self, count: usize) {
        loop {
            let arrived = self.arrived.notified();
            if lock(&self.calls).len() >= count {
                return;
            }
            arrived.await;
        }
    }

    /// Answer call number `index` (zero based) with `reply`.
    ///
    /// Returns `false` when the call has not arrived or was already answered.
    pub fn release(&self, index: usize, reply: EngineResult<MutationReply>) -> bool {
        lock(&self.gates)
            .get_mut(index)
            .and_then(Option::take)
            .is_some_and(|gate| gate.send(reply).is_ok())
    }
}

#[async_trait]
impl MutationEndpoint for GatedMutationEndpoint {
    async fn mutate(&self, intent: &MutationIntent) -> EngineResult<MutationReply> {
        let (tx, rx) = oneshot::channel();
        lock(&self.gates).push(Some(tx));
        lock(&self.calls).push(intent.clone());
        self.arrived.notify_waiters();
        rx.await.unwrap_or(Err(EngineError::Cancelled))
    }
}

/// Job endpoint answering polls from a script, then a fixed state.
pub struct ScriptedJobEndpoint {
    starts: Mutex<Vec<Option<Vec<RowId>>>>,
    script: Mutex<VecDeque<EngineResult<JobStatusResponse>>>,
    fallback: JobState,
    start_error: Mutex<Option<EngineError>>,
    polls: AtomicU32,
}

impl ScriptedJobEndpoint {
    /// Endpoint reporting `fallback` once the script runs out.
    #[must_use]
    pub fn new(fallback: JobState) -> Arc<Self> {
        Arc::new(Self {
            starts: Mutex::new(Vec::new()),
            script: Mutex::new(VecDeque::new()),
            fallback,
            start_error: Mutex::new(None),
            polls: AtomicU32::new(0),
        })
    }

    /// Queue the answer for the next poll.
    pub fn push_status(&self, status: EngineResult<JobStatusResponse>) {
        lock(&self.script).push_back(status);
    }

    /// Make the next start call fail with `error`.
    pub fn fail_next_start(&self, error: EngineError) {
        *lock(&self.start_error) = Some(error);
    }

    /// Target sets of every start call.
    #[must_use]
    pub fn starts(&self) -> Vec<Option<Vec<RowId>>> {
        lock(&self.starts).clone()
    }

    /// Number of status polls answered.
    #[must_use]
    pub fn polls(&self) -> u32 {
        self.polls.load(Ordering::SeqCst)
    }
}

/// Status body with only the state set.
#[must_use]
pub const fn job_status(status: JobState) -> JobStatusResponse {
    JobStatusResponse {
        status,
        message: None,
        missing_count: None,
        total_count: None,
    }
}

#[async_trait]
impl JobEndpoint for ScriptedJobEndpoint {
    async fn start(&self, targets: Option<&[RowId]>) -> EngineResult<()> {
        lock(&self.starts).push(targets.map(<[RowId]>::to_vec));
        match lock(&self.start_error).take() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    async fn status(&self) -> EngineResult<JobStatusResponse> {
        self.polls.fetch_add(1, Ordering::SeqCst);
        let scripted = lock(&self.script).pop_front();
        scripted.unwrap_or_else(|| Ok(job_status(self.fallback)))
    }
}
