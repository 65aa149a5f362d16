//! Execution context for replayable runs.
//!
//! Two layers of ambient state are propagated without the workflow author
//! threading them through every call:
//!
//! - the **replay context** (event log + notifier), installed process-wide
//!   with [`use_context`] or scoped to a future with [`using`];
//! - the **run scope**, installed by the orchestrator around a run body with
//!   [`exec_in_run_context`], carrying everything the primitives need to
//!   replay or record work for that run.
//!
//! Both scoped layers are tokio task-locals, so interleaved runs and
//! concurrent `using` blocks never observe each other's state. Task-locals do
//! not cross `tokio::spawn`; use [`spawn`] to carry them into a new task.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};

use parking_lot::{Mutex, RwLock};
use replayable_core::{
    EventLog, InMemoryEventLog, ReplayHistory, ResumptionSource, RetryPolicy, Sequencer,
};
use uuid::Uuid;

use crate::error::{ReplayError, Result};
use crate::notifier::Notifier;

/// The adapter a run talks to: an event log and a notifier
#[derive(Clone)]
pub struct ReplayContext {
    pub events: Arc<dyn EventLog>,
    pub notifier: Arc<Notifier>,
}

impl ReplayContext {
    pub fn new(events: Arc<dyn EventLog>, notifier: Arc<Notifier>) -> Self {
        Self { events, notifier }
    }

    /// An ephemeral context backed by an [`InMemoryEventLog`]
    pub fn in_memory() -> Self {
        Self::new(Arc::new(InMemoryEventLog::new()), Arc::new(Notifier::new()))
    }
}

impl std::fmt::Debug for ReplayContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReplayContext")
            .field("notifier", &self.notifier)
            .finish_non_exhaustive()
    }
}

tokio::task_local! {
    static SCOPED_CONTEXT: ReplayContext;
    static RUN_SCOPE: Arc<RunScope>;
}

static GLOBAL_CONTEXT: OnceLock<RwLock<Option<ReplayContext>>> = OnceLock::new();

fn global_slot() -> &'static RwLock<Option<ReplayContext>> {
    GLOBAL_CONTEXT.get_or_init(|| RwLock::new(None))
}

/// Install a context for the whole process, replacing any previous one
pub fn use_context(ctx: ReplayContext) {
    *global_slot().write() = Some(ctx);
}

/// Remove the process-wide context
pub fn clear_context() {
    *global_slot().write() = None;
}

/// Run `body` with `ctx` as the active context.
///
/// The previous context is restored when `body` finishes, fails, panics or
/// is dropped.
pub async fn using<F: Future>(ctx: ReplayContext, body: F) -> F::Output {
    SCOPED_CONTEXT.scope(ctx, body).await
}

/// Get the active context: the innermost scoped one, else the global one
pub fn get_replay_context() -> Result<ReplayContext> {
    SCOPED_CONTEXT
        .try_with(ReplayContext::clone)
        .ok()
        .or_else(|| global_slot().read().clone())
        .ok_or(ReplayError::NoReplayContext)
}

/// Callback that wakes a paused run when something it waits on settles
pub type ResumeFn = Arc<dyn Fn(Option<ResumptionSource>) + Send + Sync>;

/// Counts detached step executions per run.
///
/// A run with work in flight is still owned by this process even while it
/// is paused.
#[derive(Debug, Clone, Default)]
pub struct InFlightWork {
    counts: Arc<Mutex<HashMap<Uuid, usize>>>,
}

impl InFlightWork {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the start of detached work for a run
    pub fn begin(&self, run_id: Uuid) -> InFlightGuard {
        *self.counts.lock().entry(run_id).or_insert(0) += 1;
        InFlightGuard {
            owner: self.clone(),
            run_id,
        }
    }

    pub fn is_busy(&self, run_id: Uuid) -> bool {
        self.counts.lock().contains_key(&run_id)
    }
}

/// Marks detached work as finished when dropped
#[derive(Debug)]
pub struct InFlightGuard {
    owner: InFlightWork,
    run_id: Uuid,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        let mut counts = self.owner.counts.lock();
        if let Some(count) = counts.get_mut(&self.run_id) {
            *count -= 1;
            if *count == 0 {
                counts.remove(&self.run_id);
            }
        }
    }
}

/// Ambient state of one play of a run
pub struct RunScope {
    run_id: Uuid,
    replayable_id: String,
    context: ReplayContext,
    history: ReplayHistory,
    sequencer: Sequencer,
    resume: ResumeFn,
    source: Option<ResumptionSource>,
    step_retry: RetryPolicy,
    in_flight: InFlightWork,
    next_step: AtomicU64,
    next_hook: AtomicU64,
}

impl RunScope {
    pub fn new(
        run_id: Uuid,
        replayable_id: impl Into<String>,
        context: ReplayContext,
        history: ReplayHistory,
    ) -> Self {
        let sequencer = history.sequencer();
        Self {
            run_id,
            replayable_id: replayable_id.into(),
            context,
            history,
            sequencer,
            resume: Arc::new(|_| {}),
            source: None,
            step_retry: RetryPolicy::NONE,
            in_flight: InFlightWork::new(),
            next_step: AtomicU64::new(0),
            next_hook: AtomicU64::new(0),
        }
    }

    pub fn with_resume(mut self, resume: ResumeFn) -> Self {
        self.resume = resume;
        self
    }

    pub fn with_source(mut self, source: Option<ResumptionSource>) -> Self {
        self.source = source;
        self
    }

    pub fn with_step_retry(mut self, policy: RetryPolicy) -> Self {
        self.step_retry = policy;
        self
    }

    pub fn with_in_flight(mut self, in_flight: InFlightWork) -> Self {
        self.in_flight = in_flight;
        self
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn replayable_id(&self) -> &str {
        &self.replayable_id
    }

    pub fn context(&self) -> &ReplayContext {
        &self.context
    }

    pub fn events(&self) -> &Arc<dyn EventLog> {
        &self.context.events
    }

    pub fn history(&self) -> &ReplayHistory {
        &self.history
    }

    pub fn sequencer(&self) -> &Sequencer {
        &self.sequencer
    }

    /// The settled operation that triggered this play, if any
    pub fn source(&self) -> Option<&ResumptionSource> {
        self.source.as_ref()
    }

    pub fn step_retry(&self) -> RetryPolicy {
        self.step_retry
    }

    pub fn in_flight(&self) -> &InFlightWork {
        &self.in_flight
    }

    /// Allocate the next step index. Indexes follow call order.
    pub fn next_step_index(&self) -> u64 {
        self.next_step.fetch_add(1, Ordering::SeqCst)
    }

    pub fn next_hook_index(&self) -> u64 {
        self.next_hook.fetch_add(1, Ordering::SeqCst)
    }

    /// Ask the orchestrator to resume this run
    pub fn resume(&self, source: Option<ResumptionSource>) {
        (self.resume)(source)
    }
}

impl std::fmt::Debug for RunScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunScope")
            .field("run_id", &self.run_id)
            .field("replayable_id", &self.replayable_id)
            .field("source", &self.source)
            .field("next_step", &self.next_step.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}

/// Run `body` inside a run scope.
///
/// The scope's context also becomes the active replay context for the body.
pub async fn exec_in_run_context<F: Future>(scope: Arc<RunScope>, body: F) -> F::Output {
    let ctx = scope.context.clone();
    SCOPED_CONTEXT.scope(ctx, RUN_SCOPE.scope(scope, body)).await
}

/// The run scope of the current task, if it executes a run body
pub fn current_run() -> Option<Arc<RunScope>> {
    RUN_SCOPE.try_with(Arc::clone).ok()
}

/// Spawn a task that inherits the active replay context and run scope
pub fn spawn<F>(future: F) -> tokio::task::JoinHandle<F::Output>
where
    F: Future + Send + 'static,
    F::Output: Send + 'static,
{
    let ctx = SCOPED_CONTEXT.try_with(ReplayContext::clone).ok();
    let run = current_run();

    let future: Pin<Box<dyn Future<Output = F::Output> + Send>> = match run {
        Some(run) => Box::pin(RUN_SCOPE.scope(run, future)),
        None => Box::pin(future),
    };
    match ctx {
        Some(ctx) => tokio::spawn(SCOPED_CONTEXT.scope(ctx, future)),
        None => tokio::spawn(future),
    }
}
