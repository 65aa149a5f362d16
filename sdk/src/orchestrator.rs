//! Run orchestrator
//!
//! Drives runs through their lifecycle: every play replays the body from the
//! start against the run's finished work, appends the lifecycle events and
//! reacts to the outcome. A body that cannot make progress raises a pending
//! condition; the run is paused and played again once the awaited step or
//! hook settles.
//!
//! Within one process a run is driven by at most one play at a time. A play
//! holds a [`RunClaim`] on its run id until its outcome has been logged.

use std::collections::HashSet;
use std::future::Future;
use std::marker::PhantomData;
use std::pin::Pin;
use std::sync::{Arc, OnceLock};
use std::task::{Context, Poll};
use std::time::Duration;

use parking_lot::Mutex;
use replayable_core::{
    ReplayEvent, ReplayHistory, ResumptionSource, RunStatus, Sequencer, StepStatus,
};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::config::OrchestratorConfig;
use crate::context::{
    exec_in_run_context, get_replay_context, using, InFlightWork, ReplayContext, ResumeFn,
    RunScope,
};
use crate::error::{PendingCondition, ReplayError, Result};
use crate::observer::{CompositeRunObserver, PlayMode, RunObserver};
use crate::primitives::hook::HookSelector;
use crate::registry::ReplayableRegistry;

/// Exclusive right to play a run in this process
#[derive(Debug)]
pub struct RunClaim {
    active: Arc<Mutex<HashSet<Uuid>>>,
    run_id: Uuid,
}

impl RunClaim {
    pub fn run_id(&self) -> Uuid {
        self.run_id
    }
}

impl Drop for RunClaim {
    fn drop(&mut self) {
        self.active.lock().remove(&self.run_id);
    }
}

struct PlayRequest {
    replayable_id: String,
    run_id: Uuid,
    args: Value,
    prior: Option<RunStatus>,
    source: Option<ResumptionSource>,
}

/// Drives runs of registered replayables
#[derive(Clone)]
pub struct Orchestrator {
    registry: Arc<ReplayableRegistry>,
    config: OrchestratorConfig,
    observers: CompositeRunObserver,
    active: Arc<Mutex<HashSet<Uuid>>>,
    in_flight: InFlightWork,
}

static GLOBAL_ORCHESTRATOR: OnceLock<Orchestrator> = OnceLock::new();

impl Orchestrator {
    pub fn new(registry: Arc<ReplayableRegistry>) -> Self {
        Self {
            registry,
            config: OrchestratorConfig::default(),
            observers: CompositeRunObserver::default(),
            active: Arc::new(Mutex::new(HashSet::new())),
            in_flight: InFlightWork::new(),
        }
    }

    /// The process-wide orchestrator over [`ReplayableRegistry::global`]
    pub fn global() -> Orchestrator {
        GLOBAL_ORCHESTRATOR
            .get_or_init(|| Orchestrator::new(ReplayableRegistry::global()))
            .clone()
    }

    pub fn with_config(mut self, config: OrchestratorConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_observer(mut self, observer: impl RunObserver + 'static) -> Self {
        self.observers.push(Arc::new(observer));
        self
    }

    pub fn registry(&self) -> &Arc<ReplayableRegistry> {
        &self.registry
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Try to take the exclusive right to play a run
    pub fn try_claim(&self, run_id: Uuid) -> Option<RunClaim> {
        if !self.active.lock().insert(run_id) {
            return None;
        }
        Some(RunClaim {
            active: self.active.clone(),
            run_id,
        })
    }

    /// Check whether a play of the run is in progress in this process
    pub fn is_playing(&self, run_id: Uuid) -> bool {
        self.active.lock().contains(&run_id)
    }

    /// Register a workflow function and get a typed handle to start runs
    pub fn replayable<I, O, F, Fut>(&self, name: &str, f: F) -> Result<Replayable<I, O>>
    where
        I: Serialize + DeserializeOwned + Send + 'static,
        O: Serialize + DeserializeOwned + Send + 'static,
        F: Fn(I) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<O>> + Send + 'static,
    {
        self.registry.register(name, f)?;
        Ok(Replayable {
            name: name.to_string(),
            orchestrator: self.clone(),
            _marker: PhantomData,
        })
    }

    /// Start a fresh run of a registered replayable
    pub fn start_run(&self, replayable_id: &str, args: Value) -> Result<RunHandle<Value>> {
        let ctx = get_replay_context()?;
        let run_id = Uuid::new_v4();
        let outcome = ctx.notifier.wait(run_id);
        let claim = self
            .try_claim(run_id)
            .ok_or_else(|| ReplayError::Other(format!("run {} is already active", run_id)))?;

        self.spawn_play(
            ctx,
            claim,
            PlayRequest {
                replayable_id: replayable_id.to_string(),
                run_id,
                args,
                prior: None,
                source: None,
            },
        );

        Ok(RunHandle::new(run_id, Box::pin(outcome)))
    }

    /// Resume a run and wait for its terminal outcome.
    ///
    /// Only a paused run is played again. For any other run this just waits,
    /// so it is safe to call redundantly or concurrently.
    pub async fn resume(&self, run_id: Uuid, source: Option<ResumptionSource>) -> Result<Value> {
        let ctx = get_replay_context()?;
        let outcome = ctx.notifier.wait(run_id);

        let state = ctx
            .events
            .get_run_state(run_id)
            .await?
            .ok_or(ReplayError::RunNotFound(run_id))?;

        match state.status {
            RunStatus::Completed => {
                ctx.notifier
                    .notify_complete(run_id, state.result.unwrap_or(Value::Null));
            }
            RunStatus::Failed => {
                ctx.notifier
                    .notify_failed(run_id, state.error.unwrap_or_default());
            }
            RunStatus::Paused => {
                self.wake(ctx, run_id, source).await?;
            }
            RunStatus::Running | RunStatus::Interrupted => {
                tracing::debug!(run_id = %run_id, status = %state.status, "Run not paused, waiting");
            }
        }

        outcome.await
    }

    /// Deliver a value to every run bound to the selected hook.
    ///
    /// Returns the ids of the runs that received the value.
    pub async fn trigger(&self, selector: HookSelector, value: Value) -> Result<Vec<Uuid>> {
        let ctx = get_replay_context()?;
        let token = selector.token();

        let mut runs: Vec<Uuid> = Vec::new();
        for binding in ctx.events.get_hook_bindings(token).await? {
            if selector.run_id().is_some_and(|id| id != binding.run_id) {
                continue;
            }
            if !runs.contains(&binding.run_id) {
                runs.push(binding.run_id);
            }
        }

        if runs.is_empty() {
            tracing::debug!(token = %token, "Trigger matched no bound hook");
            return Ok(runs);
        }

        let events = runs
            .iter()
            .map(|run_id| ReplayEvent::hook_triggered(*run_id, token, value.clone()))
            .collect();
        ctx.events.log(events).await?;
        tracing::info!(token = %token, runs = runs.len(), "Hook triggered");

        for run_id in &runs {
            let source = ResumptionSource::HookTriggered {
                token: token.to_string(),
                value: value.clone(),
            };
            self.wake(ctx.clone(), *run_id, Some(source)).await?;
        }

        Ok(runs)
    }

    /// Pick up runs left unfinished by a previous process.
    ///
    /// In-flight steps are marked interrupted and each run is played again.
    /// A paused run is only played again when work finished after its pause,
    /// since the wake-up for that work may have been lost. Runs driven by
    /// this process are left alone. Returns the ids of the replayed runs.
    pub async fn recover(&self) -> Result<Vec<Uuid>> {
        let ctx = get_replay_context()?;
        let mut recovered = Vec::new();

        for run in ctx.events.get_pending_runs().await? {
            if self.in_flight.is_busy(run.run_id) {
                continue;
            }
            let Some(claim) = self.try_claim(run.run_id) else {
                continue;
            };

            let in_flight = ctx.events.get_pending_steps(run.run_id).await?;
            let mut events: Vec<ReplayEvent> = in_flight
                .iter()
                .filter(|step| step.status != StepStatus::Interrupted)
                .map(|step| ReplayEvent::step_interrupted(run.run_id, step.step))
                .collect();

            let prior = match run.status {
                RunStatus::Paused if in_flight.is_empty() => {
                    let finished = ctx.events.get_finished_work_events(run.run_id).await?;
                    if !finished.iter().any(|e| Some(e.seq) > run.paused_seq) {
                        continue;
                    }
                    tracing::debug!(run_id = %run.run_id, "Work finished after the run paused");
                    RunStatus::Paused
                }
                RunStatus::Running => {
                    events.push(ReplayEvent::run_interrupted(run.run_id));
                    RunStatus::Interrupted
                }
                status => status,
            };

            if !events.is_empty() {
                ctx.events.log(events).await?;
            }
            tracing::info!(
                run_id = %run.run_id,
                replayable_id = %run.replayable_id,
                interrupted_steps = in_flight.len(),
                "Recovering run"
            );

            self.spawn_play(
                ctx.clone(),
                claim,
                PlayRequest {
                    replayable_id: run.replayable_id,
                    run_id: run.run_id,
                    args: run.args,
                    prior: Some(prior),
                    source: None,
                },
            );
            recovered.push(run.run_id);
        }

        Ok(recovered)
    }

    fn spawn_play(&self, ctx: ReplayContext, claim: RunClaim, request: PlayRequest) {
        let this = self.clone();
        let run_id = request.run_id;
        tokio::spawn(using(ctx.clone(), async move {
            if let Err(e) = this.play(&ctx, claim, request).await {
                tracing::error!(run_id = %run_id, error = %e, "Run could not be played");
                ctx.notifier.notify_failed(run_id, e.to_string());
            }
        }));
    }

    fn spawn_wake(&self, ctx: ReplayContext, run_id: Uuid, source: Option<ResumptionSource>) {
        let this = self.clone();
        tokio::spawn(async move {
            if let Err(e) = this.wake(ctx, run_id, source).await {
                tracing::warn!(run_id = %run_id, error = %e, "Failed to wake run");
            }
        });
    }

    /// Play a paused run again unless it is already being played.
    ///
    /// Returns whether a play was started.
    async fn wake(
        &self,
        ctx: ReplayContext,
        run_id: Uuid,
        source: Option<ResumptionSource>,
    ) -> Result<bool> {
        let Some(claim) = self.try_claim(run_id) else {
            tracing::trace!(run_id = %run_id, "Run is being played, skipping wake");
            return Ok(false);
        };

        let state = ctx
            .events
            .get_run_state(run_id)
            .await?
            .ok_or(ReplayError::RunNotFound(run_id))?;
        if state.status != RunStatus::Paused {
            tracing::trace!(run_id = %run_id, status = %state.status, "Run not paused, skipping wake");
            return Ok(false);
        }

        self.spawn_play(
            ctx,
            claim,
            PlayRequest {
                replayable_id: state.replayable_id,
                run_id,
                args: state.args,
                prior: Some(RunStatus::Paused),
                source,
            },
        );
        Ok(true)
    }

    async fn play(&self, ctx: &ReplayContext, claim: RunClaim, request: PlayRequest) -> Result<()> {
        let PlayRequest {
            replayable_id,
            run_id,
            args,
            prior,
            source,
        } = request;

        let replayable = self
            .registry
            .get(&replayable_id)
            .ok_or_else(|| ReplayError::ReplayableNotFound(replayable_id.clone()))?;

        let finished = ctx.events.get_finished_work_events(run_id).await?;
        let history = ReplayHistory::new(&finished);
        let last_seq = history.last_seq();

        let (event, mode) = match prior {
            None => (
                ReplayEvent::run_started(run_id, replayable_id.as_str(), args.clone()),
                PlayMode::Started,
            ),
            Some(RunStatus::Paused) => (
                ReplayEvent::run_resumed(run_id, source.clone()),
                PlayMode::Resumed,
            ),
            Some(_) => (
                ReplayEvent::run_recovered(run_id, source.clone()),
                PlayMode::Recovered,
            ),
        };
        ctx.events.log(vec![event]).await?;
        tracing::debug!(
            run_id = %run_id,
            replayable_id = %replayable_id,
            mode = %mode,
            finished_work = finished.len(),
            "Playing run"
        );
        self.observers
            .on_run_played(run_id, &replayable_id, mode)
            .await;

        let resume: ResumeFn = {
            let this = self.clone();
            let ctx = ctx.clone();
            Arc::new(move |source| this.spawn_wake(ctx.clone(), run_id, source))
        };
        let scope = RunScope::new(run_id, replayable_id.as_str(), ctx.clone(), history)
            .with_resume(resume)
            .with_source(source)
            .with_step_retry(self.config.step_retry)
            .with_in_flight(self.in_flight.clone());

        let watch = GateWatch::start(run_id, scope.sequencer(), self.config.turn_grace);
        let outcome = exec_in_run_context(Arc::new(scope), replayable.invoke(args)).await;
        drop(watch);

        match outcome {
            Ok(result) => {
                ctx.events
                    .log(vec![ReplayEvent::run_completed(run_id, result.clone())])
                    .await?;
                drop(claim);
                tracing::info!(run_id = %run_id, replayable_id = %replayable_id, "Run completed");
                self.observers
                    .on_run_completed(run_id, &replayable_id, &result)
                    .await;
                ctx.notifier.notify_complete(run_id, result);
            }
            Err(ReplayError::Pending(condition)) => {
                ctx.events.log(vec![ReplayEvent::run_paused(run_id)]).await?;
                drop(claim);
                tracing::debug!(
                    run_id = %run_id,
                    condition = %condition,
                    "Run paused"
                );
                self.observers
                    .on_run_paused(run_id, &replayable_id, &condition)
                    .await;
                self.heal(ctx, run_id, &condition, last_seq).await?;
            }
            Err(e) => {
                let message = e.to_string();
                ctx.events
                    .log(vec![ReplayEvent::run_failed(run_id, message.as_str())])
                    .await?;
                drop(claim);
                tracing::info!(
                    run_id = %run_id,
                    replayable_id = %replayable_id,
                    error = %message,
                    "Run failed"
                );
                self.observers
                    .on_run_failed(run_id, &replayable_id, &message)
                    .await;
                ctx.notifier.notify_failed(run_id, message);
            }
        }

        Ok(())
    }

    /// Resume a just-paused run whose wait already ended.
    ///
    /// Work that settles while the run is still being played cannot wake it,
    /// so after the pause is logged the awaited condition and any newer
    /// finished work are checked again.
    async fn heal(
        &self,
        ctx: &ReplayContext,
        run_id: Uuid,
        condition: &PendingCondition,
        last_seq: Option<u64>,
    ) -> Result<()> {
        let settled = match condition {
            PendingCondition::Step { step } => ctx
                .events
                .get_step_state(run_id, *step)
                .await?
                .and_then(|state| match state.status {
                    StepStatus::Completed => Some(ResumptionSource::StepCompleted {
                        step: *step,
                        result: state.result.unwrap_or(Value::Null),
                    }),
                    StepStatus::Failed => Some(ResumptionSource::StepFailed {
                        step: *step,
                        error: state.error.unwrap_or_default(),
                    }),
                    _ => None,
                }),
            PendingCondition::Hook { token } => ctx
                .events
                .get_hook_triggers(run_id, token)
                .await?
                .into_iter()
                .next()
                .map(|trigger| ResumptionSource::HookTriggered {
                    token: token.clone(),
                    value: trigger.value,
                }),
        };

        if let Some(source) = settled {
            tracing::debug!(run_id = %run_id, condition = %condition, "Awaited work settled during play");
            self.spawn_wake(ctx.clone(), run_id, Some(source));
            return Ok(());
        }

        let finished = ctx.events.get_finished_work_events(run_id).await?;
        if finished.iter().any(|e| Some(e.seq) > last_seq) {
            tracing::debug!(run_id = %run_id, "New work finished during play");
            self.spawn_wake(ctx.clone(), run_id, None);
        }
        Ok(())
    }
}

/// Releases a play's turn gate when it stays stalled for a whole grace period.
///
/// A position can be held by work the body only asks for later in program
/// order, such as a hook triggered before its `once()` is reached.
struct GateWatch(Option<JoinHandle<()>>);

impl GateWatch {
    fn start(run_id: Uuid, gate: &Sequencer, grace: Duration) -> Self {
        if gate.is_exhausted() {
            return Self(None);
        }
        let gate = gate.clone();
        Self(Some(tokio::spawn(async move {
            let mut seen = None;
            while !gate.is_exhausted() {
                tokio::time::sleep(grace).await;
                match (gate.stall(), seen) {
                    (Some(stall), Some(previous)) if stall == previous => {
                        if gate.release(stall) {
                            tracing::debug!(
                                run_id = %run_id,
                                cursor = stall.cursor,
                                waiting = stall.waiting,
                                "Turn gate stalled, moving cursor"
                            );
                        }
                        seen = None;
                    }
                    (now, _) => seen = now,
                }
            }
        })))
    }
}

impl Drop for GateWatch {
    fn drop(&mut self) {
        if let Some(task) = self.0.take() {
            task.abort();
        }
    }
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("registry", &self.registry)
            .field("config", &self.config)
            .field("observers", &self.observers.len())
            .field("active", &self.active.lock().len())
            .finish()
    }
}

/// Typed handle to a registered replayable
pub struct Replayable<I, O> {
    name: String,
    orchestrator: Orchestrator,
    _marker: PhantomData<fn(I) -> O>,
}

impl<I, O> Replayable<I, O>
where
    I: Serialize,
    O: DeserializeOwned,
{
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Start a fresh run without waiting for it
    pub fn start(&self, input: I) -> Result<RunHandle<O>> {
        let args = serde_json::to_value(input)?;
        let handle = self.orchestrator.start_run(&self.name, args)?;
        Ok(RunHandle::new(handle.run_id, handle.outcome))
    }

    /// Run to completion and return the result
    pub async fn call(&self, input: I) -> Result<O> {
        self.start(input)?.await
    }
}

impl<I, O> Clone for Replayable<I, O> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            orchestrator: self.orchestrator.clone(),
            _marker: PhantomData,
        }
    }
}

impl<I, O> std::fmt::Debug for Replayable<I, O> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Replayable")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

/// A started run. Resolves with the run's terminal outcome.
pub struct RunHandle<O> {
    run_id: Uuid,
    outcome: Pin<Box<dyn Future<Output = Result<Value>> + Send>>,
    _marker: PhantomData<fn() -> O>,
}

impl<O> RunHandle<O> {
    fn new(run_id: Uuid, outcome: Pin<Box<dyn Future<Output = Result<Value>> + Send>>) -> Self {
        Self {
            run_id,
            outcome,
            _marker: PhantomData,
        }
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }
}

impl<O: DeserializeOwned> Future for RunHandle<O> {
    type Output = Result<O>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        match this.outcome.as_mut().poll(cx) {
            Poll::Ready(Ok(value)) => Poll::Ready(serde_json::from_value(value).map_err(Into::into)),
            Poll::Ready(Err(e)) => Poll::Ready(Err(e)),
            Poll::Pending => Poll::Pending,
        }
    }
}

impl<O> std::fmt::Debug for RunHandle<O> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunHandle")
            .field("run_id", &self.run_id)
            .finish_non_exhaustive()
    }
}

/// Register a workflow function with the global orchestrator
pub fn replayable<I, O, F, Fut>(name: &str, f: F) -> Result<Replayable<I, O>>
where
    I: Serialize + DeserializeOwned + Send + 'static,
    O: Serialize + DeserializeOwned + Send + 'static,
    F: Fn(I) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<O>> + Send + 'static,
{
    Orchestrator::global().replayable(name, f)
}

/// Resume a run with the global orchestrator
pub async fn resume(run_id: Uuid, source: Option<ResumptionSource>) -> Result<Value> {
    Orchestrator::global().resume(run_id, source).await
}

/// Recover unfinished runs with the global orchestrator
pub async fn recover() -> Result<Vec<Uuid>> {
    Orchestrator::global().recover().await
}
