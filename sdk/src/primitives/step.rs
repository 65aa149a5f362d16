//! `step` - an at-most-once unit of work within a run

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::Arc;

use futures::FutureExt;
use replayable_core::{ReplayEvent, ResumptionSource, RetryPolicy, StepOutcome, StepStatus};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::context::{current_run, using, RunScope};
use crate::error::{ReplayError, Result};

/// Future returned by step-like primitives
pub type StepFuture<T> = Pin<Box<dyn Future<Output = Result<T>> + Send>>;

pub(crate) type Attempt = Pin<Box<dyn Future<Output = Result<Value>> + Send>>;
pub(crate) type Work = Box<dyn FnMut() -> Attempt + Send>;

/// A function whose calls are recorded as steps.
///
/// Outside a run, calling the step just calls the function. Inside a run each
/// call takes the next step index; the function runs at most once per index
/// and every later play of the run sees the recorded outcome.
///
/// # Example
///
/// ```ignore
/// let charge = step(|amount: u64| async move { payments::charge(amount).await });
///
/// let flow = replayable("checkout", move |amount: u64| {
///     let charge = charge.clone();
///     async move { charge.call(amount).await }
/// })?;
/// ```
pub struct Step<F> {
    f: Arc<F>,
    retry: Option<RetryPolicy>,
}

/// Wrap a function as a step
pub fn step<F>(f: F) -> Step<F> {
    Step {
        f: Arc::new(f),
        retry: None,
    }
}

impl<F> Step<F> {
    /// Override the orchestrator's default retry policy for this step
    pub fn with_retry(mut self, policy: RetryPolicy) -> Self {
        self.retry = Some(policy);
        self
    }

    /// Call the step.
    ///
    /// The step index is taken immediately and work that has not run yet
    /// starts right away, whether or not the returned future is awaited.
    pub fn call<A, Fut, T>(&self, args: A) -> StepFuture<T>
    where
        F: Fn(A) -> Fut + Send + Sync + 'static,
        A: Clone + Send + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
        T: Serialize + DeserializeOwned + Send + 'static,
    {
        let Some(scope) = current_run() else {
            return Box::pin((self.f)(args));
        };

        let f = Arc::clone(&self.f);
        let work: Work = Box::new(move || {
            let attempt = f(args.clone());
            Box::pin(async move { Ok(serde_json::to_value(attempt.await?)?) })
        });
        let retry = self.retry.unwrap_or_else(|| scope.step_retry());
        schedule(&scope, work, retry)
    }
}

impl<F> Clone for Step<F> {
    fn clone(&self) -> Self {
        Self {
            f: Arc::clone(&self.f),
            retry: self.retry,
        }
    }
}

impl<F> std::fmt::Debug for Step<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Step")
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}

/// Take the next step index of the run and resolve it.
///
/// A recorded outcome is replayed through the run's sequencer turn. Anything
/// else is decided in a task of its own and resolves as pending.
pub(crate) fn schedule<T>(scope: &Arc<RunScope>, work: Work, retry: RetryPolicy) -> StepFuture<T>
where
    T: DeserializeOwned + Send + 'static,
{
    let index = scope.next_step_index();

    if let Some(recorded) = scope.history().step(index) {
        tracing::trace!(
            run_id = %scope.run_id(),
            step = index,
            seq = recorded.seq,
            "Replaying recorded step"
        );
        let turn = scope.sequencer().turn(recorded.seq);
        let outcome = recorded.value.clone();
        let run_id = scope.run_id();
        return Box::pin(async move {
            // Exhausted history only lifts the ordering, the outcome stands
            if let Err(e) = turn.await {
                tracing::trace!(
                    run_id = %run_id,
                    step = index,
                    reason = %e,
                    "Replaying step under live ordering"
                );
            }
            settle(index, outcome)
        });
    }

    let decision = tokio::spawn(decide(Arc::clone(scope), index, work, retry));
    Box::pin(async move {
        let value = decision.await.map_err(|e| {
            ReplayError::Other(format!("step {} could not be scheduled: {}", index, e))
        })??;
        Ok(serde_json::from_value(value)?)
    })
}

fn settle<T: DeserializeOwned>(index: u64, outcome: StepOutcome) -> Result<T> {
    match outcome {
        StepOutcome::Completed(value) => Ok(serde_json::from_value(value)?),
        StepOutcome::Failed(message) => Err(ReplayError::StepFailed {
            step: index,
            message,
        }),
    }
}

async fn decide(scope: Arc<RunScope>, index: u64, work: Work, retry: RetryPolicy) -> Result<Value> {
    let run_id = scope.run_id();

    match scope.source() {
        Some(ResumptionSource::StepCompleted { step, result }) if *step == index => {
            return Ok(result.clone());
        }
        Some(ResumptionSource::StepFailed { step, error }) if *step == index => {
            return Err(ReplayError::StepFailed {
                step: index,
                message: error.clone(),
            });
        }
        _ => {}
    }

    let events = scope.events();
    match events.get_step_state(run_id, index).await? {
        None => {
            events
                .log(vec![ReplayEvent::step_started(run_id, index)])
                .await?;
            tracing::debug!(run_id = %run_id, step = index, "Step started");
            execute(&scope, index, work, retry);
        }
        Some(state) if state.status == StepStatus::Interrupted => {
            events
                .log(vec![ReplayEvent::step_recovered(run_id, index)])
                .await?;
            tracing::info!(run_id = %run_id, step = index, "Step recovered");
            execute(&scope, index, work, retry);
        }
        Some(state) => {
            tracing::trace!(
                run_id = %run_id,
                step = index,
                status = %state.status,
                "Step still settling"
            );
        }
    }

    Err(ReplayError::step_pending(index))
}

/// Run the step's function in the background and record its outcome.
///
/// The function runs under the run's adapter but outside the run scope, so
/// steps it calls are plain function calls.
fn execute(scope: &Arc<RunScope>, index: u64, mut work: Work, retry: RetryPolicy) {
    let run_id = scope.run_id();
    let guard = scope.in_flight().begin(run_id);
    let scope = Arc::clone(scope);

    tokio::spawn(using(scope.context().clone(), async move {
        let _guard = guard;
        let events = Arc::clone(scope.events());
        let mut attempt = 1;

        let terminal = loop {
            let error = match AssertUnwindSafe(async { work().await })
                .catch_unwind()
                .await
            {
                Ok(Ok(value)) => break ReplayEvent::step_completed(run_id, index, value),
                Ok(Err(e)) => e.to_string(),
                Err(panic) => panic_message(panic.as_ref()),
            };

            tracing::warn!(
                run_id = %run_id,
                step = index,
                attempt,
                error = %error,
                "Step attempt failed"
            );
            if let Err(e) = events
                .log(vec![ReplayEvent::step_error(run_id, index, error.as_str())])
                .await
            {
                tracing::error!(run_id = %run_id, step = index, error = %e, "Failed to record step error");
                return;
            }

            if !retry.should_retry(attempt) {
                break ReplayEvent::step_failed(run_id, index, error);
            }

            tokio::time::sleep(retry.backoff(attempt)).await;
            attempt += 1;
            if let Err(e) = events
                .log(vec![ReplayEvent::step_retried(run_id, index)])
                .await
            {
                tracing::error!(run_id = %run_id, step = index, error = %e, "Failed to record step retry");
                return;
            }
        };

        let source = ResumptionSource::from_event(&terminal);
        if let Err(e) = events.log(vec![terminal]).await {
            tracing::error!(run_id = %run_id, step = index, error = %e, "Failed to record step outcome");
            return;
        }
        tracing::debug!(run_id = %run_id, step = index, attempts = attempt, "Step settled");
        scope.resume(source);
    }));
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        format!("step panicked: {}", message)
    } else if let Some(message) = payload.downcast_ref::<String>() {
        format!("step panicked: {}", message)
    } else {
        "step panicked".to_string()
    }
}
