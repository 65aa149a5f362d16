//! `once` - a run-scoped side effect that happens a single time

use std::future::Future;

use replayable_core::RetryPolicy;
use serde::de::DeserializeOwned;
use serde::Serialize;

use super::step::{schedule, StepFuture, Work};
use crate::context::current_run;
use crate::error::ReplayError;

/// Run `f` at most once per run.
///
/// Inside a run this behaves like a zero-argument step: it takes the next
/// step index, records its result and replays it on every later play.
/// It is never retried. Outside a run `f` is simply called.
///
/// ```ignore
/// let receipt_id: String = once(|| async { mailer::send_receipt().await }).await?;
/// ```
pub fn once<F, Fut, T>(f: F) -> StepFuture<T>
where
    F: FnOnce() -> Fut + Send + 'static,
    Fut: Future<Output = crate::Result<T>> + Send + 'static,
    T: Serialize + DeserializeOwned + Send + 'static,
{
    let Some(scope) = current_run() else {
        return Box::pin(async move { f().await });
    };

    let mut f = Some(f);
    let work: Work = Box::new(move || match f.take() {
        Some(f) => {
            let attempt = f();
            Box::pin(async move { Ok(serde_json::to_value(attempt.await?)?) })
        }
        None => Box::pin(async { Err(ReplayError::Other("once function already ran".to_string())) }),
    });
    schedule(&scope, work, RetryPolicy::NONE)
}
