//! `hook` - external wait points, and `trigger` to deliver their values
//!
//! A hook is bound to a run under a token. Any code outside the run can then
//! deliver a value with [`trigger`], which records it and resumes the run.
//! Only the first value delivered to a token is ever observed by the run.

use std::future::Future;
use std::marker::PhantomData;
use std::pin::Pin;
use std::sync::Arc;

use replayable_core::{ReplayEvent, ResumptionSource};
use serde::de::DeserializeOwned;
use serde::Serialize;
use uuid::Uuid;

use crate::context::{current_run, RunScope};
use crate::error::{ReplayError, Result};
use crate::orchestrator::Orchestrator;

/// Future returned by [`Hook::once`]
pub type HookFuture<T> = Pin<Box<dyn Future<Output = Result<T>> + Send>>;

/// A wait point bound to the current run
pub struct Hook<T> {
    token: String,
    scope: Arc<RunScope>,
    _marker: PhantomData<fn() -> T>,
}

/// Bind an anonymous hook.
///
/// The token is derived from the run id and the hook's position in the run,
/// so every play of the run binds the same token.
pub async fn hook<T>() -> Result<Hook<T>> {
    let scope = current_run().ok_or(ReplayError::OutsideRun("hook()"))?;
    let index = scope.next_hook_index();
    let token = Uuid::new_v5(&scope.run_id(), format!("hook:{}", index).as_bytes()).to_string();
    bind(scope, token).await
}

/// Bind a hook under a caller-chosen id, so it can be triggered by name
pub async fn named_hook<T>(id: impl Into<String>) -> Result<Hook<T>> {
    let scope = current_run().ok_or(ReplayError::OutsideRun("named_hook()"))?;
    bind(scope, id.into()).await
}

async fn bind<T>(scope: Arc<RunScope>, token: String) -> Result<Hook<T>> {
    let run_id = scope.run_id();
    if !scope.events().is_hook_bound(&token, run_id).await? {
        scope
            .events()
            .log(vec![ReplayEvent::hook_bound(run_id, token.as_str())])
            .await?;
        tracing::debug!(run_id = %run_id, token = %token, "Hook bound");
    }

    Ok(Hook {
        token,
        scope,
        _marker: PhantomData,
    })
}

impl<T> Hook<T> {
    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn run_id(&self) -> Uuid {
        self.scope.run_id()
    }
}

impl<T: DeserializeOwned + Send + 'static> Hook<T> {
    /// Wait for the first value delivered to this hook.
    ///
    /// Resolves with the recorded value on replay, in its recorded order
    /// relative to other settled work. Suspends the run while no value has
    /// been delivered.
    pub fn once(&self) -> HookFuture<T> {
        if let Some(recorded) = self.scope.history().hook(&self.token) {
            tracing::trace!(
                run_id = %self.scope.run_id(),
                token = %self.token,
                seq = recorded.seq,
                "Replaying recorded hook value"
            );
            let turn = self.scope.sequencer().turn(recorded.seq);
            let value = recorded.value.clone();
            let (run_id, token) = (self.scope.run_id(), self.token.clone());
            return Box::pin(async move {
                if let Err(e) = turn.await {
                    tracing::trace!(
                        run_id = %run_id,
                        token = %token,
                        reason = %e,
                        "Replaying hook value under live ordering"
                    );
                }
                Ok(serde_json::from_value(value)?)
            });
        }

        if let Some(ResumptionSource::HookTriggered { token, value }) = self.scope.source() {
            if *token == self.token {
                let value = value.clone();
                return Box::pin(async move { Ok(serde_json::from_value(value)?) });
            }
        }

        let pending = ReplayError::hook_pending(self.token.as_str());
        Box::pin(async move { Err(pending) })
    }
}

impl<T> std::fmt::Debug for Hook<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Hook")
            .field("token", &self.token)
            .field("run_id", &self.scope.run_id())
            .finish()
    }
}

/// Which hooks a [`trigger`] delivers to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HookSelector {
    token: String,
    run_id: Option<Uuid>,
}

impl HookSelector {
    /// Select hooks by the token of an anonymous hook
    pub fn by_token(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            run_id: None,
        }
    }

    /// Select hooks bound with [`named_hook`]
    pub fn by_id(id: impl Into<String>) -> Self {
        Self::by_token(id)
    }

    /// Only deliver to one run
    pub fn in_run(mut self, run_id: Uuid) -> Self {
        self.run_id = Some(run_id);
        self
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn run_id(&self) -> Option<Uuid> {
        self.run_id
    }
}

/// Deliver a value to the selected hooks with the global orchestrator.
///
/// Returns the ids of the runs that received it.
pub async fn trigger(selector: HookSelector, value: impl Serialize) -> Result<Vec<Uuid>> {
    let value = serde_json::to_value(value)?;
    Orchestrator::global().trigger(selector, value).await
}
