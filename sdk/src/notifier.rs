//! Per-run completion and failure broadcast.
//!
//! Any number of independent waiters can watch the same run: the original
//! caller of a replayable, a later out-of-band resumer, a test. Each
//! registered callback is invoked exactly once, when the run reaches its
//! terminal state in this process.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::oneshot;
use uuid::Uuid;

use crate::error::{ReplayError, Result};

type CompletedCallback = Box<dyn FnOnce(Value) + Send>;
type FailedCallback = Box<dyn FnOnce(String) + Send>;

#[derive(Default)]
struct RunWaiters {
    completed: Vec<CompletedCallback>,
    failed: Vec<FailedCallback>,
}

/// Completion/failure pub-sub partitioned by run identifier
#[derive(Default)]
pub struct Notifier {
    waiters: Mutex<HashMap<Uuid, RunWaiters>>,
}

impl Notifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a callback invoked once when the run completes
    pub fn on_run_completed(&self, run_id: Uuid, callback: impl FnOnce(Value) + Send + 'static) {
        self.waiters
            .lock()
            .entry(run_id)
            .or_default()
            .completed
            .push(Box::new(callback));
    }

    /// Register a callback invoked once when the run fails
    pub fn on_run_failed(&self, run_id: Uuid, callback: impl FnOnce(String) + Send + 'static) {
        self.waiters
            .lock()
            .entry(run_id)
            .or_default()
            .failed
            .push(Box::new(callback));
    }

    /// Invoke and clear every callback registered for the run
    pub fn notify_complete(&self, run_id: Uuid, result: Value) {
        let Some(waiters) = self.waiters.lock().remove(&run_id) else {
            return;
        };
        tracing::debug!(
            run_id = %run_id,
            waiters = waiters.completed.len(),
            "Notifying run completion"
        );
        for callback in waiters.completed {
            callback(result.clone());
        }
    }

    /// Invoke and clear every callback registered for the run
    pub fn notify_failed(&self, run_id: Uuid, error: impl Into<String>) {
        let Some(waiters) = self.waiters.lock().remove(&run_id) else {
            return;
        };
        let error = error.into();
        tracing::debug!(
            run_id = %run_id,
            waiters = waiters.failed.len(),
            "Notifying run failure"
        );
        for callback in waiters.failed {
            callback(error.clone());
        }
    }

    /// Wait for the run to reach a terminal state.
    ///
    /// The waiter is registered before this returns, so a notification that
    /// races with the first poll of the future is not lost.
    pub fn wait(&self, run_id: Uuid) -> impl Future<Output = Result<Value>> + Send + 'static {
        let (tx, rx) = oneshot::channel::<std::result::Result<Value, String>>();
        let tx = Arc::new(Mutex::new(Some(tx)));

        let on_complete = tx.clone();
        self.on_run_completed(run_id, move |value| {
            if let Some(tx) = on_complete.lock().take() {
                let _ = tx.send(Ok(value));
            }
        });
        self.on_run_failed(run_id, move |error| {
            if let Some(tx) = tx.lock().take() {
                let _ = tx.send(Err(error));
            }
        });

        async move {
            match rx.await {
                Ok(Ok(value)) => Ok(value),
                Ok(Err(error)) => Err(ReplayError::RunFailed(error)),
                Err(_) => Err(ReplayError::Other(format!(
                    "notifier dropped while waiting for run {}",
                    run_id
                ))),
            }
        }
    }

    /// Number of runs with at least one registered waiter
    pub fn watched_runs(&self) -> usize {
        self.waiters.lock().len()
    }
}

impl std::fmt::Debug for Notifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Notifier")
            .field("watched_runs", &self.watched_runs())
            .finish()
    }
}
