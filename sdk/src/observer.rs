//! Run lifecycle observers
//!
//! Observers receive notifications as the orchestrator drives runs and can be
//! used for logging, metrics, monitoring, etc. They never influence a run.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use uuid::Uuid;

use crate::error::PendingCondition;

/// How a play of a run began
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayMode {
    /// First play of a fresh run (`run:started`)
    Started,
    /// Replay of a paused run (`run:resumed`)
    Resumed,
    /// Replay after the previous play was cut short (`run:recovered`)
    Recovered,
}

impl PlayMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Started => "started",
            Self::Resumed => "resumed",
            Self::Recovered => "recovered",
        }
    }
}

impl std::fmt::Display for PlayMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Observer trait for run lifecycle events
///
/// Implementations can be registered with `Orchestrator::with_observer` to
/// receive notifications for monitoring, logging, metrics collection, etc.
#[async_trait]
pub trait RunObserver: Send + Sync {
    /// Called when a play of a run begins
    async fn on_run_played(&self, _run_id: Uuid, _replayable_id: &str, _mode: PlayMode) {}

    /// Called when a run suspends on a pending condition
    async fn on_run_paused(
        &self,
        _run_id: Uuid,
        _replayable_id: &str,
        _condition: &PendingCondition,
    ) {
    }

    /// Called when a run completes successfully
    async fn on_run_completed(&self, _run_id: Uuid, _replayable_id: &str, _result: &Value) {}

    /// Called when a run fails with an error
    async fn on_run_failed(&self, _run_id: Uuid, _replayable_id: &str, _error: &str) {}
}

/// Composite observer that delegates to multiple observers
#[derive(Clone)]
pub struct CompositeRunObserver {
    observers: Vec<Arc<dyn RunObserver>>,
}

impl CompositeRunObserver {
    pub fn new(observers: Vec<Arc<dyn RunObserver>>) -> Self {
        Self { observers }
    }

    pub fn push(&mut self, observer: Arc<dyn RunObserver>) {
        self.observers.push(observer);
    }

    pub fn len(&self) -> usize {
        self.observers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.observers.is_empty()
    }
}

impl Default for CompositeRunObserver {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

#[async_trait]
impl RunObserver for CompositeRunObserver {
    async fn on_run_played(&self, run_id: Uuid, replayable_id: &str, mode: PlayMode) {
        for observer in &self.observers {
            observer.on_run_played(run_id, replayable_id, mode).await;
        }
    }

    async fn on_run_paused(
        &self,
        run_id: Uuid,
        replayable_id: &str,
        condition: &PendingCondition,
    ) {
        for observer in &self.observers {
            observer
                .on_run_paused(run_id, replayable_id, condition)
                .await;
        }
    }

    async fn on_run_completed(&self, run_id: Uuid, replayable_id: &str, result: &Value) {
        for observer in &self.observers {
            observer
                .on_run_completed(run_id, replayable_id, result)
                .await;
        }
    }

    async fn on_run_failed(&self, run_id: Uuid, replayable_id: &str, error: &str) {
        for observer in &self.observers {
            observer.on_run_failed(run_id, replayable_id, error).await;
        }
    }
}

/// An observer that does nothing
pub struct NoOpObserver;

#[async_trait]
impl RunObserver for NoOpObserver {}

/// An observer that logs run events using tracing
pub struct LoggingObserver {
    level: tracing::Level,
}

impl LoggingObserver {
    pub fn new(level: tracing::Level) -> Self {
        Self { level }
    }

    /// Create a logging observer that logs at INFO level
    pub fn info() -> Self {
        Self::new(tracing::Level::INFO)
    }

    /// Create a logging observer that logs at DEBUG level
    pub fn debug() -> Self {
        Self::new(tracing::Level::DEBUG)
    }
}

impl Default for LoggingObserver {
    fn default() -> Self {
        Self::info()
    }
}

#[async_trait]
impl RunObserver for LoggingObserver {
    async fn on_run_played(&self, run_id: Uuid, replayable_id: &str, mode: PlayMode) {
        match self.level {
            tracing::Level::DEBUG => {
                tracing::debug!(
                    run_id = %run_id,
                    replayable_id = %replayable_id,
                    mode = %mode,
                    "Run played"
                );
            }
            _ => {
                tracing::info!(
                    run_id = %run_id,
                    replayable_id = %replayable_id,
                    mode = %mode,
                    "Run played"
                );
            }
        }
    }

    async fn on_run_paused(
        &self,
        run_id: Uuid,
        replayable_id: &str,
        condition: &PendingCondition,
    ) {
        match self.level {
            tracing::Level::DEBUG => {
                tracing::debug!(
                    run_id = %run_id,
                    replayable_id = %replayable_id,
                    condition = %condition,
                    "Run paused"
                );
            }
            _ => {
                tracing::info!(
                    run_id = %run_id,
                    replayable_id = %replayable_id,
                    condition = %condition,
                    "Run paused"
                );
            }
        }
    }

    async fn on_run_completed(&self, run_id: Uuid, replayable_id: &str, _result: &Value) {
        match self.level {
            tracing::Level::DEBUG => {
                tracing::debug!(
                    run_id = %run_id,
                    replayable_id = %replayable_id,
                    "Run completed"
                );
            }
            _ => {
                tracing::info!(
                    run_id = %run_id,
                    replayable_id = %replayable_id,
                    "Run completed"
                );
            }
        }
    }

    async fn on_run_failed(&self, run_id: Uuid, replayable_id: &str, error: &str) {
        tracing::error!(
            run_id = %run_id,
            replayable_id = %replayable_id,
            error = %error,
            "Run failed"
        );
    }
}
