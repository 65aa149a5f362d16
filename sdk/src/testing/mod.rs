//! Testing utilities for replayable workflows
//!
//! [`TestEnvironment`] bundles an isolated registry, an orchestrator and an
//! in-memory event log, so tests never touch the process-wide instances and
//! can inspect every event a run records.
//!
//! # Example
//!
//! ```ignore
//! use replayable_sdk::testing::TestEnvironment;
//!
//! let env = TestEnvironment::new();
//! let double = env.replayable("double", |n: i64| async move { Ok(n * 2) })?;
//!
//! let result = env.run(double.call(21)).await?;
//! assert_eq!(result, 42);
//! ```

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use replayable_core::{
    EventKind, EventLog, InMemoryEventLog, RunState, SequencedReplayEvent, StepState,
};
use serde::de::DeserializeOwned;
use serde::Serialize;
use uuid::Uuid;

use crate::config::OrchestratorConfig;
use crate::context::{using, ReplayContext};
use crate::error::Result;
use crate::notifier::Notifier;
use crate::orchestrator::{Orchestrator, Replayable};
use crate::registry::ReplayableRegistry;

/// Isolated engine instance backed by an in-memory event log
#[derive(Clone)]
pub struct TestEnvironment {
    registry: Arc<ReplayableRegistry>,
    orchestrator: Orchestrator,
    log: Arc<InMemoryEventLog>,
    context: ReplayContext,
}

impl Default for TestEnvironment {
    fn default() -> Self {
        Self::new()
    }
}

impl TestEnvironment {
    pub fn new() -> Self {
        Self::build(InMemoryEventLog::new(), OrchestratorConfig::DEFAULT)
    }

    pub fn with_config(config: OrchestratorConfig) -> Self {
        Self::build(InMemoryEventLog::new(), config)
    }

    /// Start from a previously recorded log, as a freshly started process would
    pub fn from_events(events: Vec<SequencedReplayEvent>) -> Self {
        Self::build(InMemoryEventLog::from_events(events), OrchestratorConfig::DEFAULT)
    }

    fn build(log: InMemoryEventLog, config: OrchestratorConfig) -> Self {
        let registry = Arc::new(ReplayableRegistry::new());
        let orchestrator = Orchestrator::new(registry.clone()).with_config(config);
        let log = Arc::new(log);
        let events: Arc<dyn EventLog> = log.clone();
        let context = ReplayContext::new(events, Arc::new(Notifier::new()));

        Self {
            registry,
            orchestrator,
            log,
            context,
        }
    }

    pub fn orchestrator(&self) -> &Orchestrator {
        &self.orchestrator
    }

    pub fn registry(&self) -> &Arc<ReplayableRegistry> {
        &self.registry
    }

    pub fn context(&self) -> ReplayContext {
        self.context.clone()
    }

    pub fn log(&self) -> &Arc<InMemoryEventLog> {
        &self.log
    }

    /// Register a workflow function with this environment's orchestrator
    pub fn replayable<I, O, F, Fut>(&self, name: &str, f: F) -> Result<Replayable<I, O>>
    where
        I: Serialize + DeserializeOwned + Send + 'static,
        O: Serialize + DeserializeOwned + Send + 'static,
        F: Fn(I) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<O>> + Send + 'static,
    {
        self.orchestrator.replayable(name, f)
    }

    /// Run `body` with this environment's context installed
    pub async fn run<F: Future>(&self, body: F) -> F::Output {
        using(self.context.clone(), body).await
    }

    /// Every event recorded for a run, in `seq` order
    pub fn events_for(&self, run_id: Uuid) -> Vec<SequencedReplayEvent> {
        self.log.events_for(run_id)
    }

    pub fn kinds_for(&self, run_id: Uuid) -> Vec<EventKind> {
        self.events_for(run_id).iter().map(|e| e.kind()).collect()
    }

    /// Ids of every run recorded in the log, in start order
    pub fn run_ids(&self) -> Vec<Uuid> {
        self.log
            .events()
            .iter()
            .filter(|e| e.kind() == EventKind::RunStarted)
            .map(|e| e.event.run_id())
            .collect()
    }

    pub async fn run_state(&self, run_id: Uuid) -> Result<Option<RunState>> {
        Ok(self.log.get_run_state(run_id).await?)
    }

    pub async fn step_state(&self, run_id: Uuid, step: u64) -> Result<Option<StepState>> {
        Ok(self.log.get_step_state(run_id, step).await?)
    }

    /// Poll the log until `predicate` holds or `timeout` elapses.
    ///
    /// Returns whether the predicate held.
    pub async fn wait_until<P>(&self, timeout: Duration, predicate: P) -> bool
    where
        P: Fn(&[SequencedReplayEvent]) -> bool,
    {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if predicate(&self.log.events()) {
                return true;
            }
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    }
}

impl std::fmt::Debug for TestEnvironment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TestEnvironment")
            .field("registry", &self.registry)
            .field("events", &self.log.len())
            .finish()
    }
}
