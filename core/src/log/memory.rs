//! In-memory event log for testing and ephemeral execution.
//!
//! Events live in a single vector behind a `parking_lot::RwLock`. Appends hold
//! the write lock for the whole batch, which serializes `seq` assignment.
//! Reads project over a snapshot of the vector.
//!
//! # Example
//!
//! ```rust,ignore
//! use replayable_core::log::InMemoryEventLog;
//!
//! let log = InMemoryEventLog::new();
//! // ... run workflows against it ...
//!
//! // Simulate a process restart with the same durable history
//! let restarted = InMemoryEventLog::from_events(log.events());
//! ```

use async_trait::async_trait;
use parking_lot::RwLock;
use uuid::Uuid;

use super::event::{ReplayEvent, SequencedReplayEvent};
use super::projection;
use super::state::{HookBinding, HookTrigger, RunState, StepState};
use super::EventLog;
use crate::error::CoreResult;

#[derive(Debug, Default)]
struct LogInner {
    events: Vec<SequencedReplayEvent>,
    last_seq: u64,
}

/// Event log held entirely in memory. Data is lost when the log is dropped.
#[derive(Debug, Default)]
pub struct InMemoryEventLog {
    inner: RwLock<LogInner>,
}

impl InMemoryEventLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild a log from previously recorded events.
    ///
    /// Numbering continues after the highest `seq` present.
    pub fn from_events(events: Vec<SequencedReplayEvent>) -> Self {
        let last_seq = events.iter().map(|e| e.seq).max().unwrap_or(0);
        Self {
            inner: RwLock::new(LogInner { events, last_seq }),
        }
    }

    fn read<T>(&self, f: impl FnOnce(&[SequencedReplayEvent]) -> T) -> T {
        let inner = self.inner.read();
        f(&inner.events)
    }

    // =========================================================================
    // Test Helpers
    // =========================================================================

    /// Snapshot of every event recorded so far
    pub fn events(&self) -> Vec<SequencedReplayEvent> {
        self.inner.read().events.clone()
    }

    /// Snapshot of the events recorded for one run
    pub fn events_for(&self, run_id: Uuid) -> Vec<SequencedReplayEvent> {
        self.read(|events| {
            events
                .iter()
                .filter(|e| e.event.run_id() == run_id)
                .cloned()
                .collect()
        })
    }

    pub fn len(&self) -> usize {
        self.inner.read().events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl EventLog for InMemoryEventLog {
    async fn log(&self, events: Vec<ReplayEvent>) -> CoreResult<()> {
        let mut inner = self.inner.write();
        for event in events {
            inner.last_seq += 1;
            let seq = inner.last_seq;
            tracing::trace!(seq, kind = %event.kind(), run_id = %event.run_id(), "Event appended");
            inner.events.push(SequencedReplayEvent::new(seq, event));
        }
        Ok(())
    }

    async fn get_run_state(&self, run_id: Uuid) -> CoreResult<Option<RunState>> {
        Ok(self.read(|events| projection::project_run(run_id, events)))
    }

    async fn get_step_state(&self, run_id: Uuid, step: u64) -> CoreResult<Option<StepState>> {
        Ok(self.read(|events| projection::project_step(run_id, step, events)))
    }

    async fn get_hook_bindings(&self, token: &str) -> CoreResult<Vec<HookBinding>> {
        Ok(self.read(|events| projection::hook_bindings(token, events)))
    }

    async fn get_hook_triggers(&self, run_id: Uuid, token: &str) -> CoreResult<Vec<HookTrigger>> {
        Ok(self.read(|events| projection::hook_triggers(run_id, token, events)))
    }

    async fn is_hook_bound(&self, token: &str, run_id: Uuid) -> CoreResult<bool> {
        Ok(self.read(|events| projection::is_hook_bound(token, run_id, events)))
    }

    async fn get_pending_runs(&self) -> CoreResult<Vec<RunState>> {
        Ok(self.read(projection::pending_runs))
    }

    async fn get_pending_steps(&self, run_id: Uuid) -> CoreResult<Vec<StepState>> {
        Ok(self.read(|events| projection::pending_steps(run_id, events)))
    }

    async fn get_finished_work_events(
        &self,
        run_id: Uuid,
    ) -> CoreResult<Vec<SequencedReplayEvent>> {
        Ok(self.read(|events| projection::finished_work(run_id, events)))
    }
}
