//! Event log abstraction for replayable runs
//!
//! The log is the single source of truth for every run: there is no separate
//! snapshot format. Run, step and hook state are derived from the appended
//! events by the pure functions in [`projection`].
//!
//! ## Consistency
//!
//! Implementations must be read-your-writes consistent: once [`EventLog::log`]
//! returns, subsequent reads on the same instance observe the appended events.
//! Concurrent appends must not interleave, so that `seq` is a total order over
//! all activity in the log.
//!
//! ## Example
//!
//! ```rust,ignore
//! use replayable_core::log::{EventLog, InMemoryEventLog, ReplayEvent};
//!
//! let log = InMemoryEventLog::new();
//! log.log(vec![ReplayEvent::run_started(run_id, "checkout", json!({}))]).await?;
//!
//! let state = log.get_run_state(run_id).await?.unwrap();
//! assert_eq!(state.status, RunStatus::Running);
//! ```

pub mod event;
pub mod memory;
pub mod projection;
pub mod state;

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::CoreResult;

pub use event::{EventKind, ReplayEvent, ResumptionSource, SequencedReplayEvent};
pub use memory::InMemoryEventLog;
pub use state::{
    HookBinding, HookTrigger, RunState, RunStatus, StepAttempt, StepState, StepStatus,
};

/// Append-only storage of replay events plus the read-side projections
/// the engine needs.
#[async_trait]
pub trait EventLog: Send + Sync {
    /// Append events, assigning each the next `seq` in order.
    async fn log(&self, events: Vec<ReplayEvent>) -> CoreResult<()>;

    /// Current state of a run, or `None` if it never started
    async fn get_run_state(&self, run_id: Uuid) -> CoreResult<Option<RunState>>;

    /// Current state of a step, or `None` if it never started
    async fn get_step_state(&self, run_id: Uuid, step: u64) -> CoreResult<Option<StepState>>;

    /// Every run that bound `token`
    async fn get_hook_bindings(&self, token: &str) -> CoreResult<Vec<HookBinding>>;

    /// Values delivered to `token` within a run, in `seq` order
    async fn get_hook_triggers(&self, run_id: Uuid, token: &str) -> CoreResult<Vec<HookTrigger>>;

    async fn is_hook_bound(&self, token: &str, run_id: Uuid) -> CoreResult<bool>;

    /// Runs with a start event and no terminal event
    async fn get_pending_runs(&self) -> CoreResult<Vec<RunState>>;

    /// Steps of a run with a start event and no terminal event
    async fn get_pending_steps(&self, run_id: Uuid) -> CoreResult<Vec<StepState>>;

    /// Step terminal and hook trigger events of a run, ordered by `seq`
    async fn get_finished_work_events(&self, run_id: Uuid)
        -> CoreResult<Vec<SequencedReplayEvent>>;
}
