//! # Replayable Core
//!
//! Language-agnostic core library for durable, replayable workflows.
//!
//! This crate provides the building blocks the SDK drives: the event model,
//! the event log contract and its projections, and the sequencing gate that
//! makes concurrent races reproducible on replay. It holds no workflow code
//! and knows nothing about task-local context or how runs are orchestrated.
//!
//! ## What's in Core vs SDK
//!
//! **Core** contains language-agnostic components:
//! - Replay events and their wire format
//! - Pure run/step/hook state projections
//! - The `EventLog` contract and an in-memory adapter
//! - Per-play replay history and the turn-taking `Sequencer`
//! - Step retry policy
//!
//! **SDK** contains the runtime pieces:
//! - Execution context (scoped adapter, per-run scope)
//! - Notifier, registry and run orchestrator
//! - `step`, `hook`, `once` and `trigger` primitives
//!
//! ## Modules
//!
//! - [`log`] - Replay events, projections, `EventLog` and `InMemoryEventLog`
//! - [`replay`] - Finished-work index for one play of a run
//! - [`sequencer`] - Turn gate replaying historical completion order
//! - [`retry`] - Step retry policy
//! - [`error`] - Core error types

pub mod error;
pub mod log;
pub mod replay;
pub mod retry;
pub mod sequencer;

// Re-export error types
pub use error::{CoreError, CoreResult};

// Re-export log types
pub use log::{
    EventKind, EventLog, HookBinding, HookTrigger, InMemoryEventLog, ReplayEvent,
    ResumptionSource, RunState, RunStatus, SequencedReplayEvent, StepAttempt, StepState,
    StepStatus,
};

// Re-export replay types
pub use replay::{Recorded, ReplayHistory, StepOutcome};
pub use retry::RetryPolicy;
pub use sequencer::{Sequencer, Stall, Turn, TurnError};
