//! Replayable SDK for Rust
//!
//! Durable async workflows built on an append-only event log. A replayable
//! run is re-executed from the top every time it resumes; steps and hooks
//! replay their recorded outcomes in the order they originally settled, so
//! races resolve the same way on every play.

#![allow(clippy::result_large_err)]

pub mod combinators;
pub mod config;
pub mod context;
pub mod error;
pub mod notifier;
pub mod observer;
pub mod orchestrator;
pub mod primitives;
pub mod registry;

/// Testing utilities for replayable workflows.
/// Available only with the `testing` feature enabled.
#[cfg(feature = "testing")]
pub mod testing;

// Re-export commonly used types
pub use error::{PendingCondition, ReplayError, Result};

// Re-export core types
pub use replayable_core::{
    EventKind, EventLog, InMemoryEventLog, ReplayEvent, ResumptionSource, RetryPolicy, RunState,
    RunStatus, SequencedReplayEvent, StepState, StepStatus,
};

// Re-export config types
pub use config::{ConfigError, OrchestratorConfig};

// Re-export context types
pub use context::{clear_context, get_replay_context, use_context, using, ReplayContext};

// Re-export orchestrator types
pub use notifier::Notifier;
pub use observer::{CompositeRunObserver, LoggingObserver, NoOpObserver, PlayMode, RunObserver};
pub use orchestrator::{recover, replayable, resume, Orchestrator, Replayable, RunHandle};
pub use registry::{RegisteredReplayable, ReplayableRegistry};

// Re-export primitives
pub use combinators::{join_all, race, select};
pub use primitives::{
    hook, named_hook, once, step, trigger, Hook, HookFuture, HookSelector, Step, StepFuture,
};

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::combinators::{join_all, race, select};
    pub use crate::config::OrchestratorConfig;
    pub use crate::context::{use_context, using, ReplayContext};
    pub use crate::error::{ReplayError, Result};
    pub use crate::orchestrator::{recover, replayable, resume, Replayable, RunHandle};
    pub use crate::primitives::{
        hook, named_hook, once, step, trigger, Hook, HookSelector, Step,
    };
    pub use replayable_core::RetryPolicy;
    pub use serde::{Deserialize, Serialize};
    pub use serde_json::{json, Value};
    pub use uuid::Uuid;
}
