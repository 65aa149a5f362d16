//! Error types for the Replayable SDK

// Re-export core error types
pub use replayable_core::CoreError;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// What a suspended run is waiting for
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum PendingCondition {
    /// A step whose function is still running
    Step { step: u64 },
    /// A hook that has not been triggered yet
    Hook { token: String },
}

impl std::fmt::Display for PendingCondition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Step { step } => write!(f, "step {} has not settled", step),
            Self::Hook { token } => write!(f, "hook {} has not been triggered", token),
        }
    }
}

/// Main error type for the Replayable SDK
#[derive(Debug, thiserror::Error)]
pub enum ReplayError {
    /// The run cannot proceed synchronously and must suspend.
    ///
    /// This is a control-flow signal, not a failure. It is intercepted by the
    /// orchestrator and never reaches the caller of a replayable.
    #[error("Run suspended: {0}")]
    Pending(PendingCondition),

    /// A step's function failed
    #[error("Step {step} failed: {message}")]
    StepFailed { step: u64, message: String },

    /// The run body failed
    #[error("Run failed: {0}")]
    RunFailed(String),

    /// No run with this identifier has started
    #[error("Run not found: {0}")]
    RunNotFound(Uuid),

    /// No replayable registered under this name
    #[error("Replayable not found: {0}")]
    ReplayableNotFound(String),

    /// A replayable is already registered under this name
    #[error("Replayable already registered: {0}")]
    AlreadyRegistered(String),

    /// Neither a scoped nor a global replay context is installed
    #[error("No replay context installed")]
    NoReplayContext,

    /// A run-scoped primitive was used outside of a run body
    #[error("{0} can only be used inside a replayable run")]
    OutsideRun(&'static str),

    /// Event log or other core error
    #[error(transparent)]
    Core(#[from] CoreError),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl ReplayError {
    pub fn step_pending(step: u64) -> Self {
        Self::Pending(PendingCondition::Step { step })
    }

    pub fn hook_pending(token: impl Into<String>) -> Self {
        Self::Pending(PendingCondition::Hook {
            token: token.into(),
        })
    }

    /// Check whether this is a suspension signal rather than a failure
    pub fn is_pending(&self) -> bool {
        matches!(self, Self::Pending(_))
    }

    pub fn pending_condition(&self) -> Option<&PendingCondition> {
        match self {
            Self::Pending(condition) => Some(condition),
            _ => None,
        }
    }
}

/// Result type alias for Replayable SDK operations
pub type Result<T> = std::result::Result<T, ReplayError>;
