//! Core error types for replayable runs
//!
//! These errors come from the language-agnostic layer: the event log and
//! its adapters. The SDK wraps them in its own error type.

/// Core error type for event log operations
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    /// The storage backend failed to read or append events
    #[error("Event log error: {0}")]
    Log(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid argument or configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

/// Result type alias for core operations
pub type CoreResult<T> = std::result::Result<T, CoreError>;
