//! Configuration presets for the run orchestrator
//!
//! This module provides configuration options for run execution, with
//! sensible defaults and presets for common use cases.

use std::time::Duration;

pub use replayable_core::RetryPolicy;

/// Configuration for the run orchestrator
#[derive(Debug, Clone, PartialEq)]
pub struct OrchestratorConfig {
    /// Retry policy applied to steps that do not set their own
    pub step_retry: RetryPolicy,
    /// How long a play's turn gate may sit stalled before its cursor is
    /// moved up to the lowest waiting turn
    pub turn_grace: Duration,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self::DEFAULT
    }
}

impl OrchestratorConfig {
    /// Default configuration: each step function runs exactly once
    pub const DEFAULT: Self = Self {
        step_retry: RetryPolicy::NONE,
        turn_grace: Duration::from_millis(100),
    };

    /// Retry failing steps with exponential backoff
    pub const RESILIENT: Self = Self {
        step_retry: RetryPolicy::EXPONENTIAL,
        turn_grace: Duration::from_millis(100),
    };

    /// Create a new configuration with validation
    pub fn new(
        max_attempts: u32,
        initial_backoff: Duration,
        backoff_multiplier: f64,
        max_backoff: Duration,
    ) -> Result<Self, ConfigError> {
        let step_retry =
            RetryPolicy::new(max_attempts, initial_backoff, backoff_multiplier, max_backoff)
                .map_err(|e| ConfigError::InvalidValue(e.to_string()))?;
        Ok(Self {
            step_retry,
            ..Self::DEFAULT
        })
    }

    pub fn with_step_retry(mut self, policy: RetryPolicy) -> Self {
        self.step_retry = policy;
        self
    }

    pub fn with_turn_grace(mut self, grace: Duration) -> Self {
        self.turn_grace = grace;
        self
    }
}

/// Configuration error
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// Invalid configuration value
    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}

impl From<ConfigError> for crate::error::ReplayError {
    fn from(err: ConfigError) -> Self {
        crate::error::ReplayError::InvalidConfiguration(err.to_string())
    }
}
