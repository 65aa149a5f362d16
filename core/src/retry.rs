//! Retry policy for step execution
//!
//! A failed attempt is recorded as `step:error`. When the policy allows
//! another attempt the step waits for the backoff, records `step:retried`
//! and runs again; otherwise it records `step:failed`.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};

/// How often, and how patiently, a failing step is re-executed
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total number of attempts, including the first one
    pub max_attempts: u32,
    /// Backoff before the second attempt in milliseconds
    pub initial_backoff_ms: u64,
    /// Multiplier for exponential backoff
    pub backoff_multiplier: f64,
    /// Maximum backoff duration in milliseconds
    pub max_backoff_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::NONE
    }
}

impl RetryPolicy {
    /// A single attempt, no retries
    pub const NONE: Self = Self {
        max_attempts: 1,
        initial_backoff_ms: 0,
        backoff_multiplier: 1.0,
        max_backoff_ms: 0,
    };

    /// Three attempts with exponential backoff starting at one second
    pub const EXPONENTIAL: Self = Self {
        max_attempts: 3,
        initial_backoff_ms: 1000, // 1 second
        backoff_multiplier: 2.0,
        max_backoff_ms: 60_000, // 60 seconds
    };

    /// Create a validated policy
    pub fn new(
        max_attempts: u32,
        initial_backoff: Duration,
        backoff_multiplier: f64,
        max_backoff: Duration,
    ) -> CoreResult<Self> {
        if max_attempts == 0 {
            return Err(CoreError::InvalidConfiguration(
                "max_attempts must be positive".to_string(),
            ));
        }
        if !backoff_multiplier.is_finite() || backoff_multiplier < 1.0 {
            return Err(CoreError::InvalidConfiguration(
                "backoff_multiplier must be at least 1.0".to_string(),
            ));
        }
        if max_backoff < initial_backoff {
            return Err(CoreError::InvalidConfiguration(
                "max_backoff must not be shorter than initial_backoff".to_string(),
            ));
        }

        Ok(Self {
            max_attempts,
            initial_backoff_ms: initial_backoff.as_millis() as u64,
            backoff_multiplier,
            max_backoff_ms: max_backoff.as_millis() as u64,
        })
    }

    /// A policy with `max_attempts` attempts and no backoff
    pub fn attempts(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            ..Self::NONE
        }
    }

    pub fn max_backoff(&self) -> Duration {
        Duration::from_millis(self.max_backoff_ms)
    }

    /// Backoff to wait after the given failed attempt (1-based)
    pub fn backoff(&self, attempt: u32) -> Duration {
        let base_ms = self.initial_backoff_ms as f64;
        let multiplier = self
            .backoff_multiplier
            .powi(attempt.saturating_sub(1) as i32);
        let backoff = Duration::from_millis((base_ms * multiplier) as u64);
        std::cmp::min(backoff, self.max_backoff())
    }

    /// Check whether another attempt follows the given failed attempt (1-based)
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }
}
