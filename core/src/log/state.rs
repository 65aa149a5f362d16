//! Projected run, step and hook state

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Status of a run as projected from its events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Running,
    Paused,
    Interrupted,
    Completed,
    Failed,
}

impl RunStatus {
    /// Completed and failed runs never change status again
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Interrupted => "interrupted",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status of a step as projected from its events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    Running,
    /// The latest attempt failed and no retry or terminal event followed
    Error,
    Interrupted,
    Completed,
    Failed,
}

impl StepStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Error => "error",
            Self::Interrupted => "interrupted",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl std::fmt::Display for StepStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Current state of a run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunState {
    pub run_id: Uuid,
    pub started: DateTime<Utc>,
    pub finished: Option<DateTime<Utc>>,
    pub replayable_id: String,
    pub args: Value,
    pub status: RunStatus,
    pub result: Option<Value>,
    pub error: Option<String>,
    /// Sequence number of the terminal event
    pub finish_seq: Option<u64>,
    /// Sequence number of the latest `run:paused` event
    pub paused_seq: Option<u64>,
}

/// One execution attempt of a step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepAttempt {
    pub on: DateTime<Utc>,
    pub error: Option<String>,
}

/// Current state of a step within a run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepState {
    pub run_id: Uuid,
    pub step: u64,
    pub started: DateTime<Utc>,
    pub finished: Option<DateTime<Utc>>,
    pub status: StepStatus,
    pub attempts: Vec<StepAttempt>,
    pub result: Option<Value>,
    pub error: Option<String>,
    pub finish_seq: Option<u64>,
}

/// A run that has bound a hook token
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HookBinding {
    pub run_id: Uuid,
    pub on: DateTime<Utc>,
}

/// A value delivered to a hook
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HookTrigger {
    pub value: Value,
    pub on: DateTime<Utc>,
    pub seq: u64,
}
