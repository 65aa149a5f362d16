//! Replay event types recorded in the event log

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Kinds of events that can be recorded for a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    // Run lifecycle events
    #[serde(rename = "run:started")]
    RunStarted,
    #[serde(rename = "run:paused")]
    RunPaused,
    #[serde(rename = "run:resumed")]
    RunResumed,
    #[serde(rename = "run:interrupted")]
    RunInterrupted,
    #[serde(rename = "run:recovered")]
    RunRecovered,
    #[serde(rename = "run:completed")]
    RunCompleted,
    #[serde(rename = "run:failed")]
    RunFailed,

    // Step events
    #[serde(rename = "step:started")]
    StepStarted,
    #[serde(rename = "step:error")]
    StepError,
    #[serde(rename = "step:retried")]
    StepRetried,
    #[serde(rename = "step:completed")]
    StepCompleted,
    #[serde(rename = "step:failed")]
    StepFailed,
    #[serde(rename = "step:interrupted")]
    StepInterrupted,
    #[serde(rename = "step:recovered")]
    StepRecovered,

    // Hook events
    #[serde(rename = "hook:bound")]
    HookBound,
    #[serde(rename = "hook:triggered")]
    HookTriggered,
}

impl EventKind {
    /// Check if this kind belongs to the run lifecycle
    pub fn is_run_event(&self) -> bool {
        matches!(
            self,
            Self::RunStarted
                | Self::RunPaused
                | Self::RunResumed
                | Self::RunInterrupted
                | Self::RunRecovered
                | Self::RunCompleted
                | Self::RunFailed
        )
    }

    /// Check if this kind belongs to a step
    pub fn is_step_event(&self) -> bool {
        matches!(
            self,
            Self::StepStarted
                | Self::StepError
                | Self::StepRetried
                | Self::StepCompleted
                | Self::StepFailed
                | Self::StepInterrupted
                | Self::StepRecovered
        )
    }

    /// Check if this kind belongs to a hook
    pub fn is_hook_event(&self) -> bool {
        matches!(self, Self::HookBound | Self::HookTriggered)
    }

    /// Check if this kind is a terminal run event
    pub fn is_run_terminal(&self) -> bool {
        matches!(self, Self::RunCompleted | Self::RunFailed)
    }

    /// Check if this kind is a terminal step event
    pub fn is_step_terminal(&self) -> bool {
        matches!(self, Self::StepCompleted | Self::StepFailed)
    }

    /// Check if this kind marks a settled concurrent operation
    pub fn is_finished_work(&self) -> bool {
        matches!(
            self,
            Self::StepCompleted | Self::StepFailed | Self::HookTriggered
        )
    }

    pub fn is_pause_class(&self) -> bool {
        matches!(self, Self::RunPaused | Self::RunResumed)
    }

    pub fn is_interruption_class(&self) -> bool {
        matches!(
            self,
            Self::RunInterrupted | Self::RunRecovered | Self::StepInterrupted | Self::StepRecovered
        )
    }

    /// Check if this kind opens a step attempt
    pub fn is_attempt_start(&self) -> bool {
        matches!(self, Self::StepStarted | Self::StepRetried)
    }

    /// Get the wire name of this kind
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RunStarted => "run:started",
            Self::RunPaused => "run:paused",
            Self::RunResumed => "run:resumed",
            Self::RunInterrupted => "run:interrupted",
            Self::RunRecovered => "run:recovered",
            Self::RunCompleted => "run:completed",
            Self::RunFailed => "run:failed",
            Self::StepStarted => "step:started",
            Self::StepError => "step:error",
            Self::StepRetried => "step:retried",
            Self::StepCompleted => "step:completed",
            Self::StepFailed => "step:failed",
            Self::StepInterrupted => "step:interrupted",
            Self::StepRecovered => "step:recovered",
            Self::HookBound => "hook:bound",
            Self::HookTriggered => "hook:triggered",
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The settled operation that caused a run to be resumed.
///
/// Carried into the replayed body so that the primitive waiting on this
/// operation can resolve instead of suspending on the same condition again.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ResumptionSource {
    #[serde(rename = "step:completed")]
    StepCompleted { step: u64, result: Value },
    #[serde(rename = "step:failed")]
    StepFailed { step: u64, error: String },
    #[serde(rename = "hook:triggered")]
    HookTriggered { token: String, value: Value },
}

impl ResumptionSource {
    /// Build the source describing a finished-work event, if it is one
    pub fn from_event(event: &ReplayEvent) -> Option<Self> {
        match event {
            ReplayEvent::StepCompleted { step, result, .. } => Some(Self::StepCompleted {
                step: *step,
                result: result.clone(),
            }),
            ReplayEvent::StepFailed { step, error, .. } => Some(Self::StepFailed {
                step: *step,
                error: error.clone(),
            }),
            ReplayEvent::HookTriggered { token, value, .. } => Some(Self::HookTriggered {
                token: token.clone(),
                value: value.clone(),
            }),
            _ => None,
        }
    }

    /// Get the step index if this source settled a step
    pub fn step(&self) -> Option<u64> {
        match self {
            Self::StepCompleted { step, .. } | Self::StepFailed { step, .. } => Some(*step),
            Self::HookTriggered { .. } => None,
        }
    }

    /// Get the hook token if this source triggered a hook
    pub fn token(&self) -> Option<&str> {
        match self {
            Self::HookTriggered { token, .. } => Some(token),
            _ => None,
        }
    }
}

/// An event recorded for a run.
///
/// Every variant carries the run it belongs to and the time it was recorded.
/// Step variants are keyed by `(run_id, step)` and hook variants by
/// `(run_id, token)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ReplayEvent {
    #[serde(rename = "run:started", rename_all = "camelCase")]
    RunStarted {
        run_id: Uuid,
        timestamp: DateTime<Utc>,
        replayable_id: String,
        args: Value,
    },
    #[serde(rename = "run:paused", rename_all = "camelCase")]
    RunPaused {
        run_id: Uuid,
        timestamp: DateTime<Utc>,
    },
    #[serde(rename = "run:resumed", rename_all = "camelCase")]
    RunResumed {
        run_id: Uuid,
        timestamp: DateTime<Utc>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        source: Option<ResumptionSource>,
    },
    #[serde(rename = "run:interrupted", rename_all = "camelCase")]
    RunInterrupted {
        run_id: Uuid,
        timestamp: DateTime<Utc>,
    },
    #[serde(rename = "run:recovered", rename_all = "camelCase")]
    RunRecovered {
        run_id: Uuid,
        timestamp: DateTime<Utc>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        source: Option<ResumptionSource>,
    },
    #[serde(rename = "run:completed", rename_all = "camelCase")]
    RunCompleted {
        run_id: Uuid,
        timestamp: DateTime<Utc>,
        result: Value,
    },
    #[serde(rename = "run:failed", rename_all = "camelCase")]
    RunFailed {
        run_id: Uuid,
        timestamp: DateTime<Utc>,
        error: String,
    },

    #[serde(rename = "step:started", rename_all = "camelCase")]
    StepStarted {
        run_id: Uuid,
        step: u64,
        timestamp: DateTime<Utc>,
    },
    #[serde(rename = "step:error", rename_all = "camelCase")]
    StepError {
        run_id: Uuid,
        step: u64,
        timestamp: DateTime<Utc>,
        error: String,
    },
    #[serde(rename = "step:retried", rename_all = "camelCase")]
    StepRetried {
        run_id: Uuid,
        step: u64,
        timestamp: DateTime<Utc>,
    },
    #[serde(rename = "step:completed", rename_all = "camelCase")]
    StepCompleted {
        run_id: Uuid,
        step: u64,
        timestamp: DateTime<Utc>,
        result: Value,
    },
    #[serde(rename = "step:failed", rename_all = "camelCase")]
    StepFailed {
        run_id: Uuid,
        step: u64,
        timestamp: DateTime<Utc>,
        error: String,
    },
    #[serde(rename = "step:interrupted", rename_all = "camelCase")]
    StepInterrupted {
        run_id: Uuid,
        step: u64,
        timestamp: DateTime<Utc>,
    },
    #[serde(rename = "step:recovered", rename_all = "camelCase")]
    StepRecovered {
        run_id: Uuid,
        step: u64,
        timestamp: DateTime<Utc>,
    },

    #[serde(rename = "hook:bound", rename_all = "camelCase")]
    HookBound {
        run_id: Uuid,
        token: String,
        timestamp: DateTime<Utc>,
    },
    #[serde(rename = "hook:triggered", rename_all = "camelCase")]
    HookTriggered {
        run_id: Uuid,
        token: String,
        timestamp: DateTime<Utc>,
        value: Value,
    },
}

impl ReplayEvent {
    /// Get the kind of this event
    pub fn kind(&self) -> EventKind {
        match self {
            Self::RunStarted { .. } => EventKind::RunStarted,
            Self::RunPaused { .. } => EventKind::RunPaused,
            Self::RunResumed { .. } => EventKind::RunResumed,
            Self::RunInterrupted { .. } => EventKind::RunInterrupted,
            Self::RunRecovered { .. } => EventKind::RunRecovered,
            Self::RunCompleted { .. } => EventKind::RunCompleted,
            Self::RunFailed { .. } => EventKind::RunFailed,
            Self::StepStarted { .. } => EventKind::StepStarted,
            Self::StepError { .. } => EventKind::StepError,
            Self::StepRetried { .. } => EventKind::StepRetried,
            Self::StepCompleted { .. } => EventKind::StepCompleted,
            Self::StepFailed { .. } => EventKind::StepFailed,
            Self::StepInterrupted { .. } => EventKind::StepInterrupted,
            Self::StepRecovered { .. } => EventKind::StepRecovered,
            Self::HookBound { .. } => EventKind::HookBound,
            Self::HookTriggered { .. } => EventKind::HookTriggered,
        }
    }

    /// Get the run this event belongs to
    pub fn run_id(&self) -> Uuid {
        match self {
            Self::RunStarted { run_id, .. }
            | Self::RunPaused { run_id, .. }
            | Self::RunResumed { run_id, .. }
            | Self::RunInterrupted { run_id, .. }
            | Self::RunRecovered { run_id, .. }
            | Self::RunCompleted { run_id, .. }
            | Self::RunFailed { run_id, .. }
            | Self::StepStarted { run_id, .. }
            | Self::StepError { run_id, .. }
            | Self::StepRetried { run_id, .. }
            | Self::StepCompleted { run_id, .. }
            | Self::StepFailed { run_id, .. }
            | Self::StepInterrupted { run_id, .. }
            | Self::StepRecovered { run_id, .. }
            | Self::HookBound { run_id, .. }
            | Self::HookTriggered { run_id, .. } => *run_id,
        }
    }

    /// Get the time this event was recorded
    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            Self::RunStarted { timestamp, .. }
            | Self::RunPaused { timestamp, .. }
            | Self::RunResumed { timestamp, .. }
            | Self::RunInterrupted { timestamp, .. }
            | Self::RunRecovered { timestamp, .. }
            | Self::RunCompleted { timestamp, .. }
            | Self::RunFailed { timestamp, .. }
            | Self::StepStarted { timestamp, .. }
            | Self::StepError { timestamp, .. }
            | Self::StepRetried { timestamp, .. }
            | Self::StepCompleted { timestamp, .. }
            | Self::StepFailed { timestamp, .. }
            | Self::StepInterrupted { timestamp, .. }
            | Self::StepRecovered { timestamp, .. }
            | Self::HookBound { timestamp, .. }
            | Self::HookTriggered { timestamp, .. } => *timestamp,
        }
    }

    /// Get the step index for step events
    pub fn step(&self) -> Option<u64> {
        match self {
            Self::StepStarted { step, .. }
            | Self::StepError { step, .. }
            | Self::StepRetried { step, .. }
            | Self::StepCompleted { step, .. }
            | Self::StepFailed { step, .. }
            | Self::StepInterrupted { step, .. }
            | Self::StepRecovered { step, .. } => Some(*step),
            _ => None,
        }
    }

    /// Get the hook token for hook events
    pub fn token(&self) -> Option<&str> {
        match self {
            Self::HookBound { token, .. } | Self::HookTriggered { token, .. } => Some(token),
            _ => None,
        }
    }

    /// Check whether this event belongs to the given step of the given run
    pub fn is_for_step(&self, run_id: Uuid, step: u64) -> bool {
        self.run_id() == run_id && self.step() == Some(step)
    }

    /// Check whether this event belongs to the given hook of the given run
    pub fn is_for_hook(&self, run_id: Uuid, token: &str) -> bool {
        self.run_id() == run_id && self.token() == Some(token)
    }

    // === Constructors stamped with the current time ===

    pub fn run_started(run_id: Uuid, replayable_id: impl Into<String>, args: Value) -> Self {
        Self::RunStarted {
            run_id,
            timestamp: Utc::now(),
            replayable_id: replayable_id.into(),
            args,
        }
    }

    pub fn run_paused(run_id: Uuid) -> Self {
        Self::RunPaused {
            run_id,
            timestamp: Utc::now(),
        }
    }

    pub fn run_resumed(run_id: Uuid, source: Option<ResumptionSource>) -> Self {
        Self::RunResumed {
            run_id,
            timestamp: Utc::now(),
            source,
        }
    }

    pub fn run_interrupted(run_id: Uuid) -> Self {
        Self::RunInterrupted {
            run_id,
            timestamp: Utc::now(),
        }
    }

    pub fn run_recovered(run_id: Uuid, source: Option<ResumptionSource>) -> Self {
        Self::RunRecovered {
            run_id,
            timestamp: Utc::now(),
            source,
        }
    }

    pub fn run_completed(run_id: Uuid, result: Value) -> Self {
        Self::RunCompleted {
            run_id,
            timestamp: Utc::now(),
            result,
        }
    }

    pub fn run_failed(run_id: Uuid, error: impl Into<String>) -> Self {
        Self::RunFailed {
            run_id,
            timestamp: Utc::now(),
            error: error.into(),
        }
    }

    pub fn step_started(run_id: Uuid, step: u64) -> Self {
        Self::StepStarted {
            run_id,
            step,
            timestamp: Utc::now(),
        }
    }

    pub fn step_error(run_id: Uuid, step: u64, error: impl Into<String>) -> Self {
        Self::StepError {
            run_id,
            step,
            timestamp: Utc::now(),
            error: error.into(),
        }
    }

    pub fn step_retried(run_id: Uuid, step: u64) -> Self {
        Self::StepRetried {
            run_id,
            step,
            timestamp: Utc::now(),
        }
    }

    pub fn step_completed(run_id: Uuid, step: u64, result: Value) -> Self {
        Self::StepCompleted {
            run_id,
            step,
            timestamp: Utc::now(),
            result,
        }
    }

    pub fn step_failed(run_id: Uuid, step: u64, error: impl Into<String>) -> Self {
        Self::StepFailed {
            run_id,
            step,
            timestamp: Utc::now(),
            error: error.into(),
        }
    }

    pub fn step_interrupted(run_id: Uuid, step: u64) -> Self {
        Self::StepInterrupted {
            run_id,
            step,
            timestamp: Utc::now(),
        }
    }

    pub fn step_recovered(run_id: Uuid, step: u64) -> Self {
        Self::StepRecovered {
            run_id,
            step,
            timestamp: Utc::now(),
        }
    }

    pub fn hook_bound(run_id: Uuid, token: impl Into<String>) -> Self {
        Self::HookBound {
            run_id,
            token: token.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn hook_triggered(run_id: Uuid, token: impl Into<String>, value: Value) -> Self {
        Self::HookTriggered {
            run_id,
            token: token.into(),
            timestamp: Utc::now(),
            value,
        }
    }
}

/// A replay event together with the sequence number the log assigned to it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SequencedReplayEvent {
    /// Log-wide sequence number (1-indexed, strictly increasing)
    pub seq: u64,
    pub event: ReplayEvent,
}

impl SequencedReplayEvent {
    pub fn new(seq: u64, event: ReplayEvent) -> Self {
        Self { seq, event }
    }

    pub fn kind(&self) -> EventKind {
        self.event.kind()
    }
}
