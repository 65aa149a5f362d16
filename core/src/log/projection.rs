//! Pure projections from the raw event sequence to current state.
//!
//! Nothing here touches storage: adapters hand in the events they hold and
//! get back the derived state. This keeps the precedence rules in a single
//! place no matter which backend stores the log.
//!
//! ## Precedence
//!
//! Runs: `completed` > `failed` > latest interruption-class event is
//! `interrupted` > latest pause-class event is `paused` > `running`.
//!
//! Steps: `completed` > `failed` > latest interruption-class event is
//! `interrupted` > latest attempt carries an error > `running`.
//!
//! The first terminal event wins. Anything appended after it is ignored,
//! which makes terminal state write-once.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde_json::Value;
use uuid::Uuid;

use super::event::{EventKind, ReplayEvent, SequencedReplayEvent};
use super::state::{
    HookBinding, HookTrigger, RunState, RunStatus, StepAttempt, StepState, StepStatus,
};

/// Project the state of a run, or `None` if the run never started
pub fn project_run(run_id: Uuid, events: &[SequencedReplayEvent]) -> Option<RunState> {
    let mut started: Option<(DateTime<Utc>, &str, &Value)> = None;
    let mut terminal: Option<&SequencedReplayEvent> = None;
    let mut interruption: Option<EventKind> = None;
    let mut pause: Option<EventKind> = None;
    let mut paused_seq: Option<u64> = None;

    for entry in events.iter().filter(|e| e.event.run_id() == run_id) {
        match &entry.event {
            ReplayEvent::RunStarted {
                timestamp,
                replayable_id,
                args,
                ..
            } => {
                if started.is_none() {
                    started = Some((*timestamp, replayable_id.as_str(), args));
                }
            }
            ReplayEvent::RunCompleted { .. } | ReplayEvent::RunFailed { .. } => {
                if terminal.is_none() {
                    terminal = Some(entry);
                }
            }
            ReplayEvent::RunInterrupted { .. } | ReplayEvent::RunRecovered { .. } => {
                interruption = Some(entry.kind());
            }
            ReplayEvent::RunPaused { .. } => {
                pause = Some(EventKind::RunPaused);
                paused_seq = Some(entry.seq);
            }
            ReplayEvent::RunResumed { .. } => {
                pause = Some(EventKind::RunResumed);
            }
            _ => {}
        }
    }

    let (started, replayable_id, args) = started?;

    let (status, result, error) = match terminal.map(|t| &t.event) {
        Some(ReplayEvent::RunCompleted { result, .. }) => {
            (RunStatus::Completed, Some(result.clone()), None)
        }
        Some(ReplayEvent::RunFailed { error, .. }) => {
            (RunStatus::Failed, None, Some(error.clone()))
        }
        _ if interruption == Some(EventKind::RunInterrupted) => (RunStatus::Interrupted, None, None),
        _ if pause == Some(EventKind::RunPaused) => (RunStatus::Paused, None, None),
        _ => (RunStatus::Running, None, None),
    };

    Some(RunState {
        run_id,
        started,
        finished: terminal.map(|t| t.event.timestamp()),
        replayable_id: replayable_id.to_string(),
        args: args.clone(),
        status,
        result,
        error,
        finish_seq: terminal.map(|t| t.seq),
        paused_seq,
    })
}

/// Project the state of a step, or `None` if the step never started
pub fn project_step(run_id: Uuid, step: u64, events: &[SequencedReplayEvent]) -> Option<StepState> {
    let mut started: Option<DateTime<Utc>> = None;
    let mut attempts: Vec<StepAttempt> = Vec::new();
    let mut terminal: Option<&SequencedReplayEvent> = None;
    let mut interruption: Option<EventKind> = None;

    for entry in events.iter().filter(|e| e.event.is_for_step(run_id, step)) {
        if terminal.is_some() {
            break;
        }
        match &entry.event {
            ReplayEvent::StepStarted { timestamp, .. } | ReplayEvent::StepRetried { timestamp, .. } => {
                if started.is_none() {
                    started = Some(*timestamp);
                }
                attempts.push(StepAttempt {
                    on: *timestamp,
                    error: None,
                });
            }
            ReplayEvent::StepError { error, .. } => {
                // An error closes the attempt it follows; stray errors are ignored
                if let Some(last) = attempts.last_mut().filter(|a| a.error.is_none()) {
                    last.error = Some(error.clone());
                }
            }
            ReplayEvent::StepCompleted { .. } | ReplayEvent::StepFailed { .. } => {
                terminal = Some(entry);
            }
            ReplayEvent::StepInterrupted { .. } | ReplayEvent::StepRecovered { .. } => {
                interruption = Some(entry.kind());
            }
            _ => {}
        }
    }

    let started = started?;

    let (status, result, error) = match terminal.map(|t| &t.event) {
        Some(ReplayEvent::StepCompleted { result, .. }) => {
            (StepStatus::Completed, Some(result.clone()), None)
        }
        Some(ReplayEvent::StepFailed { error, .. }) => {
            (StepStatus::Failed, None, Some(error.clone()))
        }
        _ if interruption == Some(EventKind::StepInterrupted) => {
            (StepStatus::Interrupted, None, None)
        }
        _ if attempts.last().is_some_and(|a| a.error.is_some()) => (StepStatus::Error, None, None),
        _ => (StepStatus::Running, None, None),
    };

    Some(StepState {
        run_id,
        step,
        started,
        finished: terminal.map(|t| t.event.timestamp()),
        status,
        attempts,
        result,
        error,
        finish_seq: terminal.map(|t| t.seq),
    })
}

/// All runs bound to a hook token, in binding order
pub fn hook_bindings(token: &str, events: &[SequencedReplayEvent]) -> Vec<HookBinding> {
    events
        .iter()
        .filter_map(|e| match &e.event {
            ReplayEvent::HookBound {
                run_id,
                token: bound,
                timestamp,
            } if bound == token => Some(HookBinding {
                run_id: *run_id,
                on: *timestamp,
            }),
            _ => None,
        })
        .collect()
}

/// All values delivered to a hook of a run, in `seq` order
pub fn hook_triggers(run_id: Uuid, token: &str, events: &[SequencedReplayEvent]) -> Vec<HookTrigger> {
    events
        .iter()
        .filter(|e| e.event.is_for_hook(run_id, token))
        .filter_map(|e| match &e.event {
            ReplayEvent::HookTriggered {
                timestamp, value, ..
            } => Some(HookTrigger {
                value: value.clone(),
                on: *timestamp,
                seq: e.seq,
            }),
            _ => None,
        })
        .collect()
}

pub fn is_hook_bound(token: &str, run_id: Uuid, events: &[SequencedReplayEvent]) -> bool {
    events
        .iter()
        .any(|e| e.kind() == EventKind::HookBound && e.event.is_for_hook(run_id, token))
}

/// Runs with a start event and no terminal event, in start order
pub fn pending_runs(events: &[SequencedReplayEvent]) -> Vec<RunState> {
    let mut seen = HashSet::new();
    events
        .iter()
        .filter(|e| e.kind() == EventKind::RunStarted)
        .map(|e| e.event.run_id())
        .filter(|run_id| seen.insert(*run_id))
        .filter_map(|run_id| project_run(run_id, events))
        .filter(|state| !state.status.is_terminal())
        .collect()
}

/// Steps of one run with a start event and no terminal event, in start order.
///
/// Both the start and the terminal lookup are scoped to `run_id`, so a step
/// index finished in another run never hides a step still in flight here.
pub fn pending_steps(run_id: Uuid, events: &[SequencedReplayEvent]) -> Vec<StepState> {
    let mut seen = HashSet::new();
    events
        .iter()
        .filter(|e| e.kind() == EventKind::StepStarted && e.event.run_id() == run_id)
        .filter_map(|e| e.event.step())
        .filter(|step| seen.insert(*step))
        .filter_map(|step| project_step(run_id, step, events))
        .filter(|state| !state.status.is_terminal())
        .collect()
}

/// Settled concurrent operations of a run, in `seq` order
pub fn finished_work(run_id: Uuid, events: &[SequencedReplayEvent]) -> Vec<SequencedReplayEvent> {
    events
        .iter()
        .filter(|e| e.event.run_id() == run_id && e.kind().is_finished_work())
        .cloned()
        .collect()
}
