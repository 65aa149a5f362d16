//! Replay history for a single play of a run.
//!
//! Built once at the start of every play from the run's finished-work events.
//! The events are indexed by step and by hook token so that primitives can
//! look up cached outcomes in O(1), and the `seq` of every indexed event
//! seeds the run's [`Sequencer`].
//!
//! Only the first trigger of each hook token is kept: later triggers for the
//! same token are recorded in the log but never consumed.

use std::collections::HashMap;

use serde_json::Value;

use crate::log::{ReplayEvent, SequencedReplayEvent};
use crate::sequencer::Sequencer;

/// Settled outcome of a step
#[derive(Debug, Clone, PartialEq)]
pub enum StepOutcome {
    Completed(Value),
    Failed(String),
}

/// A cached outcome together with the `seq` it was recorded at
#[derive(Debug, Clone, PartialEq)]
pub struct Recorded<T> {
    pub seq: u64,
    pub value: T,
}

#[derive(Debug, Clone, Default)]
pub struct ReplayHistory {
    steps: HashMap<u64, Recorded<StepOutcome>>,
    hooks: HashMap<String, Recorded<Value>>,
    last_seq: Option<u64>,
}

impl ReplayHistory {
    pub fn new(finished_work: &[SequencedReplayEvent]) -> Self {
        let mut history = Self::default();

        for entry in finished_work {
            let seq = entry.seq;
            match &entry.event {
                ReplayEvent::StepCompleted { step, result, .. } => {
                    history.steps.entry(*step).or_insert(Recorded {
                        seq,
                        value: StepOutcome::Completed(result.clone()),
                    });
                }
                ReplayEvent::StepFailed { step, error, .. } => {
                    history.steps.entry(*step).or_insert(Recorded {
                        seq,
                        value: StepOutcome::Failed(error.clone()),
                    });
                }
                ReplayEvent::HookTriggered { token, value, .. } => {
                    history.hooks.entry(token.clone()).or_insert(Recorded {
                        seq,
                        value: value.clone(),
                    });
                }
                _ => continue,
            }
            history.last_seq = history.last_seq.max(Some(seq));
        }

        history
    }

    /// Cached outcome of a step, if it settled before this play
    pub fn step(&self, step: u64) -> Option<&Recorded<StepOutcome>> {
        self.steps.get(&step)
    }

    /// First value delivered to a hook, if any arrived before this play
    pub fn hook(&self, token: &str) -> Option<&Recorded<Value>> {
        self.hooks.get(token)
    }

    /// Newest finished-work `seq` this play started from
    pub fn last_seq(&self) -> Option<u64> {
        self.last_seq
    }

    /// Build the gate over every consumable event, in `seq` order
    pub fn sequencer(&self) -> Sequencer {
        let mut seqs: Vec<u64> = self
            .steps
            .values()
            .map(|r| r.seq)
            .chain(self.hooks.values().map(|r| r.seq))
            .collect();
        seqs.sort_unstable();
        Sequencer::new(seqs)
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty() && self.hooks.is_empty()
    }
}
