//! Turn-taking gate that replays the historical completion order of
//! concurrent operations.
//!
//! When a run is first executed, whichever concurrent operation settles first
//! is logged first and receives the smaller `seq`. On replay every competitor
//! may be able to resolve at once from cached results, so each one first
//! passes through its recorded `seq`'s turn. A cursor walks the history in
//! ascending `seq` order and a turn only resolves once the cursor has reached
//! its position, which releases the historical winner of a race first no
//! matter when each competitor asked for its turn.
//!
//! ## Cursor
//!
//! - A position is passed once every turn waiting on it has resolved, so
//!   duplicate requests for one position all resolve before the cursor moves.
//! - A turn dropped before it resolves passes its position. The losers of a
//!   race never hold back the rest of the history.
//! - A turn for a `seq` absent from the history never resolves.
//! - A turn requested once every position has been passed fails with
//!   [`TurnError::Exhausted`]; the caller proceeds under live ordering.
//!
//! A position nobody asks for holds every later turn back. When the caller
//! knows the run cannot make progress otherwise, [`Sequencer::stall`] and
//! [`Sequencer::release`] move the cursor up to the lowest waiting turn.

use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, Waker};

use parking_lot::Mutex;

use crate::log::SequencedReplayEvent;

/// Why a turn could not be taken
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum TurnError {
    /// Every position of the history has been passed; proceed live
    #[error("replay history exhausted")]
    Exhausted,
}

/// A gate whose cursor is held by a position no waiting turn targets
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stall {
    /// Position the cursor is held at
    pub cursor: u64,
    /// Lowest position a turn is waiting for
    pub waiting: u64,
    generation: u64,
}

#[derive(Debug, Default)]
struct GateState {
    /// Distinct history positions and whether each has been passed
    positions: BTreeMap<u64, bool>,
    /// Lowest position not yet passed
    cursor: Option<u64>,
    remaining: usize,
    /// Registered turns keyed by `(seq, registration id)`
    waiting: BTreeMap<(u64, u64), Waker>,
    next_id: u64,
    /// Bumped on every change to the gate
    generation: u64,
}

impl GateState {
    fn is_eligible(&self, seq: u64) -> bool {
        self.cursor.map_or(true, |cursor| seq <= cursor)
    }

    fn has_waiters(&self, seq: u64) -> bool {
        self.waiting.range((seq, 0)..=(seq, u64::MAX)).next().is_some()
    }

    fn lowest_waiting(&self) -> Option<u64> {
        self.waiting.keys().next().map(|(seq, _)| *seq)
    }

    /// Mark a position passed and move the cursor past it if needed
    fn pass(&mut self, seq: u64) -> bool {
        match self.positions.get_mut(&seq) {
            Some(passed) if !*passed => *passed = true,
            _ => return false,
        }
        self.remaining -= 1;
        if self.cursor == Some(seq) {
            self.cursor = self
                .positions
                .range(seq..)
                .find(|(_, passed)| !**passed)
                .map(|(seq, _)| *seq);
        }
        true
    }

    fn drain_wakers(&self) -> Vec<Waker> {
        self.waiting.values().cloned().collect()
    }
}

/// Replay gate for one run.
///
/// Cloning is cheap and every clone shares the same gate.
#[derive(Debug, Clone, Default)]
pub struct Sequencer {
    state: Arc<Mutex<GateState>>,
}

impl Sequencer {
    /// Build a gate over historical `seq` values
    pub fn new(history: impl IntoIterator<Item = u64>) -> Self {
        let mut state = GateState::default();
        for seq in history {
            if state.positions.insert(seq, false).is_none() {
                state.remaining += 1;
            }
        }
        state.cursor = state.positions.keys().next().copied();
        Self {
            state: Arc::new(Mutex::new(state)),
        }
    }

    /// Build a gate over finished-work events
    pub fn from_events(events: &[SequencedReplayEvent]) -> Self {
        Self::new(events.iter().map(|e| e.seq))
    }

    /// Request the turn for a historical `seq`
    pub fn turn(&self, seq: u64) -> Turn {
        let state = self.state.lock();
        let stage = if state.remaining == 0 {
            Stage::Done(Some(Err(TurnError::Exhausted)))
        } else if state.positions.contains_key(&seq) {
            Stage::Pending(None)
        } else {
            tracing::warn!(seq, "Turn requested for a seq outside the replay history");
            Stage::Never
        };
        Turn {
            gate: self.clone(),
            seq,
            stage,
        }
    }

    /// Check whether `seq` is part of the replay history
    pub fn contains(&self, seq: u64) -> bool {
        self.state.lock().positions.contains_key(&seq)
    }

    /// Position the cursor is at, `None` once the history is passed
    pub fn cursor(&self) -> Option<u64> {
        self.state.lock().cursor
    }

    /// Number of distinct history positions already passed
    pub fn passed(&self) -> usize {
        let state = self.state.lock();
        state.positions.len() - state.remaining
    }

    pub fn is_exhausted(&self) -> bool {
        self.state.lock().remaining == 0
    }

    pub fn len(&self) -> usize {
        self.state.lock().positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Report whether every waiting turn is held by an unrequested position
    pub fn stall(&self) -> Option<Stall> {
        let state = self.state.lock();
        let cursor = state.cursor?;
        let waiting = state.lowest_waiting()?;
        (waiting > cursor).then_some(Stall {
            cursor,
            waiting,
            generation: state.generation,
        })
    }

    /// Pass every position below the lowest waiting turn.
    ///
    /// Does nothing unless the gate is unchanged since `stall` was observed.
    pub fn release(&self, stall: Stall) -> bool {
        let wakers = {
            let mut state = self.state.lock();
            if state.generation != stall.generation {
                return false;
            }
            let skipped: Vec<u64> = state
                .positions
                .range(..stall.waiting)
                .filter(|(_, passed)| !**passed)
                .map(|(seq, _)| *seq)
                .collect();
            for seq in &skipped {
                state.pass(*seq);
            }
            state.generation += 1;
            tracing::debug!(
                cursor = stall.cursor,
                waiting = stall.waiting,
                skipped = skipped.len(),
                "Released stalled turn gate"
            );
            state.drain_wakers()
        };
        wakers.into_iter().for_each(Waker::wake);
        true
    }

    /// Resolve the turn if the cursor has reached it, otherwise park it
    fn poll_turn(&self, seq: u64, id: &mut Option<u64>, waker: &Waker) -> bool {
        let wakers = {
            let mut state = self.state.lock();
            if !state.is_eligible(seq) {
                match *id {
                    Some(registered) => {
                        state.waiting.insert((seq, registered), waker.clone());
                    }
                    None => {
                        let registered = state.next_id;
                        state.next_id += 1;
                        state.waiting.insert((seq, registered), waker.clone());
                        state.generation += 1;
                        *id = Some(registered);
                    }
                }
                return false;
            }

            if let Some(registered) = id.take() {
                state.waiting.remove(&(seq, registered));
            }
            // Siblings waiting on the same position resolve before it is passed
            if !state.has_waiters(seq) {
                state.pass(seq);
            }
            state.generation += 1;
            tracing::trace!(seq, remaining = state.remaining, "Turn taken");
            state.drain_wakers()
        };
        wakers.into_iter().for_each(Waker::wake);
        true
    }

    fn withdraw(&self, seq: u64, id: Option<u64>) {
        let wakers = {
            let mut state = self.state.lock();
            if let Some(registered) = id {
                state.waiting.remove(&(seq, registered));
            }
            if state.has_waiters(seq) || !state.pass(seq) {
                return;
            }
            state.generation += 1;
            tracing::trace!(seq, remaining = state.remaining, "Turn abandoned");
            state.drain_wakers()
        };
        wakers.into_iter().for_each(Waker::wake);
    }
}

#[derive(Debug)]
enum Stage {
    /// Known position, registered once it has had to wait
    Pending(Option<u64>),
    Never,
    Done(Option<Result<(), TurnError>>),
}

/// Future returned by [`Sequencer::turn`]
#[derive(Debug)]
#[must_use = "a turn does nothing unless awaited"]
pub struct Turn {
    gate: Sequencer,
    seq: u64,
    stage: Stage,
}

impl Turn {
    pub fn seq(&self) -> u64 {
        self.seq
    }
}

impl Future for Turn {
    type Output = Result<(), TurnError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        match &mut this.stage {
            Stage::Pending(id) => {
                if this.gate.poll_turn(this.seq, id, cx.waker()) {
                    this.stage = Stage::Done(None);
                    Poll::Ready(Ok(()))
                } else {
                    Poll::Pending
                }
            }
            Stage::Never => Poll::Pending,
            Stage::Done(result) => Poll::Ready(result.take().unwrap_or(Ok(()))),
        }
    }
}

impl Drop for Turn {
    fn drop(&mut self) {
        if let Stage::Pending(id) = self.stage {
            self.gate.withdraw(self.seq, id);
        }
    }
}
