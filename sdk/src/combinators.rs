//! Combinator functions for concurrent work inside a run
//!
//! These combinators poll every competitor, so each step involved gets
//! scheduled, and they are aware of pending conditions: a competitor that
//! can only suspend the run never wins a race against one that settles.
//!
//! # Example
//!
//! ```ignore
//! use replayable_sdk::combinators::{join_all, race};
//!
//! // Both charges run, results in input order
//! let totals = join_all(vec![charge.call(10), charge.call(20)]).await?;
//!
//! // Whichever settles first, replayed identically on every play
//! let answer = race(vec![approval.once(), timeout.call(())]).await?;
//! ```

use crate::error::{ReplayError, Result};
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

// ============================================================================
// JoinAll - Wait for all futures to complete
// ============================================================================

/// Future that waits for all inner futures to complete.
///
/// Created by [`join_all`]. Returns `Ok(Vec<T>)` if all futures succeed,
/// or `Err` with the first error encountered.
pub struct JoinAll<F, T>
where
    F: Future<Output = Result<T>>,
{
    futures: Vec<Option<F>>,
    results: Vec<Option<T>>,
}

impl<F, T> Unpin for JoinAll<F, T> where F: Future<Output = Result<T>> + Unpin {}

impl<F, T> JoinAll<F, T>
where
    F: Future<Output = Result<T>> + Unpin,
{
    fn new(futures: Vec<F>) -> Self {
        let len = futures.len();
        Self {
            futures: futures.into_iter().map(Some).collect(),
            results: (0..len).map(|_| None).collect(),
        }
    }
}

impl<F, T> Future for JoinAll<F, T>
where
    F: Future<Output = Result<T>> + Unpin,
{
    type Output = Result<Vec<T>>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        let mut all_done = true;

        for i in 0..this.futures.len() {
            if let Some(ref mut future) = this.futures[i] {
                match Pin::new(future).poll(cx) {
                    Poll::Ready(Ok(result)) => {
                        this.results[i] = Some(result);
                        this.futures[i] = None;
                    }
                    Poll::Ready(Err(e)) => {
                        return Poll::Ready(Err(e));
                    }
                    Poll::Pending => {
                        all_done = false;
                    }
                }
            }
        }

        if all_done {
            let results: Option<Vec<T>> = this.results.iter_mut().map(Option::take).collect();
            Poll::Ready(results.ok_or_else(|| {
                ReplayError::Other("join_all polled after completion".to_string())
            }))
        } else {
            Poll::Pending
        }
    }
}

/// Wait for all futures to complete, returning their results in order.
///
/// Fails fast with the first error. A pending condition is an error here,
/// so the run suspends as soon as any competitor has to wait.
pub fn join_all<F, T>(futures: Vec<F>) -> JoinAll<F, T>
where
    F: Future<Output = Result<T>> + Unpin,
{
    JoinAll::new(futures)
}

// ============================================================================
// Select - Wait for the first future to settle
// ============================================================================

/// Future that waits for the first inner future to settle.
///
/// Created by [`select`] and [`race`].
pub struct Select<F> {
    futures: Vec<Option<F>>,
    pending: Option<ReplayError>,
}

impl<F: Unpin> Unpin for Select<F> {}

impl<F> Select<F> {
    fn new(futures: Vec<F>) -> Self {
        Self {
            futures: futures.into_iter().map(Some).collect(),
            pending: None,
        }
    }
}

impl<F, T> Future for Select<F>
where
    F: Future<Output = Result<T>> + Unpin,
{
    type Output = Result<(usize, T)>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();

        for i in 0..this.futures.len() {
            if let Some(ref mut future) = this.futures[i] {
                match Pin::new(future).poll(cx) {
                    Poll::Ready(Err(e)) if e.is_pending() => {
                        this.futures[i] = None;
                        this.pending.get_or_insert(e);
                    }
                    Poll::Ready(result) => {
                        this.futures[i] = None;
                        return Poll::Ready(result.map(|value| (i, value)));
                    }
                    Poll::Pending => {}
                }
            }
        }

        if this.futures.iter().all(Option::is_none) {
            // Every competitor has to wait: suspend on the first one
            let err = this
                .pending
                .take()
                .unwrap_or_else(|| ReplayError::Other("select of no futures".to_string()));
            return Poll::Ready(Err(err));
        }

        Poll::Pending
    }
}

/// Wait for the first future to settle, returning its index and result.
///
/// A failure settles the select just like a success. Competitors that can
/// only suspend the run are skipped while any other is still running; when
/// all of them suspend, the first pending condition is returned.
pub fn select<F, T>(futures: Vec<F>) -> Select<F>
where
    F: Future<Output = Result<T>> + Unpin,
{
    Select::new(futures)
}

// ============================================================================
// Race - Like select, without the index
// ============================================================================

/// Future created by [`race`]
pub struct Race<F> {
    inner: Select<F>,
}

impl<F: Unpin> Unpin for Race<F> {}

impl<F, T> Future for Race<F>
where
    F: Future<Output = Result<T>> + Unpin,
{
    type Output = Result<T>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.get_mut().inner)
            .poll(cx)
            .map(|result| result.map(|(_, value)| value))
    }
}

/// Wait for the first future to settle and return its result.
///
/// On replay the winner is the competitor that settled first originally.
pub fn race<F, T>(futures: Vec<F>) -> Race<F>
where
    F: Future<Output = Result<T>> + Unpin,
{
    Race {
        inner: Select::new(futures),
    }
}
