//! Integration tests for replayable-sdk
//!
//! Every test drives runs through an isolated in-memory engine from
//! `replayable_sdk::testing`, so tests can run in parallel.
//!
//! # Running
//!
//! ```bash
//! cargo test --test integration -p replayable-sdk
//! ```

mod orchestrator_tests;
mod race_tests;
mod step_tests;

use std::future::Future;
use std::time::Duration;

/// Upper bound for a single test; runs that never settle fail instead of hanging
pub const TEST_TIMEOUT: Duration = Duration::from_secs(10);

pub async fn with_timeout<F: Future>(name: &str, future: F) -> F::Output {
    match tokio::time::timeout(TEST_TIMEOUT, future).await {
        Ok(output) => output,
        Err(_) => panic!("{} timed out after {:?}", name, TEST_TIMEOUT),
    }
}
