//! Step execution tests
//!
//! Steps run at most once per index, record their outcome and replay it on
//! every later play of the run.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use replayable_sdk::testing::TestEnvironment;
use replayable_sdk::{
    join_all, once, step, EventKind, OrchestratorConfig, ReplayError, RetryPolicy, RunStatus,
    StepStatus,
};

use crate::with_timeout;

#[tokio::test]
async fn test_step_is_plain_function_outside_run() {
    let double = step(|x: i64| async move { Ok(x * 2) });
    assert_eq!(double.call(2).await.unwrap(), 4);
}

#[tokio::test]
async fn test_steps_compose_inside_run() {
    with_timeout("test_steps_compose_inside_run", async {
        let env = TestEnvironment::new();

        let step_a = step(|n: i64| async move { Ok(n * 2) });
        let step_b = step(|(n, m): (i64, i64)| async move { Ok(n + m) });
        let step_c = step(|_: ()| async move { Ok(2i64) });

        let flow = env
            .replayable("step-1", move |n: i64| {
                let step_a = step_a.clone();
                let step_b = step_b.clone();
                let step_c = step_c.clone();
                async move {
                    let a = step_a.call(n).await?;
                    let c = step_c.call(()).await?;
                    let b = step_b.call((n, c)).await?;
                    Ok(a + b)
                }
            })
            .unwrap();

        assert_eq!(env.run(flow.call(3)).await.unwrap(), 11);
    })
    .await;
}

#[tokio::test]
async fn test_each_step_executes_only_once() {
    with_timeout("test_each_step_executes_only_once", async {
        let env = TestEnvironment::new();
        let counts: Arc<[AtomicUsize; 4]> = Arc::default();
        let plays = Arc::new(AtomicUsize::new(0));

        let counting = |i: usize| {
            let counts = counts.clone();
            step(move |_: ()| {
                counts[i].fetch_add(1, Ordering::SeqCst);
                async move { Ok(()) }
            })
        };
        let (step_a, step_b, step_c, step_d) = (counting(0), counting(1), counting(2), counting(3));

        let played = plays.clone();
        let flow = env
            .replayable("step-2", move |_: ()| {
                let (step_a, step_b) = (step_a.clone(), step_b.clone());
                let (step_c, step_d) = (step_c.clone(), step_d.clone());
                let played = played.clone();
                async move {
                    played.fetch_add(1, Ordering::SeqCst);
                    step_a.call(()).await?;
                    step_b.call(()).await?;
                    join_all(vec![step_c.call(()), step_d.call(())]).await?;
                    Ok(())
                }
            })
            .unwrap();

        let handle = env.run(async { flow.start(()) }).await.unwrap();
        let run_id = handle.run_id();
        handle.await.unwrap();

        let counts: Vec<usize> = counts.iter().map(|c| c.load(Ordering::SeqCst)).collect();
        assert_eq!(counts, vec![1, 1, 1, 1]);
        // One play to schedule each of a, b and the pair, one more per settled wait
        assert!(plays.load(Ordering::SeqCst) >= 4);

        let started = env
            .kinds_for(run_id)
            .into_iter()
            .filter(|kind| *kind == EventKind::StepStarted)
            .count();
        assert_eq!(started, 4);
        assert_eq!(
            env.run_state(run_id).await.unwrap().unwrap().status,
            RunStatus::Completed
        );
    })
    .await;
}

#[tokio::test]
async fn test_step_failure_is_visible_to_body() {
    with_timeout("test_step_failure_is_visible_to_body", async {
        let env = TestEnvironment::new();
        let flaky = step(|_: ()| async move {
            Err::<i64, _>(ReplayError::Other("boom".to_string()))
        });

        let flow = env
            .replayable("catching", move |_: ()| {
                let flaky = flaky.clone();
                async move {
                    match flaky.call(()).await {
                        Ok(n) => Ok(format!("ok {}", n)),
                        Err(ReplayError::StepFailed { step, message }) => {
                            Ok(format!("step {} failed: {}", step, message))
                        }
                        Err(e) => Err(e),
                    }
                }
            })
            .unwrap();

        let result = env.run(flow.call(())).await.unwrap();
        assert_eq!(result, "step 0 failed: boom");
    })
    .await;
}

#[tokio::test]
async fn test_unhandled_step_failure_fails_run() {
    with_timeout("test_unhandled_step_failure_fails_run", async {
        let env = TestEnvironment::new();
        let broken = step(|_: ()| async move {
            Err::<(), _>(ReplayError::Other("disk on fire".to_string()))
        });

        let flow = env
            .replayable("failing", move |_: ()| {
                let broken = broken.clone();
                async move { broken.call(()).await }
            })
            .unwrap();

        let handle = env.run(async { flow.start(()) }).await.unwrap();
        let run_id = handle.run_id();
        let err = handle.await.unwrap_err();
        assert!(matches!(err, ReplayError::RunFailed(ref message) if message.contains("disk on fire")));

        let state = env.run_state(run_id).await.unwrap().unwrap();
        assert_eq!(state.status, RunStatus::Failed);
        assert_eq!(state.error.as_deref(), Some("Step 0 failed: disk on fire"));
    })
    .await;
}

#[tokio::test]
async fn test_retries_are_recorded_as_attempts() {
    with_timeout("test_retries_are_recorded_as_attempts", async {
        let env = TestEnvironment::new();
        let calls = Arc::new(AtomicUsize::new(0));

        let counter = calls.clone();
        let shaky = step(move |_: ()| {
            let attempt = counter.fetch_add(1, Ordering::SeqCst) + 1;
            async move {
                if attempt < 3 {
                    Err(ReplayError::Other(format!("attempt {} failed", attempt)))
                } else {
                    Ok(attempt)
                }
            }
        })
        .with_retry(RetryPolicy::attempts(3));

        let flow = env
            .replayable("retrying", move |_: ()| {
                let shaky = shaky.clone();
                async move { shaky.call(()).await }
            })
            .unwrap();

        let handle = env.run(async { flow.start(()) }).await.unwrap();
        let run_id = handle.run_id();
        assert_eq!(handle.await.unwrap(), 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);

        let state = env.step_state(run_id, 0).await.unwrap().unwrap();
        assert_eq!(state.status, StepStatus::Completed);
        assert_eq!(state.attempts.len(), 3);
        assert_eq!(
            state.attempts[0].error.as_deref(),
            Some("attempt 1 failed")
        );
        assert_eq!(
            state.attempts[1].error.as_deref(),
            Some("attempt 2 failed")
        );
        assert!(state.attempts[2].error.is_none());

        let step_kinds: Vec<EventKind> = env
            .kinds_for(run_id)
            .into_iter()
            .filter(EventKind::is_step_event)
            .collect();
        assert_eq!(
            step_kinds,
            vec![
                EventKind::StepStarted,
                EventKind::StepError,
                EventKind::StepRetried,
                EventKind::StepError,
                EventKind::StepRetried,
                EventKind::StepCompleted,
            ]
        );
    })
    .await;
}

#[tokio::test]
async fn test_default_retry_comes_from_config() {
    with_timeout("test_default_retry_comes_from_config", async {
        let env = TestEnvironment::with_config(
            OrchestratorConfig::DEFAULT.with_step_retry(RetryPolicy::attempts(2)),
        );
        let calls = Arc::new(AtomicUsize::new(0));

        let counter = calls.clone();
        let failing = step(move |_: ()| {
            counter.fetch_add(1, Ordering::SeqCst);
            async move { Err::<(), _>(ReplayError::Other("nope".to_string())) }
        });

        let flow = env
            .replayable("configured", move |_: ()| {
                let failing = failing.clone();
                async move { failing.call(()).await }
            })
            .unwrap();

        assert!(env.run(flow.call(())).await.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    })
    .await;
}

#[tokio::test]
async fn test_panicking_step_fails_instead_of_hanging() {
    with_timeout("test_panicking_step_fails_instead_of_hanging", async {
        let env = TestEnvironment::new();
        let explosive = step(|_: ()| async move {
            if true {
                panic!("kaboom");
            }
            Ok(0i64)
        });

        let flow = env
            .replayable("panicking", move |_: ()| {
                let explosive = explosive.clone();
                async move {
                    match explosive.call(()).await {
                        Err(ReplayError::StepFailed { message, .. }) => Ok(message),
                        Err(e) => Err(e),
                        Ok(n) => Ok(n.to_string()),
                    }
                }
            })
            .unwrap();

        let message = env.run(flow.call(())).await.unwrap();
        assert_eq!(message, "step panicked: kaboom");
    })
    .await;
}

#[tokio::test]
async fn test_once_runs_a_single_time() {
    with_timeout("test_once_runs_a_single_time", async {
        let env = TestEnvironment::new();
        let sent = Arc::new(AtomicUsize::new(0));
        let later = step(|_: ()| async move { Ok(()) });

        let counter = sent.clone();
        let flow = env
            .replayable("once", move |_: ()| {
                let counter = counter.clone();
                let later = later.clone();
                async move {
                    let receipt: usize =
                        once(move || async move { Ok(counter.fetch_add(1, Ordering::SeqCst)) })
                            .await?;
                    later.call(()).await?;
                    Ok(receipt)
                }
            })
            .unwrap();

        assert_eq!(env.run(flow.call(())).await.unwrap(), 0);
        assert_eq!(sent.load(Ordering::SeqCst), 1);
    })
    .await;
}
