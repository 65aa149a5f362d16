//! Run orchestration tests: resume, recovery and observers

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use replayable_sdk::testing::TestEnvironment;
use replayable_sdk::{
    named_hook, step, using, EventKind, EventLog, HookSelector, Orchestrator, PendingCondition,
    PlayMode, ReplayContext, ReplayError, ReplayEvent, ReplayableRegistry, RunObserver,
    RunStatus, SequencedReplayEvent, StepStatus,
};
use serde_json::{json, Value};
use uuid::Uuid;

use crate::with_timeout;

fn crashed_run(run_id: Uuid, replayable_id: &str) -> Vec<SequencedReplayEvent> {
    vec![
        SequencedReplayEvent::new(1, ReplayEvent::run_started(run_id, replayable_id, json!(5))),
        SequencedReplayEvent::new(2, ReplayEvent::step_started(run_id, 0)),
    ]
}

#[tokio::test]
async fn test_all_waiters_see_the_outcome() {
    with_timeout("test_all_waiters_see_the_outcome", async {
        let env = TestEnvironment::new();
        let flow = env
            .replayable("waited-on", |_: ()| async move {
                named_hook::<String>("go").await?.once().await
            })
            .unwrap();

        let handle = env.run(async { flow.start(()) }).await.unwrap();
        let run_id = handle.run_id();
        let bound = env
            .wait_until(Duration::from_secs(5), |events| {
                events.iter().any(|e| e.kind() == EventKind::HookBound)
            })
            .await;
        assert!(bound);

        // Redundant resumes only wait; the run still needs its hook
        let resume = move |env: TestEnvironment| async move {
            env.run(env.orchestrator().resume(run_id, None)).await
        };
        let first = tokio::spawn(resume(env.clone()));
        let second = tokio::spawn(resume(env.clone()));
        tokio::time::sleep(Duration::from_millis(20)).await;

        env.run(
            env.orchestrator()
                .trigger(HookSelector::by_id("go"), json!("went")),
        )
        .await
        .unwrap();

        assert_eq!(handle.await.unwrap(), "went");
        assert_eq!(first.await.unwrap().unwrap(), json!("went"));
        assert_eq!(second.await.unwrap().unwrap(), json!("went"));
    })
    .await;
}

#[tokio::test]
async fn test_resume_finished_run_returns_outcome() {
    with_timeout("test_resume_finished_run_returns_outcome", async {
        let env = TestEnvironment::new();
        let flow = env
            .replayable("finished", |n: i64| async move { Ok(n + 1) })
            .unwrap();

        let handle = env.run(async { flow.start(41) }).await.unwrap();
        let run_id = handle.run_id();
        assert_eq!(handle.await.unwrap(), 42);

        let result = env
            .run(env.orchestrator().resume(run_id, None))
            .await
            .unwrap();
        assert_eq!(result, json!(42));
        assert_eq!(
            env.kinds_for(run_id),
            vec![EventKind::RunStarted, EventKind::RunCompleted]
        );
    })
    .await;
}

#[tokio::test]
async fn test_resume_unknown_run() {
    let env = TestEnvironment::new();
    let run_id = Uuid::new_v4();
    let err = env
        .run(env.orchestrator().resume(run_id, None))
        .await
        .unwrap_err();
    assert!(matches!(err, ReplayError::RunNotFound(id) if id == run_id));
}

#[tokio::test]
async fn test_failed_body_fails_run() {
    with_timeout("test_failed_body_fails_run", async {
        let env = TestEnvironment::new();
        let flow = env
            .replayable("refusing", |_: ()| async move {
                Err::<(), _>(ReplayError::Other("refused".to_string()))
            })
            .unwrap();

        let handle = env.run(async { flow.start(()) }).await.unwrap();
        let run_id = handle.run_id();
        let err = handle.await.unwrap_err();
        assert_eq!(err.to_string(), "Run failed: refused");

        let state = env.run_state(run_id).await.unwrap().unwrap();
        assert_eq!(state.status, RunStatus::Failed);
        assert!(state.finished.is_some());
        assert!(state.result.is_none());
    })
    .await;
}

#[tokio::test]
async fn test_recover_replays_crashed_run() {
    with_timeout("test_recover_replays_crashed_run", async {
        let run_id = Uuid::new_v4();
        let env = TestEnvironment::from_events(crashed_run(run_id, "recoverable"));
        let calls = Arc::new(AtomicUsize::new(0));

        let counter = calls.clone();
        let triple = step(move |n: i64| {
            counter.fetch_add(1, Ordering::SeqCst);
            async move { Ok(n * 3) }
        });
        env.replayable("recoverable", move |n: i64| {
            let triple = triple.clone();
            async move { triple.call(n).await }
        })
        .unwrap();

        let recovered = env.run(env.orchestrator().recover()).await.unwrap();
        assert_eq!(recovered, vec![run_id]);

        let result = env
            .run(env.orchestrator().resume(run_id, None))
            .await
            .unwrap();
        assert_eq!(result, json!(15));
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let kinds = env.kinds_for(run_id);
        for expected in [
            EventKind::StepInterrupted,
            EventKind::RunInterrupted,
            EventKind::RunRecovered,
            EventKind::StepRecovered,
            EventKind::StepCompleted,
            EventKind::RunCompleted,
        ] {
            assert!(kinds.contains(&expected), "missing {:?} in {:?}", expected, kinds);
        }

        let step = env.step_state(run_id, 0).await.unwrap().unwrap();
        assert_eq!(step.status, StepStatus::Completed);
        assert_eq!(step.result, Some(json!(15)));
    })
    .await;
}

#[tokio::test]
async fn test_recover_skips_settled_and_waiting_runs() {
    let done = Uuid::new_v4();
    let waiting = Uuid::new_v4();
    let env = TestEnvironment::from_events(vec![
        SequencedReplayEvent::new(1, ReplayEvent::run_started(done, "flow", json!(null))),
        SequencedReplayEvent::new(2, ReplayEvent::run_completed(done, json!(1))),
        SequencedReplayEvent::new(3, ReplayEvent::run_started(waiting, "flow", json!(null))),
        SequencedReplayEvent::new(4, ReplayEvent::hook_bound(waiting, "approve")),
        SequencedReplayEvent::new(5, ReplayEvent::run_paused(waiting)),
    ]);

    let recovered = env.run(env.orchestrator().recover()).await.unwrap();
    assert!(recovered.is_empty());
    assert_eq!(env.log().len(), 5);
}

#[tokio::test]
async fn test_recover_wakes_run_whose_step_finished_after_pause() {
    with_timeout("test_recover_wakes_run_whose_step_finished_after_pause", async {
        let run_id = Uuid::new_v4();
        // The process died after the step settled but before the wake-up ran
        let env = TestEnvironment::from_events(vec![
            SequencedReplayEvent::new(1, ReplayEvent::run_started(run_id, "tripled", json!(5))),
            SequencedReplayEvent::new(2, ReplayEvent::step_started(run_id, 0)),
            SequencedReplayEvent::new(3, ReplayEvent::run_paused(run_id)),
            SequencedReplayEvent::new(4, ReplayEvent::step_completed(run_id, 0, json!(15))),
        ]);
        let calls = Arc::new(AtomicUsize::new(0));

        let counter = calls.clone();
        let triple = step(move |n: i64| {
            counter.fetch_add(1, Ordering::SeqCst);
            async move { Ok(n * 3) }
        });
        env.replayable("tripled", move |n: i64| {
            let triple = triple.clone();
            async move { triple.call(n).await }
        })
        .unwrap();

        let recovered = env.run(env.orchestrator().recover()).await.unwrap();
        assert_eq!(recovered, vec![run_id]);

        let result = env
            .run(env.orchestrator().resume(run_id, None))
            .await
            .unwrap();
        assert_eq!(result, json!(15));
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        let kinds = env.kinds_for(run_id);
        assert!(kinds.contains(&EventKind::RunResumed));
        assert!(!kinds.contains(&EventKind::StepInterrupted));
        assert_eq!(kinds.last(), Some(&EventKind::RunCompleted));
    })
    .await;
}

#[tokio::test]
async fn test_recover_leaves_live_runs_alone() {
    with_timeout("test_recover_leaves_live_runs_alone", async {
        let env = TestEnvironment::new();
        let slow = step(|_: ()| async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            Ok("slow".to_string())
        });
        let flow = env
            .replayable("live", move |_: ()| {
                let slow = slow.clone();
                async move { slow.call(()).await }
            })
            .unwrap();

        let handle = env.run(async { flow.start(()) }).await.unwrap();
        let run_id = handle.run_id();
        let started = env
            .wait_until(Duration::from_secs(5), |events| {
                events.iter().any(|e| e.kind() == EventKind::StepStarted)
            })
            .await;
        assert!(started);

        let recovered = env.run(env.orchestrator().recover()).await.unwrap();
        assert!(recovered.is_empty());

        assert_eq!(handle.await.unwrap(), "slow");
        assert!(!env.kinds_for(run_id).contains(&EventKind::StepInterrupted));
    })
    .await;
}

#[tokio::test]
async fn test_pending_steps_are_scoped_to_their_run() {
    let first = Uuid::new_v4();
    let second = Uuid::new_v4();
    let env = TestEnvironment::from_events(vec![
        SequencedReplayEvent::new(1, ReplayEvent::run_started(first, "flow", json!(null))),
        SequencedReplayEvent::new(2, ReplayEvent::run_started(second, "flow", json!(null))),
        SequencedReplayEvent::new(3, ReplayEvent::step_started(first, 0)),
        SequencedReplayEvent::new(4, ReplayEvent::step_started(second, 0)),
        SequencedReplayEvent::new(5, ReplayEvent::step_started(second, 1)),
    ]);

    let pending = env.log().get_pending_steps(first).await.unwrap();
    assert_eq!(pending.len(), 1);
    assert!(pending.iter().all(|s| s.run_id == first));

    let pending = env.log().get_pending_steps(second).await.unwrap();
    assert_eq!(pending.len(), 2);
}

#[derive(Default)]
struct RecordingObserver {
    seen: Mutex<Vec<String>>,
}

#[async_trait]
impl RunObserver for RecordingObserver {
    async fn on_run_played(&self, _run_id: Uuid, _replayable_id: &str, mode: PlayMode) {
        self.seen.lock().unwrap().push(format!("played:{}", mode));
    }

    async fn on_run_paused(
        &self,
        _run_id: Uuid,
        _replayable_id: &str,
        condition: &PendingCondition,
    ) {
        let kind = match condition {
            PendingCondition::Step { .. } => "step",
            PendingCondition::Hook { .. } => "hook",
        };
        self.seen.lock().unwrap().push(format!("paused:{}", kind));
    }

    async fn on_run_completed(&self, _run_id: Uuid, _replayable_id: &str, result: &Value) {
        self.seen.lock().unwrap().push(format!("completed:{}", result));
    }
}

#[tokio::test]
async fn test_observer_sees_run_lifecycle() {
    with_timeout("test_observer_sees_run_lifecycle", async {
        let observer = Arc::new(RecordingObserver::default());
        let orchestrator = Orchestrator::new(Arc::new(ReplayableRegistry::new()))
            .with_observer(SharedObserver(observer.clone()));

        let flow = orchestrator
            .replayable("observed", |_: ()| async move {
                named_hook::<i64>("value").await?.once().await
            })
            .unwrap();

        let ctx = ReplayContext::in_memory();
        let handle = using(ctx.clone(), async { flow.start(()) }).await.unwrap();
        let run_id = handle.run_id();

        loop {
            let state = ctx.events.get_run_state(run_id).await.unwrap();
            if state.is_some_and(|s| s.status == RunStatus::Paused) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(1)).await;
        }

        using(
            ctx.clone(),
            orchestrator.trigger(HookSelector::by_id("value"), json!(7)),
        )
        .await
        .unwrap();
        assert_eq!(handle.await.unwrap(), 7);

        let seen = observer.seen.lock().unwrap().clone();
        assert_eq!(
            seen,
            vec![
                "played:started",
                "paused:hook",
                "played:resumed",
                "completed:7",
            ]
        );
    })
    .await;
}

/// Lets a test keep a handle on an observer it registers
struct SharedObserver(Arc<RecordingObserver>);

#[async_trait]
impl RunObserver for SharedObserver {
    async fn on_run_played(&self, run_id: Uuid, replayable_id: &str, mode: PlayMode) {
        self.0.on_run_played(run_id, replayable_id, mode).await;
    }

    async fn on_run_paused(
        &self,
        run_id: Uuid,
        replayable_id: &str,
        condition: &PendingCondition,
    ) {
        self.0.on_run_paused(run_id, replayable_id, condition).await;
    }

    async fn on_run_completed(&self, run_id: Uuid, replayable_id: &str, result: &Value) {
        self.0.on_run_completed(run_id, replayable_id, result).await;
    }
}
