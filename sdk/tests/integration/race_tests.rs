//! Race stability tests
//!
//! Each replayable below races a slow competitor "B" against a fast one "A"
//! and then waits on a delay step, so the race is replayed several times.
//! Every play must observe the competitor that settled first originally.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use replayable_core::{CoreResult, HookBinding, HookTrigger};
use replayable_sdk::testing::TestEnvironment;
use replayable_sdk::{
    hook, named_hook, once, race, step, using, EventLog, HookFuture, HookSelector,
    InMemoryEventLog, Orchestrator, ReplayContext, ReplayEvent, ReplayableRegistry, RunState,
    SequencedReplayEvent, Step, StepFuture, StepState,
};
use serde_json::json;
use tokio::time::sleep;
use uuid::Uuid;

use crate::with_timeout;

type Winners = Arc<Mutex<Vec<String>>>;

fn delay_step() -> Step<impl Fn(()) -> StepFuture<()> + Send + Sync + 'static> {
    step(|_: ()| -> StepFuture<()> {
        Box::pin(async move {
            sleep(Duration::from_millis(50)).await;
            Ok(())
        })
    })
}

fn assert_a_always_won(winners: &Winners) {
    let winners = winners.lock().unwrap();
    assert!(!winners.is_empty());
    assert!(
        winners.iter().all(|w| w == "A"),
        "race winners across plays: {:?}",
        winners
    );
}

/// Trigger a hook once the run has published its token
async fn trigger_when_bound(
    env: TestEnvironment,
    tokens: Arc<Mutex<Vec<String>>>,
    index: usize,
    after: Duration,
    value: &'static str,
) {
    let published = env
        .wait_until(Duration::from_secs(5), |_| {
            tokens.lock().unwrap().len() > index
        })
        .await;
    assert!(published, "hook {} was never bound", index);
    sleep(after).await;

    let token = tokens.lock().unwrap()[index].clone();
    env.run(
        env.orchestrator()
            .trigger(HookSelector::by_token(token), json!(value)),
    )
    .await
    .unwrap();
}

#[tokio::test]
async fn test_step_race_is_stable_across_plays() {
    with_timeout("test_step_race_is_stable_across_plays", async {
        let env = TestEnvironment::new();
        let winners: Winners = Arc::default();

        let delay = delay_step();
        let step_a = step(|_: ()| async move { Ok("A".to_string()) });
        let step_b = step(|_: ()| async move {
            sleep(Duration::from_millis(5)).await;
            Ok("B".to_string())
        });

        let sink = winners.clone();
        let flow = env
            .replayable("race-1", move |_: ()| {
                let (delay, step_a, step_b) = (delay.clone(), step_a.clone(), step_b.clone());
                let sink = sink.clone();
                async move {
                    let winner = race(vec![step_b.call(()), step_a.call(())]).await?;
                    sink.lock().unwrap().push(winner);
                    delay.call(()).await?;
                    Ok(())
                }
            })
            .unwrap();

        env.run(flow.call(())).await.unwrap();
        assert_a_always_won(&winners);
    })
    .await;
}

#[tokio::test]
async fn test_hook_race_is_stable_across_plays() {
    with_timeout("test_hook_race_is_stable_across_plays", async {
        let env = TestEnvironment::new();
        let winners: Winners = Arc::default();
        let tokens: Arc<Mutex<Vec<String>>> = Arc::default();

        let delay = delay_step();
        let sink = winners.clone();
        let published = tokens.clone();
        let flow = env
            .replayable("race-2", move |_: ()| {
                let delay = delay.clone();
                let (sink, published) = (sink.clone(), published.clone());
                async move {
                    let hook_a = hook::<String>().await?;
                    let hook_b = hook::<String>().await?;
                    {
                        let mut published = published.lock().unwrap();
                        if published.is_empty() {
                            published.push(hook_a.token().to_string());
                            published.push(hook_b.token().to_string());
                        }
                    }

                    let winner = race(vec![hook_b.once(), hook_a.once()]).await?;
                    sink.lock().unwrap().push(winner);
                    delay.call(()).await?;
                    Ok(())
                }
            })
            .unwrap();

        let handle = env.run(async { flow.start(()) }).await.unwrap();
        tokio::spawn(trigger_when_bound(
            env.clone(),
            tokens.clone(),
            0,
            Duration::from_millis(1),
            "A",
        ));
        tokio::spawn(trigger_when_bound(
            env.clone(),
            tokens.clone(),
            1,
            Duration::from_millis(5),
            "B",
        ));

        handle.await.unwrap();
        assert_a_always_won(&winners);
    })
    .await;
}

#[tokio::test]
async fn test_once_race_is_stable_across_plays() {
    with_timeout("test_once_race_is_stable_across_plays", async {
        let env = TestEnvironment::new();
        let winners: Winners = Arc::default();

        let delay = delay_step();
        let sink = winners.clone();
        let flow = env
            .replayable("race-3", move |_: ()| {
                let delay = delay.clone();
                let sink = sink.clone();
                async move {
                    let winner = race(vec![
                        once(|| async {
                            sleep(Duration::from_millis(5)).await;
                            Ok("B".to_string())
                        }),
                        once(|| async { Ok("A".to_string()) }),
                    ])
                    .await?;
                    sink.lock().unwrap().push(winner);
                    delay.call(()).await?;
                    Ok(())
                }
            })
            .unwrap();

        env.run(flow.call(())).await.unwrap();
        assert_a_always_won(&winners);
    })
    .await;
}

#[tokio::test]
async fn test_step_hook_race_is_stable_across_plays() {
    with_timeout("test_step_hook_race_is_stable_across_plays", async {
        let env = TestEnvironment::new();
        let winners: Winners = Arc::default();
        let tokens: Arc<Mutex<Vec<String>>> = Arc::default();

        let delay = delay_step();
        let step_a = step(|_: ()| async move { Ok("A".to_string()) });
        let sink = winners.clone();
        let published = tokens.clone();
        let flow = env
            .replayable("race-4", move |_: ()| {
                let (delay, step_a) = (delay.clone(), step_a.clone());
                let (sink, published) = (sink.clone(), published.clone());
                async move {
                    let hook_b = hook::<String>().await?;
                    {
                        let mut published = published.lock().unwrap();
                        if published.is_empty() {
                            published.push(hook_b.token().to_string());
                        }
                    }

                    let winner = race(vec![hook_b.once(), step_a.call(())]).await?;
                    sink.lock().unwrap().push(winner);
                    delay.call(()).await?;
                    Ok(())
                }
            })
            .unwrap();

        let handle = env.run(async { flow.start(()) }).await.unwrap();
        tokio::spawn(trigger_when_bound(
            env.clone(),
            tokens.clone(),
            0,
            Duration::from_millis(5),
            "B",
        ));

        handle.await.unwrap();
        assert_a_always_won(&winners);
    })
    .await;
}

/// In-memory log whose reads give way to the scheduler, like a remote store
struct YieldingLog(InMemoryEventLog);

#[async_trait]
impl EventLog for YieldingLog {
    async fn log(&self, events: Vec<ReplayEvent>) -> CoreResult<()> {
        self.0.log(events).await
    }

    async fn get_run_state(&self, run_id: Uuid) -> CoreResult<Option<RunState>> {
        tokio::task::yield_now().await;
        self.0.get_run_state(run_id).await
    }

    async fn get_step_state(&self, run_id: Uuid, step: u64) -> CoreResult<Option<StepState>> {
        tokio::task::yield_now().await;
        self.0.get_step_state(run_id, step).await
    }

    async fn get_hook_bindings(&self, token: &str) -> CoreResult<Vec<HookBinding>> {
        tokio::task::yield_now().await;
        self.0.get_hook_bindings(token).await
    }

    async fn get_hook_triggers(&self, run_id: Uuid, token: &str) -> CoreResult<Vec<HookTrigger>> {
        tokio::task::yield_now().await;
        self.0.get_hook_triggers(run_id, token).await
    }

    async fn is_hook_bound(&self, token: &str, run_id: Uuid) -> CoreResult<bool> {
        sleep(Duration::from_millis(5)).await;
        self.0.is_hook_bound(token, run_id).await
    }

    async fn get_pending_runs(&self) -> CoreResult<Vec<RunState>> {
        tokio::task::yield_now().await;
        self.0.get_pending_runs().await
    }

    async fn get_pending_steps(&self, run_id: Uuid) -> CoreResult<Vec<StepState>> {
        tokio::task::yield_now().await;
        self.0.get_pending_steps(run_id).await
    }

    async fn get_finished_work_events(
        &self,
        run_id: Uuid,
    ) -> CoreResult<Vec<SequencedReplayEvent>> {
        tokio::task::yield_now().await;
        self.0.get_finished_work_events(run_id).await
    }
}

#[tokio::test]
async fn test_hook_bound_after_a_read_still_wins_its_race() {
    with_timeout("test_hook_bound_after_a_read_still_wins_its_race", async {
        let run_id = Uuid::new_v4();
        // The hook was triggered before the step completed
        let log = InMemoryEventLog::from_events(vec![
            SequencedReplayEvent::new(1, ReplayEvent::run_started(run_id, "yielding", json!(null))),
            SequencedReplayEvent::new(2, ReplayEvent::step_started(run_id, 0)),
            SequencedReplayEvent::new(3, ReplayEvent::hook_bound(run_id, "h")),
            SequencedReplayEvent::new(4, ReplayEvent::run_paused(run_id)),
            SequencedReplayEvent::new(5, ReplayEvent::hook_triggered(run_id, "h", json!("HOOK"))),
            SequencedReplayEvent::new(6, ReplayEvent::step_completed(run_id, 0, json!("STEP"))),
        ]);
        let ctx = ReplayContext::new(Arc::new(YieldingLog(log)), Arc::default());
        let orchestrator = Orchestrator::new(Arc::new(ReplayableRegistry::new()));

        let work = step(|_: ()| async move { Ok("STEP".to_string()) });
        orchestrator
            .replayable("yielding", move |_: ()| {
                let work = work.clone();
                async move {
                    let from_step = work.call(());
                    let from_hook: HookFuture<String> = Box::pin(async {
                        named_hook::<String>("h").await?.once().await
                    });
                    race(vec![from_step, from_hook]).await
                }
            })
            .unwrap();

        let result = using(ctx, orchestrator.resume(run_id, None)).await.unwrap();
        assert_eq!(result, json!("HOOK"));
    })
    .await;
}

#[tokio::test]
async fn test_trigger_recorded_before_its_wait_is_reached() {
    with_timeout("test_trigger_recorded_before_its_wait_is_reached", async {
        let run_id = Uuid::new_v4();
        // The hook fired while the step ahead of its wait was still running
        let env = TestEnvironment::from_events(vec![
            SequencedReplayEvent::new(1, ReplayEvent::run_started(run_id, "early", json!(null))),
            SequencedReplayEvent::new(2, ReplayEvent::hook_bound(run_id, "approve")),
            SequencedReplayEvent::new(3, ReplayEvent::step_started(run_id, 0)),
            SequencedReplayEvent::new(4, ReplayEvent::run_paused(run_id)),
            SequencedReplayEvent::new(5, ReplayEvent::hook_triggered(run_id, "approve", json!(true))),
            SequencedReplayEvent::new(6, ReplayEvent::step_completed(run_id, 0, json!(2))),
        ]);

        let work = step(|_: ()| async move { Ok(0i64) });
        env.replayable("early", move |_: ()| {
            let work = work.clone();
            async move {
                let approve = named_hook::<bool>("approve").await?;
                let n = work.call(()).await?;
                let approved = approve.once().await?;
                Ok(format!("{}:{}", n, approved))
            }
        })
        .unwrap();

        let result = env
            .run(env.orchestrator().resume(run_id, None))
            .await
            .unwrap();
        assert_eq!(result, json!("2:true"));
    })
    .await;
}
