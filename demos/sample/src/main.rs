//! Sample
//!
//! A small replayable that shows how the engine behaves across plays:
//! - a `once` side effect that runs a single time
//! - a race between two steps, replayed with the same winner
//! - a named hook raced against a slow step, resumed by an external trigger
//!
//! Run with `RUST_LOG=replayable_sdk=debug cargo run -p replayable-sample` to
//! watch each play of the run.

use std::time::Duration;

use replayable_sdk::prelude::*;
use tracing::info;

/// Output of the sample replayable
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SampleOutput {
    pub first: String,
    pub confirmed: i64,
}

#[tokio::main]
async fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    use_context(ReplayContext::in_memory());

    let step_a = step(|_: ()| async move {
        info!("A");
        Ok("A".to_string())
    });
    let step_b = step(|_: ()| async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        info!("B");
        Ok("B".to_string())
    });
    let step_c = step(|_: ()| async move {
        tokio::time::sleep(Duration::from_millis(300)).await;
        Ok(42i64)
    });

    let sample = replayable("sample", move |_: ()| {
        let (step_a, step_b, step_c) = (step_a.clone(), step_b.clone(), step_c.clone());
        async move {
            once(|| async {
                info!("O");
                Ok(())
            })
            .await?;

            let first = race(vec![step_b.call(()), step_a.call(())]).await?;

            let confirm = named_hook::<i64>("confirm").await?;
            let confirmed = race(vec![confirm.once(), step_c.call(())]).await?;

            Ok(SampleOutput { first, confirmed })
        }
    })?;

    tokio::spawn(async {
        tokio::time::sleep(Duration::from_millis(200)).await;
        match trigger(HookSelector::by_id("confirm"), 64).await {
            Ok(runs) => info!(runs = runs.len(), "Confirmed"),
            Err(e) => tracing::error!(error = %e, "Failed to confirm"),
        }
    });

    let output = sample.call(()).await?;
    info!(first = %output.first, confirmed = output.confirmed, "Sample finished");

    Ok(())
}
