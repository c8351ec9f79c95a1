use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::pipeline::Pipeline;
use crate::source::ProviderClient;

/// Pull-mode driver: fetch and process on a fixed interval.
///
/// Cycles never overlap; a cycle that runs long simply delays the next
/// tick. Runs until process shutdown.
pub async fn run(
    pipeline: Arc<Pipeline>,
    provider: Arc<ProviderClient>,
    interval: Duration,
) -> Result<()> {
    info!("Polling provider every {}s", interval.as_secs());

    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;
        run_cycle(&pipeline, &provider).await;
    }
}

/// One fetch-and-process cycle. A failing fetch or dispatch ends with a
/// log line, never a crash; the next cycle proceeds normally.
async fn run_cycle(pipeline: &Pipeline, provider: &ProviderClient) {
    let events = match provider.fetch().await {
        Ok(events) => events,
        Err(e) => {
            warn!("Skipping cycle: {}", e);
            return;
        }
    };

    debug!("Cycle discovered {} event(s)", events.len());
    for event in &events {
        pipeline.process(event).await;
    }
}
