mod config;
mod dispatch;
mod driver;
mod error;
mod event;
mod filter;
mod ledger;
mod pipeline;
mod source;

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::{Config, RelayMode};
use crate::dispatch::{Dispatcher, GithubDispatchSink};
use crate::filter::KeywordFilter;
use crate::ledger::DedupLedger;
use crate::pipeline::Pipeline;
use crate::source::ProviderClient;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,zaprelay=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration; a missing value exits before any loop starts
    let config = Config::from_env().context("Configuration error")?;

    info!("Configuration loaded successfully");
    info!("  Mode: {:?}", config.driver.mode);
    info!("  Trigger keyword: {}", config.keyword);
    info!("  Trigger repository: {}", config.trigger.repository);
    match config.driver.mode {
        RelayMode::Pull => info!(
            "  Watching messages every {}s",
            config.driver.poll_interval.as_secs()
        ),
        RelayMode::Push => info!("  Listen port: {}", config.driver.listen_port),
    }

    // One HTTP client with a global timeout; a hung upstream call must not
    // stall a whole cycle.
    let http = reqwest::Client::builder()
        .timeout(config.http_timeout)
        .build()
        .context("Failed to build HTTP client")?;

    let ledger = DedupLedger::open(&config.ledger.path, config.ledger.horizon_hours)
        .context("Failed to open dedup ledger")?;

    let provider = Arc::new(ProviderClient::new(http.clone(), &config.provider));
    let sink = Arc::new(GithubDispatchSink::new(http, &config.trigger));
    let dispatcher = Dispatcher::new(
        sink,
        ledger.clone(),
        config.trigger.event_type.clone(),
        &config.dispatch,
    );

    let pipeline = Arc::new(Pipeline::new(
        Arc::new(KeywordFilter::new(&config.keyword)),
        ledger,
        dispatcher,
        provider.clone(),
        config.provider.ack_text.clone(),
    ));

    info!("Relay is starting...");

    let driver = async {
        match config.driver.mode {
            RelayMode::Pull => {
                driver::poll::run(pipeline, provider, config.driver.poll_interval).await
            }
            RelayMode::Push => driver::webhook::run(pipeline, config.driver.listen_port).await,
        }
    };

    // In-flight work is abandoned on shutdown; the next run re-discovers
    // anything the provider still reports as unread.
    tokio::select! {
        result = driver => result,
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown requested, exiting");
            Ok(())
        }
    }
}
