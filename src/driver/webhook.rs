use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{extract::State, http::StatusCode, routing::post, Json, Router};
use serde_json::Value;
use tracing::{debug, info};

use crate::event::normalize_push;
use crate::pipeline::Pipeline;

/// Push-mode driver: an inbound receiver for provider-pushed payloads.
///
/// Receipt is acknowledged before processing, so the provider is never
/// blocked or retried because of the relay's own downstream failures.
pub async fn run(pipeline: Arc<Pipeline>, port: u16) -> Result<()> {
    let app = Router::new()
        .route("/inbound", post(receive))
        .with_state(pipeline);

    let listener = tokio::net::TcpListener::bind(("0.0.0.0", port))
        .await
        .with_context(|| format!("Failed to bind port {}", port))?;

    info!("Listening for provider pushes on port {}", port);
    axum::serve(listener, app)
        .await
        .context("Webhook server terminated")?;
    Ok(())
}

async fn receive(State(pipeline): State<Arc<Pipeline>>, Json(body): Json<Value>) -> StatusCode {
    let events = normalize_push(&body);
    if events.is_empty() {
        debug!("Rejecting push with no usable record");
        return StatusCode::BAD_REQUEST;
    }

    // Accept-then-process: the response never waits on dispatch.
    for event in events {
        let pipeline = Arc::clone(&pipeline);
        tokio::spawn(async move {
            pipeline.process(&event).await;
        });
    }

    StatusCode::OK
}
