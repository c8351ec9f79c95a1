use anyhow::{Context, Result};
use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use crate::config::ProviderConfig;
use crate::error::RelayError;
use crate::event::{normalize_payload, ChatEvent};

/// Candidate read endpoints, tried in priority order. The provider's read
/// surface has varied across integration attempts; whichever answers first
/// with a recognizable payload wins.
const READ_ENDPOINTS: &[&str] = &["unread-messages", "messages", "chats"];

#[derive(Serialize)]
struct SendTextRequest<'a> {
    recipient: &'a str,
    text: &'a str,
}

/// HTTP client for the chat provider: candidate-endpoint reads plus the
/// fire-and-forget send-text surface.
pub struct ProviderClient {
    http: reqwest::Client,
    base_url: String,
    instance: String,
    token: String,
}

impl ProviderClient {
    pub fn new(http: reqwest::Client, config: &ProviderConfig) -> Self {
        Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            instance: config.instance.clone(),
            token: config.token.clone(),
        }
    }

    fn endpoint_url(&self, path: &str) -> String {
        format!(
            "{}/instances/{}/token/{}/{}",
            self.base_url, self.instance, self.token, path
        )
    }

    /// Fetch candidate messages, falling through the read endpoints until
    /// one yields a well-formed response. All failing is non-fatal to the
    /// driver; the next cycle simply retries.
    pub async fn fetch(&self) -> Result<Vec<ChatEvent>, RelayError> {
        for path in READ_ENDPOINTS {
            match self.try_endpoint(path).await {
                Ok(events) => {
                    debug!("Read endpoint '{}' returned {} event(s)", path, events.len());
                    return Ok(events);
                }
                Err(e) => debug!("Read endpoint '{}' failed: {:#}", path, e),
            }
        }
        Err(RelayError::SourceUnavailable)
    }

    async fn try_endpoint(&self, path: &str) -> Result<Vec<ChatEvent>> {
        let response = self
            .http
            .get(self.endpoint_url(path))
            .send()
            .await
            .context("Failed to reach provider")?;

        let status = response.status();
        if !status.is_success() {
            anyhow::bail!("provider returned {}", status);
        }

        let payload: Value = response
            .json()
            .await
            .context("Failed to parse provider response")?;

        if !payload.is_array() {
            anyhow::bail!("unrecognizable payload shape");
        }

        Ok(normalize_payload(&payload))
    }

    /// Send an acknowledgement text back through the provider.
    pub async fn send_text(&self, recipient: &str, text: &str) -> Result<()> {
        let response = self
            .http
            .post(self.endpoint_url("send-text"))
            .json(&SendTextRequest { recipient, text })
            .send()
            .await
            .context("Failed to reach provider send endpoint")?;

        let status = response.status();
        if !status.is_success() {
            anyhow::bail!("provider send-text returned {}", status);
        }
        Ok(())
    }
}
