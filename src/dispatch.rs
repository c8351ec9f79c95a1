use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::header;
use serde::Serialize;
use tracing::{error, warn};

use crate::config::{DispatchConfig, TriggerConfig};
use crate::error::RelayError;
use crate::event::ChatEvent;
use crate::ledger::DedupLedger;

/// Payload handed to the automation trigger.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct TriggerPayload {
    pub sender: String,
    pub text: String,
}

/// The automation sink: submit a named event, get accepted or rejected.
#[async_trait]
pub trait TriggerSink: Send + Sync {
    async fn submit(&self, event_type: &str, payload: &TriggerPayload) -> Result<()>;
}

#[derive(Serialize)]
struct DispatchRequest<'a> {
    event_type: &'a str,
    client_payload: &'a TriggerPayload,
}

/// Production sink: GitHub `repository_dispatch`. The API confirms
/// acceptance with 204 No Content; anything else is a rejection.
pub struct GithubDispatchSink {
    http: reqwest::Client,
    url: String,
    token: String,
}

impl GithubDispatchSink {
    pub fn new(http: reqwest::Client, config: &TriggerConfig) -> Self {
        Self {
            http,
            url: format!(
                "{}/repos/{}/dispatches",
                config.base_url.trim_end_matches('/'),
                config.repository
            ),
            token: config.token.clone(),
        }
    }
}

#[async_trait]
impl TriggerSink for GithubDispatchSink {
    async fn submit(&self, event_type: &str, payload: &TriggerPayload) -> Result<()> {
        let response = self
            .http
            .post(&self.url)
            .bearer_auth(&self.token)
            .header(header::ACCEPT, "application/vnd.github+json")
            .header(header::USER_AGENT, "zaprelay")
            .json(&DispatchRequest {
                event_type,
                client_payload: payload,
            })
            .send()
            .await
            .context("Failed to reach automation trigger")?;

        let status = response.status();
        if status == reqwest::StatusCode::NO_CONTENT {
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        Err(RelayError::DeliveryFailed {
            status: status.as_u16(),
            body,
        }
        .into())
    }
}

/// Delivers qualifying events to the sink with bounded exponential-backoff
/// retry. The ledger is marked only after the sink confirms acceptance, so
/// a transient failure leaves the event eligible for a later cycle.
pub struct Dispatcher {
    sink: Arc<dyn TriggerSink>,
    ledger: DedupLedger,
    event_type: String,
    max_attempts: u32,
    base_delay: Duration,
    max_delay: Duration,
}

impl Dispatcher {
    pub fn new(
        sink: Arc<dyn TriggerSink>,
        ledger: DedupLedger,
        event_type: String,
        config: &DispatchConfig,
    ) -> Self {
        Self {
            sink,
            ledger,
            event_type,
            max_attempts: config.max_attempts.max(1),
            base_delay: config.base_delay,
            max_delay: config.max_delay,
        }
    }

    pub async fn deliver(&self, event: &ChatEvent) -> Result<()> {
        // Downstream keyword matching is case-insensitive, so the payload
        // carries the lowercased text.
        let payload = TriggerPayload {
            sender: event.sender.clone(),
            text: event.text.to_lowercase(),
        };

        let mut delay = self.base_delay;
        for attempt in 1..=self.max_attempts {
            match self.sink.submit(&self.event_type, &payload).await {
                Ok(()) => {
                    self.ledger
                        .mark_relayed(&event.event_id)
                        .await
                        .context("Dispatch succeeded but ledger update failed")?;
                    return Ok(());
                }
                Err(e) if attempt < self.max_attempts => {
                    warn!(
                        "Dispatch attempt {}/{} failed for {}: {:#}",
                        attempt, self.max_attempts, event.sender, e
                    );
                    tokio::time::sleep(delay).await;
                    delay = (delay * 2).min(self.max_delay);
                }
                Err(e) => {
                    error!(
                        "Dispatch abandoned after {} attempts (sender {}, text {:?}): {:#}",
                        self.max_attempts,
                        event.sender,
                        truncate(&event.text, 80),
                        e
                    );
                    return Err(e);
                }
            }
        }
        unreachable!("retry loop always returns");
    }
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    text.chars().take(max_chars).collect()
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use httpmock::prelude::*;
    use serde_json::json;
    use std::sync::Mutex;

    /// Scripted sink: fails the first `failures` submissions, records all.
    pub(crate) struct FakeSink {
        failures: Mutex<u32>,
        pub submissions: Mutex<Vec<(String, TriggerPayload)>>,
    }

    impl FakeSink {
        pub(crate) fn new(failures: u32) -> Self {
            Self {
                failures: Mutex::new(failures),
                submissions: Mutex::new(Vec::new()),
            }
        }

        pub(crate) fn submission_count(&self) -> usize {
            self.submissions.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl TriggerSink for FakeSink {
        async fn submit(&self, event_type: &str, payload: &TriggerPayload) -> Result<()> {
            self.submissions
                .lock()
                .unwrap()
                .push((event_type.to_string(), payload.clone()));

            let mut failures = self.failures.lock().unwrap();
            if *failures > 0 {
                *failures -= 1;
                return Err(RelayError::DeliveryFailed {
                    status: 502,
                    body: "bad gateway".to_string(),
                }
                .into());
            }
            Ok(())
        }
    }

    fn test_event() -> ChatEvent {
        ChatEvent {
            sender: "5511999".to_string(),
            text: "Preciso de Zumo".to_string(),
            from_self: false,
            from_group: false,
            event_id: "m-1".to_string(),
        }
    }

    fn dispatcher(sink: Arc<FakeSink>, ledger: DedupLedger, max_attempts: u32) -> Dispatcher {
        Dispatcher::new(
            sink,
            ledger,
            "mensagem_recebida".to_string(),
            &DispatchConfig {
                max_attempts,
                base_delay: Duration::from_millis(1),
                max_delay: Duration::from_millis(4),
            },
        )
    }

    #[tokio::test]
    async fn success_marks_the_event_relayed() {
        let sink = Arc::new(FakeSink::new(0));
        let ledger = DedupLedger::open_in_memory(24).unwrap();
        let d = dispatcher(sink.clone(), ledger.clone(), 4);

        d.deliver(&test_event()).await.unwrap();

        assert!(!ledger.is_new("m-1").await.unwrap());
        let submissions = sink.submissions.lock().unwrap();
        assert_eq!(submissions.len(), 1);
        assert_eq!(submissions[0].0, "mensagem_recebida");
        assert_eq!(submissions[0].1.sender, "5511999");
        assert_eq!(submissions[0].1.text, "preciso de zumo");
    }

    #[tokio::test]
    async fn exhausted_retries_leave_the_event_unmarked() {
        let sink = Arc::new(FakeSink::new(u32::MAX));
        let ledger = DedupLedger::open_in_memory(24).unwrap();
        let d = dispatcher(sink.clone(), ledger.clone(), 3);

        assert!(d.deliver(&test_event()).await.is_err());

        assert_eq!(sink.submission_count(), 3);
        assert!(ledger.is_new("m-1").await.unwrap());
    }

    #[tokio::test]
    async fn recovers_after_transient_failures() {
        let sink = Arc::new(FakeSink::new(2));
        let ledger = DedupLedger::open_in_memory(24).unwrap();
        let d = dispatcher(sink.clone(), ledger.clone(), 4);

        d.deliver(&test_event()).await.unwrap();

        assert_eq!(sink.submission_count(), 3);
        assert!(!ledger.is_new("m-1").await.unwrap());
    }

    #[tokio::test]
    async fn github_sink_treats_204_as_accepted() {
        let server = MockServer::start_async().await;
        let dispatches = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/repos/owner/repo/dispatches")
                    .header("authorization", "Bearer gh-1")
                    .json_body(json!({
                        "event_type": "mensagem_recebida",
                        "client_payload": {"sender": "5511999", "text": "preciso de zumo"}
                    }));
                then.status(204);
            })
            .await;

        let sink = GithubDispatchSink::new(
            reqwest::Client::new(),
            &TriggerConfig {
                base_url: server.base_url(),
                repository: "owner/repo".to_string(),
                token: "gh-1".to_string(),
                event_type: "mensagem_recebida".to_string(),
            },
        );

        sink.submit(
            "mensagem_recebida",
            &TriggerPayload {
                sender: "5511999".to_string(),
                text: "preciso de zumo".to_string(),
            },
        )
        .await
        .unwrap();
        dispatches.assert_async().await;
    }

    #[tokio::test]
    async fn github_sink_surfaces_status_and_body_on_rejection() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/repos/owner/repo/dispatches");
                then.status(422).body("No event_type specified");
            })
            .await;

        let sink = GithubDispatchSink::new(
            reqwest::Client::new(),
            &TriggerConfig {
                base_url: server.base_url(),
                repository: "owner/repo".to_string(),
                token: "gh-1".to_string(),
                event_type: "mensagem_recebida".to_string(),
            },
        );

        let err = sink
            .submit(
                "mensagem_recebida",
                &TriggerPayload {
                    sender: "5511999".to_string(),
                    text: "zumo".to_string(),
                },
            )
            .await
            .unwrap_err();

        match err.downcast_ref::<RelayError>() {
            Some(RelayError::DeliveryFailed { status, body }) => {
                assert_eq!(*status, 422);
                assert!(body.contains("event_type"));
            }
            other => panic!("expected DeliveryFailed, got {:?}", other),
        }
    }
}
