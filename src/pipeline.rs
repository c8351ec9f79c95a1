use std::collections::HashSet;
use std::sync::Arc;

use anyhow::Result;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::dispatch::Dispatcher;
use crate::event::ChatEvent;
use crate::filter::EventFilter;
use crate::ledger::DedupLedger;
use crate::source::ProviderClient;

/// The relay pipeline both drivers converge on: filter, dedup, dispatch.
///
/// Push mode processes deliveries concurrently, so the is-new check and the
/// claim are taken atomically: an in-flight reservation set layered over the
/// ledger keeps two concurrent deliveries of the same message from both
/// dispatching. The durable mark still happens only on confirmed success; a
/// failed claim is released so a later cycle can retry.
pub struct Pipeline {
    filter: Arc<dyn EventFilter>,
    ledger: DedupLedger,
    dispatcher: Dispatcher,
    provider: Arc<ProviderClient>,
    ack_text: Option<String>,
    in_flight: Mutex<HashSet<String>>,
}

impl Pipeline {
    pub fn new(
        filter: Arc<dyn EventFilter>,
        ledger: DedupLedger,
        dispatcher: Dispatcher,
        provider: Arc<ProviderClient>,
        ack_text: Option<String>,
    ) -> Self {
        Self {
            filter,
            ledger,
            dispatcher,
            provider,
            ack_text,
            in_flight: Mutex::new(HashSet::new()),
        }
    }

    /// Run one event through filter, dedup and dispatch. Never returns an
    /// error: a failure here must not prevent processing of sibling events.
    pub async fn process(&self, event: &ChatEvent) {
        if !self.filter.accepts(event) {
            debug!("Filtered out message from {}", event.sender);
            return;
        }

        match self.claim(&event.event_id).await {
            Ok(true) => {}
            Ok(false) => {
                debug!("Already relayed, skipping {}", event.event_id);
                return;
            }
            Err(e) => {
                error!("Ledger check failed for {}: {:#}", event.event_id, e);
                return;
            }
        }

        match self.dispatcher.deliver(event).await {
            Ok(()) => {
                info!("Relayed message from {}", event.sender);
                if let Some(ack) = &self.ack_text {
                    // Fire-and-forget: an undelivered acknowledgement never
                    // fails the relay.
                    if let Err(e) = self.provider.send_text(&event.sender, ack).await {
                        warn!("Acknowledgement to {} failed: {:#}", event.sender, e);
                    }
                }
            }
            Err(e) => {
                error!("Delivery failed for {}: {:#}", event.sender, e);
            }
        }

        self.release(&event.event_id).await;
    }

    /// Atomically reserve an event id if it is new and not already in
    /// flight.
    async fn claim(&self, event_id: &str) -> Result<bool> {
        let mut in_flight = self.in_flight.lock().await;
        if in_flight.contains(event_id) {
            return Ok(false);
        }
        if !self.ledger.is_new(event_id).await? {
            return Ok(false);
        }
        in_flight.insert(event_id.to_string());
        Ok(true)
    }

    async fn release(&self, event_id: &str) {
        self.in_flight.lock().await.remove(event_id);
    }
}
