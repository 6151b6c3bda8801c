// =============================================================================
// Event bus
// =============================================================================
//
// In-process pub/sub with a bounded outbox per subscriber. `try_send`
// drop-on-full backpressure, never blocking the publisher. Each subscriber
// gets its own bounded `mpsc` rather than sharing one `broadcast` channel,
// so one slow dashboard tab can't starve another subscriber's delivery —
// a full outbox drops events rather than blocking the pipeline.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::decision::{Decision, RejectedDecision};
use crate::ledger::{Position, Trade};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CycleSummary {
    pub cycle_id: Uuid,
    pub duration_ms: u64,
    pub agents_run: usize,
    pub errors: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum Event {
    CycleStarted { cycle_id: Uuid },
    CycleCompleted { summary: CycleSummary },
    AgentDecision { decision: Decision, outcome: String },
    AgentDecisionRejected { rejected: RejectedDecision },
    PositionOpened { position: Position },
    PositionClosed { trade: Trade },
    AccountUpdated { agent_id: String },
    SystemError { message: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub data: Event,
    pub ts: DateTime<Utc>,
}

impl Event {
    fn kind(&self) -> &'static str {
        match self {
            Event::CycleStarted { .. } => "CycleStarted",
            Event::CycleCompleted { .. } => "CycleCompleted",
            Event::AgentDecision { .. } => "AgentDecision",
            Event::AgentDecisionRejected { .. } => "AgentDecisionRejected",
            Event::PositionOpened { .. } => "PositionOpened",
            Event::PositionClosed { .. } => "PositionClosed",
            Event::AccountUpdated { .. } => "AccountUpdated",
            Event::SystemError { .. } => "SystemError",
        }
    }

    fn envelope(self) -> Envelope {
        Envelope {
            kind: self.kind(),
            data: self,
            ts: Utc::now(),
        }
    }
}

const OUTBOX_CAPACITY: usize = 256;

struct Subscriber {
    tx: tokio::sync::mpsc::Sender<Envelope>,
    dropped: Arc<AtomicU64>,
}

#[derive(Default)]
pub struct EventBus {
    subscribers: Mutex<Vec<Subscriber>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            subscribers: Mutex::new(Vec::new()),
        }
    }

    /// Register a new subscriber and return its receiving half plus a handle
    /// to its drop counter (exposed for `/status`-style diagnostics).
    pub fn subscribe(&self) -> (tokio::sync::mpsc::Receiver<Envelope>, Arc<AtomicU64>) {
        let (tx, rx) = tokio::sync::mpsc::channel(OUTBOX_CAPACITY);
        let dropped = Arc::new(AtomicU64::new(0));
        self.subscribers.lock().unwrap().push(Subscriber {
            tx,
            dropped: dropped.clone(),
        });
        (rx, dropped)
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().unwrap().len()
    }

    /// Publishes to every subscriber. Never awaits a full outbox: a
    /// subscriber that can't keep up has its event dropped and its counter
    /// incremented, and publishing continues for the rest.
    pub fn publish(&self, event: Event) {
        let envelope = event.envelope();
        let mut subscribers = self.subscribers.lock().unwrap();
        subscribers.retain(|sub| {
            match sub.tx.try_send(envelope.clone()) {
                Ok(()) => true,
                Err(tokio::sync::mpsc::error::TrySendError::Full(_)) => {
                    sub.dropped.fetch_add(1, Ordering::Relaxed);
                    true
                }
                Err(tokio::sync::mpsc::error::TrySendError::Closed(_)) => false,
            }
        });
    }

    /// Drops every subscriber's sender, closing their channels.
    pub fn shutdown(&self) {
        self.subscribers.lock().unwrap().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscriber_receives_published_event() {
        let bus = EventBus::new();
        let (mut rx, _dropped) = bus.subscribe();
        bus.publish(Event::SystemError {
            message: "boom".into(),
        });
        let envelope = rx.recv().await.unwrap();
        assert_eq!(envelope.kind, "SystemError");
    }

    #[tokio::test]
    async fn full_outbox_drops_and_counts_without_blocking() {
        let bus = EventBus::new();
        let (_rx, dropped) = bus.subscribe();
        for _ in 0..(OUTBOX_CAPACITY + 10) {
            bus.publish(Event::SystemError {
                message: "spam".into(),
            });
        }
        assert!(dropped.load(Ordering::Relaxed) > 0);
    }

    #[tokio::test]
    async fn closed_receiver_is_pruned_from_subscriber_list() {
        let bus = EventBus::new();
        let (rx, _dropped) = bus.subscribe();
        drop(rx);
        bus.publish(Event::SystemError {
            message: "gone".into(),
        });
        assert_eq!(bus.subscriber_count(), 0);
    }
}
