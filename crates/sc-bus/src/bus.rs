//! The worker-facing bus API.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::trace;

use sc_common::Payload;

use crate::registry::{MultiSubscription, Subscription, TopicRegistry};
use crate::Result;

/// A message published on the worker bus. Immutable after publish.
///
/// `source` names the worker class (e.g. `tcp_client`), `source_id` the
/// instance or endpoint within it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusMessage {
    pub topic: String,
    pub source: String,
    pub source_id: String,
    pub payload: Payload,
}

/// In-process pub/sub for worker ↔ runtime messages.
///
/// Mailboxes are unbounded: publishing never blocks on subscribers, and a
/// stalled consumer grows its own queue without affecting anyone else.
pub struct WorkerBus {
    registry: Arc<TopicRegistry<BusMessage>>,
}

impl Default for WorkerBus {
    fn default() -> Self {
        Self::new()
    }
}

impl WorkerBus {
    pub fn new() -> Self {
        Self {
            registry: Arc::new(TopicRegistry::new()),
        }
    }

    pub fn subscribe(&self, topic: &str) -> Subscription<BusMessage> {
        TopicRegistry::subscribe(&self.registry, topic)
    }

    pub fn subscribe_many(&self, topics: &[&str]) -> Result<MultiSubscription<BusMessage>> {
        TopicRegistry::subscribe_many(&self.registry, topics)
    }

    /// Publish synchronously: enqueue into every matching mailbox.
    pub fn publish(&self, topic: &str, source: &str, source_id: &str, payload: Payload) {
        let message = BusMessage {
            topic: topic.to_string(),
            source: source.to_string(),
            source_id: source_id.to_string(),
            payload,
        };
        let delivered = self.registry.deliver(topic, &message);
        trace!(topic, source, source_id, delivered, "bus publish");
    }
}
