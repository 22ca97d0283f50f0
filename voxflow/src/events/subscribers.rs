//! Built-in event subscribers.

use super::{EventEnvelope, EventHandler};
use crate::queue::DurableQueue;
use async_trait::async_trait;
use parking_lot::RwLock;
use std::sync::Arc;
use tracing::{debug, info, Level};

/// Logs every event it receives through `tracing`.
#[derive(Debug, Clone)]
pub struct LoggingSubscriber {
    level: Level,
}

impl Default for LoggingSubscriber {
    fn default() -> Self {
        Self { level: Level::INFO }
    }
}

impl LoggingSubscriber {
    /// Creates a logging subscriber with the specified level.
    #[must_use]
    pub fn new(level: Level) -> Self {
        Self { level }
    }

    /// Creates a debug-level logging subscriber.
    #[must_use]
    pub fn debug() -> Self {
        Self::new(Level::DEBUG)
    }
}

#[async_trait]
impl EventHandler for LoggingSubscriber {
    fn name(&self) -> &str {
        "logging"
    }

    async fn handle(&self, event: &EventEnvelope) -> anyhow::Result<()> {
        if self.level == Level::DEBUG {
            debug!(
                source = %event.source,
                event_type = %event.event_type,
                detail = %event.detail,
                "Event: {}", event.event_type
            );
        } else {
            info!(
                source = %event.source,
                event_type = %event.event_type,
                detail = %event.detail,
                "Event: {}", event.event_type
            );
        }
        Ok(())
    }
}

/// Keeps every event it receives. Intended for tests and diagnostics.
#[derive(Debug, Default)]
pub struct CollectingSubscriber {
    name: String,
    events: RwLock<Vec<EventEnvelope>>,
}

impl CollectingSubscriber {
    /// Creates an empty collector.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            events: RwLock::new(Vec::new()),
        }
    }

    /// Returns all collected events.
    #[must_use]
    pub fn events(&self) -> Vec<EventEnvelope> {
        self.events.read().clone()
    }

    /// Returns the number of collected events.
    #[must_use]
    pub fn len(&self) -> usize {
        self.events.read().len()
    }

    /// Returns true if no events have been collected.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.read().is_empty()
    }

    /// Clears all collected events.
    pub fn clear(&self) {
        self.events.write().clear();
    }

    /// Returns events whose type starts with `prefix`.
    #[must_use]
    pub fn events_of_type(&self, prefix: &str) -> Vec<EventEnvelope> {
        self.events
            .read()
            .iter()
            .filter(|e| e.event_type.starts_with(prefix))
            .cloned()
            .collect()
    }
}

#[async_trait]
impl EventHandler for CollectingSubscriber {
    fn name(&self) -> &str {
        &self.name
    }

    async fn handle(&self, event: &EventEnvelope) -> anyhow::Result<()> {
        self.events.write().push(event.clone());
        Ok(())
    }
}

/// Re-publishes matching events into a durable queue.
#[derive(Debug, Clone)]
pub struct QueueForwarder {
    name: String,
    queue: Arc<dyn DurableQueue>,
}

impl QueueForwarder {
    /// Creates a forwarder into `queue`.
    #[must_use]
    pub fn new(name: impl Into<String>, queue: Arc<dyn DurableQueue>) -> Self {
        Self {
            name: name.into(),
            queue,
        }
    }
}

#[async_trait]
impl EventHandler for QueueForwarder {
    fn name(&self) -> &str {
        &self.name
    }

    async fn handle(&self, event: &EventEnvelope) -> anyhow::Result<()> {
        let body = serde_json::to_value(event)?;
        let id = self.queue.enqueue(body, None).await?;
        debug!(forwarder = %self.name, message_id = %id, event_type = %event.event_type, "Event forwarded");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{event_types, SOURCE_QUEUE};
    use crate::queue::{InMemoryQueue, QueuePolicy};
    use serde_json::json;
    use std::time::Duration;

    fn event(event_type: &str) -> EventEnvelope {
        EventEnvelope::new(SOURCE_QUEUE, event_type, json!({"n": 1}))
    }

    #[tokio::test]
    async fn test_logging_subscriber() {
        LoggingSubscriber::default().handle(&event("a")).await.unwrap();
        LoggingSubscriber::debug().handle(&event("a")).await.unwrap();
    }

    #[tokio::test]
    async fn test_collecting_subscriber() {
        let collector = CollectingSubscriber::new("c");
        collector.handle(&event("system.error")).await.unwrap();
        collector.handle(&event("queue.dead_lettered")).await.unwrap();

        assert_eq!(collector.len(), 2);
        assert_eq!(collector.events_of_type("system.").len(), 1);
        collector.clear();
        assert!(collector.is_empty());
    }

    #[tokio::test]
    async fn test_queue_forwarder() {
        let queue = Arc::new(InMemoryQueue::new("alerts", QueuePolicy::default()).unwrap());
        let forwarder = QueueForwarder::new("alerts", queue.clone());

        forwarder.handle(&event(event_types::SYSTEM_ERROR)).await.unwrap();

        let batch = queue.receive(1, Duration::ZERO).await.unwrap();
        let forwarded: EventEnvelope = serde_json::from_value(batch.messages[0].body.clone()).unwrap();
        assert_eq!(forwarded.event_type, event_types::SYSTEM_ERROR);
        assert_eq!(forwarded.detail, json!({"n": 1}));
    }
}
