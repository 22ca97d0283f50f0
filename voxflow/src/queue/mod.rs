//! Durable queue with dead-letter isolation.
//!
//! Policy ([`QueuePolicy`]) is kept apart from mechanism ([`DurableQueue`]).
//! Delivery is at-least-once: a received message stays hidden for the
//! visibility timeout and reappears unless deleted. Once a message has been
//! received `max_receive_count` times without a delete, the next receive moves
//! it to the dead-letter queue instead of delivering it.

mod memory;
mod policy;

pub use memory::InMemoryQueue;
pub use policy::QueuePolicy;

use crate::utils::Timestamp;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt::Debug;
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

/// Errors from queue operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QueueError {
    /// No message with this id is held by the queue.
    #[error("Message {0} not found")]
    NotFound(Uuid),

    /// The message exists but is not currently leased to a consumer.
    #[error("Message {0} is not in flight")]
    NotInFlight(Uuid),

    /// A call argument was out of range.
    #[error("Invalid queue argument: {0}")]
    InvalidArgument(String),
}

/// A message as handed to consumers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueMessage {
    /// Message id.
    pub id: Uuid,
    /// Opaque JSON body.
    pub body: serde_json::Value,
    /// Number of times the message has been delivered.
    pub receive_count: u32,
    /// When the message was enqueued.
    pub enqueued_at: Timestamp,
    /// When the message next becomes visible.
    pub visible_at: Timestamp,
}

/// A message removed from circulation after exhausting its deliveries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeadLetterRecord {
    /// Snapshot of the message at the time it was moved.
    pub message: QueueMessage,
    /// Why it was moved.
    pub reason: String,
    /// When it was moved.
    pub moved_at: Timestamp,
}

/// Result of a receive call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReceiveBatch {
    /// Messages delivered to the caller.
    pub messages: Vec<QueueMessage>,
    /// Messages moved to the dead-letter queue during this call.
    pub dead_lettered: Vec<DeadLetterRecord>,
}

impl ReceiveBatch {
    /// Returns true when nothing was delivered or dead-lettered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty() && self.dead_lettered.is_empty()
    }
}

/// Point-in-time message counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    /// Ready for delivery.
    pub visible: usize,
    /// Delivered and not yet deleted or expired.
    pub in_flight: usize,
    /// Enqueued with a delay that has not elapsed.
    pub delayed: usize,
    /// Held in the dead-letter queue.
    pub dead_lettered: usize,
}

/// Mechanism of a durable queue.
#[async_trait]
pub trait DurableQueue: Send + Sync + Debug {
    /// Enqueues a body, optionally hidden for `delay`. Returns the message id.
    async fn enqueue(&self, body: serde_json::Value, delay: Option<Duration>) -> Result<Uuid, QueueError>;

    /// Receives up to `max_messages`, long-polling for at most `wait`.
    ///
    /// Returns as soon as anything is delivered or dead-lettered.
    async fn receive(&self, max_messages: usize, wait: Duration) -> Result<ReceiveBatch, QueueError>;

    /// Deletes a message. Returns false if it was already gone.
    async fn delete(&self, id: Uuid) -> Result<bool, QueueError>;

    /// Hides an in-flight message for `timeout` from now.
    async fn extend_visibility(&self, id: Uuid, timeout: Duration) -> Result<(), QueueError>;

    /// Lists dead-lettered messages, oldest first.
    async fn dead_letters(&self) -> Vec<DeadLetterRecord>;

    /// Moves a dead-lettered message back into the queue with a fresh receive count.
    async fn redrive(&self, id: Uuid) -> Result<(), QueueError>;

    /// Drops messages older than the retention period. Returns how many.
    async fn purge_expired(&self) -> usize;

    /// Current counts.
    async fn stats(&self) -> QueueStats;
}
