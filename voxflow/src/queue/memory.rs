//! In-memory durable queue.
//!
//! Visibility and retention deadlines use the tokio clock, so paused-time
//! tests can step through them. Wall-clock timestamps on [`QueueMessage`] are
//! informational.

use super::{DeadLetterRecord, DurableQueue, QueueError, QueueMessage, QueuePolicy, QueueStats, ReceiveBatch};
use crate::errors::DeliveryExhaustedError;
use crate::utils::{add_duration, now_utc};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::{debug, warn};
use uuid::Uuid;

/// Used when a deadline would overflow the clock.
const FAR_FUTURE: Duration = Duration::from_secs(30 * 365 * 24 * 3600);

#[derive(Debug)]
struct Entry {
    message: QueueMessage,
    ready_at: Instant,
    enqueued: Instant,
}

impl Entry {
    fn in_flight(&self, now: Instant) -> bool {
        self.message.receive_count > 0 && self.ready_at > now
    }
}

#[derive(Debug, Default)]
struct State {
    entries: VecDeque<Entry>,
    dead: Vec<DeadLetterRecord>,
}

/// A [`DurableQueue`] held in process memory.
#[derive(Debug)]
pub struct InMemoryQueue {
    name: String,
    policy: QueuePolicy,
    state: Mutex<State>,
    notify: Notify,
}

impl InMemoryQueue {
    /// Creates an empty queue.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if the policy fails validation.
    pub fn new(name: impl Into<String>, policy: QueuePolicy) -> Result<Self, QueueError> {
        policy.validate().map_err(QueueError::InvalidArgument)?;
        Ok(Self {
            name: name.into(),
            policy,
            state: Mutex::new(State::default()),
            notify: Notify::new(),
        })
    }

    /// Queue name, used in logs.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The policy in force.
    #[must_use]
    pub fn policy(&self) -> &QueuePolicy {
        &self.policy
    }

    /// Delivers ready messages and dead-letters exhausted ones.
    ///
    /// Also returns the earliest future instant at which a message becomes ready.
    fn collect(&self, now: Instant, max_messages: usize) -> (ReceiveBatch, Option<Instant>) {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        self.purge_locked(state, now);

        let visibility = self.policy.visibility_timeout();
        let mut batch = ReceiveBatch::default();
        let mut index = 0;
        while index < state.entries.len() && batch.messages.len() < max_messages {
            if state.entries[index].ready_at > now {
                index += 1;
                continue;
            }

            if state.entries[index].message.receive_count >= self.policy.max_receive_count {
                if let Some(entry) = state.entries.remove(index) {
                    let reason = DeliveryExhaustedError {
                        message_id: entry.message.id,
                        receive_count: entry.message.receive_count,
                        max_receive_count: self.policy.max_receive_count,
                    };
                    warn!(
                        queue = %self.name,
                        message_id = %entry.message.id,
                        receive_count = entry.message.receive_count,
                        "Message moved to dead-letter queue"
                    );
                    let record = DeadLetterRecord {
                        message: entry.message,
                        reason: reason.to_string(),
                        moved_at: now_utc(),
                    };
                    state.dead.push(record.clone());
                    batch.dead_lettered.push(record);
                }
                continue;
            }

            let entry = &mut state.entries[index];
            entry.message.receive_count += 1;
            entry.ready_at = deadline(now, visibility);
            entry.message.visible_at = add_duration(now_utc(), visibility);
            batch.messages.push(entry.message.clone());
            index += 1;
        }

        let next_ready = state
            .entries
            .iter()
            .map(|e| e.ready_at)
            .filter(|ready| *ready > now)
            .min();
        (batch, next_ready)
    }

    fn purge_locked(&self, state: &mut State, now: Instant) -> usize {
        let retention = self.policy.retention();
        let before = state.entries.len();
        state
            .entries
            .retain(|e| now.saturating_duration_since(e.enqueued) < retention);
        let purged = before - state.entries.len();
        if purged > 0 {
            debug!(queue = %self.name, purged, "Purged messages past retention");
        }
        purged
    }
}

fn deadline(now: Instant, after: Duration) -> Instant {
    now.checked_add(after).unwrap_or_else(|| now + FAR_FUTURE)
}

#[async_trait]
impl DurableQueue for InMemoryQueue {
    async fn enqueue(&self, body: serde_json::Value, delay: Option<Duration>) -> Result<Uuid, QueueError> {
        let now = Instant::now();
        let delay = delay.unwrap_or(Duration::ZERO);
        let enqueued_at = now_utc();
        let message = QueueMessage {
            id: Uuid::new_v4(),
            body,
            receive_count: 0,
            enqueued_at,
            visible_at: add_duration(enqueued_at, delay),
        };
        let id = message.id;
        self.state.lock().entries.push_back(Entry {
            message,
            ready_at: deadline(now, delay),
            enqueued: now,
        });
        debug!(queue = %self.name, message_id = %id, delay_ms = delay.as_millis(), "Message enqueued");
        self.notify.notify_one();
        Ok(id)
    }

    async fn receive(&self, max_messages: usize, wait: Duration) -> Result<ReceiveBatch, QueueError> {
        if max_messages == 0 || max_messages > self.policy.max_batch_size {
            return Err(QueueError::InvalidArgument(format!(
                "max_messages must be between 1 and {}",
                self.policy.max_batch_size
            )));
        }

        let until = deadline(Instant::now(), wait);
        loop {
            let now = Instant::now();
            let (batch, next_ready) = self.collect(now, max_messages);
            if !batch.is_empty() || now >= until {
                return Ok(batch);
            }
            let wake_at = next_ready.map_or(until, |ready| ready.min(until));
            tokio::select! {
                () = self.notify.notified() => {}
                () = tokio::time::sleep_until(wake_at) => {}
            }
        }
    }

    async fn delete(&self, id: Uuid) -> Result<bool, QueueError> {
        let mut state = self.state.lock();
        let before = state.entries.len();
        state.entries.retain(|e| e.message.id != id);
        let removed = state.entries.len() != before;
        if removed {
            debug!(queue = %self.name, message_id = %id, "Message deleted");
        }
        Ok(removed)
    }

    async fn extend_visibility(&self, id: Uuid, timeout: Duration) -> Result<(), QueueError> {
        let now = Instant::now();
        let mut state = self.state.lock();
        let entry = state
            .entries
            .iter_mut()
            .find(|e| e.message.id == id)
            .ok_or(QueueError::NotFound(id))?;
        if !entry.in_flight(now) {
            return Err(QueueError::NotInFlight(id));
        }
        entry.ready_at = deadline(now, timeout);
        entry.message.visible_at = add_duration(now_utc(), timeout);
        Ok(())
    }

    async fn dead_letters(&self) -> Vec<DeadLetterRecord> {
        self.state.lock().dead.clone()
    }

    async fn redrive(&self, id: Uuid) -> Result<(), QueueError> {
        let now = Instant::now();
        {
            let mut state = self.state.lock();
            let position = state
                .dead
                .iter()
                .position(|r| r.message.id == id)
                .ok_or(QueueError::NotFound(id))?;
            let record = state.dead.remove(position);
            let mut message = record.message;
            message.receive_count = 0;
            message.visible_at = now_utc();
            state.entries.push_back(Entry {
                message,
                ready_at: now,
                enqueued: now,
            });
        }
        debug!(queue = %self.name, message_id = %id, "Message redriven from dead-letter queue");
        self.notify.notify_one();
        Ok(())
    }

    async fn purge_expired(&self) -> usize {
        let mut state = self.state.lock();
        self.purge_locked(&mut state, Instant::now())
    }

    async fn stats(&self) -> QueueStats {
        let now = Instant::now();
        let mut state = self.state.lock();
        self.purge_locked(&mut state, now);
        let mut stats = QueueStats {
            dead_lettered: state.dead.len(),
            ..QueueStats::default()
        };
        for entry in &state.entries {
            if entry.ready_at <= now {
                stats.visible += 1;
            } else if entry.message.receive_count > 0 {
                stats.in_flight += 1;
            } else {
                stats.delayed += 1;
            }
        }
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::sync::Arc;

    fn queue(policy: QueuePolicy) -> InMemoryQueue {
        InMemoryQueue::new("test", policy).unwrap()
    }

    const NO_WAIT: Duration = Duration::ZERO;

    #[tokio::test]
    async fn test_enqueue_receive_delete() {
        let q = queue(QueuePolicy::default());
        let id = q.enqueue(json!({"n": 1}), None).await.unwrap();

        let batch = q.receive(10, NO_WAIT).await.unwrap();
        assert_eq!(batch.messages.len(), 1);
        assert_eq!(batch.messages[0].id, id);
        assert_eq!(batch.messages[0].receive_count, 1);
        assert_eq!(batch.messages[0].body, json!({"n": 1}));

        assert!(q.delete(id).await.unwrap());
        assert!(!q.delete(id).await.unwrap());
        assert_eq!(q.stats().await, QueueStats::default());
    }

    #[tokio::test(start_paused = true)]
    async fn test_hidden_until_visibility_expires() {
        let q = queue(QueuePolicy::default());
        let id = q.enqueue(json!(1), None).await.unwrap();

        assert_eq!(q.receive(1, NO_WAIT).await.unwrap().messages.len(), 1);
        assert!(q.receive(1, NO_WAIT).await.unwrap().is_empty());
        assert_eq!(q.stats().await.in_flight, 1);

        tokio::time::advance(Duration::from_secs(31)).await;
        let batch = q.receive(1, NO_WAIT).await.unwrap();
        assert_eq!(batch.messages[0].id, id);
        assert_eq!(batch.messages[0].receive_count, 2);
    }

    #[tokio::test]
    async fn test_dead_letter_after_max_receives() {
        let q = queue(
            QueuePolicy::default()
                .with_max_receive_count(3)
                .with_visibility_timeout_seconds(0.0),
        );
        let id = q.enqueue(json!("poison"), None).await.unwrap();

        for expected in 1..=3 {
            let batch = q.receive(1, NO_WAIT).await.unwrap();
            assert_eq!(batch.messages[0].receive_count, expected);
            assert!(batch.dead_lettered.is_empty());
        }

        let batch = q.receive(1, NO_WAIT).await.unwrap();
        assert!(batch.messages.is_empty());
        assert_eq!(batch.dead_lettered.len(), 1);
        assert_eq!(batch.dead_lettered[0].message.id, id);
        assert!(batch.dead_lettered[0].reason.contains("received 3 times"));

        assert_eq!(q.dead_letters().await.len(), 1);
        assert_eq!(q.stats().await.dead_lettered, 1);
        assert!(!q.delete(id).await.unwrap());
    }

    #[tokio::test]
    async fn test_redrive() {
        let q = queue(
            QueuePolicy::default()
                .with_max_receive_count(1)
                .with_visibility_timeout_seconds(0.0),
        );
        let id = q.enqueue(json!("x"), None).await.unwrap();
        q.receive(1, NO_WAIT).await.unwrap();
        assert_eq!(q.receive(1, NO_WAIT).await.unwrap().dead_lettered.len(), 1);

        q.redrive(id).await.unwrap();
        assert!(q.dead_letters().await.is_empty());
        let batch = q.receive(1, NO_WAIT).await.unwrap();
        assert_eq!(batch.messages[0].receive_count, 1);

        let unknown = Uuid::new_v4();
        assert_eq!(q.redrive(unknown).await, Err(QueueError::NotFound(unknown)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_delayed_enqueue() {
        let q = queue(QueuePolicy::default());
        q.enqueue(json!("later"), Some(Duration::from_secs(5))).await.unwrap();
        assert_eq!(q.stats().await.delayed, 1);
        assert!(q.receive(1, NO_WAIT).await.unwrap().is_empty());

        let started = Instant::now();
        let batch = q.receive(1, Duration::from_secs(20)).await.unwrap();
        assert_eq!(batch.messages.len(), 1);
        assert!(started.elapsed() >= Duration::from_secs(5));
        assert!(started.elapsed() < Duration::from_secs(20));
    }

    #[tokio::test]
    async fn test_long_poll_wakes_on_enqueue() {
        let q = Arc::new(queue(QueuePolicy::default()));
        let consumer = Arc::clone(&q);
        let handle = tokio::spawn(async move { consumer.receive(1, Duration::from_secs(30)).await });

        tokio::task::yield_now().await;
        q.enqueue(json!("wake"), None).await.unwrap();

        let batch = handle.await.unwrap().unwrap();
        assert_eq!(batch.messages[0].body, json!("wake"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_long_poll_times_out_empty() {
        let q = queue(QueuePolicy::default());
        let batch = q.receive(1, Duration::from_secs(2)).await.unwrap();
        assert!(batch.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_extend_visibility() {
        let q = queue(QueuePolicy::default());
        let id = q.enqueue(json!(1), None).await.unwrap();

        assert_eq!(q.extend_visibility(id, Duration::from_secs(60)).await, Err(QueueError::NotInFlight(id)));
        assert_eq!(
            q.extend_visibility(Uuid::nil(), Duration::from_secs(60)).await,
            Err(QueueError::NotFound(Uuid::nil()))
        );

        q.receive(1, NO_WAIT).await.unwrap();
        tokio::time::advance(Duration::from_secs(20)).await;
        q.extend_visibility(id, Duration::from_secs(60)).await.unwrap();
        tokio::time::advance(Duration::from_secs(20)).await;
        assert!(q.receive(1, NO_WAIT).await.unwrap().is_empty());

        tokio::time::advance(Duration::from_secs(41)).await;
        assert_eq!(q.receive(1, NO_WAIT).await.unwrap().messages.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retention_purge() {
        let q = queue(QueuePolicy::default().with_retention_seconds(10.0));
        q.enqueue(json!(1), None).await.unwrap();
        tokio::time::advance(Duration::from_secs(5)).await;
        q.enqueue(json!(2), None).await.unwrap();
        tokio::time::advance(Duration::from_secs(6)).await;

        assert_eq!(q.purge_expired().await, 1);
        let batch = q.receive(10, NO_WAIT).await.unwrap();
        assert_eq!(batch.messages.len(), 1);
        assert_eq!(batch.messages[0].body, json!(2));
    }

    #[tokio::test]
    async fn test_invalid_batch_size() {
        let q = queue(QueuePolicy::default());
        assert!(matches!(q.receive(0, NO_WAIT).await, Err(QueueError::InvalidArgument(_))));
        assert!(matches!(q.receive(11, NO_WAIT).await, Err(QueueError::InvalidArgument(_))));
    }

    #[test]
    fn test_invalid_policy_rejected() {
        assert!(InMemoryQueue::new("bad", QueuePolicy::default().with_max_receive_count(0)).is_err());
    }
}
