//! Conversation store: an append-only log of turns with time-boxed retention.
//!
//! Expiry is managed by the store through each turn's `expires_at`; expired
//! turns are never returned and are dropped by [`ConversationStore::purge_expired`].

mod memory;

pub use memory::InMemoryConversationStore;

use crate::utils::{add_duration, now_utc, Timestamp};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt::Debug;
use std::time::Duration;
use thiserror::Error;

/// Default retention for conversation turns (30 days).
pub const DEFAULT_TURN_TTL: Duration = Duration::from_secs(30 * 24 * 3600);

/// Errors from store operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// A turn with this id was already appended.
    #[error("Turn '{0}' already exists")]
    DuplicateTurn(String),

    /// The turn failed validation.
    #[error("Invalid turn: {0}")]
    InvalidTurn(String),
}

/// One request/response exchange.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationTurn {
    /// Opaque caller-supplied user id.
    pub user_id: String,
    /// Session the turn belongs to.
    pub session_id: String,
    /// Unique turn id.
    pub turn_id: String,
    /// What the user said.
    pub input_text: String,
    /// What the assistant replied.
    pub output_text: String,
    /// Classified intent, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub intent: Option<String>,
    /// When the turn happened.
    pub timestamp: Timestamp,
    /// When the store may forget the turn.
    pub expires_at: Timestamp,
}

impl ConversationTurn {
    /// Creates a turn stamped now, expiring after [`DEFAULT_TURN_TTL`].
    #[must_use]
    pub fn new(
        user_id: impl Into<String>,
        session_id: impl Into<String>,
        turn_id: impl Into<String>,
        input_text: impl Into<String>,
        output_text: impl Into<String>,
    ) -> Self {
        let timestamp = now_utc();
        Self {
            user_id: user_id.into(),
            session_id: session_id.into(),
            turn_id: turn_id.into(),
            input_text: input_text.into(),
            output_text: output_text.into(),
            intent: None,
            timestamp,
            expires_at: add_duration(timestamp, DEFAULT_TURN_TTL),
        }
    }

    /// Sets the intent.
    #[must_use]
    pub fn with_intent(mut self, intent: impl Into<String>) -> Self {
        self.intent = Some(intent.into());
        self
    }

    /// Moves the timestamp, keeping the same time-to-live.
    #[must_use]
    pub fn at(mut self, timestamp: Timestamp) -> Self {
        let ttl = self.expires_at - self.timestamp;
        self.timestamp = timestamp;
        self.expires_at = timestamp
            .checked_add_signed(ttl)
            .unwrap_or(chrono::DateTime::<chrono::Utc>::MAX_UTC);
        self
    }

    /// Sets the time-to-live from the turn's timestamp.
    #[must_use]
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.expires_at = add_duration(self.timestamp, ttl);
        self
    }

    /// Returns true once `now` is at or past `expires_at`.
    #[must_use]
    pub fn is_expired(&self, now: Timestamp) -> bool {
        now >= self.expires_at
    }

    fn validate(&self) -> Result<(), StoreError> {
        if self.user_id.trim().is_empty() {
            return Err(StoreError::InvalidTurn("user_id is empty".to_string()));
        }
        if self.turn_id.trim().is_empty() {
            return Err(StoreError::InvalidTurn("turn_id is empty".to_string()));
        }
        if self.expires_at <= self.timestamp {
            return Err(StoreError::InvalidTurn(format!(
                "turn '{}' expires before it happened",
                self.turn_id
            )));
        }
        Ok(())
    }
}

/// Finite, single-pass iterator over a snapshot of turns, newest first.
#[derive(Debug)]
pub struct TurnIter {
    inner: std::vec::IntoIter<ConversationTurn>,
}

impl TurnIter {
    pub(crate) fn new(turns: Vec<ConversationTurn>) -> Self {
        Self {
            inner: turns.into_iter(),
        }
    }
}

impl Iterator for TurnIter {
    type Item = ConversationTurn;

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

impl ExactSizeIterator for TurnIter {}

/// Append-only conversation log.
#[async_trait]
pub trait ConversationStore: Send + Sync + Debug {
    /// Appends a turn.
    async fn append(&self, turn: ConversationTurn) -> Result<(), StoreError>;

    /// Unexpired turns of `user_id` at or after `since`, newest first.
    async fn query(&self, user_id: &str, since: Timestamp) -> TurnIter;

    /// Drops expired turns. Returns how many.
    async fn purge_expired(&self) -> usize;
}
