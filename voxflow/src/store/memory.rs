//! In-memory conversation store backed by `DashMap`.

use super::{ConversationStore, ConversationTurn, StoreError, TurnIter};
use crate::utils::{now_utc, Timestamp};
use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::debug;

/// Turns sharded by user id, plus a turn-id index for duplicate detection.
#[derive(Debug, Default)]
pub struct InMemoryConversationStore {
    turns: DashMap<String, Vec<ConversationTurn>>,
    turn_ids: DashMap<String, String>,
}

impl InMemoryConversationStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Total stored turns, expired ones included.
    #[must_use]
    pub fn len(&self) -> usize {
        self.turn_ids.len()
    }

    /// Returns true if nothing is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.turn_ids.is_empty()
    }
}

#[async_trait]
impl ConversationStore for InMemoryConversationStore {
    async fn append(&self, turn: ConversationTurn) -> Result<(), StoreError> {
        turn.validate()?;
        match self.turn_ids.entry(turn.turn_id.clone()) {
            Entry::Occupied(_) => return Err(StoreError::DuplicateTurn(turn.turn_id)),
            Entry::Vacant(slot) => {
                slot.insert(turn.user_id.clone());
            }
        }
        debug!(user_id = %turn.user_id, turn_id = %turn.turn_id, "Turn appended");
        self.turns.entry(turn.user_id.clone()).or_default().push(turn);
        Ok(())
    }

    async fn query(&self, user_id: &str, since: Timestamp) -> TurnIter {
        let now = now_utc();
        let mut snapshot: Vec<ConversationTurn> = self
            .turns
            .get(user_id)
            .map(|turns| {
                turns
                    .iter()
                    .rev()
                    .filter(|t| t.timestamp >= since && !t.is_expired(now))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        snapshot.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        TurnIter::new(snapshot)
    }

    async fn purge_expired(&self) -> usize {
        let now = now_utc();
        let mut purged = Vec::new();
        for mut entry in self.turns.iter_mut() {
            entry.value_mut().retain(|t| {
                let keep = !t.is_expired(now);
                if !keep {
                    purged.push(t.turn_id.clone());
                }
                keep
            });
        }
        self.turns.retain(|_, turns| !turns.is_empty());
        for turn_id in &purged {
            self.turn_ids.remove(turn_id);
        }
        if !purged.is_empty() {
            debug!(purged = purged.len(), "Purged expired turns");
        }
        purged.len()
    }
}
