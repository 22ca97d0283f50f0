//! Event envelope and well-known event names.

use crate::utils::{now_utc, Timestamp};
use serde::{Deserialize, Serialize};

/// Source of events published by the orchestration core.
pub const SOURCE_ORCHESTRATOR: &str = "voxflow.orchestrator";

/// Source of events published by queue workers.
pub const SOURCE_QUEUE: &str = "voxflow.queue";

/// Well-known event types.
pub mod event_types {
    /// A conversation turn finished successfully.
    pub const INTERACTION_COMPLETED: &str = "interaction.completed";
    /// An execution ended unrecoverably.
    pub const SYSTEM_ERROR: &str = "system.error";
    /// A queue message exhausted its deliveries.
    pub const QUEUE_DEAD_LETTERED: &str = "queue.dead_lettered";
}

/// A domain event. Published and consumed in process, never persisted here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventEnvelope {
    /// Publishing component.
    pub source: String,
    /// Event type, e.g. `interaction.completed`.
    #[serde(rename = "type")]
    pub event_type: String,
    /// Opaque payload.
    #[serde(default)]
    pub detail: serde_json::Value,
    /// Creation time.
    pub timestamp: Timestamp,
}

impl EventEnvelope {
    /// Creates an envelope stamped with the current time.
    #[must_use]
    pub fn new(source: impl Into<String>, event_type: impl Into<String>, detail: serde_json::Value) -> Self {
        Self {
            source: source.into(),
            event_type: event_type.into(),
            detail,
            timestamp: now_utc(),
        }
    }
}
