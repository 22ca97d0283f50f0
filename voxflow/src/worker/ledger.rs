//! Record of executions that reached a final outcome.
//!
//! Queue delivery is at-least-once, so a message may be delivered again after
//! its execution finished (e.g. the worker crashed between finishing and
//! deleting). Workers consult the ledger and drop such duplicates.

use crate::core::ExecutionStatus;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use uuid::Uuid;

/// Default number of execution ids remembered.
pub const DEFAULT_LEDGER_CAPACITY: usize = 10_000;

#[derive(Debug, Default)]
struct Entries {
    outcomes: HashMap<Uuid, ExecutionStatus>,
    order: VecDeque<Uuid>,
}

/// Bounded, in-memory set of completed execution ids.
///
/// The oldest ids are forgotten once `capacity` is reached.
#[derive(Debug)]
pub struct CompletionLedger {
    entries: Mutex<Entries>,
    capacity: usize,
}

impl Default for CompletionLedger {
    fn default() -> Self {
        Self::new(DEFAULT_LEDGER_CAPACITY)
    }
}

impl CompletionLedger {
    /// Creates a ledger remembering at most `capacity` ids.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: Mutex::new(Entries::default()),
            capacity: capacity.max(1),
        }
    }

    /// Records an outcome. Returns false if the id was already recorded.
    pub fn record(&self, execution_id: Uuid, status: ExecutionStatus) -> bool {
        let mut entries = self.entries.lock();
        if entries.outcomes.contains_key(&execution_id) {
            return false;
        }
        while entries.order.len() >= self.capacity {
            if let Some(evicted) = entries.order.pop_front() {
                entries.outcomes.remove(&evicted);
            }
        }
        entries.outcomes.insert(execution_id, status);
        entries.order.push_back(execution_id);
        true
    }

    /// The recorded outcome, if any.
    #[must_use]
    pub fn outcome(&self, execution_id: Uuid) -> Option<ExecutionStatus> {
        self.entries.lock().outcomes.get(&execution_id).copied()
    }

    /// Returns true if the id has been recorded.
    #[must_use]
    pub fn contains(&self, execution_id: Uuid) -> bool {
        self.entries.lock().outcomes.contains_key(&execution_id)
    }

    /// Number of remembered ids.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().order.len()
    }

    /// Returns true if nothing is recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
