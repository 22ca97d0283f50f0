//! Completion hook that turns finished executions into turns and events.

use crate::core::{ExecutionStatus, WorkflowExecution};
use crate::events::{event_types, EventBus, EventEnvelope, SOURCE_ORCHESTRATOR};
use crate::observability::execution_summary;
use crate::store::{ConversationStore, ConversationTurn, StoreError, DEFAULT_TURN_TTL};
use crate::workflow::CompletionHook;
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, warn};

fn text_at<'a>(value: &'a Value, pointer: &str) -> Option<&'a str> {
    value.pointer(pointer).and_then(Value::as_str)
}

/// Appends a [`ConversationTurn`] for every successful execution and
/// publishes `interaction.completed` or `system.error`.
#[derive(Debug, Clone)]
pub struct TurnRecorder {
    store: Arc<dyn ConversationStore>,
    bus: Arc<EventBus>,
    ttl: Duration,
}

impl TurnRecorder {
    /// Creates a recorder using [`DEFAULT_TURN_TTL`].
    #[must_use]
    pub fn new(store: Arc<dyn ConversationStore>, bus: Arc<EventBus>) -> Self {
        Self {
            store,
            bus,
            ttl: DEFAULT_TURN_TTL,
        }
    }

    /// Sets the retention of recorded turns.
    #[must_use]
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    async fn record_success(&self, execution: &WorkflowExecution) {
        let payload = execution.payload();
        let Some(user_id) = text_at(payload, "/user_id") else {
            warn!(execution_id = %execution.id(), "Execution has no user_id, turn not recorded");
            return;
        };
        let intent = text_at(payload, "/classification/intent");

        let mut turn = ConversationTurn::new(
            user_id,
            text_at(payload, "/session_id").unwrap_or_default(),
            execution.id().to_string(),
            text_at(payload, "/text").unwrap_or_default(),
            text_at(payload, "/response/text").unwrap_or_default(),
        )
        .with_ttl(self.ttl);
        if let Some(intent) = intent {
            turn = turn.with_intent(intent);
        }

        match self.store.append(turn).await {
            Ok(()) => debug!(execution_id = %execution.id(), user_id = %user_id, "Turn recorded"),
            // Redelivered executions finish twice; the first append wins.
            Err(StoreError::DuplicateTurn(turn_id)) => {
                debug!(turn_id = %turn_id, "Turn already recorded");
                return;
            }
            Err(e) => {
                error!(execution_id = %execution.id(), error = %e, "Failed to record turn");
                return;
            }
        }

        let detail = json!({
            "execution_id": execution.id(),
            "user_id": user_id,
            "session_id": payload.get("session_id"),
            "intent": intent,
            "handler": payload.pointer("/response/handler"),
            "duration_ms": execution.duration_ms(),
        });
        self.bus
            .publish(EventEnvelope::new(
                SOURCE_ORCHESTRATOR,
                event_types::INTERACTION_COMPLETED,
                detail,
            ))
            .await;
    }

    async fn report_failure(&self, execution: &WorkflowExecution) {
        let payload = execution.payload();
        let caught = payload.get("error");
        let detail = json!({
            "execution_id": execution.id(),
            "graph": execution.graph_name(),
            "user_id": payload.get("user_id"),
            "step": caught
                .and_then(|e| e.get("step"))
                .cloned()
                .or_else(|| execution.current_step().map(Value::from)),
            "category": execution.error().map(|e| e.category.to_string()),
            "message": execution.error().map(|e| e.message.clone()),
            "summary": execution_summary(execution),
        });
        self.bus
            .publish(EventEnvelope::new(SOURCE_ORCHESTRATOR, event_types::SYSTEM_ERROR, detail))
            .await;
    }
}

#[async_trait]
impl CompletionHook for TurnRecorder {
    async fn on_finished(&self, execution: &WorkflowExecution) {
        match execution.status() {
            ExecutionStatus::Succeeded => self.record_success(execution).await,
            ExecutionStatus::Failed => self.report_failure(execution).await,
            ExecutionStatus::Running => {}
        }
    }
}
