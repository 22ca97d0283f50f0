//! Inbound surface: submit a turn to the queue or run it inline.

use crate::core::{ExecutionStatus, WorkflowExecution};
use crate::errors::VoxflowError;
use crate::queue::DurableQueue;
use crate::workflow::Orchestrator;
use crate::worker::WorkMessage;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

/// Reply returned for any execution that did not succeed.
pub const FALLBACK_REPLY: &str = "Sorry, I couldn't handle that right now. Please try again.";

/// What the user sent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnInput {
    /// A typed or already-transcribed utterance.
    Text(String),
    /// Blob key of recorded audio.
    AudioRef(String),
}

impl TurnInput {
    /// Text input.
    #[must_use]
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text(text.into())
    }

    /// Audio input.
    #[must_use]
    pub fn audio(key: impl Into<String>) -> Self {
        Self::AudioRef(key.into())
    }
}

/// What the caller gets back. Never carries internal error detail.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reply {
    /// Execution that produced the reply.
    pub execution_id: Uuid,
    /// Generated response, or [`FALLBACK_REPLY`].
    pub text: String,
    /// Whether the execution succeeded.
    pub succeeded: bool,
    /// Blob key of the synthesized audio, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio_key: Option<String>,
}

impl Reply {
    /// Builds the caller-facing reply for a finished execution.
    #[must_use]
    pub fn from_execution(execution: &WorkflowExecution) -> Self {
        let payload = execution.payload();
        let text = payload.pointer("/response/text").and_then(Value::as_str);
        match (execution.status(), text) {
            (ExecutionStatus::Succeeded, Some(text)) => Self {
                execution_id: execution.id(),
                text: text.to_string(),
                succeeded: true,
                audio_key: payload
                    .pointer("/audio/key")
                    .and_then(Value::as_str)
                    .map(str::to_string),
            },
            _ => Self {
                execution_id: execution.id(),
                text: FALLBACK_REPLY.to_string(),
                succeeded: false,
                audio_key: None,
            },
        }
    }
}

/// A turn run inline.
#[derive(Debug, Clone)]
pub struct TurnOutcome {
    /// The finished execution.
    pub execution: WorkflowExecution,
    /// The caller-facing reply.
    pub reply: Reply,
}

/// Accepts conversation turns.
#[derive(Debug, Clone)]
pub struct ConversationService {
    orchestrator: Arc<Orchestrator>,
    queue: Arc<dyn DurableQueue>,
}

impl ConversationService {
    /// Creates the service.
    #[must_use]
    pub fn new(orchestrator: Arc<Orchestrator>, queue: Arc<dyn DurableQueue>) -> Self {
        Self { orchestrator, queue }
    }

    /// The orchestrator running turns.
    #[must_use]
    pub fn orchestrator(&self) -> &Arc<Orchestrator> {
        &self.orchestrator
    }

    /// Enqueues a turn and returns its execution id immediately.
    ///
    /// # Errors
    ///
    /// Returns `InvalidRequest` for empty ids or input, or the queue error.
    pub async fn submit(&self, user_id: &str, session_id: &str, input: TurnInput) -> Result<Uuid, VoxflowError> {
        let input = execution_input(user_id, session_id, input)?;
        let execution_id = Uuid::new_v4();
        let body = WorkMessage::Start { execution_id, input }.to_body()?;
        let message_id = self.queue.enqueue(body, None).await?;
        info!(
            execution_id = %execution_id,
            message_id = %message_id,
            user_id = %user_id,
            "Turn submitted"
        );
        Ok(execution_id)
    }

    /// Runs a turn to completion in the calling task.
    ///
    /// # Errors
    ///
    /// Returns `InvalidRequest` for empty ids or input.
    pub async fn submit_inline(
        &self,
        user_id: &str,
        session_id: &str,
        input: TurnInput,
    ) -> Result<TurnOutcome, VoxflowError> {
        let input = execution_input(user_id, session_id, input)?;
        let execution = self.orchestrator.run(input).await;
        let reply = Reply::from_execution(&execution);
        Ok(TurnOutcome { execution, reply })
    }
}

fn execution_input(user_id: &str, session_id: &str, input: TurnInput) -> Result<Value, VoxflowError> {
    if user_id.trim().is_empty() {
        return Err(VoxflowError::InvalidRequest("user_id is empty".to_string()));
    }
    if session_id.trim().is_empty() {
        return Err(VoxflowError::InvalidRequest("session_id is empty".to_string()));
    }
    let (key, value) = match input {
        TurnInput::Text(text) => ("text", text),
        TurnInput::AudioRef(key) => ("audio_ref", key),
    };
    if value.trim().is_empty() {
        return Err(VoxflowError::InvalidRequest(format!("{key} is empty")));
    }
    Ok(json!({ "user_id": user_id, "session_id": session_id, key: value }))
}
