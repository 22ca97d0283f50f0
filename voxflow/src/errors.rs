//! Error types for the voxflow orchestration core.
//!
//! Step-level failures are plain data (`StepError`, see [`crate::core`]) so
//! they can be recorded in execution history. Everything that can go wrong
//! outside a step surfaces through [`VoxflowError`].

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;
use uuid::Uuid;

use crate::config::ConfigError;
use crate::queue::QueueError;
use crate::store::StoreError;

/// The main error type for voxflow operations.
#[derive(Debug, Error)]
pub enum VoxflowError {
    /// A workflow graph failed validation.
    #[error("{0}")]
    GraphValidation(#[from] GraphValidationError),

    /// A durable queue operation failed.
    #[error("{0}")]
    Queue(#[from] QueueError),

    /// A conversation store operation failed.
    #[error("{0}")]
    Store(#[from] StoreError),

    /// Configuration could not be loaded or is invalid.
    #[error("{0}")]
    Config(#[from] ConfigError),

    /// An inbound request was malformed.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A generic internal error.
    #[error("Internal error: {0}")]
    Internal(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Metadata about a contract error for better diagnostics.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct ContractErrorInfo {
    /// Error code (e.g., "GRAPH-UNKNOWN-TARGET").
    pub code: String,
    /// Short summary of the error.
    pub summary: String,
    /// Hint for fixing the error.
    pub fix_hint: Option<String>,
    /// Additional context key-value pairs.
    #[serde(default)]
    pub context: HashMap<String, String>,
}

impl ContractErrorInfo {
    /// Creates a new contract error info.
    #[must_use]
    pub fn new(code: impl Into<String>, summary: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            summary: summary.into(),
            fix_hint: None,
            context: HashMap::new(),
        }
    }

    /// Sets the fix hint.
    #[must_use]
    pub fn with_fix_hint(mut self, hint: impl Into<String>) -> Self {
        self.fix_hint = Some(hint.into());
        self
    }

    /// Adds a single context entry.
    #[must_use]
    pub fn with_context_entry(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }
}

/// Error raised when a workflow graph fails load-time validation.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct GraphValidationError {
    /// The error message.
    pub message: String,
    /// The steps involved in the error.
    pub steps: Vec<String>,
    /// Optional contract error info.
    pub error_info: Option<ContractErrorInfo>,
}

impl GraphValidationError {
    /// Creates a new graph validation error.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            steps: Vec::new(),
            error_info: None,
        }
    }

    /// Creates an error carrying a contract code and fix hint.
    #[must_use]
    pub fn coded(code: &str, message: impl Into<String>, fix_hint: &str) -> Self {
        let message = message.into();
        Self::new(message.clone())
            .with_error_info(ContractErrorInfo::new(code, message).with_fix_hint(fix_hint))
    }

    /// Sets the steps involved.
    #[must_use]
    pub fn with_steps(mut self, steps: Vec<String>) -> Self {
        self.steps = steps;
        self
    }

    /// Sets the contract error info.
    #[must_use]
    pub fn with_error_info(mut self, info: ContractErrorInfo) -> Self {
        self.error_info = Some(info);
        self
    }

    /// Returns the contract code, if any.
    #[must_use]
    pub fn code(&self) -> Option<&str> {
        self.error_info.as_ref().map(|info| info.code.as_str())
    }
}

/// Raised by the queue itself when a message exceeds its redelivery budget.
///
/// Never retried: the message is moved to the dead-letter queue and operators
/// are alerted.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Delivery exhausted for message {message_id}: received {receive_count} times (max {max_receive_count})")]
pub struct DeliveryExhaustedError {
    /// The exhausted message.
    pub message_id: Uuid,
    /// How many times the message was received.
    pub receive_count: u32,
    /// The configured receive budget.
    pub max_receive_count: u32,
}

/// Default fix suggestions for graph contract codes.
pub struct GraphSuggestions;

impl GraphSuggestions {
    /// Gets a suggestion for a given error code.
    #[must_use]
    pub fn get(code: &str) -> Option<&'static str> {
        match code {
            "GRAPH-UNKNOWN-TARGET" => Some(
                "Every next, default, rule and catch target must name a step declared in the same graph.",
            ),
            "GRAPH-UNREACHABLE" => Some(
                "Remove the step or add an edge to it from a reachable step.",
            ),
            "GRAPH-MISSING-EXECUTOR" => Some(
                "Register an executor under this name before constructing the orchestrator.",
            ),
            "GRAPH-EMPTY" => Some("Add at least one step to the graph."),
            _ => None,
        }
    }
}
