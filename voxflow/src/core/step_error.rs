//! Step-level error taxonomy.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Category of a step failure, used by retry policies to decide retryability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// An external service timed out or was unavailable.
    TransientExternal,
    /// Malformed input, unknown intent, or another permanent condition.
    PermanentValidation,
    /// The step exceeded its configured timeout.
    StepTimeout,
    /// An orchestrator-internal failure (missing executor, transition limit).
    Internal,
}

impl ErrorCategory {
    /// Categories retried when a policy does not list its own.
    pub const DEFAULT_RETRYABLE: [Self; 2] = [Self::TransientExternal, Self::StepTimeout];
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TransientExternal => write!(f, "transient_external"),
            Self::PermanentValidation => write!(f, "permanent_validation"),
            Self::StepTimeout => write!(f, "step_timeout"),
            Self::Internal => write!(f, "internal"),
        }
    }
}

/// A failure produced by a step executor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Error)]
#[error("{category}: {message}")]
pub struct StepError {
    /// The failure category.
    pub category: ErrorCategory,
    /// Human-readable detail, never shown to end users.
    pub message: String,
}

impl StepError {
    /// Creates a step error.
    #[must_use]
    pub fn new(category: ErrorCategory, message: impl Into<String>) -> Self {
        Self {
            category,
            message: message.into(),
        }
    }

    /// An external service timed out or was unavailable.
    #[must_use]
    pub fn transient(message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::TransientExternal, message)
    }

    /// The input cannot be processed, retrying will not help.
    #[must_use]
    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::PermanentValidation, message)
    }

    /// The step ran past its timeout.
    #[must_use]
    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::StepTimeout, message)
    }

    /// Orchestrator-internal failure.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::Internal, message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constructors_set_category() {
        assert_eq!(StepError::transient("x").category, ErrorCategory::TransientExternal);
        assert_eq!(StepError::validation("x").category, ErrorCategory::PermanentValidation);
        assert_eq!(StepError::timeout("x").category, ErrorCategory::StepTimeout);
        assert_eq!(StepError::internal("x").category, ErrorCategory::Internal);
    }

    #[test]
    fn test_display() {
        let err = StepError::timeout("classifier took too long");
        assert_eq!(err.to_string(), "step_timeout: classifier took too long");
    }

    #[test]
    fn test_serialize_category() {
        let err = StepError::validation("empty text");
        let json = serde_json::to_value(&err).unwrap();
        assert_eq!(json["category"], "permanent_validation");
    }
}
