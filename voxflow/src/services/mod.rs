//! Contracts for the external services the conversation steps depend on.
//!
//! The models behind these contracts (NLU, response generation, speech) are
//! outside this crate. Implementations are injected into step executors at
//! construction time.

mod blob;

pub use blob::InMemoryBlobStore;

use crate::core::StepError;
use crate::store::ConversationTurn;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// How an external call failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceErrorKind {
    /// The service could not be reached or refused the call.
    Unavailable,
    /// The service did not answer in time.
    Timeout,
    /// The service rejected the request as malformed.
    Invalid,
}

impl fmt::Display for ServiceErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unavailable => write!(f, "unavailable"),
            Self::Timeout => write!(f, "timeout"),
            Self::Invalid => write!(f, "invalid"),
        }
    }
}

/// Error returned by every service contract.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("service {kind}: {message}")]
pub struct ServiceError {
    /// Failure kind.
    pub kind: ServiceErrorKind,
    /// Detail for logs.
    pub message: String,
}

impl ServiceError {
    /// An unavailable error.
    #[must_use]
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self {
            kind: ServiceErrorKind::Unavailable,
            message: message.into(),
        }
    }

    /// A timeout error.
    #[must_use]
    pub fn timeout(message: impl Into<String>) -> Self {
        Self {
            kind: ServiceErrorKind::Timeout,
            message: message.into(),
        }
    }

    /// An invalid-request error.
    #[must_use]
    pub fn invalid(message: impl Into<String>) -> Self {
        Self {
            kind: ServiceErrorKind::Invalid,
            message: message.into(),
        }
    }
}

impl From<ServiceError> for StepError {
    fn from(err: ServiceError) -> Self {
        match err.kind {
            ServiceErrorKind::Unavailable => Self::transient(err.message),
            ServiceErrorKind::Timeout => Self::timeout(err.message),
            ServiceErrorKind::Invalid => Self::validation(err.message),
        }
    }
}

/// Output of intent classification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Classification {
    /// Intent label, e.g. `music`.
    pub intent: String,
    /// Confidence in `[0, 1]`.
    pub confidence: f64,
    /// Extracted slots.
    #[serde(default)]
    pub slots: serde_json::Map<String, serde_json::Value>,
}

impl Classification {
    /// Creates a classification with no slots.
    #[must_use]
    pub fn new(intent: impl Into<String>, confidence: f64) -> Self {
        Self {
            intent: intent.into(),
            confidence,
            slots: serde_json::Map::new(),
        }
    }

    /// Adds a slot.
    #[must_use]
    pub fn with_slot(mut self, name: impl Into<String>, value: serde_json::Value) -> Self {
        self.slots.insert(name.into(), value);
        self
    }
}

/// What the classifier may know about the conversation so far.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionContext {
    /// Opaque user id.
    pub user_id: String,
    /// Session id.
    pub session_id: String,
}

/// Intent classification service.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait IntentClassifier: Send + Sync {
    /// Classifies an utterance.
    async fn classify(&self, text: &str, context: &SessionContext) -> Result<Classification, ServiceError>;
}

/// Response generation service.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ResponseGenerator: Send + Sync {
    /// Generates a reply to `prompt` given prior turns, newest first.
    async fn generate(&self, prompt: &str, history: &[ConversationTurn]) -> Result<String, ServiceError>;
}

/// Speech synthesis service.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    /// Renders text to audio bytes.
    async fn synthesize(&self, text: &str) -> Result<Vec<u8>, ServiceError>;
}

/// Speech recognition service.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Transcriber: Send + Sync {
    /// Transcribes audio bytes to text.
    async fn transcribe(&self, audio: &[u8]) -> Result<String, ServiceError>;
}

/// Blob storage for audio artifacts.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Stores bytes under `key`, replacing any previous value.
    async fn put(&self, key: &str, bytes: Vec<u8>) -> Result<(), ServiceError>;

    /// Loads the bytes stored under `key`.
    async fn get(&self, key: &str) -> Result<Vec<u8>, ServiceError>;
}

/// Operator notification channel.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait NotificationChannel: Send + Sync {
    /// Sends a message to a topic.
    async fn send(&self, topic: &str, message: &str) -> Result<(), ServiceError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::ErrorCategory;

    #[test]
    fn test_service_error_maps_to_step_category() {
        let cases = [
            (ServiceError::unavailable("down"), ErrorCategory::TransientExternal),
            (ServiceError::timeout("slow"), ErrorCategory::StepTimeout),
            (ServiceError::invalid("bad"), ErrorCategory::PermanentValidation),
        ];
        for (err, category) in cases {
            let step: StepError = err.into();
            assert_eq!(step.category, category);
        }
    }

    #[test]
    fn test_classification_serde() {
        let c = Classification::new("music", 0.9).with_slot("track", serde_json::json!("interstellar"));
        let value = serde_json::to_value(&c).unwrap();
        assert_eq!(value["slots"]["track"], serde_json::json!("interstellar"));
        let back: Classification = serde_json::from_value(value).unwrap();
        assert_eq!(back, c);
    }

    #[tokio::test]
    async fn test_mock_classifier() {
        let mut mock = MockIntentClassifier::new();
        mock.expect_classify()
            .withf(|text, _ctx| text.starts_with("weather"))
            .times(1)
            .returning(|_, _| Ok(Classification::new("weather", 0.8)));

        let result = mock.classify("weather today", &SessionContext::default()).await.unwrap();
        assert_eq!(result.intent, "weather");
    }
}
