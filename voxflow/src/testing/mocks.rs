//! Deterministic service doubles for the conversation contracts.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::services::{
    Classification, IntentClassifier, NotificationChannel, ResponseGenerator, ServiceError, SessionContext,
    SpeechSynthesizer, Transcriber,
};
use crate::store::ConversationTurn;

/// Classifies by the first keyword found in the utterance.
#[derive(Debug, Clone)]
pub struct KeywordClassifier {
    rules: Vec<(String, String, f64)>,
    fallback: (String, f64),
}

impl Default for KeywordClassifier {
    fn default() -> Self {
        Self::new("general", 0.3)
            .with_rule("play", "music", 0.92)
            .with_rule("song", "music", 0.85)
            .with_rule("weather", "weather", 0.9)
            .with_rule("rain", "weather", 0.75)
    }
}

impl KeywordClassifier {
    /// Creates a classifier with only a fallback.
    #[must_use]
    pub fn new(fallback_intent: impl Into<String>, fallback_confidence: f64) -> Self {
        Self {
            rules: Vec::new(),
            fallback: (fallback_intent.into(), fallback_confidence),
        }
    }

    /// Adds a keyword rule.
    #[must_use]
    pub fn with_rule(mut self, keyword: impl Into<String>, intent: impl Into<String>, confidence: f64) -> Self {
        self.rules.push((keyword.into(), intent.into(), confidence));
        self
    }

    fn lookup(&self, text: &str) -> Classification {
        let lower = text.to_lowercase();
        self.rules
            .iter()
            .find(|(keyword, _, _)| lower.contains(keyword.as_str()))
            .map_or_else(
                || Classification::new(self.fallback.0.clone(), self.fallback.1),
                |(keyword, intent, confidence)| {
                    Classification::new(intent.clone(), *confidence).with_slot("keyword", keyword.clone().into())
                },
            )
    }
}

#[async_trait]
impl IntentClassifier for KeywordClassifier {
    async fn classify(&self, text: &str, _context: &SessionContext) -> Result<Classification, ServiceError> {
        Ok(self.lookup(text))
    }
}

/// Fails a fixed number of calls before delegating.
#[derive(Debug)]
pub struct FlakyClassifier<C> {
    inner: C,
    failures: usize,
    error: ServiceError,
    calls: AtomicUsize,
}

impl<C> FlakyClassifier<C> {
    /// Fails the first `failures` calls with `error`.
    pub fn new(inner: C, failures: usize, error: ServiceError) -> Self {
        Self {
            inner,
            failures,
            error,
            calls: AtomicUsize::new(0),
        }
    }

    /// Never succeeds.
    pub fn always(inner: C, error: ServiceError) -> Self {
        Self::new(inner, usize::MAX, error)
    }

    /// Number of calls so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl<C: IntentClassifier> IntentClassifier for FlakyClassifier<C> {
    async fn classify(&self, text: &str, context: &SessionContext) -> Result<Classification, ServiceError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call < self.failures {
            return Err(self.error.clone());
        }
        self.inner.classify(text, context).await
    }
}

/// Echoes the prompt and remembers how much history it was given.
#[derive(Debug, Default)]
pub struct TemplateGenerator {
    history_sizes: Mutex<Vec<usize>>,
}

impl TemplateGenerator {
    /// Creates a generator.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// History length seen by each call.
    #[must_use]
    pub fn history_sizes(&self) -> Vec<usize> {
        self.history_sizes.lock().clone()
    }
}

#[async_trait]
impl ResponseGenerator for TemplateGenerator {
    async fn generate(&self, prompt: &str, history: &[ConversationTurn]) -> Result<String, ServiceError> {
        self.history_sizes.lock().push(history.len());
        let first_line = prompt.lines().next().unwrap_or_default();
        Ok(format!("Okay: {first_line}"))
    }
}

/// Returns the UTF-8 bytes of the text as "audio".
#[derive(Debug, Clone, Copy, Default)]
pub struct StaticSynthesizer;

#[async_trait]
impl SpeechSynthesizer for StaticSynthesizer {
    async fn synthesize(&self, text: &str) -> Result<Vec<u8>, ServiceError> {
        Ok(text.as_bytes().to_vec())
    }
}

/// Decodes audio bytes as UTF-8 text.
#[derive(Debug, Clone, Copy, Default)]
pub struct StaticTranscriber;

#[async_trait]
impl Transcriber for StaticTranscriber {
    async fn transcribe(&self, audio: &[u8]) -> Result<String, ServiceError> {
        String::from_utf8(audio.to_vec()).map_err(|e| ServiceError::invalid(e.to_string()))
    }
}

/// Records every notification.
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<(String, String)>>,
    fail: Mutex<bool>,
}

impl RecordingNotifier {
    /// Creates a notifier.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Makes subsequent sends fail as unavailable.
    pub fn set_failing(&self, fail: bool) {
        *self.fail.lock() = fail;
    }

    /// All `(topic, message)` pairs sent.
    #[must_use]
    pub fn sent(&self) -> Vec<(String, String)> {
        self.sent.lock().clone()
    }

    /// Messages sent to one topic.
    #[must_use]
    pub fn sent_to(&self, topic: &str) -> Vec<String> {
        self.sent
            .lock()
            .iter()
            .filter(|(t, _)| t == topic)
            .map(|(_, m)| m.clone())
            .collect()
    }
}

#[async_trait]
impl NotificationChannel for RecordingNotifier {
    async fn send(&self, topic: &str, message: &str) -> Result<(), ServiceError> {
        if *self.fail.lock() {
            return Err(ServiceError::unavailable("notification channel down"));
        }
        self.sent.lock().push((topic.to_string(), message.to_string()));
        Ok(())
    }
}
