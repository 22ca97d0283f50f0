//! Step executors for the conversation graph.
//!
//! Payload layout shared by these steps:
//!
//! ```text
//! {
//!   "user_id": "...", "session_id": "...",
//!   "text": "...",                      // utterance, or transcript of audio_ref
//!   "audio_ref": "...",                 // optional blob key of inbound audio
//!   "classification": {intent, confidence, slots},
//!   "response": {"text": "...", "handler": "music"},
//!   "audio": {"key": "audio/<sha256>", "bytes": 1234},
//!   "error": {step, category, message}  // present once a step was caught
//! }
//! ```

use crate::core::StepError;
use crate::services::{
    BlobStore, Classification, IntentClassifier, NotificationChannel, ResponseGenerator, SessionContext,
    SpeechSynthesizer, Transcriber,
};
use crate::steps::{StepContext, StepExecutor};
use crate::store::{ConversationStore, ConversationTurn};
use crate::utils::now_utc;
use async_trait::async_trait;
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Registry names of the conversation executors.
pub mod executor_names {
    /// Speech to text.
    pub const TRANSCRIBE: &str = "transcribe";
    /// Intent classification.
    pub const CLASSIFY_INTENT: &str = "classify_intent";
    /// Music domain handler.
    pub const MUSIC_HANDLER: &str = "music_handler";
    /// Weather domain handler.
    pub const WEATHER_HANDLER: &str = "weather_handler";
    /// Fallback handler with conversation history.
    pub const GENERAL_HANDLER: &str = "general_handler";
    /// Text to speech.
    pub const SYNTHESIZE_SPEECH: &str = "synthesize_speech";
    /// Operator alert.
    pub const NOTIFY_OPERATOR: &str = "notify_operator";
}

fn required_str<'a>(ctx: &'a StepContext, pointer: &str) -> Result<&'a str, StepError> {
    ctx.payload_str(pointer)
        .filter(|s| !s.trim().is_empty())
        .ok_or_else(|| StepError::validation(format!("payload is missing '{pointer}'")))
}

/// Resolves `audio_ref` from the blob store and transcribes it.
pub struct TranscribeStep {
    blobs: Arc<dyn BlobStore>,
    transcriber: Arc<dyn Transcriber>,
}

impl TranscribeStep {
    /// Creates the step.
    #[must_use]
    pub fn new(blobs: Arc<dyn BlobStore>, transcriber: Arc<dyn Transcriber>) -> Self {
        Self { blobs, transcriber }
    }
}

impl fmt::Debug for TranscribeStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TranscribeStep").finish_non_exhaustive()
    }
}

#[async_trait]
impl StepExecutor for TranscribeStep {
    fn name(&self) -> &str {
        executor_names::TRANSCRIBE
    }

    async fn execute(&self, ctx: &StepContext) -> Result<Value, StepError> {
        let audio_ref = required_str(ctx, "/audio_ref")?;
        let audio = self.blobs.get(audio_ref).await?;
        let text = self.transcriber.transcribe(&audio).await?;
        if text.trim().is_empty() {
            return Err(StepError::validation("transcript is empty"));
        }
        debug!(execution_id = %ctx.execution_id(), chars = text.len(), "Audio transcribed");
        Ok(Value::String(text))
    }
}

/// Classifies the utterance at `/text`.
pub struct ClassifyIntentStep {
    classifier: Arc<dyn IntentClassifier>,
}

impl ClassifyIntentStep {
    /// Creates the step.
    #[must_use]
    pub fn new(classifier: Arc<dyn IntentClassifier>) -> Self {
        Self { classifier }
    }
}

impl fmt::Debug for ClassifyIntentStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClassifyIntentStep").finish_non_exhaustive()
    }
}

#[async_trait]
impl StepExecutor for ClassifyIntentStep {
    fn name(&self) -> &str {
        executor_names::CLASSIFY_INTENT
    }

    async fn execute(&self, ctx: &StepContext) -> Result<Value, StepError> {
        let text = required_str(ctx, "/text")?;
        let session = SessionContext {
            user_id: ctx.payload_str("/user_id").unwrap_or_default().to_string(),
            session_id: ctx.payload_str("/session_id").unwrap_or_default().to_string(),
        };
        let classification = self.classifier.classify(text, &session).await?;
        if classification.intent.trim().is_empty() {
            return Err(StepError::validation("classifier returned an empty intent"));
        }
        if !(0.0..=1.0).contains(&classification.confidence) {
            return Err(StepError::validation(format!(
                "confidence {} is outside [0, 1]",
                classification.confidence
            )));
        }
        debug!(
            execution_id = %ctx.execution_id(),
            intent = %classification.intent,
            confidence = classification.confidence,
            "Intent classified"
        );
        serde_json::to_value(&classification).map_err(|e| StepError::internal(e.to_string()))
    }
}

/// Domain handled by a [`ResponseStep`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Domain {
    /// Music requests.
    Music,
    /// Weather requests.
    Weather,
    /// Anything else; uses conversation history.
    General,
}

impl Domain {
    fn label(self) -> &'static str {
        match self {
            Self::Music => "music",
            Self::Weather => "weather",
            Self::General => "general",
        }
    }

    fn executor_name(self) -> &'static str {
        match self {
            Self::Music => executor_names::MUSIC_HANDLER,
            Self::Weather => executor_names::WEATHER_HANDLER,
            Self::General => executor_names::GENERAL_HANDLER,
        }
    }
}

/// Generates the reply for one domain.
pub struct ResponseStep {
    domain: Domain,
    generator: Arc<dyn ResponseGenerator>,
    history: Option<HistorySource>,
}

struct HistorySource {
    store: Arc<dyn ConversationStore>,
    window: Duration,
    max_turns: usize,
}

impl ResponseStep {
    /// Music handler.
    #[must_use]
    pub fn music(generator: Arc<dyn ResponseGenerator>) -> Self {
        Self {
            domain: Domain::Music,
            generator,
            history: None,
        }
    }

    /// Weather handler.
    #[must_use]
    pub fn weather(generator: Arc<dyn ResponseGenerator>) -> Self {
        Self {
            domain: Domain::Weather,
            generator,
            history: None,
        }
    }

    /// General handler that passes up to `max_turns` turns from the last
    /// `window` to the generator.
    #[must_use]
    pub fn general(
        generator: Arc<dyn ResponseGenerator>,
        store: Arc<dyn ConversationStore>,
        window: Duration,
        max_turns: usize,
    ) -> Self {
        Self {
            domain: Domain::General,
            generator,
            history: Some(HistorySource {
                store,
                window,
                max_turns,
            }),
        }
    }

    fn prompt(&self, text: &str, classification: Option<&Classification>) -> String {
        match (self.domain, classification) {
            (Domain::General, _) | (_, None) => text.to_string(),
            (domain, Some(c)) => format!(
                "[{}] {text}\nslots: {}",
                domain.label(),
                Value::Object(c.slots.clone())
            ),
        }
    }

    async fn history(&self, user_id: Option<&str>) -> Vec<ConversationTurn> {
        let (Some(source), Some(user_id)) = (&self.history, user_id) else {
            return Vec::new();
        };
        let since = now_utc() - chrono::Duration::from_std(source.window).unwrap_or(chrono::Duration::zero());
        source
            .store
            .query(user_id, since)
            .await
            .take(source.max_turns)
            .collect()
    }
}

impl fmt::Debug for ResponseStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResponseStep")
            .field("domain", &self.domain)
            .field("with_history", &self.history.is_some())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl StepExecutor for ResponseStep {
    fn name(&self) -> &str {
        self.domain.executor_name()
    }

    async fn execute(&self, ctx: &StepContext) -> Result<Value, StepError> {
        let text = required_str(ctx, "/text")?;
        let classification: Option<Classification> = ctx
            .payload()
            .get("classification")
            .and_then(|c| serde_json::from_value(c.clone()).ok());
        let prompt = self.prompt(text, classification.as_ref());
        let history = self.history(ctx.payload_str("/user_id")).await;

        let reply = self.generator.generate(&prompt, &history).await?;
        if reply.trim().is_empty() {
            return Err(StepError::transient("generator returned an empty reply"));
        }
        Ok(json!({ "text": reply, "handler": self.domain.label() }))
    }
}

/// Renders `/response/text` to audio and stores it under a content-addressed key.
pub struct SynthesizeSpeechStep {
    synthesizer: Arc<dyn SpeechSynthesizer>,
    blobs: Arc<dyn BlobStore>,
}

impl SynthesizeSpeechStep {
    /// Creates the step.
    #[must_use]
    pub fn new(synthesizer: Arc<dyn SpeechSynthesizer>, blobs: Arc<dyn BlobStore>) -> Self {
        Self { synthesizer, blobs }
    }
}

impl fmt::Debug for SynthesizeSpeechStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SynthesizeSpeechStep").finish_non_exhaustive()
    }
}

/// Blob key for an audio artifact.
#[must_use]
pub fn audio_key(audio: &[u8]) -> String {
    format!("audio/{}", hex::encode(Sha256::digest(audio)))
}

#[async_trait]
impl StepExecutor for SynthesizeSpeechStep {
    fn name(&self) -> &str {
        executor_names::SYNTHESIZE_SPEECH
    }

    async fn execute(&self, ctx: &StepContext) -> Result<Value, StepError> {
        let text = required_str(ctx, "/response/text")?;
        let audio = self.synthesizer.synthesize(text).await?;
        let key = audio_key(&audio);
        let bytes = audio.len();
        self.blobs.put(&key, audio).await?;
        Ok(json!({ "key": key, "bytes": bytes }))
    }
}

/// Sends the caught error to the operators' topic.
pub struct NotifyOperatorStep {
    channel: Arc<dyn NotificationChannel>,
    topic: String,
}

impl NotifyOperatorStep {
    /// Creates the step.
    #[must_use]
    pub fn new(channel: Arc<dyn NotificationChannel>, topic: impl Into<String>) -> Self {
        Self {
            channel,
            topic: topic.into(),
        }
    }
}

impl fmt::Debug for NotifyOperatorStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NotifyOperatorStep")
            .field("topic", &self.topic)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl StepExecutor for NotifyOperatorStep {
    fn name(&self) -> &str {
        executor_names::NOTIFY_OPERATOR
    }

    async fn execute(&self, ctx: &StepContext) -> Result<Value, StepError> {
        let payload = ctx.payload();
        let message = json!({
            "execution_id": ctx.execution_id(),
            "user_id": payload.get("user_id"),
            "error": payload.get("error"),
        });
        self.channel.send(&self.topic, &message.to_string()).await?;
        Ok(json!({ "notified": self.topic }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::ErrorCategory;
    use crate::services::{
        InMemoryBlobStore, MockIntentClassifier, MockNotificationChannel, MockResponseGenerator,
        MockSpeechSynthesizer, MockTranscriber, ServiceError,
    };
    use crate::store::InMemoryConversationStore;
    use uuid::Uuid;

    fn ctx(payload: Value) -> StepContext {
        StepContext::new(Uuid::new_v4(), "step", 1, payload.clone(), payload)
    }

    #[tokio::test]
    async fn test_classify_intent() {
        let mut classifier = MockIntentClassifier::new();
        classifier
            .expect_classify()
            .withf(|text, session| text.starts_with("play") && session.user_id == "u1")
            .returning(|_, _| Ok(Classification::new("music", 0.93)));
        let step = ClassifyIntentStep::new(Arc::new(classifier));

        let output = step
            .execute(&ctx(json!({"user_id": "u1", "session_id": "s1", "text": "play interstellar theme"})))
            .await
            .unwrap();
        assert_eq!(output["intent"], json!("music"));
    }

    #[tokio::test]
    async fn test_classify_maps_service_errors() {
        let mut classifier = MockIntentClassifier::new();
        classifier
            .expect_classify()
            .returning(|_, _| Err(ServiceError::timeout("nlu slow")));
        let step = ClassifyIntentStep::new(Arc::new(classifier));

        let err = step.execute(&ctx(json!({"text": "hi"}))).await.unwrap_err();
        assert_eq!(err.category, ErrorCategory::StepTimeout);
    }

    #[tokio::test]
    async fn test_classify_requires_text() {
        let step = ClassifyIntentStep::new(Arc::new(MockIntentClassifier::new()));
        let err = step.execute(&ctx(json!({"text": "  "}))).await.unwrap_err();
        assert_eq!(err.category, ErrorCategory::PermanentValidation);
    }

    #[tokio::test]
    async fn test_classify_rejects_bad_confidence() {
        let mut classifier = MockIntentClassifier::new();
        classifier
            .expect_classify()
            .returning(|_, _| Ok(Classification::new("music", 1.5)));
        let step = ClassifyIntentStep::new(Arc::new(classifier));
        let err = step.execute(&ctx(json!({"text": "x"}))).await.unwrap_err();
        assert_eq!(err.category, ErrorCategory::PermanentValidation);
    }

    #[tokio::test]
    async fn test_music_prompt_includes_slots() {
        let mut generator = MockResponseGenerator::new();
        generator
            .expect_generate()
            .withf(|prompt, history| prompt.starts_with("[music]") && prompt.contains("interstellar") && history.is_empty())
            .returning(|_, _| Ok("Playing the Interstellar theme.".to_string()));
        let step = ResponseStep::music(Arc::new(generator));

        let output = step
            .execute(&ctx(json!({
                "text": "play interstellar theme",
                "classification": {"intent": "music", "confidence": 0.9, "slots": {"track": "interstellar"}}
            })))
            .await
            .unwrap();
        assert_eq!(output, json!({"text": "Playing the Interstellar theme.", "handler": "music"}));
    }

    #[tokio::test]
    async fn test_general_handler_passes_history() {
        let store = Arc::new(InMemoryConversationStore::new());
        store
            .append(ConversationTurn::new("u1", "s1", "t1", "hello", "hi there"))
            .await
            .unwrap();
        store
            .append(ConversationTurn::new("u2", "s9", "t2", "other", "user"))
            .await
            .unwrap();

        let mut generator = MockResponseGenerator::new();
        generator
            .expect_generate()
            .withf(|_, history| history.len() == 1 && history[0].turn_id == "t1")
            .returning(|_, _| Ok("Sure.".to_string()));
        let step = ResponseStep::general(Arc::new(generator), store, Duration::from_secs(3600), 5);

        let output = step
            .execute(&ctx(json!({"user_id": "u1", "text": "what did I say?"})))
            .await
            .unwrap();
        assert_eq!(output["handler"], json!("general"));
    }

    #[tokio::test]
    async fn test_empty_reply_is_transient() {
        let mut generator = MockResponseGenerator::new();
        generator.expect_generate().returning(|_, _| Ok(String::new()));
        let step = ResponseStep::weather(Arc::new(generator));
        let err = step.execute(&ctx(json!({"text": "rain?"}))).await.unwrap_err();
        assert_eq!(err.category, ErrorCategory::TransientExternal);
    }

    #[tokio::test]
    async fn test_synthesize_stores_content_addressed_audio() {
        let mut synthesizer = MockSpeechSynthesizer::new();
        synthesizer.expect_synthesize().returning(|_| Ok(vec![7, 7, 7]));
        let blobs = Arc::new(InMemoryBlobStore::new());
        let step = SynthesizeSpeechStep::new(Arc::new(synthesizer), blobs.clone());

        let output = step
            .execute(&ctx(json!({"response": {"text": "hello", "handler": "general"}})))
            .await
            .unwrap();
        let key = audio_key(&[7, 7, 7]);
        assert_eq!(output, json!({"key": key, "bytes": 3}));
        assert!(blobs.contains(&key));
        assert_eq!(key.len(), "audio/".len() + 64);
    }

    #[tokio::test]
    async fn test_transcribe() {
        let blobs = Arc::new(InMemoryBlobStore::new());
        blobs.put("inbound/1", vec![1, 2]).await.unwrap();
        let mut transcriber = MockTranscriber::new();
        transcriber
            .expect_transcribe()
            .withf(|audio| audio.starts_with(&[1, 2]))
            .returning(|_| Ok("play jazz".to_string()));
        let step = TranscribeStep::new(blobs, Arc::new(transcriber));

        let output = step.execute(&ctx(json!({"audio_ref": "inbound/1"}))).await.unwrap();
        assert_eq!(output, json!("play jazz"));
    }

    #[tokio::test]
    async fn test_notify_operator() {
        let mut channel = MockNotificationChannel::new();
        channel
            .expect_send()
            .withf(|topic, message| topic.starts_with("ops") && message.contains("ClassifyIntent"))
            .times(1)
            .returning(|_, _| Ok(()));
        let step = NotifyOperatorStep::new(Arc::new(channel), "ops");

        step.execute(&ctx(json!({
            "user_id": "u1",
            "error": {"step": "ClassifyIntent", "category": "step_timeout", "message": "slow"}
        })))
        .await
        .unwrap();
    }
}
