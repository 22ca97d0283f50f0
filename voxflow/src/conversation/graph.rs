//! The conversation-turn graph and the registry that backs it.

use super::steps::{
    executor_names, ClassifyIntentStep, NotifyOperatorStep, ResponseStep, SynthesizeSpeechStep, TranscribeStep,
};
use crate::errors::GraphValidationError;
use crate::retry::RetryPolicy;
use crate::services::{
    BlobStore, IntentClassifier, NotificationChannel, ResponseGenerator, SpeechSynthesizer, Transcriber,
};
use crate::steps::ExecutorRegistry;
use crate::store::ConversationStore;
use crate::workflow::{ChoiceStep, Condition, GraphBuilder, StepDefinition, TaskStep, WorkflowGraph};
use std::sync::Arc;
use std::time::Duration;

/// Name of the conversation graph.
pub const CONVERSATION_GRAPH: &str = "conversation_turn";

/// Step names in the conversation graph.
pub mod step_names {
    /// Routes audio input through transcription.
    pub const DETECT_INPUT: &str = "DetectInput";
    /// Speech to text.
    pub const TRANSCRIBE: &str = "Transcribe";
    /// Intent classification.
    pub const CLASSIFY_INTENT: &str = "ClassifyIntent";
    /// Intent routing.
    pub const ROUTE_INTENT: &str = "RouteIntent";
    /// Music handler.
    pub const MUSIC_HANDLER: &str = "MusicHandler";
    /// Weather handler.
    pub const WEATHER_HANDLER: &str = "WeatherHandler";
    /// General handler.
    pub const GENERAL_HANDLER: &str = "GeneralHandler";
    /// Text to speech.
    pub const SYNTHESIZE: &str = "Synthesize";
    /// Success terminal.
    pub const RESPOND: &str = "Respond";
    /// Catch target for every service step.
    pub const HANDLE_FAILURE: &str = "HandleFailure";
}

/// Shape of the conversation graph.
#[derive(Debug, Clone, PartialEq)]
pub struct ConversationOptions {
    /// Minimum classifier confidence for a domain handler.
    pub min_confidence: f64,
    /// Retry policy for service-backed steps.
    pub retry: RetryPolicy,
    /// Per-attempt timeout for service-backed steps.
    pub step_timeout_seconds: Option<f64>,
    /// Accept `audio_ref` input.
    pub transcription: bool,
    /// Render replies to audio.
    pub synthesis: bool,
}

impl Default for ConversationOptions {
    fn default() -> Self {
        Self {
            min_confidence: 0.4,
            retry: RetryPolicy::new()
                .with_max_attempts(3)
                .with_base_interval_seconds(2.0)
                .with_backoff_rate(2.0),
            step_timeout_seconds: None,
            transcription: true,
            synthesis: true,
        }
    }
}

fn service_task(name: &str, executor: &str, next: &str, result_key: &str, options: &ConversationOptions) -> TaskStep {
    let task = TaskStep::new(name, executor, next)
        .with_result_key(result_key)
        .with_retry(options.retry.clone())
        .with_catch(step_names::HANDLE_FAILURE);
    match options.step_timeout_seconds {
        Some(seconds) => task.with_timeout_seconds(seconds),
        None => task,
    }
}

/// Builds the conversation graph.
///
/// ```text
/// DetectInput ─audio─▶ Transcribe ─▶ ClassifyIntent ─▶ RouteIntent ─▶ {Music,Weather,General}Handler
///             └──────text─────────────────▲                                      │
///                                                      Respond ◀── Synthesize ◀──┘
/// ```
///
/// # Errors
///
/// Returns a [`GraphValidationError`] if the options produce an invalid graph,
/// e.g. a retry policy with zero attempts.
pub fn conversation_graph(options: &ConversationOptions) -> Result<WorkflowGraph, GraphValidationError> {
    use step_names::{
        CLASSIFY_INTENT, DETECT_INPUT, GENERAL_HANDLER, HANDLE_FAILURE, MUSIC_HANDLER, RESPOND, ROUTE_INTENT,
        SYNTHESIZE, TRANSCRIBE, WEATHER_HANDLER,
    };

    let after_handler = if options.synthesis { SYNTHESIZE } else { RESPOND };
    let confident = |intent: &str| {
        Condition::and(vec![
            Condition::string_equals("/classification/intent", intent),
            Condition::numeric_at_least("/classification/confidence", options.min_confidence),
        ])
    };

    let mut builder = GraphBuilder::new(CONVERSATION_GRAPH);
    if options.transcription {
        builder = builder
            .step(
                ChoiceStep::new(DETECT_INPUT)
                    .when(Condition::is_present("/audio_ref"), TRANSCRIBE)
                    .otherwise(CLASSIFY_INTENT),
            )
            .step(service_task(
                TRANSCRIBE,
                executor_names::TRANSCRIBE,
                CLASSIFY_INTENT,
                "text",
                options,
            ));
    }

    builder = builder
        .step(service_task(
            CLASSIFY_INTENT,
            executor_names::CLASSIFY_INTENT,
            ROUTE_INTENT,
            "classification",
            options,
        ))
        .step(
            ChoiceStep::new(ROUTE_INTENT)
                .when(confident("music"), MUSIC_HANDLER)
                .when(confident("weather"), WEATHER_HANDLER)
                .otherwise(GENERAL_HANDLER),
        )
        .step(service_task(
            MUSIC_HANDLER,
            executor_names::MUSIC_HANDLER,
            after_handler,
            "response",
            options,
        ))
        .step(service_task(
            WEATHER_HANDLER,
            executor_names::WEATHER_HANDLER,
            after_handler,
            "response",
            options,
        ))
        .step(service_task(
            GENERAL_HANDLER,
            executor_names::GENERAL_HANDLER,
            after_handler,
            "response",
            options,
        ));

    if options.synthesis {
        builder = builder.step(service_task(
            SYNTHESIZE,
            executor_names::SYNTHESIZE_SPEECH,
            RESPOND,
            "audio",
            options,
        ));
    }

    builder
        .step(StepDefinition::terminal(RESPOND))
        .step(StepDefinition::error_handler(
            HANDLE_FAILURE,
            Some(executor_names::NOTIFY_OPERATOR),
        ))
        .build()
}

/// External services and stores injected into the conversation executors.
#[derive(Clone)]
pub struct ConversationServices {
    /// Intent classifier.
    pub classifier: Arc<dyn IntentClassifier>,
    /// Response generator.
    pub generator: Arc<dyn ResponseGenerator>,
    /// Speech synthesizer.
    pub synthesizer: Arc<dyn SpeechSynthesizer>,
    /// Speech recognizer.
    pub transcriber: Arc<dyn Transcriber>,
    /// Audio blob storage.
    pub blobs: Arc<dyn BlobStore>,
    /// Operator notifications.
    pub notifier: Arc<dyn NotificationChannel>,
    /// Conversation history.
    pub store: Arc<dyn ConversationStore>,
}

impl std::fmt::Debug for ConversationServices {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConversationServices")
            .field("store", &self.store)
            .finish_non_exhaustive()
    }
}

/// Settings for the executors themselves.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutorSettings {
    /// How far back the general handler looks.
    pub history_window: Duration,
    /// Most turns handed to the generator.
    pub history_turns: usize,
    /// Topic for ErrorHandler alerts.
    pub operator_topic: String,
}

impl Default for ExecutorSettings {
    fn default() -> Self {
        Self {
            history_window: Duration::from_secs(24 * 3600),
            history_turns: 10,
            operator_topic: "voxflow.operators".to_string(),
        }
    }
}

impl ConversationServices {
    /// Registers one executor per conversation step.
    #[must_use]
    pub fn registry(&self, settings: &ExecutorSettings) -> ExecutorRegistry {
        ExecutorRegistry::new()
            .with(Arc::new(TranscribeStep::new(
                self.blobs.clone(),
                self.transcriber.clone(),
            )))
            .with(Arc::new(ClassifyIntentStep::new(self.classifier.clone())))
            .with(Arc::new(ResponseStep::music(self.generator.clone())))
            .with(Arc::new(ResponseStep::weather(self.generator.clone())))
            .with(Arc::new(ResponseStep::general(
                self.generator.clone(),
                self.store.clone(),
                settings.history_window,
                settings.history_turns,
            )))
            .with(Arc::new(SynthesizeSpeechStep::new(
                self.synthesizer.clone(),
                self.blobs.clone(),
            )))
            .with(Arc::new(NotifyOperatorStep::new(
                self.notifier.clone(),
                settings.operator_topic.clone(),
            )))
    }
}
