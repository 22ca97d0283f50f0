//! The conversational turn workflow.
//!
//! An utterance (text, or audio resolved through transcription) is classified,
//! routed by intent and confidence to a domain handler, optionally rendered to
//! speech, and recorded as a [`crate::store::ConversationTurn`]. Service steps
//! retry with backoff and are caught by an error handler that alerts operators.

mod graph;
mod hook;
mod runtime;
mod service;
mod steps;

pub use graph::{
    conversation_graph, step_names, ConversationOptions, ConversationServices, ExecutorSettings,
    CONVERSATION_GRAPH,
};
pub use hook::TurnRecorder;
pub use runtime::{ConversationRuntime, WORK_QUEUE};
pub use service::{ConversationService, Reply, TurnInput, TurnOutcome, FALLBACK_REPLY};
pub use steps::{
    audio_key, executor_names, ClassifyIntentStep, Domain, NotifyOperatorStep, ResponseStep,
    SynthesizeSpeechStep, TranscribeStep,
};
