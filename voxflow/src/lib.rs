//! # Voxflow
//!
//! Request orchestration and durable delivery for a conversational front-end.
//!
//! Voxflow turns each inbound utterance into an execution of a declarative
//! workflow graph, with support for:
//!
//! - **Workflow graphs**: Task, Choice, Parallel, Terminal and ErrorHandler steps validated at load time
//! - **Retry policies**: Per-step exponential backoff keyed on error category
//! - **Durable delivery**: At-least-once queue with visibility timeouts and a dead-letter queue
//! - **Domain events**: Pattern-matched fan-out of `interaction.completed` and `system.error`
//! - **Conversation history**: Time-boxed, per-user turn log
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use voxflow::prelude::*;
//!
//! let runtime = ConversationRuntime::build(&VoxflowConfig::default(), &services)?;
//! let outcome = runtime
//!     .service()
//!     .submit_inline("user-1", "session-1", TurnInput::text("play some jazz"))
//!     .await?;
//! println!("{}", outcome.reply.text);
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod config;
pub mod conversation;
pub mod core;
pub mod errors;
pub mod events;
pub mod observability;
pub mod queue;
pub mod retry;
pub mod services;
pub mod steps;
pub mod store;
pub mod testing;
pub mod utils;
pub mod worker;
pub mod workflow;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::config::{ConfigError, VoxflowConfig};
    pub use crate::conversation::{
        conversation_graph, ConversationOptions, ConversationRuntime, ConversationService,
        ConversationServices, Reply, TurnInput, TurnOutcome,
    };
    pub use crate::core::{
        ErrorCategory, ExecutionStatus, StepError, StepKind, StepResult, StepStatus,
        WorkflowExecution,
    };
    pub use crate::errors::{GraphValidationError, VoxflowError};
    pub use crate::events::{EventBus, EventEnvelope, EventHandler, EventPattern};
    pub use crate::queue::{DurableQueue, InMemoryQueue, QueueMessage, QueuePolicy};
    pub use crate::retry::{JitterStrategy, RetryPolicy};
    pub use crate::services::{
        BlobStore, IntentClassifier, NotificationChannel, ResponseGenerator, ServiceError,
        SpeechSynthesizer, Transcriber,
    };
    pub use crate::steps::{ExecutorRegistry, StepContext, StepExecutor};
    pub use crate::store::{ConversationStore, ConversationTurn, InMemoryConversationStore};
    pub use crate::worker::{Worker, WorkerPool};
    pub use crate::workflow::{
        ChoiceStep, Condition, GraphBuilder, Orchestrator, ParallelStep, StepDefinition, TaskStep,
        WorkflowGraph,
    };
}

#[cfg(test)]
mod tests {
    use super::prelude::*;

    #[test]
    fn library_compiles() {
        let config = VoxflowConfig::default();
        assert!(config.validate().is_ok());
    }
}
