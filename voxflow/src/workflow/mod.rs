//! Declarative workflow graphs and the orchestrator that runs them.
//!
//! Graphs are typed tagged unions of steps, validated once at load time:
//! unknown targets, unreachable steps, empty graphs, bad retry policies and
//! (at orchestrator construction) missing executors are all rejected.

mod condition;
mod definition;
mod graph;
mod orchestrator;

pub use condition::Condition;
pub use definition::{
    ChoiceRule, ChoiceStep, ErrorHandlerStep, ParallelStep, StepDefinition, TaskStep, TerminalStep,
};
pub use graph::{GraphBuilder, GraphDocument, WorkflowGraph};
pub use orchestrator::{Advance, CompletionHook, NoOpHook, Orchestrator, DEFAULT_MAX_TRANSITIONS};
