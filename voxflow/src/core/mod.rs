//! Core domain model types for voxflow.
//!
//! This module contains the fundamental types used throughout the crate:
//! - Execution, step status and step kind enums
//! - The step error taxonomy
//! - The workflow execution record and its step history

mod execution;
mod status;
mod step_error;

pub use execution::{StepResult, WorkflowExecution};
pub use status::{ExecutionStatus, StepKind, StepStatus};
pub use step_error::{ErrorCategory, StepError};
