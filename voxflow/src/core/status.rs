//! Execution status, step status and step kind enums.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The kind of a step in a workflow graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepKind {
    /// Invokes a registered executor.
    Task,
    /// Picks the next step by evaluating ordered predicates.
    Choice,
    /// Runs independent branches that must all succeed.
    Parallel,
    /// Ends the execution successfully.
    Terminal,
    /// Runs failure logic, then ends the execution as failed.
    ErrorHandler,
}

impl fmt::Display for StepKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Task => write!(f, "task"),
            Self::Choice => write!(f, "choice"),
            Self::Parallel => write!(f, "parallel"),
            Self::Terminal => write!(f, "terminal"),
            Self::ErrorHandler => write!(f, "error_handler"),
        }
    }
}

/// The status of a workflow execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    /// The execution is still walking the graph (or waiting on a retry).
    #[default]
    Running,
    /// The execution reached a terminal step.
    Succeeded,
    /// The execution failed or was routed through an error handler.
    Failed,
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Running => write!(f, "running"),
            Self::Succeeded => write!(f, "succeeded"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

impl ExecutionStatus {
    /// Returns true once the execution can no longer change.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Running)
    }
}

/// The outcome recorded for a single step attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    /// The attempt succeeded.
    Success,
    /// The attempt failed and another attempt was scheduled.
    RetryScheduled,
    /// The attempt failed and no retry will follow.
    Failed,
}

impl fmt::Display for StepStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Success => write!(f, "success"),
            Self::RetryScheduled => write!(f, "retry_scheduled"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_step_kind_display() {
        assert_eq!(StepKind::Task.to_string(), "task");
        assert_eq!(StepKind::ErrorHandler.to_string(), "error_handler");
    }

    #[test]
    fn test_execution_status_is_terminal() {
        assert!(!ExecutionStatus::Running.is_terminal());
        assert!(ExecutionStatus::Succeeded.is_terminal());
        assert!(ExecutionStatus::Failed.is_terminal());
    }

    #[test]
    fn test_step_status_serialize() {
        let json = serde_json::to_string(&StepStatus::RetryScheduled).unwrap();
        assert_eq!(json, r#""retry_scheduled""#);

        let parsed: StepStatus = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, StepStatus::RetryScheduled);
    }
}
