//! Assertions over workflow executions.

use crate::core::{ExecutionStatus, StepStatus, WorkflowExecution};

/// Asserts that the execution succeeded.
pub fn assert_execution_succeeded(execution: &WorkflowExecution) {
    assert_eq!(
        execution.status(),
        ExecutionStatus::Succeeded,
        "Expected success, got {} with error {:?}",
        execution.status(),
        execution.error()
    );
}

/// Asserts that the execution failed.
pub fn assert_execution_failed(execution: &WorkflowExecution) {
    assert_eq!(
        execution.status(),
        ExecutionStatus::Failed,
        "Expected failure, got {}",
        execution.status()
    );
}

/// Asserts that `step` was attempted exactly `expected` times.
pub fn assert_attempts(execution: &WorkflowExecution, step: &str, expected: usize) {
    let attempts = execution.attempts_of(step);
    assert_eq!(
        attempts.len(),
        expected,
        "Expected {expected} attempts of '{step}', got {}: {:?}",
        attempts.len(),
        attempts.iter().map(|r| r.status).collect::<Vec<_>>()
    );
}

/// Asserts the distinct steps visited, in order, ignoring repeated attempts.
pub fn assert_path(execution: &WorkflowExecution, expected: &[&str]) {
    let mut path: Vec<&str> = Vec::new();
    for result in execution.history().iter().filter(|r| r.branch.is_none()) {
        if path.last() != Some(&result.step_name.as_str()) {
            path.push(&result.step_name);
        }
    }
    assert_eq!(path, expected, "Unexpected step path");
}

/// Asserts the status of the last attempt of `step`.
pub fn assert_last_status(execution: &WorkflowExecution, step: &str, expected: StepStatus) {
    let last = execution.attempts_of(step).last().map(|r| r.status);
    assert_eq!(last, Some(expected), "Unexpected last status for '{step}'");
}
