//! Workflow execution record and its append-only step history.

use super::{ExecutionStatus, StepError, StepStatus};
use crate::utils::Timestamp;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

/// One attempt of one step, as recorded in an execution's history.
///
/// Entries are created through the factory methods and never mutated once
/// appended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepResult {
    /// The step that ran.
    pub step_name: String,
    /// 1-based attempt number.
    pub attempt: u32,
    /// Outcome of the attempt.
    pub status: StepStatus,
    /// Output on success.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<serde_json::Value>,
    /// Error on failure or scheduled retry.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<StepError>,
    /// Wall time spent in the attempt.
    pub duration_ms: u64,
    /// Delay before the next attempt, for scheduled retries.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_delay_ms: Option<u64>,
    /// Index of the parallel branch that produced this entry.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch: Option<usize>,
    /// When the entry was recorded.
    pub recorded_at: Timestamp,
}

impl StepResult {
    fn base(step_name: impl Into<String>, attempt: u32, status: StepStatus, duration_ms: u64) -> Self {
        Self {
            step_name: step_name.into(),
            attempt,
            status,
            output: None,
            error: None,
            duration_ms,
            retry_delay_ms: None,
            branch: None,
            recorded_at: Utc::now(),
        }
    }

    /// A successful attempt.
    #[must_use]
    pub fn success(
        step_name: impl Into<String>,
        attempt: u32,
        output: serde_json::Value,
        duration_ms: u64,
    ) -> Self {
        Self {
            output: Some(output),
            ..Self::base(step_name, attempt, StepStatus::Success, duration_ms)
        }
    }

    /// A failed attempt followed by a scheduled retry.
    #[must_use]
    pub fn retry_scheduled(
        step_name: impl Into<String>,
        attempt: u32,
        error: StepError,
        duration_ms: u64,
        delay: Duration,
    ) -> Self {
        Self {
            error: Some(error),
            retry_delay_ms: Some(u64::try_from(delay.as_millis()).unwrap_or(u64::MAX)),
            ..Self::base(step_name, attempt, StepStatus::RetryScheduled, duration_ms)
        }
    }

    /// A failed attempt with no retry.
    #[must_use]
    pub fn failed(
        step_name: impl Into<String>,
        attempt: u32,
        error: StepError,
        duration_ms: u64,
    ) -> Self {
        Self {
            error: Some(error),
            ..Self::base(step_name, attempt, StepStatus::Failed, duration_ms)
        }
    }

    /// Tags the entry with the parallel branch it came from.
    ///
    /// Nested branches keep the innermost index.
    #[must_use]
    pub fn in_branch(mut self, branch: usize) -> Self {
        self.branch.get_or_insert(branch);
        self
    }
}

/// A single run of a workflow graph.
///
/// Owned by the orchestrator while `Running`; every mutator is crate-private
/// and is a no-op once the status is terminal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowExecution {
    id: Uuid,
    graph_name: String,
    status: ExecutionStatus,
    current_step: Option<String>,
    history: Vec<StepResult>,
    input: serde_json::Value,
    #[serde(default)]
    payload: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    output: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    error: Option<StepError>,
    #[serde(default)]
    transitions: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pending_attempt: Option<u32>,
    started_at: Timestamp,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    ended_at: Option<Timestamp>,
}

impl WorkflowExecution {
    pub(crate) fn new(
        id: Uuid,
        graph_name: impl Into<String>,
        start_at: impl Into<String>,
        input: serde_json::Value,
    ) -> Self {
        Self {
            id,
            graph_name: graph_name.into(),
            status: ExecutionStatus::Running,
            current_step: Some(start_at.into()),
            history: Vec::new(),
            payload: input.clone(),
            input,
            output: None,
            error: None,
            transitions: 0,
            pending_attempt: None,
            started_at: Utc::now(),
            ended_at: None,
        }
    }

    /// Execution ID.
    #[must_use]
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Name of the graph this execution walks.
    #[must_use]
    pub fn graph_name(&self) -> &str {
        &self.graph_name
    }

    /// Current status.
    #[must_use]
    pub fn status(&self) -> ExecutionStatus {
        self.status
    }

    /// The step being run, or the last step run once finished.
    #[must_use]
    pub fn current_step(&self) -> Option<&str> {
        self.current_step.as_deref()
    }

    /// Step attempts in the order they ran.
    #[must_use]
    pub fn history(&self) -> &[StepResult] {
        &self.history
    }

    /// The input the execution started with.
    #[must_use]
    pub fn input(&self) -> &serde_json::Value {
        &self.input
    }

    /// The working payload passed between steps.
    #[must_use]
    pub fn payload(&self) -> &serde_json::Value {
        &self.payload
    }

    /// Final output on success.
    #[must_use]
    pub fn output(&self) -> Option<&serde_json::Value> {
        self.output.as_ref()
    }

    /// The unrecoverable error that ended (or was caught during) the execution.
    #[must_use]
    pub fn error(&self) -> Option<&StepError> {
        self.error.as_ref()
    }

    /// Number of step entries so far (retries of the same step excluded).
    #[must_use]
    pub fn transitions(&self) -> u32 {
        self.transitions
    }

    /// Start time.
    #[must_use]
    pub fn started_at(&self) -> Timestamp {
        self.started_at
    }

    /// End time, once finished.
    #[must_use]
    pub fn ended_at(&self) -> Option<Timestamp> {
        self.ended_at
    }

    /// Returns true once the status is no longer `Running`.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.status.is_terminal()
    }

    /// Duration from start to end, if finished.
    #[must_use]
    pub fn duration_ms(&self) -> Option<i64> {
        self.ended_at
            .map(|end| (end - self.started_at).num_milliseconds())
    }

    /// Attempts recorded for a step.
    #[must_use]
    pub fn attempts_of(&self, step_name: &str) -> Vec<&StepResult> {
        self.history
            .iter()
            .filter(|r| r.step_name == step_name)
            .collect()
    }

    pub(crate) fn record(&mut self, result: StepResult) {
        if self.is_finished() {
            tracing::warn!(
                execution_id = %self.id,
                step = %result.step_name,
                "Ignoring step result for finished execution"
            );
            return;
        }
        self.history.push(result);
    }

    /// Counts a fresh entry into the current step. Returns the new total.
    pub(crate) fn enter_step(&mut self) -> u32 {
        self.transitions = self.transitions.saturating_add(1);
        self.transitions
    }

    pub(crate) fn move_to(&mut self, step: impl Into<String>) {
        if !self.is_finished() {
            self.current_step = Some(step.into());
            self.pending_attempt = None;
        }
    }

    pub(crate) fn set_payload(&mut self, payload: serde_json::Value) {
        if !self.is_finished() {
            self.payload = payload;
        }
    }

    pub(crate) fn schedule_attempt(&mut self, attempt: u32) {
        if !self.is_finished() {
            self.pending_attempt = Some(attempt);
        }
    }

    pub(crate) fn take_pending_attempt(&mut self) -> Option<u32> {
        self.pending_attempt.take()
    }

    pub(crate) fn has_pending_attempt(&self) -> bool {
        self.pending_attempt.is_some()
    }

    pub(crate) fn note_error(&mut self, error: StepError) {
        if !self.is_finished() {
            self.error = Some(error);
        }
    }

    pub(crate) fn succeed(&mut self, output: serde_json::Value) {
        if self.is_finished() {
            return;
        }
        self.status = ExecutionStatus::Succeeded;
        self.output = Some(output);
        self.pending_attempt = None;
        self.ended_at = Some(Utc::now());
    }

    pub(crate) fn fail(&mut self, error: Option<StepError>) {
        if self.is_finished() {
            return;
        }
        if let Some(error) = error {
            self.error = Some(error);
        }
        self.status = ExecutionStatus::Failed;
        self.pending_attempt = None;
        self.ended_at = Some(Utc::now());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn execution() -> WorkflowExecution {
        WorkflowExecution::new(Uuid::new_v4(), "test", "First", json!({"text": "hi"}))
    }

    #[test]
    fn test_new_execution_is_running_at_start() {
        let exec = execution();
        assert_eq!(exec.status(), ExecutionStatus::Running);
        assert_eq!(exec.current_step(), Some("First"));
        assert_eq!(exec.payload(), exec.input());
        assert!(exec.history().is_empty());
    }

    #[test]
    fn test_finished_execution_is_immutable() {
        let mut exec = execution();
        exec.record(StepResult::success("First", 1, json!(1), 3));
        exec.succeed(json!({"done": true}));

        exec.record(StepResult::success("Second", 1, json!(2), 1));
        exec.move_to("Second");
        exec.fail(Some(StepError::internal("late")));

        assert_eq!(exec.status(), ExecutionStatus::Succeeded);
        assert_eq!(exec.history().len(), 1);
        assert_eq!(exec.current_step(), Some("First"));
        assert!(exec.error().is_none());
        assert!(exec.ended_at().is_some());
    }

    #[test]
    fn test_retry_scheduled_records_delay() {
        let result = StepResult::retry_scheduled(
            "Classify",
            1,
            StepError::transient("down"),
            12,
            Duration::from_secs(2),
        );
        assert_eq!(result.status, StepStatus::RetryScheduled);
        assert_eq!(result.retry_delay_ms, Some(2000));
    }

    #[test]
    fn test_in_branch_keeps_innermost_index() {
        let result = StepResult::success("Leaf", 1, json!(null), 0).in_branch(2).in_branch(0);
        assert_eq!(result.branch, Some(2));
    }

    #[test]
    fn test_checkpoint_roundtrip_preserves_pending_attempt() {
        let mut exec = execution();
        exec.schedule_attempt(2);
        let restored: WorkflowExecution =
            serde_json::from_value(serde_json::to_value(&exec).unwrap()).unwrap();
        assert!(restored.has_pending_attempt());
        assert_eq!(restored, exec);
    }
}
