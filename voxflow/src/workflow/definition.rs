//! Step definitions: a tagged union of the five step kinds.

use super::{Condition, WorkflowGraph};
use crate::core::StepKind;
use crate::retry::RetryPolicy;
use serde::{Deserialize, Serialize};

/// One node of a workflow graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StepDefinition {
    /// Invokes a registered executor.
    Task(TaskStep),
    /// Picks the next step from ordered rules.
    Choice(ChoiceStep),
    /// Runs nested branch graphs concurrently.
    Parallel(ParallelStep),
    /// Ends the execution successfully.
    Terminal(TerminalStep),
    /// Runs failure logic and ends the execution as failed.
    ErrorHandler(ErrorHandlerStep),
}

/// Invokes the executor registered under `executor`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskStep {
    /// Step name, unique within its graph.
    pub name: String,
    /// Registry key of the executor.
    pub executor: String,
    /// Step to run after success.
    pub next: String,
    /// When set, the executor output is stored under this key of the payload
    /// instead of replacing the payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result_key: Option<String>,
    /// Retry policy for failed attempts.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry: Option<RetryPolicy>,
    /// Step to jump to on unrecoverable failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub catch: Option<String>,
    /// Per-attempt timeout.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_seconds: Option<f64>,
}

impl TaskStep {
    /// Creates a task step.
    #[must_use]
    pub fn new(name: impl Into<String>, executor: impl Into<String>, next: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            executor: executor.into(),
            next: next.into(),
            result_key: None,
            retry: None,
            catch: None,
            timeout_seconds: None,
        }
    }

    /// Stores the output under `key`.
    #[must_use]
    pub fn with_result_key(mut self, key: impl Into<String>) -> Self {
        self.result_key = Some(key.into());
        self
    }

    /// Sets the retry policy.
    #[must_use]
    pub fn with_retry(mut self, policy: RetryPolicy) -> Self {
        self.retry = Some(policy);
        self
    }

    /// Sets the catch target.
    #[must_use]
    pub fn with_catch(mut self, target: impl Into<String>) -> Self {
        self.catch = Some(target.into());
        self
    }

    /// Sets the per-attempt timeout.
    #[must_use]
    pub fn with_timeout_seconds(mut self, seconds: f64) -> Self {
        self.timeout_seconds = Some(seconds);
        self
    }
}

/// A rule of a Choice step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChoiceRule {
    /// Predicate over the payload.
    pub condition: Condition,
    /// Step taken when the predicate matches.
    pub next: String,
}

/// First matching rule wins; `default` is taken when none match.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChoiceStep {
    /// Step name.
    pub name: String,
    /// Rules in evaluation order.
    #[serde(default)]
    pub rules: Vec<ChoiceRule>,
    /// Fallback step.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<String>,
}

impl ChoiceStep {
    /// Creates a choice step with no rules.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            rules: Vec::new(),
            default: None,
        }
    }

    /// Appends a rule.
    #[must_use]
    pub fn when(mut self, condition: Condition, next: impl Into<String>) -> Self {
        self.rules.push(ChoiceRule {
            condition,
            next: next.into(),
        });
        self
    }

    /// Sets the default target.
    #[must_use]
    pub fn otherwise(mut self, next: impl Into<String>) -> Self {
        self.default = Some(next.into());
        self
    }

    /// Index and target of the first matching rule, or the default (`None` index).
    #[must_use]
    pub fn select(&self, payload: &serde_json::Value) -> Option<(Option<usize>, &str)> {
        self.rules
            .iter()
            .enumerate()
            .find(|(_, rule)| rule.condition.evaluate(payload))
            .map(|(i, rule)| (Some(i), rule.next.as_str()))
            .or_else(|| self.default.as_deref().map(|d| (None, d)))
    }
}

/// Runs every branch against the same payload; all must succeed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParallelStep {
    /// Step name.
    pub name: String,
    /// Independent sub-graphs.
    pub branches: Vec<WorkflowGraph>,
    /// Step to run after all branches succeed.
    pub next: String,
    /// When set, the array of branch outputs is stored under this key.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result_key: Option<String>,
    /// Retry policy applied to the step as a whole.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry: Option<RetryPolicy>,
    /// Step to jump to when a branch fails.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub catch: Option<String>,
}

impl ParallelStep {
    /// Creates a parallel step.
    #[must_use]
    pub fn new(name: impl Into<String>, branches: Vec<WorkflowGraph>, next: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            branches,
            next: next.into(),
            result_key: None,
            retry: None,
            catch: None,
        }
    }

    /// Stores branch outputs under `key`.
    #[must_use]
    pub fn with_result_key(mut self, key: impl Into<String>) -> Self {
        self.result_key = Some(key.into());
        self
    }

    /// Sets the catch target.
    #[must_use]
    pub fn with_catch(mut self, target: impl Into<String>) -> Self {
        self.catch = Some(target.into());
        self
    }

    /// Sets the retry policy.
    #[must_use]
    pub fn with_retry(mut self, policy: RetryPolicy) -> Self {
        self.retry = Some(policy);
        self
    }
}

/// Ends the execution with `Succeeded`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TerminalStep {
    /// Step name.
    pub name: String,
}

/// Reached through a catch target; always ends with `Failed`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorHandlerStep {
    /// Step name.
    pub name: String,
    /// Executor run before failing (e.g. operator notification).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub executor: Option<String>,
}

impl StepDefinition {
    /// Terminal shorthand.
    #[must_use]
    pub fn terminal(name: impl Into<String>) -> Self {
        Self::Terminal(TerminalStep { name: name.into() })
    }

    /// ErrorHandler shorthand.
    #[must_use]
    pub fn error_handler(name: impl Into<String>, executor: Option<&str>) -> Self {
        Self::ErrorHandler(ErrorHandlerStep {
            name: name.into(),
            executor: executor.map(str::to_string),
        })
    }

    /// The step name.
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::Task(s) => &s.name,
            Self::Choice(s) => &s.name,
            Self::Parallel(s) => &s.name,
            Self::Terminal(s) => &s.name,
            Self::ErrorHandler(s) => &s.name,
        }
    }

    /// The step kind.
    #[must_use]
    pub fn kind(&self) -> StepKind {
        match self {
            Self::Task(_) => StepKind::Task,
            Self::Choice(_) => StepKind::Choice,
            Self::Parallel(_) => StepKind::Parallel,
            Self::Terminal(_) => StepKind::Terminal,
            Self::ErrorHandler(_) => StepKind::ErrorHandler,
        }
    }

    /// Step taken after success, for kinds that have one.
    #[must_use]
    pub fn next_on_success(&self) -> Option<&str> {
        match self {
            Self::Task(s) => Some(&s.next),
            Self::Parallel(s) => Some(&s.next),
            _ => None,
        }
    }

    /// Step taken on unrecoverable failure.
    #[must_use]
    pub fn catch_target(&self) -> Option<&str> {
        match self {
            Self::Task(s) => s.catch.as_deref(),
            Self::Parallel(s) => s.catch.as_deref(),
            _ => None,
        }
    }

    /// Retry policy, for kinds that have one.
    #[must_use]
    pub fn retry_policy(&self) -> Option<&RetryPolicy> {
        match self {
            Self::Task(s) => s.retry.as_ref(),
            Self::Parallel(s) => s.retry.as_ref(),
            _ => None,
        }
    }

    /// Every step this one can transfer control to, in declaration order.
    #[must_use]
    pub fn successors(&self) -> Vec<&str> {
        let mut targets = Vec::new();
        match self {
            Self::Choice(s) => {
                targets.extend(s.rules.iter().map(|r| r.next.as_str()));
                targets.extend(s.default.as_deref());
            }
            _ => {
                targets.extend(self.next_on_success());
                targets.extend(self.catch_target());
            }
        }
        targets
    }
}

impl From<TaskStep> for StepDefinition {
    fn from(step: TaskStep) -> Self {
        Self::Task(step)
    }
}

impl From<ChoiceStep> for StepDefinition {
    fn from(step: ChoiceStep) -> Self {
        Self::Choice(step)
    }
}

impl From<ParallelStep> for StepDefinition {
    fn from(step: ParallelStep) -> Self {
        Self::Parallel(step)
    }
}
