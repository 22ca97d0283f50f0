//! State-machine executor for workflow graphs.
//!
//! The orchestrator walks one [`WorkflowExecution`] along the declared edges
//! of its graph. Retry waits either suspend the execution ([`Orchestrator::advance`],
//! used by queue workers so a retry never blocks a worker) or are awaited on a
//! timer ([`Orchestrator::run`]). Branches of a Parallel step always retry inline.

use super::{StepDefinition, WorkflowGraph};
use crate::core::{StepError, StepResult, WorkflowExecution};
use crate::errors::GraphValidationError;
use crate::retry::{apply_jitter, should_retry, RetryDecision};
use crate::steps::{ExecutorRegistry, StepContext};
use crate::utils::{elapsed_ms, secs_to_duration};
use async_trait::async_trait;
use futures::future::{join_all, BoxFuture};
use serde_json::{json, Value};
use std::fmt::Debug;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Default bound on step entries per execution.
pub const DEFAULT_MAX_TRANSITIONS: u32 = 100;

/// Observer invoked once when an execution leaves `Running`.
#[async_trait]
pub trait CompletionHook: Send + Sync + Debug {
    /// Called with the finished execution.
    async fn on_finished(&self, execution: &WorkflowExecution);
}

/// Hook that does nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpHook;

#[async_trait]
impl CompletionHook for NoOpHook {
    async fn on_finished(&self, _execution: &WorkflowExecution) {}
}

/// Result of driving an execution.
#[derive(Debug, Clone)]
pub enum Advance {
    /// The execution reached `Succeeded` or `Failed`.
    Finished(WorkflowExecution),
    /// A retry is pending; resume with [`Orchestrator::advance`] after the delay.
    Suspended {
        /// The checkpointed execution.
        execution: WorkflowExecution,
        /// How long to wait before resuming.
        resume_after: Duration,
    },
}

impl Advance {
    /// The execution, finished or not.
    #[must_use]
    pub fn execution(&self) -> &WorkflowExecution {
        match self {
            Self::Finished(execution) | Self::Suspended { execution, .. } => execution,
        }
    }

    /// Consumes the result, returning the execution.
    #[must_use]
    pub fn into_execution(self) -> WorkflowExecution {
        match self {
            Self::Finished(execution) | Self::Suspended { execution, .. } => execution,
        }
    }

    /// Returns true if the execution is waiting on a retry.
    #[must_use]
    pub fn is_suspended(&self) -> bool {
        matches!(self, Self::Suspended { .. })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DriveMode {
    /// Return to the caller on a retry wait.
    Suspendable,
    /// Sleep through retry waits.
    Inline,
}

/// Executes workflow graphs against a registry of step executors.
#[derive(Debug, Clone)]
pub struct Orchestrator {
    graph: Arc<WorkflowGraph>,
    registry: Arc<ExecutorRegistry>,
    hook: Arc<dyn CompletionHook>,
    max_transitions: u32,
}

impl Orchestrator {
    /// Creates an orchestrator, resolving every executor the graph names.
    ///
    /// # Errors
    ///
    /// Returns `GRAPH-MISSING-EXECUTOR` if an executor is not registered.
    pub fn new(
        graph: impl Into<Arc<WorkflowGraph>>,
        registry: impl Into<Arc<ExecutorRegistry>>,
    ) -> Result<Self, GraphValidationError> {
        let graph = graph.into();
        let registry = registry.into();
        graph.validate_executors(&registry)?;
        Ok(Self {
            graph,
            registry,
            hook: Arc::new(NoOpHook),
            max_transitions: DEFAULT_MAX_TRANSITIONS,
        })
    }

    /// Sets the completion hook.
    #[must_use]
    pub fn with_hook(mut self, hook: Arc<dyn CompletionHook>) -> Self {
        self.hook = hook;
        self
    }

    /// Sets the step-entry bound.
    #[must_use]
    pub fn with_max_transitions(mut self, max_transitions: u32) -> Self {
        self.max_transitions = max_transitions;
        self
    }

    /// The graph being executed.
    #[must_use]
    pub fn graph(&self) -> &WorkflowGraph {
        &self.graph
    }

    /// Creates a new execution positioned at the start step.
    #[must_use]
    pub fn start(&self, input: Value) -> WorkflowExecution {
        self.start_with_id(Uuid::new_v4(), input)
    }

    /// Creates a new execution with a caller-chosen id.
    #[must_use]
    pub fn start_with_id(&self, id: Uuid, input: Value) -> WorkflowExecution {
        info!(
            execution_id = %id,
            graph = %self.graph.name(),
            start_at = %self.graph.start_at(),
            "Execution started"
        );
        WorkflowExecution::new(id, self.graph.name(), self.graph.start_at(), input)
    }

    /// Runs a new execution to completion, awaiting retry delays on a timer.
    pub async fn run(&self, input: Value) -> WorkflowExecution {
        let mut execution = self.start(input);
        loop {
            match self.advance(execution).await {
                Advance::Finished(done) => return done,
                Advance::Suspended {
                    execution: waiting,
                    resume_after,
                } => {
                    tokio::time::sleep(resume_after).await;
                    execution = waiting;
                }
            }
        }
    }

    /// Drives an execution until it finishes or must wait for a retry.
    ///
    /// Finished executions are returned untouched and the hook is not called
    /// again.
    pub async fn advance(&self, mut execution: WorkflowExecution) -> Advance {
        if execution.is_finished() {
            return Advance::Finished(execution);
        }

        if execution.graph_name() == self.graph.name() {
            if let Some(resume_after) = self
                .drive(&self.graph, &mut execution, DriveMode::Suspendable)
                .await
            {
                debug!(
                    execution_id = %execution.id(),
                    step = ?execution.current_step(),
                    resume_after_ms = resume_after.as_millis(),
                    "Execution suspended for retry"
                );
                return Advance::Suspended {
                    execution,
                    resume_after,
                };
            }
        } else {
            warn!(
                execution_id = %execution.id(),
                expected = %self.graph.name(),
                actual = %execution.graph_name(),
                "Execution belongs to a different graph"
            );
            let error = StepError::internal(format!(
                "execution belongs to graph '{}', not '{}'",
                execution.graph_name(),
                self.graph.name()
            ));
            execution.fail(Some(error));
        }

        info!(
            execution_id = %execution.id(),
            status = %execution.status(),
            steps = execution.history().len(),
            duration_ms = ?execution.duration_ms(),
            "Execution finished"
        );
        self.hook.on_finished(&execution).await;
        Advance::Finished(execution)
    }

    /// Walks `graph` from the execution's current step.
    ///
    /// Returns `Some(delay)` when suspended for a retry.
    fn drive<'a>(
        &'a self,
        graph: &'a WorkflowGraph,
        exec: &'a mut WorkflowExecution,
        mode: DriveMode,
    ) -> BoxFuture<'a, Option<Duration>> {
        Box::pin(async move {
            while !exec.is_finished() {
                let Some(step_name) = exec.current_step().map(str::to_string) else {
                    exec.fail(Some(StepError::internal("execution has no current step")));
                    break;
                };
                let Some(step) = graph.step(&step_name) else {
                    let error = StepError::internal(format!("step '{step_name}' is not in graph"));
                    exec.record(StepResult::failed(&step_name, 1, error.clone(), 0));
                    exec.fail(Some(error));
                    break;
                };

                let attempt = match exec.take_pending_attempt() {
                    Some(attempt) => attempt,
                    None => {
                        if exec.enter_step() > self.max_transitions {
                            let error = StepError::internal(format!(
                                "exceeded {} transitions",
                                self.max_transitions
                            ));
                            warn!(execution_id = %exec.id(), step = %step_name, "Transition limit reached");
                            exec.record(StepResult::failed(&step_name, 1, error.clone(), 0));
                            exec.fail(Some(error));
                            break;
                        }
                        1
                    }
                };

                debug!(
                    execution_id = %exec.id(),
                    step = %step_name,
                    kind = %step.kind(),
                    attempt,
                    "Entering step"
                );

                let wait = match step {
                    StepDefinition::Task(task) => {
                        let started = Instant::now();
                        let outcome = self.run_task(task, exec, attempt).await;
                        let duration_ms = elapsed_ms(started);
                        match outcome {
                            Ok(output) => {
                                exec.record(StepResult::success(&step_name, attempt, output.clone(), duration_ms));
                                let payload = apply_output(exec.payload(), task.result_key.as_deref(), output);
                                exec.set_payload(payload);
                                exec.move_to(&task.next);
                                None
                            }
                            Err(error) => handle_failure(step, exec, attempt, error, duration_ms),
                        }
                    }
                    StepDefinition::Parallel(parallel) => {
                        let started = Instant::now();
                        let payload = exec.payload().clone();
                        let id = exec.id();
                        let branches = parallel.branches.iter().map(|branch| {
                            let payload = payload.clone();
                            async move {
                                let mut sub = WorkflowExecution::new(id, branch.name(), branch.start_at(), payload);
                                self.drive(branch, &mut sub, DriveMode::Inline).await;
                                sub
                            }
                        });
                        let finished = join_all(branches).await;
                        let duration_ms = elapsed_ms(started);

                        let mut outputs = Vec::with_capacity(finished.len());
                        let mut first_error = None;
                        for (index, sub) in finished.into_iter().enumerate() {
                            for result in sub.history() {
                                exec.record(result.clone().in_branch(index));
                            }
                            if let Some(output) = sub.output() {
                                outputs.push(output.clone());
                            } else if first_error.is_none() {
                                let cause = sub
                                    .error()
                                    .cloned()
                                    .unwrap_or_else(|| StepError::internal("branch did not finish"));
                                first_error = Some(StepError::new(
                                    cause.category,
                                    format!("branch {index} failed: {}", cause.message),
                                ));
                            }
                        }

                        match first_error {
                            None => {
                                let output = Value::Array(outputs);
                                exec.record(StepResult::success(&step_name, attempt, output.clone(), duration_ms));
                                let payload =
                                    apply_output(exec.payload(), parallel.result_key.as_deref(), output);
                                exec.set_payload(payload);
                                exec.move_to(&parallel.next);
                                None
                            }
                            Some(error) => handle_failure(step, exec, attempt, error, duration_ms),
                        }
                    }
                    StepDefinition::Choice(choice) => {
                        match choice.select(exec.payload()) {
                            Some((rule, next)) => {
                                let output = json!({ "next": next, "rule": rule });
                                exec.record(StepResult::success(&step_name, attempt, output, 0));
                                exec.move_to(next);
                            }
                            None => {
                                let error = StepError::validation("no choice rule matched");
                                exec.record(StepResult::failed(&step_name, attempt, error.clone(), 0));
                                exec.fail(Some(error));
                            }
                        }
                        None
                    }
                    StepDefinition::Terminal(_) => {
                        let output = exec.payload().clone();
                        exec.record(StepResult::success(&step_name, attempt, output.clone(), 0));
                        exec.succeed(output);
                        None
                    }
                    StepDefinition::ErrorHandler(handler) => {
                        let started = Instant::now();
                        let outcome = match handler.executor.as_deref() {
                            Some(name) => self.invoke(name, &step_name, exec, attempt).await,
                            None => Ok(Value::Null),
                        };
                        let duration_ms = elapsed_ms(started);
                        match outcome {
                            Ok(output) => {
                                exec.record(StepResult::success(&step_name, attempt, output, duration_ms));
                            }
                            Err(error) => {
                                warn!(
                                    execution_id = %exec.id(),
                                    step = %step_name,
                                    error = %error,
                                    "Error handler failed"
                                );
                                exec.record(StepResult::failed(&step_name, attempt, error, duration_ms));
                            }
                        }
                        let cause = exec
                            .error()
                            .cloned()
                            .unwrap_or_else(|| StepError::internal(format!("reached error handler '{step_name}'")));
                        exec.fail(Some(cause));
                        None
                    }
                };

                if let Some(delay) = wait {
                    match mode {
                        DriveMode::Suspendable => return Some(delay),
                        DriveMode::Inline => tokio::time::sleep(delay).await,
                    }
                }
            }
            None
        })
    }

    async fn run_task(
        &self,
        task: &super::TaskStep,
        exec: &WorkflowExecution,
        attempt: u32,
    ) -> Result<Value, StepError> {
        let call = self.invoke(&task.executor, &task.name, exec, attempt);
        match task.timeout_seconds {
            Some(seconds) => tokio::time::timeout(secs_to_duration(seconds), call)
                .await
                .unwrap_or_else(|_| {
                    Err(StepError::timeout(format!(
                        "step '{}' exceeded {seconds}s",
                        task.name
                    )))
                }),
            None => call.await,
        }
    }

    async fn invoke(
        &self,
        executor: &str,
        step_name: &str,
        exec: &WorkflowExecution,
        attempt: u32,
    ) -> Result<Value, StepError> {
        let Some(executor) = self.registry.get(executor) else {
            return Err(StepError::internal(format!("executor '{executor}' is not registered")));
        };
        let ctx = StepContext::new(
            exec.id(),
            step_name,
            attempt,
            exec.payload().clone(),
            exec.input().clone(),
        );
        executor.execute(&ctx).await
    }
}

/// Applies the retry policy, then catch routing, to a failed attempt.
///
/// Returns the delay when a retry was scheduled.
fn handle_failure(
    step: &StepDefinition,
    exec: &mut WorkflowExecution,
    attempt: u32,
    error: StepError,
    duration_ms: u64,
) -> Option<Duration> {
    let name = step.name();
    let (decision, jitter) = step.retry_policy().map_or((RetryDecision::give_up(), None), |policy| {
        (should_retry(policy, attempt, &error), Some(policy.jitter))
    });

    if decision.retry {
        let delay = jitter.map_or(decision.delay, |j| apply_jitter(decision.delay, j));
        warn!(
            execution_id = %exec.id(),
            step = %name,
            attempt,
            category = %error.category,
            delay_ms = delay.as_millis(),
            error = %error.message,
            "Step failed, retry scheduled"
        );
        exec.record(StepResult::retry_scheduled(name, attempt, error, duration_ms, delay));
        exec.schedule_attempt(attempt.saturating_add(1));
        return Some(delay);
    }

    exec.record(StepResult::failed(name, attempt, error.clone(), duration_ms));
    if let Some(target) = step.catch_target() {
        info!(
            execution_id = %exec.id(),
            step = %name,
            catch = %target,
            category = %error.category,
            "Step failed, routing to catch target"
        );
        let detail = json!({
            "step": name,
            "category": error.category.to_string(),
            "message": error.message,
        });
        let payload = apply_output(exec.payload(), Some("error"), detail);
        exec.note_error(error);
        exec.set_payload(payload);
        exec.move_to(target);
    } else {
        warn!(
            execution_id = %exec.id(),
            step = %name,
            attempt,
            category = %error.category,
            error = %error.message,
            "Step failed, execution failed"
        );
        exec.fail(Some(error));
    }
    None
}

/// Replaces the payload, or merges `output` under `key` when one is given.
///
/// A non-object payload is replaced by a fresh object holding only `key`.
fn apply_output(payload: &Value, key: Option<&str>, output: Value) -> Value {
    let Some(key) = key else {
        return output;
    };
    let mut merged = match payload {
        Value::Object(map) => map.clone(),
        _ => serde_json::Map::new(),
    };
    merged.insert(key.to_string(), output);
    Value::Object(merged)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{ErrorCategory, ExecutionStatus, StepStatus};
    use crate::retry::RetryPolicy;
    use crate::steps::{FnExecutor, StepExecutor};
    use crate::workflow::{ChoiceStep, Condition, GraphBuilder, ParallelStep, TaskStep};
    use parking_lot::Mutex;
    use pretty_assertions::assert_eq;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Fails with `category` for the first `failures` calls, then echoes a value.
    fn flaky(name: &str, failures: u32, category: ErrorCategory) -> (Arc<dyn StepExecutor>, Arc<AtomicU32>) {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);
        let executor: Arc<dyn StepExecutor> = Arc::new(FnExecutor::new(name, move |_ctx| {
            let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
            if n <= failures {
                Err(StepError::new(category, format!("failure {n}")))
            } else {
                Ok(json!("ok"))
            }
        }));
        (executor, calls)
    }

    fn constant(name: &str, value: Value) -> Arc<dyn StepExecutor> {
        Arc::new(FnExecutor::new(name, move |_ctx| Ok(value.clone())))
    }

    #[derive(Debug)]
    struct Sleeper(Duration);

    #[async_trait]
    impl StepExecutor for Sleeper {
        fn name(&self) -> &str {
            "sleeper"
        }

        async fn execute(&self, _ctx: &StepContext) -> Result<Value, StepError> {
            tokio::time::sleep(self.0).await;
            Ok(json!("late"))
        }
    }

    #[derive(Debug, Default)]
    struct CountingHook {
        seen: Mutex<Vec<ExecutionStatus>>,
    }

    #[async_trait]
    impl CompletionHook for CountingHook {
        async fn on_finished(&self, execution: &WorkflowExecution) {
            self.seen.lock().push(execution.status());
        }
    }

    fn retrying_graph(max_attempts: u32) -> WorkflowGraph {
        GraphBuilder::new("retrying")
            .step(
                TaskStep::new("Call", "call", "Done")
                    .with_result_key("result")
                    .with_retry(
                        RetryPolicy::new()
                            .with_max_attempts(max_attempts)
                            .with_base_interval_seconds(2.0)
                            .with_backoff_rate(2.0),
                    )
                    .with_catch("HandleFailure"),
            )
            .step(StepDefinition::terminal("Done"))
            .step(StepDefinition::error_handler("HandleFailure", None))
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn test_linear_graph_succeeds() {
        let graph = GraphBuilder::new("linear")
            .step(TaskStep::new("A", "a", "B").with_result_key("a"))
            .step(TaskStep::new("B", "b", "Done").with_result_key("b"))
            .step(StepDefinition::terminal("Done"))
            .build()
            .unwrap();
        let registry = ExecutorRegistry::new()
            .with(constant("a", json!(1)))
            .with(constant("b", json!(2)));
        let orchestrator = Orchestrator::new(graph, registry).unwrap();

        let exec = orchestrator.run(json!({"text": "hi"})).await;

        assert_eq!(exec.status(), ExecutionStatus::Succeeded);
        assert_eq!(exec.output(), Some(&json!({"text": "hi", "a": 1, "b": 2})));
        let steps: Vec<&str> = exec.history().iter().map(|r| r.step_name.as_str()).collect();
        assert_eq!(steps, vec!["A", "B", "Done"]);
        assert_eq!(exec.transitions(), 3);
        assert!(exec.ended_at().is_some());
    }

    #[tokio::test]
    async fn test_output_replaces_payload_without_result_key() {
        let graph = GraphBuilder::new("replace")
            .step(TaskStep::new("A", "a", "Done"))
            .step(StepDefinition::terminal("Done"))
            .build()
            .unwrap();
        let orchestrator = Orchestrator::new(graph, ExecutorRegistry::new().with(constant("a", json!("x")))).unwrap();

        let exec = orchestrator.run(json!({"text": "hi"})).await;
        assert_eq!(exec.output(), Some(&json!("x")));
    }

    #[test]
    fn test_new_rejects_missing_executor() {
        let err = Orchestrator::new(retrying_graph(3), ExecutorRegistry::new()).unwrap_err();
        assert_eq!(err.code(), Some("GRAPH-MISSING-EXECUTOR"));
    }

    #[tokio::test]
    async fn test_choice_first_match_and_default() {
        let graph = GraphBuilder::new("choice")
            .step(
                ChoiceStep::new("Route")
                    .when(Condition::string_equals("/kind", "a"), "A")
                    .when(Condition::is_present("/kind"), "B")
                    .otherwise("C"),
            )
            .step(TaskStep::new("A", "a", "Done"))
            .step(TaskStep::new("B", "b", "Done"))
            .step(TaskStep::new("C", "c", "Done"))
            .step(StepDefinition::terminal("Done"))
            .build()
            .unwrap();
        let registry = ExecutorRegistry::new()
            .with(constant("a", json!("a")))
            .with(constant("b", json!("b")))
            .with(constant("c", json!("c")));
        let orchestrator = Orchestrator::new(graph, registry).unwrap();

        let exec = orchestrator.run(json!({"kind": "a"})).await;
        assert_eq!(exec.output(), Some(&json!("a")));
        assert_eq!(exec.history()[0].output, Some(json!({"next": "A", "rule": 0})));

        let exec = orchestrator.run(json!({"kind": "z"})).await;
        assert_eq!(exec.output(), Some(&json!("b")));

        let exec = orchestrator.run(json!({})).await;
        assert_eq!(exec.output(), Some(&json!("c")));
        assert_eq!(exec.history()[0].output, Some(json!({"next": "C", "rule": null})));
    }

    #[tokio::test]
    async fn test_choice_without_match_fails() {
        let graph = GraphBuilder::new("choice")
            .step(ChoiceStep::new("Route").when(Condition::is_present("/kind"), "Done"))
            .step(StepDefinition::terminal("Done"))
            .build()
            .unwrap();
        let orchestrator = Orchestrator::new(graph, ExecutorRegistry::new()).unwrap();

        let exec = orchestrator.run(json!({})).await;
        assert_eq!(exec.status(), ExecutionStatus::Failed);
        assert_eq!(exec.history().len(), 1);
        assert_eq!(exec.history()[0].status, StepStatus::Failed);
        assert_eq!(exec.error().map(|e| e.category), Some(ErrorCategory::PermanentValidation));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_then_success() {
        let (call, calls) = flaky("call", 2, ErrorCategory::TransientExternal);
        let orchestrator = Orchestrator::new(retrying_graph(3), ExecutorRegistry::new().with(call)).unwrap();

        let exec = orchestrator.run(json!({})).await;

        assert_eq!(exec.status(), ExecutionStatus::Succeeded);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        let attempts = exec.attempts_of("Call");
        assert_eq!(attempts.len(), 3);
        assert_eq!(attempts[0].status, StepStatus::RetryScheduled);
        assert_eq!(attempts[0].retry_delay_ms, Some(2000));
        assert_eq!(attempts[1].retry_delay_ms, Some(4000));
        assert_eq!(attempts[2].status, StepStatus::Success);
        assert_eq!(attempts.iter().map(|r| r.attempt).collect::<Vec<_>>(), vec![1, 2, 3]);
        assert_eq!(exec.transitions(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_retries_route_to_catch() {
        let (call, calls) = flaky("call", u32::MAX, ErrorCategory::TransientExternal);
        let hook = Arc::new(CountingHook::default());
        let orchestrator = Orchestrator::new(retrying_graph(3), ExecutorRegistry::new().with(call))
            .unwrap()
            .with_hook(hook.clone());

        let exec = orchestrator.run(json!({"text": "hi"})).await;

        assert_eq!(exec.status(), ExecutionStatus::Failed);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        let attempts = exec.attempts_of("Call");
        assert_eq!(attempts.len(), 3);
        assert_eq!(attempts[2].status, StepStatus::Failed);
        assert_eq!(exec.current_step(), Some("HandleFailure"));
        assert_eq!(exec.payload()["error"]["step"], json!("Call"));
        assert_eq!(exec.payload()["error"]["category"], json!("transient_external"));
        assert_eq!(exec.error().map(|e| e.message.as_str()), Some("failure 3"));
        assert_eq!(*hook.seen.lock(), vec![ExecutionStatus::Failed]);
    }

    #[tokio::test]
    async fn test_permanent_error_skips_retry() {
        let (call, calls) = flaky("call", u32::MAX, ErrorCategory::PermanentValidation);
        let orchestrator = Orchestrator::new(retrying_graph(3), ExecutorRegistry::new().with(call)).unwrap();

        let exec = orchestrator.run(json!({})).await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(exec.attempts_of("Call").len(), 1);
        assert_eq!(exec.status(), ExecutionStatus::Failed);
    }

    #[tokio::test]
    async fn test_failure_without_catch_fails_execution() {
        let graph = GraphBuilder::new("g")
            .step(TaskStep::new("Call", "call", "Done"))
            .step(StepDefinition::terminal("Done"))
            .build()
            .unwrap();
        let (call, _) = flaky("call", u32::MAX, ErrorCategory::TransientExternal);
        let orchestrator = Orchestrator::new(graph, ExecutorRegistry::new().with(call)).unwrap();

        let exec = orchestrator.run(json!({})).await;
        assert_eq!(exec.status(), ExecutionStatus::Failed);
        assert_eq!(exec.current_step(), Some("Call"));
        assert_eq!(exec.history().len(), 1);
    }

    #[tokio::test]
    async fn test_advance_suspends_and_resumes() {
        let (call, _) = flaky("call", 1, ErrorCategory::TransientExternal);
        let hook = Arc::new(CountingHook::default());
        let orchestrator = Orchestrator::new(retrying_graph(3), ExecutorRegistry::new().with(call))
            .unwrap()
            .with_hook(hook.clone());

        let first = orchestrator.advance(orchestrator.start(json!({}))).await;
        let Advance::Suspended { execution, resume_after } = first else {
            panic!("expected suspension");
        };
        assert_eq!(resume_after, Duration::from_secs(2));
        assert_eq!(execution.status(), ExecutionStatus::Running);
        assert!(hook.seen.lock().is_empty());

        // Checkpoints survive serialization, as they do through the queue.
        let restored: WorkflowExecution =
            serde_json::from_value(serde_json::to_value(&execution).unwrap()).unwrap();
        let second = orchestrator.advance(restored).await;
        assert!(!second.is_suspended());
        let done = second.into_execution();
        assert_eq!(done.status(), ExecutionStatus::Succeeded);
        assert_eq!(done.attempts_of("Call")[1].attempt, 2);

        let again = orchestrator.advance(done).await;
        assert!(!again.is_suspended());
        assert_eq!(hook.seen.lock().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_is_retryable() {
        let graph = GraphBuilder::new("slow")
            .step(
                TaskStep::new("Slow", "sleeper", "Done")
                    .with_timeout_seconds(1.0)
                    .with_retry(RetryPolicy::new().with_max_attempts(2)),
            )
            .step(StepDefinition::terminal("Done"))
            .build()
            .unwrap();
        let registry = ExecutorRegistry::new().with(Arc::new(Sleeper(Duration::from_secs(5))));
        let orchestrator = Orchestrator::new(graph, registry).unwrap();

        let exec = orchestrator.run(json!({})).await;

        let attempts = exec.attempts_of("Slow");
        assert_eq!(attempts.len(), 2);
        assert_eq!(attempts[0].status, StepStatus::RetryScheduled);
        assert_eq!(attempts[0].error.as_ref().map(|e| e.category), Some(ErrorCategory::StepTimeout));
        assert_eq!(exec.status(), ExecutionStatus::Failed);
    }

    fn branch(name: &str, executor: &str) -> WorkflowGraph {
        GraphBuilder::new(name)
            .step(TaskStep::new("Work", executor, "End"))
            .step(StepDefinition::terminal("End"))
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn test_parallel_outputs_in_branch_order() {
        let graph = GraphBuilder::new("fan")
            .step(
                ParallelStep::new("Fan", vec![branch("one", "x"), branch("two", "y")], "Done")
                    .with_result_key("results"),
            )
            .step(StepDefinition::terminal("Done"))
            .build()
            .unwrap();
        let registry = ExecutorRegistry::new()
            .with(constant("x", json!("x")))
            .with(constant("y", json!("y")));
        let orchestrator = Orchestrator::new(graph, registry).unwrap();

        let exec = orchestrator.run(json!({"n": 1})).await;

        assert_eq!(exec.status(), ExecutionStatus::Succeeded);
        assert_eq!(exec.output(), Some(&json!({"n": 1, "results": ["x", "y"]})));
        let branches: Vec<Option<usize>> = exec
            .history()
            .iter()
            .filter(|r| r.step_name == "Work")
            .map(|r| r.branch)
            .collect();
        assert_eq!(branches, vec![Some(0), Some(1)]);
    }

    #[tokio::test]
    async fn test_parallel_branch_failure_is_caught() {
        let graph = GraphBuilder::new("fan")
            .step(
                ParallelStep::new("Fan", vec![branch("one", "x"), branch("two", "bad")], "Done")
                    .with_catch("Oops"),
            )
            .step(StepDefinition::terminal("Done"))
            .step(StepDefinition::error_handler("Oops", None))
            .build()
            .unwrap();
        let (bad, _) = flaky("bad", u32::MAX, ErrorCategory::PermanentValidation);
        let registry = ExecutorRegistry::new().with(constant("x", json!("x"))).with(bad);
        let orchestrator = Orchestrator::new(graph, registry).unwrap();

        let exec = orchestrator.run(json!({})).await;

        assert_eq!(exec.status(), ExecutionStatus::Failed);
        let fan = exec.attempts_of("Fan");
        assert_eq!(fan.len(), 1);
        assert_eq!(fan[0].status, StepStatus::Failed);
        assert!(exec.error().is_some_and(|e| e.message.starts_with("branch 1 failed")));
    }

    #[tokio::test]
    async fn test_error_handler_failure_is_recorded_not_raised() {
        let graph = GraphBuilder::new("g")
            .step(TaskStep::new("Call", "call", "Done").with_catch("Notify"))
            .step(StepDefinition::terminal("Done"))
            .step(StepDefinition::error_handler("Notify", Some("notify")))
            .build()
            .unwrap();
        let (call, _) = flaky("call", u32::MAX, ErrorCategory::PermanentValidation);
        let (notify, notified) = flaky("notify", u32::MAX, ErrorCategory::TransientExternal);
        let orchestrator =
            Orchestrator::new(graph, ExecutorRegistry::new().with(call).with(notify)).unwrap();

        let exec = orchestrator.run(json!({})).await;

        assert_eq!(notified.load(Ordering::SeqCst), 1);
        assert_eq!(exec.status(), ExecutionStatus::Failed);
        assert_eq!(exec.attempts_of("Notify")[0].status, StepStatus::Failed);
        assert_eq!(exec.error().map(|e| e.category), Some(ErrorCategory::PermanentValidation));
    }

    #[tokio::test]
    async fn test_transition_limit() {
        let graph = GraphBuilder::new("loop")
            .step(
                ChoiceStep::new("Check")
                    .when(Condition::is_present("/never"), "Done")
                    .otherwise("Spin"),
            )
            .step(TaskStep::new("Spin", "spin", "Check"))
            .step(StepDefinition::terminal("Done"))
            .build()
            .unwrap();
        let registry = ExecutorRegistry::new().with(constant("spin", json!({})));
        let orchestrator = Orchestrator::new(graph, registry).unwrap().with_max_transitions(5);

        let exec = orchestrator.run(json!({})).await;

        assert_eq!(exec.status(), ExecutionStatus::Failed);
        assert_eq!(exec.error().map(|e| e.category), Some(ErrorCategory::Internal));
        assert_eq!(exec.history().len(), 6);
    }

    #[tokio::test]
    async fn test_foreign_execution_fails() {
        let graph = GraphBuilder::new("other")
            .step(StepDefinition::terminal("Done"))
            .build()
            .unwrap();
        let orchestrator = Orchestrator::new(graph, ExecutorRegistry::new()).unwrap();
        let foreign = WorkflowExecution::new(Uuid::new_v4(), "elsewhere", "Done", json!({}));

        let exec = orchestrator.advance(foreign).await.into_execution();
        assert_eq!(exec.status(), ExecutionStatus::Failed);
    }

    #[test]
    fn test_apply_output() {
        assert_eq!(apply_output(&json!({"a": 1}), Some("b"), json!(2)), json!({"a": 1, "b": 2}));
        assert_eq!(apply_output(&json!("s"), Some("b"), json!(2)), json!({"b": 2}));
        assert_eq!(apply_output(&json!({"a": 1}), None, json!(2)), json!(2));
    }
}
