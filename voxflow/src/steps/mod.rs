//! Step executor trait and implementations.
//!
//! Executors are the units of work behind Task steps. They are registered by
//! name in an [`ExecutorRegistry`] and resolved when the orchestrator is built.

mod registry;

pub use registry::ExecutorRegistry;

use crate::core::StepError;
use async_trait::async_trait;
use std::fmt::Debug;
use uuid::Uuid;

/// Everything an executor may read while running one attempt.
#[derive(Debug, Clone)]
pub struct StepContext {
    execution_id: Uuid,
    step_name: String,
    attempt: u32,
    payload: serde_json::Value,
    input: serde_json::Value,
}

impl StepContext {
    /// Creates a new step context.
    #[must_use]
    pub fn new(
        execution_id: Uuid,
        step_name: impl Into<String>,
        attempt: u32,
        payload: serde_json::Value,
        input: serde_json::Value,
    ) -> Self {
        Self {
            execution_id,
            step_name: step_name.into(),
            attempt,
            payload,
            input,
        }
    }

    /// The execution this attempt belongs to.
    #[must_use]
    pub fn execution_id(&self) -> Uuid {
        self.execution_id
    }

    /// The step being run.
    #[must_use]
    pub fn step_name(&self) -> &str {
        &self.step_name
    }

    /// 1-based attempt number.
    #[must_use]
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// The working payload produced by previous steps.
    #[must_use]
    pub fn payload(&self) -> &serde_json::Value {
        &self.payload
    }

    /// The input the execution started with.
    #[must_use]
    pub fn input(&self) -> &serde_json::Value {
        &self.input
    }

    /// Reads a string at a JSON pointer into the payload.
    #[must_use]
    pub fn payload_str(&self, pointer: &str) -> Option<&str> {
        self.payload.pointer(pointer).and_then(serde_json::Value::as_str)
    }
}

/// Trait for step executors.
///
/// Implementations must be safe to share across workers; they receive their
/// service clients at construction time.
#[async_trait]
pub trait StepExecutor: Send + Sync + Debug {
    /// Returns the registry name of the executor.
    fn name(&self) -> &str;

    /// Runs one attempt.
    async fn execute(&self, ctx: &StepContext) -> Result<serde_json::Value, StepError>;
}

/// A simple function-based executor.
pub struct FnExecutor<F>
where
    F: Fn(&StepContext) -> Result<serde_json::Value, StepError> + Send + Sync,
{
    name: String,
    func: F,
}

impl<F> FnExecutor<F>
where
    F: Fn(&StepContext) -> Result<serde_json::Value, StepError> + Send + Sync,
{
    /// Creates a new function-based executor.
    pub fn new(name: impl Into<String>, func: F) -> Self {
        Self {
            name: name.into(),
            func,
        }
    }
}

impl<F> Debug for FnExecutor<F>
where
    F: Fn(&StepContext) -> Result<serde_json::Value, StepError> + Send + Sync,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnExecutor")
            .field("name", &self.name)
            .finish()
    }
}

#[async_trait]
impl<F> StepExecutor for FnExecutor<F>
where
    F: Fn(&StepContext) -> Result<serde_json::Value, StepError> + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, ctx: &StepContext) -> Result<serde_json::Value, StepError> {
        (self.func)(ctx)
    }
}

/// Returns the payload unchanged.
#[derive(Debug, Clone)]
pub struct PassThroughExecutor {
    name: String,
}

impl PassThroughExecutor {
    /// Creates a new pass-through executor.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

#[async_trait]
impl StepExecutor for PassThroughExecutor {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, ctx: &StepContext) -> Result<serde_json::Value, StepError> {
        Ok(ctx.payload().clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn test_context() -> StepContext {
        StepContext::new(
            Uuid::new_v4(),
            "test",
            1,
            json!({"text": "hello", "n": 1}),
            json!({"text": "hello"}),
        )
    }

    #[tokio::test]
    async fn test_fn_executor() {
        let executor = FnExecutor::new("upper", |ctx| {
            ctx.payload_str("/text")
                .map(|t| json!(t.to_uppercase()))
                .ok_or_else(|| StepError::validation("missing text"))
        });

        assert_eq!(executor.name(), "upper");
        let output = executor.execute(&test_context()).await.unwrap();
        assert_eq!(output, json!("HELLO"));
    }

    #[tokio::test]
    async fn test_pass_through_executor() {
        let executor = PassThroughExecutor::new("noop");
        let ctx = test_context();
        let output = executor.execute(&ctx).await.unwrap();
        assert_eq!(&output, ctx.payload());
    }

    #[test]
    fn test_payload_str_missing() {
        let ctx = test_context();
        assert_eq!(ctx.payload_str("/missing"), None);
        assert_eq!(ctx.payload_str("/n"), None);
    }
}
