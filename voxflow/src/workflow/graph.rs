//! Validated workflow graphs.
//!
//! A [`WorkflowGraph`] can only be obtained through validation, whether it is
//! built in code with [`GraphBuilder`] or loaded from JSON. Nested Parallel
//! branches are graphs themselves and are validated the same way.

use super::StepDefinition;
use crate::errors::{ContractErrorInfo, GraphSuggestions, GraphValidationError};
use crate::steps::ExecutorRegistry;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet, VecDeque};

/// Serialized form of a graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphDocument {
    /// Graph name.
    #[serde(default = "default_graph_name")]
    pub name: String,
    /// Entry step.
    pub start_at: String,
    /// Steps in declaration order.
    pub steps: Vec<StepDefinition>,
}

fn default_graph_name() -> String {
    "branch".to_string()
}

/// A validated, immutable graph of steps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "GraphDocument", into = "GraphDocument")]
pub struct WorkflowGraph {
    name: String,
    start_at: String,
    steps: HashMap<String, StepDefinition>,
    order: Vec<String>,
}

impl WorkflowGraph {
    /// Parses and validates a JSON graph definition.
    ///
    /// # Errors
    ///
    /// Returns an error for malformed JSON or a graph that fails validation.
    pub fn from_json(json: &str) -> Result<Self, GraphValidationError> {
        let document: GraphDocument = serde_json::from_str(json).map_err(|e| {
            GraphValidationError::coded(
                "GRAPH-PARSE",
                format!("Invalid graph definition: {e}"),
                "Check the document against the step schema.",
            )
        })?;
        Self::from_definition(document)
    }

    /// Validates a graph document.
    ///
    /// # Errors
    ///
    /// Returns the first validation failure found.
    pub fn from_definition(document: GraphDocument) -> Result<Self, GraphValidationError> {
        let GraphDocument {
            name,
            start_at,
            steps: definitions,
        } = document;

        if name.trim().is_empty() {
            return Err(GraphValidationError::coded(
                "GRAPH-UNNAMED",
                "Graph name must not be empty",
                "Give the graph a name.",
            ));
        }
        if definitions.is_empty() {
            return Err(error(
                "GRAPH-EMPTY",
                format!("Graph '{name}' has no steps"),
                Vec::new(),
            ));
        }

        let mut steps = HashMap::with_capacity(definitions.len());
        let mut order = Vec::with_capacity(definitions.len());
        for step in definitions {
            let step_name = step.name().to_string();
            if steps.contains_key(&step_name) {
                return Err(error(
                    "GRAPH-DUPLICATE",
                    format!("Step '{step_name}' is declared more than once"),
                    vec![step_name],
                ));
            }
            order.push(step_name.clone());
            steps.insert(step_name, step);
        }

        let graph = Self {
            name,
            start_at,
            steps,
            order,
        };
        graph.validate()?;
        Ok(graph)
    }

    fn validate(&self) -> Result<(), GraphValidationError> {
        if !self.steps.contains_key(&self.start_at) {
            return Err(error(
                "GRAPH-MISSING-START",
                format!("Start step '{}' is not declared", self.start_at),
                vec![self.start_at.clone()],
            ));
        }

        for name in &self.order {
            let Some(step) = self.steps.get(name) else {
                continue;
            };
            self.validate_step(step)?;
        }

        let reachable = self.reachable_from_start();
        let unreachable: Vec<String> = self
            .order
            .iter()
            .filter(|name| !reachable.contains(name.as_str()))
            .cloned()
            .collect();
        if !unreachable.is_empty() {
            return Err(error(
                "GRAPH-UNREACHABLE",
                format!(
                    "Steps unreachable from '{}': {}",
                    self.start_at,
                    unreachable.join(", ")
                ),
                unreachable,
            ));
        }

        Ok(())
    }

    fn validate_step(&self, step: &StepDefinition) -> Result<(), GraphValidationError> {
        let name = step.name();

        for target in step.successors() {
            if !self.steps.contains_key(target) {
                return Err(error(
                    "GRAPH-UNKNOWN-TARGET",
                    format!("Step '{name}' points to unknown step '{target}'"),
                    vec![name.to_string(), target.to_string()],
                ));
            }
        }

        if let Some(policy) = step.retry_policy() {
            policy.validate().map_err(|reason| {
                error(
                    "GRAPH-INVALID-RETRY",
                    format!("Step '{name}' has an invalid retry policy: {reason}"),
                    vec![name.to_string()],
                )
            })?;
        }

        match step {
            StepDefinition::Task(task) => {
                if let Some(seconds) = task.timeout_seconds {
                    if !seconds.is_finite() || seconds <= 0.0 {
                        return Err(error(
                            "GRAPH-INVALID-TIMEOUT",
                            format!("Step '{name}' has a non-positive timeout"),
                            vec![name.to_string()],
                        ));
                    }
                }
            }
            StepDefinition::Choice(choice) => {
                if choice.rules.is_empty() && choice.default.is_none() {
                    return Err(error(
                        "GRAPH-EMPTY-CHOICE",
                        format!("Choice '{name}' has neither rules nor a default"),
                        vec![name.to_string()],
                    ));
                }
                for rule in &choice.rules {
                    rule.condition.validate().map_err(|reason| {
                        error(
                            "GRAPH-INVALID-CONDITION",
                            format!("Choice '{name}' has an invalid rule: {reason}"),
                            vec![name.to_string()],
                        )
                    })?;
                }
            }
            StepDefinition::Parallel(parallel) => {
                if parallel.branches.is_empty() {
                    return Err(error(
                        "GRAPH-EMPTY-PARALLEL",
                        format!("Parallel '{name}' has no branches"),
                        vec![name.to_string()],
                    ));
                }
            }
            StepDefinition::Terminal(_) | StepDefinition::ErrorHandler(_) => {}
        }

        Ok(())
    }

    /// Checks that every executor named by the graph (and its branches) is
    /// registered.
    ///
    /// # Errors
    ///
    /// Returns `GRAPH-MISSING-EXECUTOR` naming the first unresolved step.
    pub fn validate_executors(&self, registry: &ExecutorRegistry) -> Result<(), GraphValidationError> {
        for step in self.steps() {
            let executor = match step {
                StepDefinition::Task(task) => Some(task.executor.as_str()),
                StepDefinition::ErrorHandler(handler) => handler.executor.as_deref(),
                StepDefinition::Parallel(parallel) => {
                    for branch in &parallel.branches {
                        branch.validate_executors(registry)?;
                    }
                    None
                }
                StepDefinition::Choice(_) | StepDefinition::Terminal(_) => None,
            };
            if let Some(executor) = executor {
                if !registry.contains(executor) {
                    return Err(error(
                        "GRAPH-MISSING-EXECUTOR",
                        format!(
                            "Step '{}' uses executor '{executor}' which is not registered",
                            step.name()
                        ),
                        vec![step.name().to_string()],
                    )
                    .with_error_info(
                        ContractErrorInfo::new("GRAPH-MISSING-EXECUTOR", "Executor not registered")
                            .with_fix_hint(
                                GraphSuggestions::get("GRAPH-MISSING-EXECUTOR").unwrap_or_default(),
                            )
                            .with_context_entry("executor", executor)
                            .with_context_entry("graph", &self.name),
                    ));
                }
            }
        }
        Ok(())
    }

    /// Graph name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Entry step name.
    #[must_use]
    pub fn start_at(&self) -> &str {
        &self.start_at
    }

    /// Looks up a step.
    #[must_use]
    pub fn step(&self, name: &str) -> Option<&StepDefinition> {
        self.steps.get(name)
    }

    /// Steps in declaration order.
    pub fn steps(&self) -> impl Iterator<Item = &StepDefinition> {
        self.order.iter().filter_map(|name| self.steps.get(name))
    }

    /// Number of steps.
    #[must_use]
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    /// Always false for a validated graph.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Names of every step reachable from the start step.
    #[must_use]
    pub fn reachable_from_start(&self) -> HashSet<&str> {
        let mut seen = HashSet::new();
        let mut queue = VecDeque::from([self.start_at.as_str()]);
        while let Some(name) = queue.pop_front() {
            if !seen.insert(name) {
                continue;
            }
            if let Some(step) = self.steps.get(name) {
                queue.extend(step.successors());
            }
        }
        seen
    }

    /// Serializes the graph back to its document form.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

impl TryFrom<GraphDocument> for WorkflowGraph {
    type Error = GraphValidationError;

    fn try_from(document: GraphDocument) -> Result<Self, Self::Error> {
        Self::from_definition(document)
    }
}

impl From<WorkflowGraph> for GraphDocument {
    fn from(graph: WorkflowGraph) -> Self {
        let WorkflowGraph {
            name,
            start_at,
            mut steps,
            order,
        } = graph;
        let steps = order.iter().filter_map(|name| steps.remove(name)).collect();
        Self {
            name,
            start_at,
            steps,
        }
    }
}

/// Builds a graph in code.
#[derive(Debug, Clone)]
pub struct GraphBuilder {
    name: String,
    start_at: Option<String>,
    steps: Vec<StepDefinition>,
}

impl GraphBuilder {
    /// Creates a builder for a named graph.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            start_at: None,
            steps: Vec::new(),
        }
    }

    /// Sets the entry step. Defaults to the first step added.
    #[must_use]
    pub fn start_at(mut self, step: impl Into<String>) -> Self {
        self.start_at = Some(step.into());
        self
    }

    /// Appends a step.
    #[must_use]
    pub fn step(mut self, step: impl Into<StepDefinition>) -> Self {
        self.steps.push(step.into());
        self
    }

    /// Validates and builds the graph.
    ///
    /// # Errors
    ///
    /// Returns the first validation failure found.
    pub fn build(self) -> Result<WorkflowGraph, GraphValidationError> {
        let start_at = self
            .start_at
            .or_else(|| self.steps.first().map(|s| s.name().to_string()))
            .unwrap_or_default();
        WorkflowGraph::from_definition(GraphDocument {
            name: self.name,
            start_at,
            steps: self.steps,
        })
    }
}

fn error(code: &str, message: String, steps: Vec<String>) -> GraphValidationError {
    let hint = GraphSuggestions::get(code).unwrap_or("Fix the graph definition and reload.");
    GraphValidationError::coded(code, message, hint).with_steps(steps)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retry::RetryPolicy;
    use crate::steps::PassThroughExecutor;
    use crate::workflow::{ChoiceStep, Condition, ParallelStep, TaskStep};
    use std::sync::Arc;

    fn linear() -> WorkflowGraph {
        GraphBuilder::new("linear")
            .step(TaskStep::new("A", "a", "B"))
            .step(TaskStep::new("B", "b", "Done"))
            .step(StepDefinition::terminal("Done"))
            .build()
            .unwrap()
    }

    #[test]
    fn test_build_linear_graph() {
        let graph = linear();
        assert_eq!(graph.name(), "linear");
        assert_eq!(graph.start_at(), "A");
        assert_eq!(graph.len(), 3);
        let names: Vec<&str> = graph.steps().map(StepDefinition::name).collect();
        assert_eq!(names, vec!["A", "B", "Done"]);
    }

    #[test]
    fn test_empty_graph_rejected() {
        let err = GraphBuilder::new("empty").build().unwrap_err();
        assert_eq!(err.code(), Some("GRAPH-EMPTY"));
    }

    #[test]
    fn test_unknown_target_rejected() {
        let err = GraphBuilder::new("g")
            .step(TaskStep::new("A", "a", "Nowhere"))
            .build()
            .unwrap_err();
        assert_eq!(err.code(), Some("GRAPH-UNKNOWN-TARGET"));
        assert_eq!(err.steps, vec!["A".to_string(), "Nowhere".to_string()]);
    }

    #[test]
    fn test_unknown_catch_target_rejected() {
        let err = GraphBuilder::new("g")
            .step(TaskStep::new("A", "a", "Done").with_catch("Missing"))
            .step(StepDefinition::terminal("Done"))
            .build()
            .unwrap_err();
        assert_eq!(err.code(), Some("GRAPH-UNKNOWN-TARGET"));
    }

    #[test]
    fn test_unreachable_step_rejected() {
        let err = GraphBuilder::new("g")
            .step(TaskStep::new("A", "a", "Done"))
            .step(StepDefinition::terminal("Done"))
            .step(StepDefinition::terminal("Orphan"))
            .build()
            .unwrap_err();
        assert_eq!(err.code(), Some("GRAPH-UNREACHABLE"));
        assert_eq!(err.steps, vec!["Orphan".to_string()]);
    }

    #[test]
    fn test_duplicate_step_rejected() {
        let err = GraphBuilder::new("g")
            .step(StepDefinition::terminal("Done"))
            .step(StepDefinition::terminal("Done"))
            .build()
            .unwrap_err();
        assert_eq!(err.code(), Some("GRAPH-DUPLICATE"));
    }

    #[test]
    fn test_missing_start_rejected() {
        let err = GraphBuilder::new("g")
            .start_at("Nope")
            .step(StepDefinition::terminal("Done"))
            .build()
            .unwrap_err();
        assert_eq!(err.code(), Some("GRAPH-MISSING-START"));
    }

    #[test]
    fn test_bad_retry_policy_rejected() {
        let err = GraphBuilder::new("g")
            .step(TaskStep::new("A", "a", "Done").with_retry(RetryPolicy::new().with_max_attempts(0)))
            .step(StepDefinition::terminal("Done"))
            .build()
            .unwrap_err();
        assert_eq!(err.code(), Some("GRAPH-INVALID-RETRY"));
    }

    #[test]
    fn test_choice_checks() {
        let err = GraphBuilder::new("g")
            .step(ChoiceStep::new("Route"))
            .build()
            .unwrap_err();
        assert_eq!(err.code(), Some("GRAPH-EMPTY-CHOICE"));

        let err = GraphBuilder::new("g")
            .step(ChoiceStep::new("Route").when(Condition::is_present("bad"), "Done"))
            .step(StepDefinition::terminal("Done"))
            .build()
            .unwrap_err();
        assert_eq!(err.code(), Some("GRAPH-INVALID-CONDITION"));
    }

    #[test]
    fn test_validate_executors() {
        let graph = linear();
        let registry = ExecutorRegistry::new().with(Arc::new(PassThroughExecutor::new("a")));
        let err = graph.validate_executors(&registry).unwrap_err();
        assert_eq!(err.code(), Some("GRAPH-MISSING-EXECUTOR"));
        assert_eq!(err.steps, vec!["B".to_string()]);

        let registry = registry.with(Arc::new(PassThroughExecutor::new("b")));
        assert!(graph.validate_executors(&registry).is_ok());
    }

    #[test]
    fn test_validate_executors_in_branches() {
        let branch = GraphBuilder::new("branch")
            .step(TaskStep::new("Leaf", "leaf", "End"))
            .step(StepDefinition::terminal("End"))
            .build()
            .unwrap();
        let graph = GraphBuilder::new("g")
            .step(ParallelStep::new("Fan", vec![branch], "Done"))
            .step(StepDefinition::terminal("Done"))
            .build()
            .unwrap();

        let err = graph.validate_executors(&ExecutorRegistry::new()).unwrap_err();
        assert_eq!(err.steps, vec!["Leaf".to_string()]);
    }

    #[test]
    fn test_from_json_validates_nested_branches() {
        let json = r#"{
            "name": "nested",
            "start_at": "Fan",
            "steps": [
                {"type": "parallel", "name": "Fan", "next": "Done", "branches": [
                    {"start_at": "Leaf", "steps": [
                        {"type": "task", "name": "Leaf", "executor": "x", "next": "Missing"}
                    ]}
                ]},
                {"type": "terminal", "name": "Done"}
            ]
        }"#;
        let err = WorkflowGraph::from_json(json).unwrap_err();
        assert_eq!(err.code(), Some("GRAPH-PARSE"));
        assert!(err.message.contains("Missing"));
    }

    #[test]
    fn test_json_roundtrip_keeps_order() {
        let graph = linear();
        let restored = WorkflowGraph::from_json(&graph.to_json().unwrap()).unwrap();
        assert_eq!(restored, graph);
    }
}
