//! Registry mapping executor names to implementations.
//!
//! Built once at startup and then shared behind an `Arc`; lookups never lock.

use super::StepExecutor;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::warn;

/// Registry of step executors.
#[derive(Default, Clone)]
pub struct ExecutorRegistry {
    executors: HashMap<String, Arc<dyn StepExecutor>>,
}

impl ExecutorRegistry {
    /// Creates a new empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an executor under its own name, replacing any previous one.
    pub fn register(&mut self, executor: Arc<dyn StepExecutor>) -> &mut Self {
        let name = executor.name().to_string();
        if self.executors.insert(name.clone(), executor).is_some() {
            warn!(executor = %name, "Replacing previously registered executor");
        }
        self
    }

    /// Builder-style registration.
    #[must_use]
    pub fn with(mut self, executor: Arc<dyn StepExecutor>) -> Self {
        self.register(executor);
        self
    }

    /// Gets an executor by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arc<dyn StepExecutor>> {
        self.executors.get(name).cloned()
    }

    /// Checks whether an executor is registered.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.executors.contains_key(name)
    }

    /// Lists registered executor names, sorted.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.executors.keys().cloned().collect();
        names.sort();
        names
    }

    /// Number of registered executors.
    #[must_use]
    pub fn len(&self) -> usize {
        self.executors.len()
    }

    /// Returns true if nothing is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.executors.is_empty()
    }
}

impl std::fmt::Debug for ExecutorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutorRegistry")
            .field("executors", &self.names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::steps::PassThroughExecutor;

    #[test]
    fn test_registry_creation() {
        let registry = ExecutorRegistry::new();
        assert!(registry.is_empty());
        assert!(registry.get("anything").is_none());
    }

    #[test]
    fn test_registry_register_and_get() {
        let registry = ExecutorRegistry::new()
            .with(Arc::new(PassThroughExecutor::new("b")))
            .with(Arc::new(PassThroughExecutor::new("a")));

        assert!(registry.contains("a"));
        assert!(!registry.contains("c"));
        assert_eq!(registry.names(), vec!["a".to_string(), "b".to_string()]);
        assert_eq!(registry.get("b").map(|e| e.name().to_string()), Some("b".to_string()));
    }

    #[test]
    fn test_registry_replaces_duplicates() {
        let mut registry = ExecutorRegistry::new();
        registry
            .register(Arc::new(PassThroughExecutor::new("a")))
            .register(Arc::new(PassThroughExecutor::new("a")));
        assert_eq!(registry.len(), 1);
    }
}
