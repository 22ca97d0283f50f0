//! Logging setup and execution summaries.

use crate::config::LoggingConfig;
use crate::core::WorkflowExecution;
use std::collections::BTreeMap;
use std::sync::OnceLock;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

static TRACING_INITIALIZED: OnceLock<bool> = OnceLock::new();

/// Installs the global `tracing` subscriber.
///
/// `RUST_LOG` takes precedence over `config.level`. Only the first call has an
/// effect; returns false if another subscriber was already installed.
pub fn init_tracing(config: &LoggingConfig) -> bool {
    *TRACING_INITIALIZED.get_or_init(|| {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));
        let layer = if config.json {
            fmt::layer()
                .json()
                .with_target(true)
                .with_current_span(false)
                .with_filter(filter)
                .boxed()
        } else {
            fmt::layer().with_target(true).with_filter(filter).boxed()
        };
        let installed = tracing_subscriber::registry().with(layer).try_init().is_ok();
        if installed {
            tracing::debug!(level = %config.level, json = config.json, "Tracing initialized");
        }
        installed
    })
}

/// One wide record describing a finished execution.
#[must_use]
pub fn execution_summary(execution: &WorkflowExecution) -> serde_json::Value {
    let mut step_counts: BTreeMap<String, u32> = BTreeMap::new();
    for result in execution.history() {
        *step_counts.entry(result.status.to_string()).or_insert(0) += 1;
    }
    let steps: Vec<&str> = execution.history().iter().map(|r| r.step_name.as_str()).collect();

    serde_json::json!({
        "execution_id": execution.id(),
        "graph": execution.graph_name(),
        "status": execution.status().to_string(),
        "transitions": execution.transitions(),
        "duration_ms": execution.duration_ms(),
        "step_counts": step_counts,
        "steps": steps,
    })
}
