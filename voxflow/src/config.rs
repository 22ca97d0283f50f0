//! Runtime configuration.
//!
//! Loaded from a JSON file (every field optional) and then overridden by
//! `VOXFLOW_*` environment variables. Validated once on load.

use crate::conversation::{ConversationOptions, ExecutorSettings};
use crate::queue::QueuePolicy;
use crate::retry::RetryPolicy;
use crate::utils::secs_to_duration;
use crate::worker::{WorkerSettings, DEFAULT_LEDGER_CAPACITY};
use crate::workflow::DEFAULT_MAX_TRANSITIONS;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

/// Prefix of environment overrides.
pub const ENV_PREFIX: &str = "VOXFLOW_";

/// Errors raised while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("Cannot read config file {path}: {source}")]
    Io {
        /// File path.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// The file is not valid JSON for this schema.
    #[error("Cannot parse config: {0}")]
    Parse(#[from] serde_json::Error),

    /// A value is out of range.
    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// Worker pool settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Number of workers.
    #[serde(default = "default_worker_count")]
    pub count: usize,
    /// Messages requested per receive.
    #[serde(default = "default_receive_batch")]
    pub receive_batch: usize,
    /// Long-poll wait per receive.
    #[serde(default = "default_receive_wait")]
    pub receive_wait_seconds: f64,
    /// Leave failed executions for redelivery and eventual dead-lettering.
    #[serde(default = "default_true")]
    pub redeliver_failed_executions: bool,
    /// Completed execution ids remembered for duplicate detection.
    #[serde(default = "default_ledger_capacity")]
    pub ledger_capacity: usize,
}

fn default_worker_count() -> usize {
    4
}

fn default_receive_batch() -> usize {
    1
}

fn default_receive_wait() -> f64 {
    20.0
}

fn default_true() -> bool {
    true
}

fn default_ledger_capacity() -> usize {
    DEFAULT_LEDGER_CAPACITY
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            count: default_worker_count(),
            receive_batch: default_receive_batch(),
            receive_wait_seconds: default_receive_wait(),
            redeliver_failed_executions: true,
            ledger_capacity: default_ledger_capacity(),
        }
    }
}

/// Orchestrator settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Step entries allowed per execution.
    #[serde(default = "default_max_transitions")]
    pub max_transitions: u32,
}

fn default_max_transitions() -> u32 {
    DEFAULT_MAX_TRANSITIONS
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_transitions: default_max_transitions(),
        }
    }
}

/// Conversation graph and store settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationConfig {
    /// Minimum confidence for routing to a domain handler.
    #[serde(default = "default_min_confidence")]
    pub min_confidence: f64,
    /// Retention of conversation turns (30 days).
    #[serde(default = "default_turn_ttl")]
    pub turn_ttl_seconds: f64,
    /// How far back the general handler reads history.
    #[serde(default = "default_history_window")]
    pub history_window_seconds: f64,
    /// Most history turns handed to the generator.
    #[serde(default = "default_history_turns")]
    pub history_turns: usize,
    /// Per-attempt timeout for service steps.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step_timeout_seconds: Option<f64>,
    /// Retry policy for service steps.
    #[serde(default = "default_step_retry")]
    pub retry: RetryPolicy,
    /// Accept audio input.
    #[serde(default = "default_true")]
    pub transcription: bool,
    /// Synthesize audio replies.
    #[serde(default = "default_true")]
    pub synthesis: bool,
}

fn default_min_confidence() -> f64 {
    0.4
}

fn default_turn_ttl() -> f64 {
    30.0 * 24.0 * 3600.0
}

fn default_history_window() -> f64 {
    24.0 * 3600.0
}

fn default_history_turns() -> usize {
    10
}

fn default_step_retry() -> RetryPolicy {
    ConversationOptions::default().retry
}

impl Default for ConversationConfig {
    fn default() -> Self {
        Self {
            min_confidence: default_min_confidence(),
            turn_ttl_seconds: default_turn_ttl(),
            history_window_seconds: default_history_window(),
            history_turns: default_history_turns(),
            step_timeout_seconds: None,
            retry: default_step_retry(),
            transcription: true,
            synthesis: true,
        }
    }
}

/// Notification topics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationConfig {
    /// Topic for ErrorHandler alerts.
    #[serde(default = "default_operator_topic")]
    pub operator_topic: String,
    /// Topic for dead-letter alerts.
    #[serde(default = "default_dlq_topic")]
    pub dlq_topic: String,
}

fn default_operator_topic() -> String {
    "voxflow.operators".to_string()
}

fn default_dlq_topic() -> String {
    "voxflow.dlq".to_string()
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            operator_topic: default_operator_topic(),
            dlq_topic: default_dlq_topic(),
        }
    }
}

/// Log output settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter directive when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Emit JSON lines instead of human-readable output.
    #[serde(default)]
    pub json: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VoxflowConfig {
    /// Work queue policy.
    #[serde(default)]
    pub queue: QueuePolicy,
    /// Worker pool.
    #[serde(default)]
    pub workers: WorkerConfig,
    /// Orchestrator.
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,
    /// Conversation graph and store.
    #[serde(default)]
    pub conversation: ConversationConfig,
    /// Notification topics.
    #[serde(default)]
    pub notifications: NotificationConfig,
    /// Logging.
    #[serde(default)]
    pub logging: LoggingConfig,
}

fn parse_env<T: FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::Invalid(format!("{key}={value:?} cannot be parsed")))
}

impl VoxflowConfig {
    /// Parses a JSON document.
    ///
    /// # Errors
    ///
    /// Returns `Parse` on malformed JSON.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Reads and parses a JSON file.
    ///
    /// # Errors
    ///
    /// Returns `Io` if the file cannot be read, `Parse` if it is malformed.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&text)
    }

    /// Loads the file if given (defaults otherwise), applies the process
    /// environment and validates.
    ///
    /// # Errors
    ///
    /// Returns the first load, override or validation error.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env_overrides(std::env::vars())?;
        config.validate()?;
        Ok(config)
    }

    /// Applies `VOXFLOW_*` overrides. Other variables are ignored.
    ///
    /// # Errors
    ///
    /// Returns `Invalid` if a recognised variable cannot be parsed.
    pub fn apply_env_overrides<I>(&mut self, vars: I) -> Result<(), ConfigError>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        for (key, value) in vars {
            let Some(name) = key.strip_prefix(ENV_PREFIX) else {
                continue;
            };
            match name {
                "WORKER_COUNT" => self.workers.count = parse_env(&key, &value)?,
                "RECEIVE_BATCH" => self.workers.receive_batch = parse_env(&key, &value)?,
                "RECEIVE_WAIT_SECONDS" => self.workers.receive_wait_seconds = parse_env(&key, &value)?,
                "REDELIVER_FAILED" => self.workers.redeliver_failed_executions = parse_env(&key, &value)?,
                "MAX_RECEIVE_COUNT" => self.queue.max_receive_count = parse_env(&key, &value)?,
                "VISIBILITY_TIMEOUT_SECONDS" => self.queue.visibility_timeout_seconds = parse_env(&key, &value)?,
                "RETENTION_SECONDS" => self.queue.retention_seconds = parse_env(&key, &value)?,
                "MAX_TRANSITIONS" => self.orchestrator.max_transitions = parse_env(&key, &value)?,
                "MIN_CONFIDENCE" => self.conversation.min_confidence = parse_env(&key, &value)?,
                "TURN_TTL_SECONDS" => self.conversation.turn_ttl_seconds = parse_env(&key, &value)?,
                "STEP_TIMEOUT_SECONDS" => {
                    self.conversation.step_timeout_seconds = Some(parse_env(&key, &value)?);
                }
                "OPERATOR_TOPIC" => self.notifications.operator_topic = value,
                "DLQ_TOPIC" => self.notifications.dlq_topic = value,
                "LOG_LEVEL" => self.logging.level = value,
                "LOG_JSON" => self.logging.json = parse_env(&key, &value)?,
                _ => debug!(variable = %key, "Ignoring unknown override"),
            }
        }
        Ok(())
    }

    /// Checks every section.
    ///
    /// # Errors
    ///
    /// Returns `Invalid` naming the first bad field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.queue
            .validate()
            .map_err(|e| ConfigError::Invalid(format!("queue: {e}")))?;
        self.conversation
            .retry
            .validate()
            .map_err(|e| ConfigError::Invalid(format!("conversation.retry: {e}")))?;

        let workers = &self.workers;
        if workers.count == 0 {
            return Err(ConfigError::Invalid("workers.count must be at least 1".to_string()));
        }
        if workers.receive_batch == 0 || workers.receive_batch > self.queue.max_batch_size {
            return Err(ConfigError::Invalid(format!(
                "workers.receive_batch must be between 1 and {}",
                self.queue.max_batch_size
            )));
        }
        if !workers.receive_wait_seconds.is_finite() || workers.receive_wait_seconds < 0.0 {
            return Err(ConfigError::Invalid(
                "workers.receive_wait_seconds must be non-negative".to_string(),
            ));
        }
        if self.orchestrator.max_transitions == 0 {
            return Err(ConfigError::Invalid(
                "orchestrator.max_transitions must be at least 1".to_string(),
            ));
        }

        let conversation = &self.conversation;
        if !(0.0..=1.0).contains(&conversation.min_confidence) {
            return Err(ConfigError::Invalid(
                "conversation.min_confidence must be within [0, 1]".to_string(),
            ));
        }
        if !conversation.turn_ttl_seconds.is_finite() || conversation.turn_ttl_seconds <= 0.0 {
            return Err(ConfigError::Invalid(
                "conversation.turn_ttl_seconds must be positive".to_string(),
            ));
        }
        if !conversation.history_window_seconds.is_finite() || conversation.history_window_seconds < 0.0 {
            return Err(ConfigError::Invalid(
                "conversation.history_window_seconds must be non-negative".to_string(),
            ));
        }
        if conversation
            .step_timeout_seconds
            .is_some_and(|t| !t.is_finite() || t <= 0.0)
        {
            return Err(ConfigError::Invalid(
                "conversation.step_timeout_seconds must be positive".to_string(),
            ));
        }
        if self.notifications.operator_topic.trim().is_empty() || self.notifications.dlq_topic.trim().is_empty() {
            return Err(ConfigError::Invalid("notification topics must not be empty".to_string()));
        }
        Ok(())
    }

    /// Graph options derived from the conversation section.
    #[must_use]
    pub fn conversation_options(&self) -> ConversationOptions {
        ConversationOptions {
            min_confidence: self.conversation.min_confidence,
            retry: self.conversation.retry.clone(),
            step_timeout_seconds: self.conversation.step_timeout_seconds,
            transcription: self.conversation.transcription,
            synthesis: self.conversation.synthesis,
        }
    }

    /// Executor settings derived from the conversation and notification sections.
    #[must_use]
    pub fn executor_settings(&self) -> ExecutorSettings {
        ExecutorSettings {
            history_window: secs_to_duration(self.conversation.history_window_seconds),
            history_turns: self.conversation.history_turns,
            operator_topic: self.notifications.operator_topic.clone(),
        }
    }

    /// Worker settings derived from the worker and notification sections.
    #[must_use]
    pub fn worker_settings(&self) -> WorkerSettings {
        WorkerSettings {
            receive_batch: self.workers.receive_batch,
            receive_wait: secs_to_duration(self.workers.receive_wait_seconds),
            redeliver_failed_executions: self.workers.redeliver_failed_executions,
            dlq_topic: self.notifications.dlq_topic.clone(),
            visibility_timeout: Some(self.queue.visibility_timeout()),
        }
    }

    /// Retention of conversation turns.
    #[must_use]
    pub fn turn_ttl(&self) -> Duration {
        secs_to_duration(self.conversation.turn_ttl_seconds)
    }
}
