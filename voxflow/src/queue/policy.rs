//! Queue policy.

use crate::utils::secs_to_duration;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Delivery limits applied by a queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueuePolicy {
    /// Deliveries allowed before a message is dead-lettered.
    #[serde(default = "default_max_receive_count")]
    pub max_receive_count: u32,
    /// How long a received message stays hidden.
    #[serde(default = "default_visibility_timeout")]
    pub visibility_timeout_seconds: f64,
    /// Age after which unprocessed messages are dropped (4 days).
    #[serde(default = "default_retention")]
    pub retention_seconds: f64,
    /// Upper bound on `max_messages` per receive.
    #[serde(default = "default_max_batch_size")]
    pub max_batch_size: usize,
}

fn default_max_receive_count() -> u32 {
    3
}

fn default_visibility_timeout() -> f64 {
    30.0
}

fn default_retention() -> f64 {
    345_600.0
}

fn default_max_batch_size() -> usize {
    10
}

impl Default for QueuePolicy {
    fn default() -> Self {
        Self {
            max_receive_count: default_max_receive_count(),
            visibility_timeout_seconds: default_visibility_timeout(),
            retention_seconds: default_retention(),
            max_batch_size: default_max_batch_size(),
        }
    }
}

impl QueuePolicy {
    /// Sets the receive budget.
    #[must_use]
    pub fn with_max_receive_count(mut self, count: u32) -> Self {
        self.max_receive_count = count;
        self
    }

    /// Sets the visibility timeout.
    #[must_use]
    pub fn with_visibility_timeout_seconds(mut self, seconds: f64) -> Self {
        self.visibility_timeout_seconds = seconds;
        self
    }

    /// Sets the retention period.
    #[must_use]
    pub fn with_retention_seconds(mut self, seconds: f64) -> Self {
        self.retention_seconds = seconds;
        self
    }

    /// Visibility timeout as a duration.
    #[must_use]
    pub fn visibility_timeout(&self) -> Duration {
        secs_to_duration(self.visibility_timeout_seconds)
    }

    /// Retention period as a duration.
    #[must_use]
    pub fn retention(&self) -> Duration {
        secs_to_duration(self.retention_seconds)
    }

    /// Validates the policy.
    ///
    /// # Errors
    ///
    /// Returns a description of the first invalid field.
    pub fn validate(&self) -> Result<(), String> {
        if self.max_receive_count == 0 {
            return Err("max_receive_count must be at least 1".to_string());
        }
        if !self.visibility_timeout_seconds.is_finite() || self.visibility_timeout_seconds < 0.0 {
            return Err("visibility_timeout_seconds must be a non-negative number".to_string());
        }
        if !self.retention_seconds.is_finite() || self.retention_seconds <= 0.0 {
            return Err("retention_seconds must be positive".to_string());
        }
        if self.max_batch_size == 0 {
            return Err("max_batch_size must be at least 1".to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let policy = QueuePolicy::default();
        assert_eq!(policy.max_receive_count, 3);
        assert_eq!(policy.visibility_timeout(), Duration::from_secs(30));
        assert_eq!(policy.retention(), Duration::from_secs(4 * 24 * 3600));
        assert!(policy.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_zero_receive_count() {
        assert!(QueuePolicy::default().with_max_receive_count(0).validate().is_err());
        assert!(QueuePolicy::default().with_retention_seconds(0.0).validate().is_err());
    }

    #[test]
    fn test_partial_json() {
        let policy: QueuePolicy = serde_json::from_str(r#"{"max_receive_count": 5}"#).unwrap();
        assert_eq!(policy.max_receive_count, 5);
        assert_eq!(policy.max_batch_size, 10);
    }
}
