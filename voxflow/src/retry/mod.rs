//! Retry policy engine.
//!
//! [`should_retry`] is a pure function of the policy, the attempt that just
//! failed and its error. Jitter is applied separately by the caller so the
//! decision itself stays deterministic.

use crate::core::{ErrorCategory, StepError};
use crate::utils::secs_to_duration;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::time::Duration;

/// Jitter strategy to prevent thundering herd.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JitterStrategy {
    /// No jitter
    #[default]
    None,
    /// Random from 0 to delay
    Full,
    /// Half fixed, half random
    Equal,
}

/// Per-step retry configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum attempts, including the first one.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Delay before the first retry, in seconds.
    #[serde(default = "default_base_interval")]
    pub base_interval_seconds: f64,
    /// Multiplier applied per attempt (multiplicative backoff).
    #[serde(default = "default_backoff_rate")]
    pub backoff_rate: f64,
    /// Upper bound on any single delay.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_delay_seconds: Option<f64>,
    /// Error categories that may be retried.
    #[serde(default = "default_retry_on")]
    pub retry_on: HashSet<ErrorCategory>,
    /// Jitter applied to computed delays.
    #[serde(default)]
    pub jitter: JitterStrategy,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_base_interval() -> f64 {
    1.0
}

fn default_backoff_rate() -> f64 {
    2.0
}

fn default_retry_on() -> HashSet<ErrorCategory> {
    ErrorCategory::DEFAULT_RETRYABLE.into_iter().collect()
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_interval_seconds: default_base_interval(),
            backoff_rate: default_backoff_rate(),
            max_delay_seconds: None,
            retry_on: default_retry_on(),
            jitter: JitterStrategy::None,
        }
    }
}

impl RetryPolicy {
    /// Creates a policy with default settings.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the maximum attempts.
    #[must_use]
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    /// Sets the base interval.
    #[must_use]
    pub fn with_base_interval_seconds(mut self, seconds: f64) -> Self {
        self.base_interval_seconds = seconds;
        self
    }

    /// Sets the backoff rate.
    #[must_use]
    pub fn with_backoff_rate(mut self, rate: f64) -> Self {
        self.backoff_rate = rate;
        self
    }

    /// Caps individual delays.
    #[must_use]
    pub fn with_max_delay_seconds(mut self, seconds: f64) -> Self {
        self.max_delay_seconds = Some(seconds);
        self
    }

    /// Replaces the set of retryable categories.
    #[must_use]
    pub fn retrying_on(mut self, categories: impl IntoIterator<Item = ErrorCategory>) -> Self {
        self.retry_on = categories.into_iter().collect();
        self
    }

    /// Sets the jitter strategy.
    #[must_use]
    pub fn with_jitter(mut self, jitter: JitterStrategy) -> Self {
        self.jitter = jitter;
        self
    }

    /// Returns true if errors of this category may be retried.
    #[must_use]
    pub fn is_retryable(&self, category: ErrorCategory) -> bool {
        self.retry_on.contains(&category)
    }

    /// Delay before the attempt following `attempt` (1-based):
    /// `base * rate^(attempt - 1)`, capped by `max_delay_seconds`.
    #[must_use]
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt.saturating_sub(1)).unwrap_or(i32::MAX);
        let mut seconds = self.base_interval_seconds * self.backoff_rate.powi(exponent);
        if let Some(cap) = self.max_delay_seconds {
            seconds = seconds.min(cap);
        }
        secs_to_duration(seconds)
    }

    /// Validates the policy.
    ///
    /// # Errors
    ///
    /// Returns a description of the first invalid field.
    pub fn validate(&self) -> Result<(), String> {
        if self.max_attempts == 0 {
            return Err("max_attempts must be at least 1".to_string());
        }
        if !self.base_interval_seconds.is_finite() || self.base_interval_seconds < 0.0 {
            return Err("base_interval_seconds must be a non-negative number".to_string());
        }
        if !self.backoff_rate.is_finite() || self.backoff_rate < 1.0 {
            return Err("backoff_rate must be at least 1.0".to_string());
        }
        if let Some(cap) = self.max_delay_seconds {
            if !cap.is_finite() || cap < 0.0 {
                return Err("max_delay_seconds must be a non-negative number".to_string());
            }
        }
        Ok(())
    }
}

/// Outcome of a retry decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryDecision {
    /// Whether to run the step again.
    pub retry: bool,
    /// How long to wait first (zero when not retrying).
    pub delay: Duration,
}

impl RetryDecision {
    /// Retry after the given delay.
    #[must_use]
    pub fn retry_after(delay: Duration) -> Self {
        Self { retry: true, delay }
    }

    /// Do not retry.
    #[must_use]
    pub fn give_up() -> Self {
        Self {
            retry: false,
            delay: Duration::ZERO,
        }
    }
}

/// Decides whether the failed `attempt` (1-based) should be retried.
///
/// Returns `give_up` once `attempt >= max_attempts` regardless of category,
/// and immediately for categories outside `retry_on`.
#[must_use]
pub fn should_retry(policy: &RetryPolicy, attempt: u32, error: &StepError) -> RetryDecision {
    if attempt >= policy.max_attempts {
        return RetryDecision::give_up();
    }
    if !policy.is_retryable(error.category) {
        return RetryDecision::give_up();
    }
    RetryDecision::retry_after(policy.delay_after(attempt))
}

/// Applies a jitter strategy to a computed delay.
#[must_use]
pub fn apply_jitter(delay: Duration, strategy: JitterStrategy) -> Duration {
    let millis = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
    match strategy {
        JitterStrategy::None => delay,
        JitterStrategy::Full => {
            if millis == 0 {
                delay
            } else {
                Duration::from_millis(rand::thread_rng().gen_range(0..=millis))
            }
        }
        JitterStrategy::Equal => {
            let half = millis / 2;
            if half == 0 {
                delay
            } else {
                Duration::from_millis(half + rand::thread_rng().gen_range(0..=half))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> RetryPolicy {
        RetryPolicy::new()
            .with_max_attempts(3)
            .with_base_interval_seconds(2.0)
            .with_backoff_rate(2.0)
    }

    #[test]
    fn test_policy_default() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_attempts, 3);
        assert!(policy.is_retryable(ErrorCategory::TransientExternal));
        assert!(policy.is_retryable(ErrorCategory::StepTimeout));
        assert!(!policy.is_retryable(ErrorCategory::PermanentValidation));
        assert_eq!(policy.jitter, JitterStrategy::None);
    }

    #[test]
    fn test_multiplicative_backoff() {
        let policy = policy();
        assert_eq!(policy.delay_after(1), Duration::from_secs(2));
        assert_eq!(policy.delay_after(2), Duration::from_secs(4));
        assert_eq!(policy.delay_after(3), Duration::from_secs(8));
    }

    #[test]
    fn test_delay_capped() {
        let policy = policy().with_max_delay_seconds(5.0);
        assert_eq!(policy.delay_after(10), Duration::from_secs(5));
    }

    #[test]
    fn test_should_retry_until_exhausted() {
        let policy = policy();
        let err = StepError::timeout("slow");

        let first = should_retry(&policy, 1, &err);
        assert!(first.retry);
        assert_eq!(first.delay, Duration::from_secs(2));

        let second = should_retry(&policy, 2, &err);
        assert!(second.retry);
        assert_eq!(second.delay, Duration::from_secs(4));

        assert_eq!(should_retry(&policy, 3, &err), RetryDecision::give_up());
        assert_eq!(should_retry(&policy, 7, &err), RetryDecision::give_up());
    }

    #[test]
    fn test_permanent_error_not_retried() {
        let decision = should_retry(&policy(), 1, &StepError::validation("bad input"));
        assert!(!decision.retry);
        assert_eq!(decision.delay, Duration::ZERO);
    }

    #[test]
    fn test_timeout_excluded_by_config() {
        let policy = policy().retrying_on([ErrorCategory::TransientExternal]);
        assert!(!should_retry(&policy, 1, &StepError::timeout("slow")).retry);
        assert!(should_retry(&policy, 1, &StepError::transient("down")).retry);
    }

    #[test]
    fn test_validate() {
        assert!(policy().validate().is_ok());
        assert!(policy().with_max_attempts(0).validate().is_err());
        assert!(policy().with_backoff_rate(0.5).validate().is_err());
        assert!(policy().with_base_interval_seconds(f64::NAN).validate().is_err());
        assert!(policy().with_max_delay_seconds(-1.0).validate().is_err());
    }

    #[test]
    fn test_full_jitter_bounds() {
        let delay = Duration::from_millis(100);
        for _ in 0..50 {
            assert!(apply_jitter(delay, JitterStrategy::Full) <= delay);
        }
    }

    #[test]
    fn test_equal_jitter_bounds() {
        let delay = Duration::from_millis(100);
        for _ in 0..50 {
            let jittered = apply_jitter(delay, JitterStrategy::Equal);
            assert!(jittered >= Duration::from_millis(50));
            assert!(jittered <= delay);
        }
    }

    #[test]
    fn test_policy_deserialize_defaults() {
        let policy: RetryPolicy = serde_json::from_str(r#"{"max_attempts": 5}"#).unwrap();
        assert_eq!(policy.max_attempts, 5);
        assert!((policy.backoff_rate - 2.0).abs() < f64::EPSILON);
        assert!(policy.is_retryable(ErrorCategory::TransientExternal));
    }
}
