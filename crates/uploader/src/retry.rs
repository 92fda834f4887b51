//! Retry decisions for token fetches and chunk transfers.

use std::time::Duration;

use crate::error::{FailureClass, UploadError};

/// Decides whether and when a failed attempt is retried.
///
/// `attempt` is the 1-based number of the attempt that just failed.
pub trait RetryPolicy: Send + Sync {
    fn should_retry(&self, attempt: u32, error: &UploadError) -> bool;

    /// Delay before attempt `attempt + 1`. Must not decrease as `attempt` grows.
    fn backoff_delay(&self, attempt: u32) -> Duration;
}

/// Exponential backoff settings.
#[derive(Debug, Clone, PartialEq)]
pub struct BackoffConfig {
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Maximum delay between attempts (backoff cap).
    pub max_delay: Duration,
    /// Multiplier for each subsequent attempt.
    pub factor: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(15),
            factor: 2.0,
        }
    }
}

impl BackoffConfig {
    /// Calculates the delay after attempt number `attempt` (1-based).
    ///
    /// No jitter: the sequence is non-decreasing. A factor below 1.0 is
    /// treated as 1.0.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(63) as i32;
        let factor = if self.factor.is_finite() {
            self.factor.max(1.0)
        } else {
            1.0
        };
        let secs = self.initial_delay.as_secs_f64() * factor.powi(exp);
        let capped = secs.min(self.max_delay.as_secs_f64()).max(0.0);
        Duration::from_secs_f64(capped)
    }
}

/// Retries transient and authorization failures up to `max_retries` times.
#[derive(Debug, Clone)]
pub struct DefaultRetryPolicy {
    pub max_retries: u32,
    pub backoff: BackoffConfig,
}

impl DefaultRetryPolicy {
    pub fn new(max_retries: u32, backoff: BackoffConfig) -> Self {
        Self {
            max_retries,
            backoff,
        }
    }
}

impl RetryPolicy for DefaultRetryPolicy {
    fn should_retry(&self, attempt: u32, error: &UploadError) -> bool {
        if attempt > self.max_retries {
            return false;
        }
        match error.class() {
            FailureClass::Transient | FailureClass::Unauthorized => true,
            FailureClass::Terminal => false,
        }
    }

    fn backoff_delay(&self, attempt: u32) -> Duration {
        self.backoff.delay_for_attempt(attempt)
    }
}
