//! Decision model: what happens to a task after its handler returns.
//!
//! The Decider is a pure function of (task, handler result). Applying the
//! decision to the record and the store is the processor's job.

use std::time::Duration;

use super::errors::JobError;
use super::task::{DEFAULT_MAX_ATTEMPTS, TaskRecord};

/// Backoff policy for failed tasks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Delay unit; the first retry waits `base_delay * multiplier`.
    pub base_delay: Duration,

    /// Backoff multiplier for exponential backoff.
    pub multiplier: u32,

    /// Ceiling given to newly enqueued tasks.
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    /// 30s base, x4: 2 min, 8 min, 32 min, ...
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(30),
            multiplier: 4,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }
}

impl RetryPolicy {
    /// Delay before the next run, given the attempt count *after* the failure
    /// was recorded: `base_delay * multiplier^attempt`.
    ///
    /// Saturates instead of overflowing for absurd attempt counts.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base_ms = u64::try_from(self.base_delay.as_millis()).unwrap_or(u64::MAX);
        let factor = u64::from(self.multiplier)
            .checked_pow(attempt)
            .unwrap_or(u64::MAX);
        Duration::from_millis(base_ms.saturating_mul(factor))
    }
}

/// The next action to take for a task.
#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    /// Handler succeeded.
    Complete,

    /// Put the task back in line after `delay`.
    Retry { delay: Duration, reason: String },

    /// Give up for good.
    Fail { reason: String },
}

/// Trait for deciding the next action based on task state and handler result.
pub trait Decider: Send + Sync {
    /// `task.attempt` is the count *before* this execution's failure is recorded.
    fn decide(&self, task: &TaskRecord, result: &Result<(), JobError>) -> Decision;
}

/// Retries transient errors with exponential backoff until `max_attempts`.
/// Everything else fails on first occurrence.
#[derive(Debug, Clone, Default)]
pub struct DefaultDecider {
    retry_policy: RetryPolicy,
}

impl DefaultDecider {
    pub fn new(retry_policy: RetryPolicy) -> Self {
        Self { retry_policy }
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry_policy
    }
}

impl Decider for DefaultDecider {
    fn decide(&self, task: &TaskRecord, result: &Result<(), JobError>) -> Decision {
        let err = match result {
            Ok(()) => return Decision::Complete,
            Err(err) => err,
        };

        let attempt = task.attempt.saturating_add(1);
        if !err.is_retryable() {
            return Decision::Fail {
                reason: err.to_string(),
            };
        }
        if attempt >= task.max_attempts {
            return Decision::Fail {
                reason: format!(
                    "max attempts reached ({attempt}/{}): {err}",
                    task.max_attempts
                ),
            };
        }

        let delay = self.retry_policy.delay_for_attempt(attempt);
        Decision::Retry {
            delay,
            reason: err.to_string(),
        }
    }
}
