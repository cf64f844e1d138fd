//! Retry decisions for failed stages.
//!
//! `decide` is a pure function of the error kind and the stage's retry
//! bookkeeping, so the orchestrator's retry behaviour can be tested without
//! any I/O.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::domain::{ErrorKind, RetryState};

/// What to do after a failed attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Re-enter the same stage after the delay
    Retry(Duration),

    /// Give up; the file becomes Failed
    Abort,
}

/// Retry policy applied to every stage
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum number of attempts per stage (including first try)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Initial delay between retries in milliseconds
    #[serde(default = "default_initial_delay")]
    pub initial_delay_ms: u64,

    /// Maximum delay between retries in milliseconds
    #[serde(default = "default_max_delay")]
    pub max_delay_ms: u64,

    /// Backoff multiplier (delay *= multiplier after each retry)
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    /// Fixed delay before the single retry allowed after a quota error
    #[serde(default = "default_quota_delay")]
    pub quota_delay_ms: u64,
}

fn default_max_attempts() -> u32 {
    3
}
fn default_initial_delay() -> u64 {
    1000
}
fn default_max_delay() -> u64 {
    30000
}
fn default_backoff_multiplier() -> f64 {
    2.0
}
fn default_quota_delay() -> u64 {
    60000
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay_ms: default_initial_delay(),
            max_delay_ms: default_max_delay(),
            backoff_multiplier: default_backoff_multiplier(),
            quota_delay_ms: default_quota_delay(),
        }
    }
}

impl RetryPolicy {
    /// Decide whether the attempt that just failed with `kind` should be
    /// retried. `state.attempt_count` is that attempt's 1-indexed number.
    ///
    /// Quota errors get one retry per stage, counted separately, so a quota
    /// error after a transient one is still retried.
    pub fn decide(&self, kind: ErrorKind, state: &RetryState) -> RetryDecision {
        let attempt = state.attempt_count;
        if !self.should_retry(attempt) {
            return RetryDecision::Abort;
        }

        match kind {
            ErrorKind::Transient => RetryDecision::Retry(self.delay_for_attempt(attempt)),
            ErrorKind::QuotaExceeded if state.quota_retries == 0 => {
                RetryDecision::Retry(Duration::from_millis(self.quota_delay_ms))
            }
            ErrorKind::QuotaExceeded
            | ErrorKind::Auth
            | ErrorKind::Permanent
            | ErrorKind::Cancelled => RetryDecision::Abort,
        }
    }

    /// Calculate delay for a specific attempt (1-indexed)
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            return Duration::from_millis(self.initial_delay_ms.min(self.max_delay_ms));
        }

        let delay = self.initial_delay_ms as f64
            * self.backoff_multiplier.powi((attempt - 1) as i32);

        let capped = delay.min(self.max_delay_ms as f64) as u64;
        Duration::from_millis(capped)
    }

    /// Check if we should retry based on attempt count
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }
}
