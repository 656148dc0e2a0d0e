//! Retry primitives.
//!
//! This library decides *whether* and *how long* to wait before retrying a
//! failed operation. It never sleeps itself; callers own the clock, which
//! keeps the decisions deterministic under a paused test runtime.
//!
//! # Invariants
//!
//! - An operation is attempted at most `1 + max_retries` times
//! - Time spent on an operation, attempts and waits together, never exceeds
//!   `max_total_wait`
//! - Delays grow exponentially and never exceed `BackoffPolicy::max`

use std::time::Duration;

use rand::Rng;
use thiserror::Error;

/// Invalid retry configuration.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum RetryConfigError {
    #[error("jitter must be within 0.0..=1.0, got {0}")]
    Jitter(f64),

    #[error("backoff base {base:?} exceeds max {max:?}")]
    BaseAboveMax { base: Duration, max: Duration },

    #[error("attempt timeout must be non-zero")]
    ZeroAttemptTimeout,

    #[error("max total wait must be non-zero")]
    ZeroTotalWait,
}

// =============================================================================
// Backoff Policy
// =============================================================================

/// Exponential backoff configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct BackoffPolicy {
    /// Delay before the first retry.
    pub base: Duration,

    /// Upper bound for any single delay.
    pub max: Duration,

    /// Jitter factor (0.0 to 1.0), applied symmetrically around the delay.
    pub jitter: f64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_millis(100),
            max: Duration::from_secs(5),
            jitter: 0.25,
        }
    }
}

impl BackoffPolicy {
    /// Delay before retry number `retry` (0-based).
    pub fn delay(&self, retry: u32) -> Duration {
        let max_ns = self.max.as_nanos();
        let delay_ns = self
            .base
            .as_nanos()
            .saturating_mul(1u128 << retry.min(100))
            .min(max_ns);

        if self.jitter <= 0.0 {
            return Duration::from_nanos(delay_ns as u64);
        }

        let delay = delay_ns as f64;
        let spread = delay * self.jitter;
        let jittered = delay + rand::rng().random_range(-spread..=spread);

        Duration::from_nanos(jittered.clamp(0.0, max_ns as f64) as u64)
    }
}

// =============================================================================
// Retry Policy
// =============================================================================

/// Bounds for retrying a single operation.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,

    /// Upper bound on the whole operation, measured from the first attempt.
    /// Covers both attempts and the waits between them.
    pub max_total_wait: Duration,

    /// Timeout applied to each attempt on its own. Clamped to whatever is
    /// left of `max_total_wait`.
    pub attempt_timeout: Duration,

    pub backoff: BackoffPolicy,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            max_total_wait: DEFAULT_MAX_TOTAL_WAIT,
            attempt_timeout: DEFAULT_ATTEMPT_TIMEOUT,
            backoff: BackoffPolicy::default(),
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries.
    pub fn no_retry(attempt_timeout: Duration) -> Self {
        Self {
            max_retries: 0,
            max_total_wait: attempt_timeout,
            attempt_timeout,
            backoff: BackoffPolicy::default(),
        }
    }

    pub fn validate(&self) -> Result<(), RetryConfigError> {
        if !(0.0..=1.0).contains(&self.backoff.jitter) {
            return Err(RetryConfigError::Jitter(self.backoff.jitter));
        }
        if self.backoff.base > self.backoff.max {
            return Err(RetryConfigError::BaseAboveMax {
                base: self.backoff.base,
                max: self.backoff.max,
            });
        }
        if self.attempt_timeout.is_zero() {
            return Err(RetryConfigError::ZeroAttemptTimeout);
        }
        if self.max_total_wait.is_zero() {
            return Err(RetryConfigError::ZeroTotalWait);
        }
        Ok(())
    }

    /// Starts tracking a fresh operation under this policy.
    pub fn budget(&self) -> RetryBudget<'_> {
        RetryBudget {
            policy: self,
            retries: 0,
            waited: Duration::ZERO,
        }
    }
}

/// Why a retry budget refused another attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GiveUp {
    /// `max_retries` retries have already been scheduled.
    MaxRetries,
    /// The next delay would use up what is left of `max_total_wait`.
    WaitBudget,
}

/// Outcome of asking a budget for another attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Wait this long, then try again.
    Retry(Duration),
    GiveUp(GiveUp),
}

/// Retry state for one operation.
#[derive(Debug, Clone)]
pub struct RetryBudget<'a> {
    policy: &'a RetryPolicy,
    retries: u32,
    waited: Duration,
}

impl RetryBudget<'_> {
    /// Records a failed attempt and decides what to do next.
    ///
    /// `elapsed` is the time since the first attempt started. A retry is
    /// only scheduled if some budget would still be left once its delay
    /// has passed.
    pub fn on_failure(&mut self, elapsed: Duration) -> RetryDecision {
        if self.retries >= self.policy.max_retries {
            return RetryDecision::GiveUp(GiveUp::MaxRetries);
        }

        let delay = self.policy.backoff.delay(self.retries);
        if elapsed.saturating_add(delay) >= self.policy.max_total_wait {
            return RetryDecision::GiveUp(GiveUp::WaitBudget);
        }

        self.retries += 1;
        self.waited += delay;
        RetryDecision::Retry(delay)
    }

    /// Attempts made so far, counting the first.
    pub fn attempts(&self) -> u32 {
        self.retries + 1
    }

    /// Total wait scheduled so far.
    pub fn waited(&self) -> Duration {
        self.waited
    }

    /// Time left of `max_total_wait` after `elapsed`.
    pub fn remaining(&self, elapsed: Duration) -> Duration {
        self.policy.max_total_wait.saturating_sub(elapsed)
    }

    /// Timeout for an attempt starting after `elapsed`.
    pub fn attempt_timeout(&self, elapsed: Duration) -> Duration {
        self.policy.attempt_timeout.min(self.remaining(elapsed))
    }
}

/// Default retry count per publish.
pub const DEFAULT_MAX_RETRIES: u32 = 5;

/// Default bound on the total time spent per publish.
pub const DEFAULT_MAX_TOTAL_WAIT: Duration = Duration::from_secs(30);

/// Default per-attempt timeout.
pub const DEFAULT_ATTEMPT_TIMEOUT: Duration = Duration::from_secs(10);
