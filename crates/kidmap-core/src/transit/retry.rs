//! Exponential backoff for transit fetches.
//!
//! Only transient failures are retried. Validation failures and permanent
//! rejections give up on the first attempt.

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::api::FetchError;

/// How failed fetches are retried.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum number of fetch attempts, including the first one.
    pub max_attempts: u32,

    /// Delay before the first retry; doubles on every further retry.
    pub base_delay: Duration,

    /// Upper bound for any single delay.
    pub max_delay: Duration,

    /// Jitter fraction (0.0 to 1.0) applied symmetrically to each delay.
    pub jitter_factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(8),
            jitter_factor: 0.2,
        }
    }
}

/// Outcome of evaluating a failed attempt against the policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    /// Sleep for `delay`, then try again.
    Retry { delay: Duration },
    /// Stop and surface the error.
    GiveUp { reason: String },
}

impl RetryPolicy {
    /// A policy that never retries.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Decide what to do after `attempt` (1-based) failed with `error`.
    pub fn decide(&self, attempt: u32, error: &FetchError) -> RetryDecision {
        if !error.is_transient() {
            return RetryDecision::GiveUp {
                reason: format!("non-retryable error: {}", error),
            };
        }

        if attempt >= self.max_attempts {
            return RetryDecision::GiveUp {
                reason: format!("maximum attempts ({}) exceeded", self.max_attempts),
            };
        }

        RetryDecision::Retry {
            delay: self.delay_for(attempt),
        }
    }

    /// Delay after failed attempt number `attempt` (1-based), jitter included.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(20);
        let multiplier = 2_u32.saturating_pow(exponent);
        let base = self.base_delay.saturating_mul(multiplier).min(self.max_delay);
        self.apply_jitter(base)
    }

    fn apply_jitter(&self, delay: Duration) -> Duration {
        let factor = self.jitter_factor.clamp(0.0, 1.0);
        if factor == 0.0 || delay.is_zero() {
            return delay;
        }
        let spread = rand::thread_rng().gen_range(-factor..=factor);
        let jittered = delay.as_secs_f64() * (1.0 + spread);
        Duration::from_secs_f64(jittered.max(0.0)).min(self.max_delay)
    }
}
