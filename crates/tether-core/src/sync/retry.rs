//! Retry and backoff policy for remote calls

use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::error::SyncError;

/// Exponential backoff settings.
///
/// Attempt `n` (1-based) waits `base_delay_ms * 2^(n-1)` before the next try,
/// capped at `max_delay_ms`. Quota failures multiply the result by
/// `quota_backoff_multiplier`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub quota_backoff_multiplier: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            base_delay_ms: 500,
            max_delay_ms: 30_000,
            quota_backoff_multiplier: 4,
        }
    }
}

impl RetryPolicy {
    /// A policy that gives up after the first failure
    pub const fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            base_delay_ms: 0,
            max_delay_ms: 0,
            quota_backoff_multiplier: 1,
        }
    }

    /// Delay before retrying after failed attempt number `attempt`, or `None`
    /// when the error is not retryable or attempts are exhausted.
    pub fn delay_for(&self, attempt: u32, error: &SyncError) -> Option<Duration> {
        if !error.is_retryable() || attempt >= self.max_attempts {
            return None;
        }

        let exponent = attempt.saturating_sub(1).min(32);
        let delay = self
            .base_delay_ms
            .saturating_mul(1_u64 << exponent)
            .min(self.max_delay_ms);
        let delay = if error.is_quota() {
            delay.saturating_mul(u64::from(self.quota_backoff_multiplier))
        } else {
            delay
        };
        Some(Duration::from_millis(delay))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn transient() -> SyncError {
        SyncError::TransientNetwork("timeout".to_string())
    }

    #[test]
    fn delays_double_until_capped() {
        let policy = RetryPolicy {
            max_attempts: 10,
            base_delay_ms: 100,
            max_delay_ms: 500,
            quota_backoff_multiplier: 3,
        };

        let delays: Vec<_> = (1..=4)
            .map(|attempt| policy.delay_for(attempt, &transient()).unwrap().as_millis())
            .collect();
        assert_eq!(delays, vec![100, 200, 400, 500]);
    }

    #[test]
    fn quota_failures_back_off_longer() {
        let policy = RetryPolicy::default();
        let quota = SyncError::QuotaExceeded("429".to_string());
        assert_eq!(
            policy.delay_for(1, &quota),
            Some(Duration::from_millis(2_000))
        );
    }

    #[test]
    fn gives_up_after_max_attempts_or_fatal_errors() {
        let policy = RetryPolicy::default();
        assert!(policy.delay_for(4, &transient()).is_none());
        assert!(policy
            .delay_for(1, &SyncError::Schema("bad".to_string()))
            .is_none());
        assert!(RetryPolicy::no_retry().delay_for(1, &transient()).is_none());
    }
}
