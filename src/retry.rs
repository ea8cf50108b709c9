//! Retry bookkeeping shared by the queue scheduler and the worker OCC loop.
//!
//! Both consumers use the same exponential curve
//! `backoff(n) = min(base_retry_delay * 2^(n-1), max_retry_delay)`;
//! the scheduler reads it at second scale when stamping `next_retry_after`,
//! the worker loop at millisecond scale between optimistic-lock attempts.

use std::time::Duration;

/// Bounds for exponential backoff between retry attempts.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Maximum number of retry attempts before an item is dead-lettered.
    pub max_retries: u32,
    /// Unitless backoff base (doubles on each retry).
    pub base_retry_delay: u64,
    /// Cap on exponential growth.
    pub max_retry_delay: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 5,
            base_retry_delay: 2,
            max_retry_delay: 300,
        }
    }
}

impl RetryPolicy {
    /// Backoff value for the n-th attempt (1-based), in policy units.
    pub fn backoff(&self, attempt: u32) -> u64 {
        let exponent = attempt.saturating_sub(1).min(63);
        let delay = self
            .base_retry_delay
            .saturating_mul(1u64.checked_shl(exponent).unwrap_or(u64::MAX));
        delay.min(self.max_retry_delay)
    }

    /// Backoff read at second scale, used for `next_retry_after` stamps.
    pub fn backoff_secs(&self, attempt: u32) -> i64 {
        self.backoff(attempt) as i64
    }

    /// Backoff read at millisecond scale, used between OCC attempts.
    pub fn backoff_duration_ms(&self, attempt: u32) -> Duration {
        Duration::from_millis(self.backoff(attempt))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_per_attempt() {
        let policy = RetryPolicy {
            max_retries: 5,
            base_retry_delay: 2,
            max_retry_delay: 300,
        };

        assert_eq!(policy.backoff(1), 2);
        assert_eq!(policy.backoff(2), 4);
        assert_eq!(policy.backoff(3), 8);
        assert_eq!(policy.backoff(4), 16);
    }

    #[test]
    fn backoff_is_capped() {
        let policy = RetryPolicy {
            max_retries: 20,
            base_retry_delay: 2,
            max_retry_delay: 300,
        };

        assert_eq!(policy.backoff(12), 300);
        assert_eq!(policy.backoff(20), 300);
    }

    #[test]
    fn backoff_survives_large_attempt_counts() {
        let policy = RetryPolicy {
            max_retries: u32::MAX,
            base_retry_delay: 2,
            max_retry_delay: u64::MAX,
        };

        // 2 * 2^63 would overflow; the multiply saturates instead of
        // wrapping.
        assert_eq!(policy.backoff(100), u64::MAX);
    }

    #[test]
    fn millisecond_and_second_scales_agree() {
        let policy = RetryPolicy::default();
        assert_eq!(
            policy.backoff_duration_ms(3),
            Duration::from_millis(policy.backoff_secs(3) as u64)
        );
    }
}
