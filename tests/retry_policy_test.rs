//! Backoff curve shared by the queue scheduler and the worker OCC loop.

use std::time::Duration;

use ledger_rs::retry::RetryPolicy;

#[test]
fn scheduler_backoff_doubles_until_the_cap() {
    let policy = RetryPolicy {
        max_retries: 8,
        base_retry_delay: 2,
        max_retry_delay: 300,
    };

    let observed: Vec<i64> = (1..=9).map(|n| policy.backoff_secs(n)).collect();
    assert_eq!(observed, vec![2, 4, 8, 16, 32, 64, 128, 256, 300]);
}

#[test]
fn worker_backoff_reads_the_same_curve_in_milliseconds() {
    let policy = RetryPolicy {
        max_retries: 5,
        base_retry_delay: 2,
        max_retry_delay: 300,
    };

    assert_eq!(policy.backoff_duration_ms(1), Duration::from_millis(2));
    assert_eq!(policy.backoff_duration_ms(4), Duration::from_millis(16));
    assert_eq!(policy.backoff_duration_ms(20), Duration::from_millis(300));
}

#[test]
fn default_policy_matches_engine_defaults() {
    let policy = RetryPolicy::default();
    assert_eq!(policy.max_retries, 5);
    assert_eq!(policy.backoff_secs(1), 2);
    assert_eq!(policy.backoff_secs(u32::MAX), 300);
}
