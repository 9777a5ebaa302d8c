// src/resilience/tests/exponential_backoff_tests.rs

use crate::resilience::{ExponentialBackoff, RetryConfig};
use std::time::Duration;

fn config(max_retries: usize, initial_ms: u64, max_ms: u64, multiplier: f64, jitter: bool) -> RetryConfig {
    RetryConfig {
        max_retries,
        initial_backoff: Duration::from_millis(initial_ms),
        max_backoff: Duration::from_millis(max_ms),
        backoff_multiplier: multiplier,
        use_jitter: jitter,
        ..RetryConfig::default()
    }
}

#[test]
fn test_default_backoff_doubles_from_two_seconds() {
    let mut backoff = ExponentialBackoff::new(RetryConfig::default());

    assert_eq!(backoff.next_backoff(), Some(Duration::from_secs(2)));
    assert_eq!(backoff.next_backoff(), Some(Duration::from_secs(4)));
    assert_eq!(backoff.next_backoff(), Some(Duration::from_secs(8)));

    // three retries, four attempts in total
    assert_eq!(backoff.next_backoff(), None);
}

#[test]
fn test_backoff_respects_max_backoff() {
    let mut backoff = ExponentialBackoff::new(config(5, 100, 300, 2.0, false));

    assert_eq!(backoff.next_backoff().unwrap(), Duration::from_millis(100));
    assert_eq!(backoff.next_backoff().unwrap(), Duration::from_millis(200));

    // 400ms would exceed the cap
    assert_eq!(backoff.next_backoff().unwrap(), Duration::from_millis(300));
    assert_eq!(backoff.next_backoff().unwrap(), Duration::from_millis(300));
}

#[test]
fn test_jitter_stays_within_half_to_full_delay() {
    let mut backoff = ExponentialBackoff::new(config(3, 100, 10_000, 2.0, true));

    let first = backoff.next_backoff().unwrap();
    assert!(first >= Duration::from_millis(50) && first <= Duration::from_millis(100));

    let second = backoff.next_backoff().unwrap();
    assert!(second >= Duration::from_millis(100) && second <= Duration::from_millis(200));

    let third = backoff.next_backoff().unwrap();
    assert!(third >= Duration::from_millis(200) && third <= Duration::from_millis(400));
}

#[test]
fn test_reset_restarts_backoff_sequence() {
    let mut backoff = ExponentialBackoff::new(config(2, 100, 10_000, 2.0, false));

    assert_eq!(backoff.next_backoff().unwrap(), Duration::from_millis(100));
    assert_eq!(backoff.next_backoff().unwrap(), Duration::from_millis(200));
    assert_eq!(backoff.next_backoff(), None);

    backoff.reset();
    assert_eq!(backoff.next_backoff().unwrap(), Duration::from_millis(100));
}

#[test]
fn test_zero_retries_never_backs_off() {
    let mut backoff = ExponentialBackoff::new(config(0, 100, 10_000, 2.0, false));
    assert_eq!(backoff.next_backoff(), None);
}

#[test]
fn test_retryable_statuses() {
    let config = RetryConfig::default();

    assert!(config.is_retryable_status(500));
    assert!(config.is_retryable_status(503));
    assert!(config.is_retryable_status(408));
    assert!(config.is_retryable_status(429));
    assert!(!config.is_retryable_status(400));
    assert!(!config.is_retryable_status(404));
}
