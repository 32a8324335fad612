//! Tests for the retry policy module

use super::*;

// ============================================================================
// RetryPolicy Tests
// ============================================================================

/// Verify the documented default schedule parameters.
#[test]
fn test_retry_policy_default_values() {
    let policy = RetryPolicy::default();

    assert_eq!(policy.base_delay, Duration::from_secs(2));
    assert_eq!(policy.max_delay, Duration::from_secs(300));
    assert_eq!(policy.backoff_multiplier, 2.0);
    assert!(!policy.use_jitter);
}

/// Verify delay(0)=2s, delay(1)=4s, delay(2)=8s and the plateau at 300s.
#[test]
fn test_default_backoff_sequence() {
    let policy = RetryPolicy::default();

    assert_eq!(policy.calculate_delay(0), Duration::from_secs(2));
    assert_eq!(policy.calculate_delay(1), Duration::from_secs(4));
    assert_eq!(policy.calculate_delay(2), Duration::from_secs(8));
    assert_eq!(policy.calculate_delay(3), Duration::from_secs(16));
    assert_eq!(policy.calculate_delay(6), Duration::from_secs(128));
    assert_eq!(policy.calculate_delay(7), Duration::from_secs(256));
    assert_eq!(policy.calculate_delay(8), Duration::from_secs(300));
    assert_eq!(policy.calculate_delay(25), Duration::from_secs(300));
}

/// Verify that the schedule never decreases and never exceeds the cap.
#[test]
fn test_backoff_is_monotonic_and_capped() {
    let policy = RetryPolicy::default();
    let mut previous = Duration::ZERO;

    for n in 0..200 {
        let delay = policy.calculate_delay(n);
        assert!(delay >= previous, "delay({}) decreased", n);
        assert!(delay <= Duration::from_secs(300), "delay({}) exceeds cap", n);
        previous = delay;
    }
}

/// Verify that absurd retry counts do not overflow.
#[test]
fn test_backoff_handles_huge_retry_counts() {
    let policy = RetryPolicy::default();
    assert_eq!(policy.calculate_delay(u32::MAX), Duration::from_secs(300));
}

/// Verify that jittered delays stay within the configured band.
#[test]
fn test_jittered_delay_within_band() {
    let policy = RetryPolicy::default().with_jitter(0.25);

    for _ in 0..20 {
        let secs = policy.calculate_delay(0).as_secs_f64();
        assert!((1.5..=2.5).contains(&secs), "delay {} out of band", secs);
    }
}

/// Verify that the jitter fraction is clamped.
#[test]
fn test_jitter_percent_clamped() {
    assert_eq!(RetryPolicy::default().with_jitter(-0.5).jitter_percent, 0.0);
    assert_eq!(RetryPolicy::default().with_jitter(1.5).jitter_percent, 1.0);
}

/// Verify that the retry budget is exclusive of the limit.
#[test]
fn test_should_retry_respects_budget() {
    let policy = RetryPolicy::default();

    assert!(policy.should_retry(0, 3));
    assert!(policy.should_retry(2, 3));
    assert!(!policy.should_retry(3, 3));
    assert!(!policy.should_retry(0, 0));
}

/// Verify that a cap too large for a float-seconds Duration is returned
/// unchanged instead of overflowing.
#[test]
fn test_unrepresentable_cap_falls_back_to_max_delay() {
    let cap = Duration::from_secs(u64::MAX);
    let policy = RetryPolicy::new(Duration::from_secs(2), cap, 2.0);

    assert_eq!(policy.calculate_delay(80), cap);
    assert_eq!(policy.calculate_delay(u32::MAX), cap);
    assert_eq!(policy.calculate_delay(0), Duration::from_secs(2));
}
