//! # Retry Policy Module
//!
//! Exponential backoff for redelivery of tasks whose handler reported a
//! retryable failure: `delay(n) = min(base * multiplier^n, max_delay)` where
//! `n` is the zero-based retry count.
//!
//! Jitter is available but disabled by default so that the documented
//! schedule (2s, 4s, 8s, ... capped at 300s) holds exactly.

use rand::Rng;
use std::time::Duration;

/// Retry policy configuration for exponential backoff
///
/// # Examples
///
/// ```rust
/// use queue_runtime::RetryPolicy;
/// use std::time::Duration;
///
/// let policy = RetryPolicy::default();
/// assert_eq!(policy.calculate_delay(0), Duration::from_secs(2));
/// assert_eq!(policy.calculate_delay(20), Duration::from_secs(300));
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Delay before the first retry
    pub base_delay: Duration,

    /// Maximum delay between retries
    pub max_delay: Duration,

    /// Exponential backoff multiplier
    pub backoff_multiplier: f64,

    /// Whether to add jitter to delays
    pub use_jitter: bool,

    /// Jitter range as a fraction of the delay (0.25 = ±25%)
    pub jitter_percent: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(300),
            backoff_multiplier: 2.0,
            use_jitter: false,
            jitter_percent: 0.25,
        }
    }
}

impl RetryPolicy {
    /// Create a new retry policy without jitter
    pub fn new(base_delay: Duration, max_delay: Duration, backoff_multiplier: f64) -> Self {
        Self {
            base_delay,
            max_delay,
            backoff_multiplier,
            ..Self::default()
        }
    }

    /// Enable jitter with the given fraction, clamped to [0.0, 1.0]
    pub fn with_jitter(mut self, percent: f64) -> Self {
        self.use_jitter = true;
        self.jitter_percent = percent.clamp(0.0, 1.0);
        self
    }

    /// Calculate the delay before retry number `retry_count` (0-based).
    ///
    /// The result is monotonically non-decreasing in `retry_count` when
    /// jitter is off and never exceeds `max_delay` (jitter may add up to
    /// `jitter_percent` on top of the cap).
    pub fn calculate_delay(&self, retry_count: u32) -> Duration {
        let exponent = retry_count.min(i32::MAX as u32) as i32;
        let uncapped_secs = self.base_delay.as_secs_f64() * self.backoff_multiplier.powi(exponent);

        // powi overflows to infinity for large exponents; min() folds that into the cap
        let capped_secs = uncapped_secs.min(self.max_delay.as_secs_f64());

        let final_secs = if self.use_jitter {
            Self::add_jitter(capped_secs, self.jitter_percent)
        } else {
            capped_secs
        };

        // A cap beyond Duration's range cannot be represented as seconds
        Duration::try_from_secs_f64(final_secs).unwrap_or(self.max_delay)
    }

    /// Whether a task that has been retried `retry_count` times may be retried again
    pub fn should_retry(&self, retry_count: u32, max_retry: u32) -> bool {
        retry_count < max_retry
    }

    fn add_jitter(delay_secs: f64, jitter_percent: f64) -> f64 {
        let jitter_range = delay_secs * jitter_percent;
        if jitter_range <= 0.0 {
            return delay_secs;
        }

        let jitter = rand::thread_rng().gen_range(-jitter_range..=jitter_range);
        (delay_secs + jitter).max(0.0)
    }
}

#[cfg(test)]
#[path = "retry_tests.rs"]
mod tests;
