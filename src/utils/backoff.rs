//! Exponential backoff utilities
//!
//! Used to pace re-polls of a stream that keeps reporting end-of-stream while
//! its peer still answers liveness probes.

use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

/// Highest exponent applied to the base delay
const MAX_EXPONENT: u32 = 10;

/// Calculate exponential backoff delay for a given attempt number.
///
/// # Arguments
///
/// * `attempt` - Current attempt number (0-indexed)
/// * `base` - Delay for the first attempt
/// * `max` - Upper bound for any delay
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use sni_proxy::utils::backoff::exponential_backoff;
///
/// let base = Duration::from_millis(10);
/// let max = Duration::from_secs(5);
/// assert_eq!(exponential_backoff(0, base, max), Duration::from_millis(10));
/// assert_eq!(exponential_backoff(3, base, max), Duration::from_millis(80));
/// ```
pub fn exponential_backoff(attempt: u32, base: Duration, max: Duration) -> Duration {
    base.saturating_mul(2u32.saturating_pow(attempt.min(MAX_EXPONENT)))
        .min(max)
}

/// Consecutive-attempt counter producing exponential delays.
///
/// Unlike a retry loop, the delay stays at its cap once reached and only
/// drops back to the base delay on [`BackoffCounter::reset`].
#[derive(Debug, Default)]
pub struct BackoffCounter {
    counter: AtomicU32,
}

impl BackoffCounter {
    /// Create a new backoff counter with zero attempts.
    #[must_use]
    pub fn new() -> Self {
        Self {
            counter: AtomicU32::new(0),
        }
    }

    /// Get the next delay and count the attempt.
    pub fn next_delay(&self, base: Duration, max: Duration) -> Duration {
        let attempt = self
            .counter
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| {
                Some(n.saturating_add(1).min(MAX_EXPONENT))
            })
            .unwrap_or(MAX_EXPONENT);
        exponential_backoff(attempt, base, max)
    }

    /// Number of attempts counted since the last reset (saturates at 10).
    pub fn attempts(&self) -> u32 {
        self.counter.load(Ordering::Relaxed)
    }

    pub fn reset(&self) {
        self.counter.store(0, Ordering::Relaxed);
    }
}
