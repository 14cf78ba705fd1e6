//! Retry policy: per-attempt decisions on whether and how long to wait.
//!
//! The policy is pure decision logic over a classified error and the current
//! attempt number; the pipeline performs the actual sleeping.

use crate::Error;
use rand::Rng;
use std::time::Duration;

/// Decides, for a failed attempt, whether to retry and how long to wait.
///
/// Eligible failures (network errors, timeouts, 5xx responses) back off with
/// `base_delay * 2^attempt` plus a uniformly random jitter of up to one base
/// unit, to avoid thundering-herd synchronization across concurrent callers
/// recovering together. A rate-limit response carrying `Retry-After` waits
/// exactly that long, bypassing the exponential formula.
///
/// # Examples
///
/// ```
/// use breakwater::RetryPolicy;
/// use std::time::Duration;
///
/// // Defaults: 300ms base, 3 retries, jitter on.
/// let policy = RetryPolicy::default();
/// assert_eq!(policy.max_retries(), 3);
///
/// let tight = RetryPolicy::new(Duration::from_millis(100), 2).without_jitter();
/// # let _ = tight;
/// ```
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    base_delay: Duration,
    max_retries: usize,
    jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(300),
            max_retries: 3,
            jitter: true,
        }
    }
}

impl RetryPolicy {
    /// Creates a policy with the given base delay and retry cap, jitter on.
    pub fn new(base_delay: Duration, max_retries: usize) -> Self {
        Self {
            base_delay,
            max_retries,
            jitter: true,
        }
    }

    /// Disables jitter. Useful in tests that assert exact delays.
    pub fn without_jitter(mut self) -> Self {
        self.jitter = false;
        self
    }

    /// Returns the configured retry cap.
    pub fn max_retries(&self) -> usize {
        self.max_retries
    }

    /// Returns the delay before the next retry, or `None` to stop.
    ///
    /// `attempt` counts prior failed attempts, starting at 0 for the first
    /// failure. After `max_retries` failures the last classified error
    /// surfaces to the caller unchanged.
    pub fn delay_for(&self, error: &Error, attempt: usize) -> Option<Duration> {
        if attempt >= self.max_retries {
            return None;
        }

        // Server-directed delay wins over the exponential formula.
        if let Error::RateLimit {
            retry_after: Some(delay),
        } = error
        {
            return Some(*delay);
        }

        if !error.is_retryable() {
            return None;
        }

        let multiplier = 2u32.saturating_pow(attempt as u32);
        let backoff = self.base_delay.saturating_mul(multiplier);
        if self.jitter {
            let jitter_ms = rand::thread_rng().gen_range(0..self.base_delay.as_millis().max(1));
            Some(backoff + Duration::from_millis(jitter_ms as u64))
        } else {
            Some(backoff)
        }
    }
}
