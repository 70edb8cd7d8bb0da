//! Activity retry backoff and deadline decorator.

use std::future::Future;
use std::time::Duration;

use crate::errors::RetryableError;

/// Exponential backoff without jitter.
///
/// `attempt 0` is the first try and never waits. Attempt `n >= 1` waits
/// `base_delay * multiplier^(n-1)`, capped at `max_delay`. All arithmetic
/// saturates at the cap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    base_delay: Duration,
    max_delay: Duration,
    multiplier: u32,
}

impl BackoffPolicy {
    #[must_use]
    pub fn new(base_delay: Duration, max_delay: Duration, multiplier: u32) -> Self {
        Self {
            base_delay,
            max_delay,
            multiplier,
        }
    }

    #[must_use]
    pub fn base_delay(&self) -> Duration {
        self.base_delay
    }

    #[must_use]
    pub fn max_delay(&self) -> Duration {
        self.max_delay
    }

    #[must_use]
    pub fn multiplier(&self) -> u32 {
        self.multiplier
    }

    /// Delay before retry number `attempt`.
    #[must_use]
    pub fn get_backoff(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        let delay = self
            .multiplier
            .checked_pow(attempt - 1)
            .and_then(|factor| self.base_delay.checked_mul(factor))
            .unwrap_or(self.max_delay);
        delay.min(self.max_delay)
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::new(Duration::from_secs(10), Duration::from_secs(3600), 2)
    }
}

/// Run `future` under a deadline. An elapsed deadline becomes a
/// [`RetryableError`] naming `operation`.
///
/// # Errors
///
/// Returns [`RetryableError`] if `limit` elapses before `future` completes.
pub async fn with_deadline<F>(
    limit: Duration,
    operation: &str,
    future: F,
) -> Result<F::Output, RetryableError>
where
    F: Future,
{
    tokio::time::timeout(limit, future).await.map_err(|_| {
        tracing::warn!(operation, timeout_ms = limit.as_millis() as u64, "Deadline elapsed");
        RetryableError::new(format!("{operation} timed out after {}ms", limit.as_millis()))
    })
}
