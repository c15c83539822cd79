//! Bounded step-count retry at a fixed interval.
//!
//! A [`RetryPolicy`] is an immutable value built once from an interval and an
//! overall timeout and handed to every call site that retries. The number of
//! attempts is `floor(timeout / interval)`, which bounds the total wall-clock
//! time spent retrying without any global backoff state.
//!
//! # Example
//!
//! ```ignore
//! use ca_rotation::retry::RetryPolicy;
//!
//! let policy = RetryPolicy::new(Duration::from_secs(10), Duration::from_secs(120));
//! let status = policy
//!     .retry(&cancel, || async { cloud.get_virtual_machine_power_state("rg", "vm-0").await })
//!     .await?;
//! ```

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::{Error, Result};

/// Decides whether a failed attempt should be retried.
pub type RetryPredicate = Arc<dyn Fn(&Error) -> bool + Send + Sync>;

/// Number of attempts that fit in `timeout` at a fixed `interval`.
///
/// Always at least one attempt, so a timeout shorter than the interval still
/// calls the operation once.
pub fn step_count(interval: Duration, timeout: Duration) -> u32 {
    if interval.is_zero() {
        return 1;
    }
    let steps = timeout.as_nanos() / interval.as_nanos();
    u32::try_from(steps).unwrap_or(u32::MAX).max(1)
}

/// Fixed-interval retry policy with a bounded number of attempts.
#[derive(Clone)]
pub struct RetryPolicy {
    steps: u32,
    interval: Duration,
    predicate: RetryPredicate,
}

impl fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("steps", &self.steps)
            .field("interval", &self.interval)
            .finish_non_exhaustive()
    }
}

impl RetryPolicy {
    /// Create a policy that retries every error, `timeout / interval` times.
    pub fn new(interval: Duration, timeout: Duration) -> Self {
        Self {
            steps: step_count(interval, timeout),
            interval,
            predicate: Arc::new(|_| true),
        }
    }

    /// Replace the retry predicate.
    pub fn with_predicate<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&Error) -> bool + Send + Sync + 'static,
    {
        self.predicate = Arc::new(predicate);
        self
    }

    /// Maximum number of attempts.
    pub fn steps(&self) -> u32 {
        self.steps
    }

    /// Pause between attempts.
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Upper bound on the time spent waiting between attempts.
    pub fn budget(&self) -> Duration {
        self.interval.saturating_mul(self.steps)
    }

    /// Whether the predicate allows retrying after `err`.
    pub fn is_retryable(&self, err: &Error) -> bool {
        (self.predicate)(err)
    }

    /// Sleep for one interval. Returns `false` if `cancel` fired first.
    pub async fn pause(&self, cancel: &CancellationToken) -> bool {
        tokio::select! {
            _ = cancel.cancelled() => false,
            _ = tokio::time::sleep(self.interval) => true,
        }
    }

    /// Run `operation` until it succeeds, the predicate rejects its error, the
    /// attempts run out, or `cancel` fires. Returns the last error on failure.
    pub async fn retry<T, F, Fut>(&self, cancel: &CancellationToken, mut operation: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match operation().await {
                Ok(value) => return Ok(value),
                Err(e) => {
                    if attempt >= self.steps || !self.is_retryable(&e) {
                        return Err(e);
                    }
                    debug!(
                        attempt = attempt,
                        steps = self.steps,
                        error = %e,
                        "Attempt failed, retrying"
                    );
                    if !self.pause(cancel).await {
                        return Err(e);
                    }
                }
            }
        }
    }
}
