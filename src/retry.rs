//! Retry strategies and backoff logic for sink delivery.
//!
//! Sinks wrap each single-attempt network call in [`RetryPolicy::run`]. The
//! backoff is deterministic exponential: the wait before attempt `n` (n ≥ 2)
//! is `base * 2^(n-2)`, capped at [`MAX_BACKOFF`].

use crate::config::ConnectorOptions;
use crate::runtime::Deadline;
use crate::{ConnectorError, ConnectorMetrics, ConnectorResult};
use std::future::Future;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Default number of attempts (first try included)
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
/// Default wait before the first retry
pub const DEFAULT_BACKOFF: Duration = Duration::from_secs(1);
/// Upper bound on any single wait
pub const MAX_BACKOFF: Duration = Duration::from_secs(60);

/// Retry configuration for one sink
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts including the first, always >= 1
    max_attempts: u32,
    /// Wait before the first retry
    base_backoff: Duration,
    /// Cap on any single wait
    max_backoff: Duration,
}

impl RetryPolicy {
    /// Create a policy; `max_attempts` of 0 is treated as 1
    pub fn new(max_attempts: u32, base_backoff: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_backoff,
            max_backoff: MAX_BACKOFF,
        }
    }

    /// Read `retry.max_attempts` and `retry.backoff` from a sink's options
    ///
    /// `max_attempts` falls back to the default unless it is a positive
    /// number; `backoff` accepts humantime strings (`"1ms"`, `"2s"`).
    pub fn from_options(options: &ConnectorOptions) -> ConnectorResult<Self> {
        let retry = options.section("retry");
        let max_attempts = retry.positive_u32_or("max_attempts", DEFAULT_MAX_ATTEMPTS);
        let backoff = retry.duration_or("backoff", DEFAULT_BACKOFF)?;
        Ok(Self::new(max_attempts, backoff))
    }

    /// Lower the cap on a single wait
    pub fn with_max_backoff(mut self, max_backoff: Duration) -> Self {
        self.max_backoff = max_backoff.min(MAX_BACKOFF);
        self
    }

    /// Get the maximum number of attempts
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Get the wait before the first retry
    pub fn base_backoff(&self) -> Duration {
        self.base_backoff
    }

    /// Calculate the wait before a given attempt
    ///
    /// # Arguments
    ///
    /// * `attempt` - The attempt about to run (1-indexed); the first attempt never waits
    pub fn backoff(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            return Duration::ZERO;
        }
        let factor = 1u32.checked_shl(attempt - 2);
        factor
            .and_then(|f| self.base_backoff.checked_mul(f))
            .map_or(self.max_backoff, |d| d.min(self.max_backoff))
    }

    /// Run `attempt_fn` until it succeeds, attempts run out, or `deadline` fires
    ///
    /// Each attempt and each backoff wait is raced against the deadline; when
    /// it fires the whole delivery fails immediately with `Cancelled` or
    /// `DeadlineExceeded`. Errors that are not retryable end the delivery at
    /// once. Otherwise the final error is `ConnectorError::Delivery` carrying
    /// `destination`, the attempt count and the last underlying error.
    pub async fn run<F, Fut>(
        &self,
        destination: &str,
        deadline: &Deadline,
        metrics: &ConnectorMetrics,
        mut attempt_fn: F,
    ) -> ConnectorResult<()>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = ConnectorResult<()>>,
    {
        let started = Instant::now();
        let mut attempt = 0;

        loop {
            attempt += 1;

            if attempt > 1 {
                let wait = self.backoff(attempt);
                debug!(destination, attempt, backoff = ?wait, "retrying delivery");
                metrics.record_retry();
                tokio::select! {
                    biased;
                    err = deadline.expired() => {
                        metrics.record_delivery(false, started.elapsed());
                        return Err(err);
                    }
                    _ = tokio::time::sleep(wait) => {}
                }
            }

            metrics.record_attempt();
            let result = tokio::select! {
                biased;
                err = deadline.expired() => Err(err),
                res = attempt_fn(attempt) => res,
            };

            let err = match result {
                Ok(()) => {
                    metrics.record_delivery(true, started.elapsed());
                    return Ok(());
                }
                Err(e) => e,
            };

            if err.is_cancellation() {
                metrics.record_delivery(false, started.elapsed());
                return Err(err);
            }

            warn!(
                destination,
                attempt,
                max_attempts = self.max_attempts,
                error = %err,
                "delivery attempt failed"
            );

            if attempt >= self.max_attempts || !err.is_retryable() {
                metrics.record_delivery(false, started.elapsed());
                return Err(ConnectorError::Delivery {
                    destination: destination.to_string(),
                    attempts: attempt,
                    source: Box::new(err),
                });
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ATTEMPTS, DEFAULT_BACKOFF)
    }
}
