//! Caller deadlines and cancellation.

use crate::ConnectorError;
use tokio::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

/// Bound on how long an operation may take
///
/// A deadline fires when its instant passes or when its cancellation token is
/// cancelled, whichever happens first. `Deadline::none()` only fires on
/// cancellation, and its token is never cancelled unless one was supplied.
#[derive(Debug, Clone, Default)]
pub struct Deadline {
    at: Option<Instant>,
    token: CancellationToken,
}

impl Deadline {
    /// No time bound
    pub fn none() -> Self {
        Self::default()
    }

    /// Expire `timeout` from now
    pub fn after(timeout: Duration) -> Self {
        Self::at(Instant::now() + timeout)
    }

    /// Expire at a fixed instant
    pub fn at(at: Instant) -> Self {
        Self {
            at: Some(at),
            token: CancellationToken::new(),
        }
    }

    /// Also expire when `token` is cancelled
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.token = token;
        self
    }

    /// The instant this deadline expires at, if time-bounded
    pub fn instant(&self) -> Option<Instant> {
        self.at
    }

    /// Time left before expiry; `None` for no time bound
    pub fn remaining(&self) -> Option<Duration> {
        self.at
            .map(|at| at.saturating_duration_since(Instant::now()))
    }

    /// Check whether the deadline has already fired
    pub fn is_expired(&self) -> bool {
        self.token.is_cancelled() || self.at.is_some_and(|at| Instant::now() >= at)
    }

    /// Wait until the deadline fires and return the matching error
    ///
    /// Resolves to [`ConnectorError::Cancelled`] on cancellation and to
    /// [`ConnectorError::DeadlineExceeded`] when the instant passes.
    pub async fn expired(&self) -> ConnectorError {
        match self.at {
            Some(at) => tokio::select! {
                biased;
                _ = self.token.cancelled() => ConnectorError::Cancelled,
                _ = tokio::time::sleep_until(at) => ConnectorError::DeadlineExceeded,
            },
            None => {
                self.token.cancelled().await;
                ConnectorError::Cancelled
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_deadline_after_expires() {
        let deadline = Deadline::after(Duration::from_millis(10));
        assert!(!deadline.is_expired());
        let err = deadline.expired().await;
        assert!(matches!(err, ConnectorError::DeadlineExceeded));
        assert!(deadline.is_expired());
    }

    #[tokio::test]
    async fn test_deadline_cancellation() {
        let token = CancellationToken::new();
        let deadline = Deadline::none().with_cancellation(token.clone());
        assert!(deadline.remaining().is_none());

        token.cancel();
        assert!(deadline.is_expired());
        assert!(matches!(deadline.expired().await, ConnectorError::Cancelled));
    }

    #[tokio::test]
    async fn test_deadline_none_never_fires() {
        let deadline = Deadline::none();
        let res = tokio::time::timeout(Duration::from_millis(20), deadline.expired()).await;
        assert!(res.is_err());
    }
}
