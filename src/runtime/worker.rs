//! Handle to a cancellable background task.

use super::Deadline;
use crate::ConnectorResult;
use std::future::Future;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::warn;

/// A spawned background task paired with the token that stops it
///
/// The task's token is a child of the caller's token, so cancelling the
/// caller also cancels the worker, but shutting the worker down never cancels
/// the caller.
#[derive(Debug)]
pub(crate) struct Worker {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

impl Worker {
    /// Spawn `task` with a token derived from `parent`
    pub(crate) fn spawn<F, Fut>(parent: &CancellationToken, task: F) -> Self
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let token = parent.child_token();
        let handle = tokio::spawn(task(token.clone()));
        Self { token, handle }
    }

    /// Check whether the task has already finished
    #[cfg(test)]
    pub(crate) fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Cancel the task and wait for it to finish, bounded by `deadline`
    ///
    /// If the deadline fires first the task is aborted, so it is guaranteed to
    /// end at its next suspension point, and the deadline error is returned.
    pub(crate) async fn shutdown(self, deadline: &Deadline) -> ConnectorResult<()> {
        self.token.cancel();

        let mut handle = self.handle;
        tokio::select! {
            res = &mut handle => {
                if let Err(e) = res {
                    if e.is_panic() {
                        warn!(error = %e, "background worker panicked");
                    }
                }
                Ok(())
            }
            err = deadline.expired() => {
                handle.abort();
                Err(err)
            }
        }
    }
}
