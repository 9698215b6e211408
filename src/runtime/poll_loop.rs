//! Polling loop shared by pull-based sources.
//!
//! A pull adapter supplies a [`PollDriver`] (how to connect, fetch, translate
//! and acknowledge) and embeds a [`Poller`], which owns the lifecycle: it opens
//! the driver, spawns the background loop, tracks health and tears everything
//! down on `stop`.
//!
//! Loop contract, per iteration:
//! 1. fetch a batch; on failure (not caused by cancellation) log, degrade
//!    health, back off for one second, recover and retry
//! 2. translate each message; a message that cannot be translated is logged
//!    and skipped
//! 3. enqueue the event, waiting for capacity but never past cancellation
//! 4. acknowledge the message; a failed acknowledgement is only logged
//!
//! Messages are translated and enqueued in fetch order. Acknowledgement
//! happens strictly after a successful enqueue, so delivery is at-least-once.

use super::{Deadline, Worker};
use crate::utils::{HealthState, LifecycleState};
use crate::{ConnectorError, ConnectorMetrics, ConnectorResult, Event, EventSender};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};

/// Wait between a failed fetch and the next attempt
pub const POLL_ERROR_BACKOFF: Duration = Duration::from_secs(1);

/// Longest wait for the driver to close once the stop deadline has fired
pub const CLOSE_GRACE: Duration = Duration::from_millis(500);

/// Adapter-specific half of a pull-based source
#[async_trait]
pub trait PollDriver: Send + Sync + 'static {
    /// One raw message as fetched from the external system
    type Message: Send + Sync + 'static;

    /// Establish the underlying connection
    ///
    /// Called once by [`Poller::start`]; an error fails `start` and no
    /// worker is spawned.
    async fn open(&self) -> ConnectorResult<()> {
        Ok(())
    }

    /// Fetch the next batch (long-poll or blocking read)
    ///
    /// The loop races this future against cancellation, so implementations
    /// may block for their full wait interval.
    async fn fetch(&self) -> ConnectorResult<Vec<Self::Message>>;

    /// Translate one message into an event
    ///
    /// An error drops this message only.
    fn translate(&self, message: &Self::Message) -> ConnectorResult<Event>;

    /// Acknowledge or delete the message at the source system
    async fn acknowledge(&self, _message: &Self::Message) -> ConnectorResult<()> {
        Ok(())
    }

    /// Release the underlying connection
    async fn close(&self) -> ConnectorResult<()> {
        Ok(())
    }
}

struct Running<D> {
    worker: Worker,
    driver: Arc<D>,
}

/// Lifecycle owner for a [`PollDriver`]
pub struct Poller<D: PollDriver> {
    name: String,
    connector_type: String,
    health: Arc<HealthState>,
    metrics: ConnectorMetrics,
    running: Mutex<Option<Running<D>>>,
}

impl<D: PollDriver> Poller<D> {
    /// Create a poller for the named connector instance
    pub fn new(name: impl Into<String>, connector_type: impl Into<String>) -> Self {
        let name = name.into();
        let connector_type = connector_type.into();
        let metrics = ConnectorMetrics::new(&name, &connector_type);
        Self {
            name,
            connector_type,
            health: Arc::new(HealthState::new()),
            metrics,
            running: Mutex::new(None),
        }
    }

    /// Check if the loop is running and not recovering from a failure
    pub fn healthy(&self) -> bool {
        self.health.is_healthy()
    }

    /// Get the lifecycle state
    pub fn state(&self) -> LifecycleState {
        self.health.state()
    }

    /// Open the driver and spawn the polling loop
    ///
    /// Returns as soon as the loop is spawned. The loop's token is a child of
    /// `cancel`.
    pub async fn start(
        &self,
        driver: D,
        cancel: &CancellationToken,
        output: EventSender,
    ) -> ConnectorResult<()> {
        let mut running = self.running.lock().await;
        if running.is_some() {
            return Err(ConnectorError::config(format!(
                "{} source {:?} is already running",
                self.connector_type, self.name
            )));
        }
        if self.health.state() == LifecycleState::Stopped {
            return Err(ConnectorError::config(format!(
                "{} source {:?} was stopped and cannot be restarted",
                self.connector_type, self.name
            )));
        }

        driver.open().await?;

        // `stop` may have run while the driver was opening
        if !self.health.mark_running() {
            if let Err(e) = driver.close().await {
                warn!(error = %e, "close after interrupted start failed");
            }
            info!(
                connector = %self.connector_type,
                name = %self.name,
                "stopped while starting"
            );
            return Err(ConnectorError::Cancelled);
        }

        let driver = Arc::new(driver);
        self.metrics.set_health(true);

        let span = info_span!(
            "poll_loop",
            connector = %self.connector_type,
            name = %self.name
        );
        let loop_driver = driver.clone();
        let health = self.health.clone();
        let metrics = self.metrics.clone();
        let worker = Worker::spawn(cancel, move |token| {
            poll_loop(loop_driver, token, output, health, metrics).instrument(span)
        });

        *running = Some(Running { worker, driver });
        Ok(())
    }

    /// Stop the loop and close the driver
    ///
    /// Marks the source unhealthy, cancels the loop and waits for it to exit,
    /// bounded by `deadline`. The driver is closed even when the deadline
    /// fires (the loop is aborted in that case, and `close` gets
    /// [`CLOSE_GRACE`] at most); the deadline error is then returned.
    ///
    /// A `start` still opening its driver is not waited for past `deadline`;
    /// it notices the stop once `open` returns and closes the driver itself.
    pub async fn stop(&self, deadline: &Deadline) -> ConnectorResult<()> {
        self.health.mark_stopped();

        let mut guard = tokio::select! {
            biased;
            guard = self.running.lock() => guard,
            err = deadline.expired() => return Err(err),
        };
        self.metrics.set_health(false);
        let Some(running) = guard.take() else {
            return Ok(());
        };
        drop(guard);

        let joined = running.worker.shutdown(deadline).await;
        if let Err(e) = &joined {
            warn!(
                connector = %self.connector_type,
                name = %self.name,
                error = %e,
                "poll loop did not exit before the deadline; aborted"
            );
        }
        let closed = close_within(running.driver.as_ref(), deadline).await;

        info!(connector = %self.connector_type, name = %self.name, "stopped");
        joined.and(closed)
    }
}

/// Close `driver`, bounded by `deadline`, or by [`CLOSE_GRACE`] once it has fired
async fn close_within<D: PollDriver>(driver: &D, deadline: &Deadline) -> ConnectorResult<()> {
    let bound = async {
        if deadline.is_expired() {
            tokio::time::sleep(CLOSE_GRACE).await;
            ConnectorError::DeadlineExceeded
        } else {
            deadline.expired().await
        }
    };

    tokio::select! {
        biased;
        res = driver.close() => res,
        err = bound => {
            warn!("driver close did not finish in time");
            Err(err)
        }
    }
}

async fn poll_loop<D: PollDriver>(
    driver: Arc<D>,
    token: CancellationToken,
    output: EventSender,
    health: Arc<HealthState>,
    metrics: ConnectorMetrics,
) {
    debug!("poll loop started");

    'poll: loop {
        if token.is_cancelled() {
            break;
        }

        let fetched = tokio::select! {
            biased;
            _ = token.cancelled() => break,
            res = driver.fetch() => res,
        };

        let messages = match fetched {
            Ok(messages) => {
                health.record_success();
                messages
            }
            Err(e) => {
                if token.is_cancelled() {
                    break;
                }
                let failures = health.record_failure();
                metrics.record_poll_error();
                metrics.set_health(false);
                error!(error = %e, consecutive_failures = failures, "fetch failed");

                tokio::select! {
                    biased;
                    _ = token.cancelled() => break,
                    _ = tokio::time::sleep(POLL_ERROR_BACKOFF) => {}
                }

                health.recover();
                metrics.set_health(health.is_healthy());
                continue;
            }
        };

        if !messages.is_empty() {
            metrics.record_batch_size(messages.len());
        }

        for message in messages {
            let event = match driver.translate(&message) {
                Ok(event) => event,
                Err(e) => {
                    metrics.record_dropped();
                    warn!(error = %e, "dropping message that could not be translated");
                    continue;
                }
            };

            tokio::select! {
                biased;
                _ = token.cancelled() => break 'poll,
                sent = output.send(event) => {
                    if sent.is_err() {
                        warn!("output queue closed; poll loop exiting");
                        break 'poll;
                    }
                }
            }
            metrics.record_emitted();

            if let Err(e) = driver.acknowledge(&message).await {
                metrics.record_ack_failure();
                warn!(error = %e, "acknowledge failed");
            }
        }
    }

    debug!("poll loop exited");
}
