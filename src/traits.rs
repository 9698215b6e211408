//! Connector capability traits.
//!
//! This module defines the contracts every adapter implements:
//! - `Source`: reads from an external system and produces `Event`s onto the output queue
//! - `Sink`: takes `Event`s and pushes them to an external system
//!
//! Both share the `Connector` supertrait (identity, health, `stop`), which is
//! what the registry dispatches through when it stops instances.
//!
//! Lifecycle: constructed → (`start`, sources only) → running ⇄ degraded →
//! (`stop`) → stopped. `healthy()` is true only while running.

use crate::runtime::Deadline;
use crate::{ConnectorResult, Event};
use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Producer half of the bounded output queue sources write into
pub type EventSender = mpsc::Sender<Event>;

/// Operations shared by sources and sinks
#[async_trait]
pub trait Connector: Send + Sync {
    /// Instance name, unique within a registry
    fn name(&self) -> &str;

    /// Registered type name, e.g. `"webhook"` or `"redis.stream"`
    fn connector_type(&self) -> &str;

    /// Stop the connector and release its resources
    ///
    /// Waits for background work to finish, bounded by `deadline`. After
    /// `stop` the connector is terminally unhealthy.
    ///
    /// # Errors
    ///
    /// Return `ConnectorError::DeadlineExceeded` if the deadline fired first
    async fn stop(&self, deadline: Deadline) -> ConnectorResult<()>;

    /// Check if the connector is running normally
    fn healthy(&self) -> bool;
}

/// Trait for implementing sources (External System → pipeline)
///
/// # Example
///
/// ```rust,no_run
/// use event_connect_core::{
///     Connector, ConnectorResult, Deadline, Event, EventData, EventSender, Source,
/// };
/// use async_trait::async_trait;
/// use tokio_util::sync::CancellationToken;
///
/// pub struct TickSource;
///
/// #[async_trait]
/// impl Connector for TickSource {
///     fn name(&self) -> &str { "tick" }
///     fn connector_type(&self) -> &str { "tick" }
///     async fn stop(&self, _deadline: Deadline) -> ConnectorResult<()> { Ok(()) }
///     fn healthy(&self) -> bool { true }
/// }
///
/// #[async_trait]
/// impl Source for TickSource {
///     async fn start(
///         &self,
///         cancel: CancellationToken,
///         output: EventSender,
///     ) -> ConnectorResult<()> {
///         tokio::spawn(async move {
///             let event = Event::new("tick/tick", "tick.fired", EventData::null());
///             tokio::select! {
///                 _ = cancel.cancelled() => {}
///                 _ = output.send(event) => {}
///             }
///         });
///         Ok(())
///     }
/// }
/// ```
#[async_trait]
pub trait Source: Connector {
    /// Begin producing events onto `output`
    ///
    /// Establishes the underlying connection, spawns background work bound to
    /// a token derived from `cancel`, and returns without waiting for events.
    ///
    /// # Errors
    ///
    /// Return `ConnectorError::Configuration` when the adapter is not
    /// configured well enough to do I/O (for example no client injected)
    /// Return `ConnectorError::Connection` when the connection cannot be
    /// established; no background work is left running in that case
    async fn start(&self, cancel: CancellationToken, output: EventSender) -> ConnectorResult<()>;

    /// Optional: persist consumption progress
    ///
    /// A no-op for stateless protocols; meaningful only for adapters with
    /// externally tracked offsets.
    async fn checkpoint(&self, _deadline: Deadline) -> ConnectorResult<()> {
        Ok(())
    }
}

/// Trait for implementing sinks (pipeline → External System)
#[async_trait]
pub trait Sink: Connector {
    /// Deliver one event, honoring `deadline` for in-flight calls and retry waits
    ///
    /// # Errors
    ///
    /// Return `ConnectorError::Delivery` (naming the destination and attempt
    /// count) once every attempt failed
    /// Return `ConnectorError::Cancelled` / `DeadlineExceeded` if the deadline fired
    async fn deliver(&self, deadline: &Deadline, event: &Event) -> ConnectorResult<()>;

    /// Optional: deliver several events
    ///
    /// Returns one result per input event, in input order. Not atomic: a
    /// later event may succeed after an earlier one failed. The default
    /// implementation calls `deliver()` for each event sequentially.
    async fn deliver_batch(
        &self,
        deadline: &Deadline,
        events: &[Event],
    ) -> Vec<ConnectorResult<()>> {
        let mut results = Vec::with_capacity(events.len());
        for event in events {
            results.push(self.deliver(deadline, event).await);
        }
        results
    }
}
