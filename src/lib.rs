//! # Event Connect Core
//!
//! Core SDK for plugging external messaging systems into an event pipeline.
//!
//! Connectors move CloudEvents-shaped [`Event`]s across the pipeline boundary:
//! - **Source**: reads from an external system and enqueues events onto a
//!   bounded output queue
//! - **Sink**: takes events and pushes them to an external system, retrying
//!   with exponential backoff
//!
//! A [`Registry`] maps type names to factories and instance names to live
//! connectors, and stops everything on shutdown.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use event_connect_core::{ConnectConfig, ConnectorOptions, Deadline, Registry};
//! use std::time::Duration;
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn run() -> event_connect_core::ConnectorResult<()> {
//! let config = ConnectConfig::default();
//! event_connect_core::init_tracing(&config);
//!
//! let registry = Registry::with_builtin_connectors();
//! let options = ConnectorOptions::new().with("address", ":8080");
//! let source = registry.create_source("webhook", "ingest", &options).await?;
//!
//! let (tx, mut rx) = config.output_channel();
//! source.start(CancellationToken::new(), tx).await?;
//!
//! while let Some(event) = rx.recv().await {
//!     println!("{} {}", event.event_type, event.data);
//! }
//!
//! registry.stop_all(Deadline::after(Duration::from_secs(5))).await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Features
//!
//! - **Built-in connectors**: HTTP webhooks (in and out), SQS-shaped queues,
//!   Postgres LISTEN/NOTIFY change capture, Redis Streams consumer groups
//! - **Polling loop**: shared background loop with health tracking, fetch
//!   backoff and cancellation-aware enqueueing
//! - **Retry Logic**: deterministic exponential backoff bounded by the caller's deadline
//! - **Signatures**: HMAC-SHA256 verification of inbound webhooks
//! - **Observability**: structured logging via `tracing`, metrics via `metrics`
//! - **Configuration**: per-connector option bags, TOML files with environment overrides

mod config;
mod error;
mod event;
mod metrics;
mod registry;
mod retry;
mod runtime;
mod traits;

pub mod connectors;
pub mod signature;
pub mod utils;

// Re-export public API
pub use config::{ConnectConfig, ConnectorDefinition, ConnectorOptions};
pub use error::{ConnectorError, ConnectorKind, ConnectorResult};
pub use event::{Event, EventData, JSON_CONTENT_TYPE};
pub use metrics::ConnectorMetrics;
pub use registry::{Instance, Registry, SinkFactory, SourceFactory};
pub use retry::{RetryPolicy, DEFAULT_BACKOFF, DEFAULT_MAX_ATTEMPTS, MAX_BACKOFF};
pub use runtime::{
    init_tracing, Deadline, PollDriver, Poller, CLOSE_GRACE, POLL_ERROR_BACKOFF,
};
pub use traits::{Connector, EventSender, Sink, Source};
pub use utils::{HealthState, LifecycleState};

// Version info
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const NAME: &str = env!("CARGO_PKG_NAME");
