//! Runtime building blocks shared by the built-in connectors.
//!
//! - [`Deadline`]: optional expiry plus cancellation, bounding `stop` and `deliver`
//! - [`Poller`] / [`PollDriver`]: the background loop behind pull-based sources
//! - [`init_tracing`]: process-wide logging setup
//!
//! Background work is owned by a crate-internal `Worker` handle, so every
//! spawned task has a cancellation token and a join handle that `stop` waits on.

mod deadline;
mod poll_loop;
mod worker;

pub use deadline::Deadline;
pub use poll_loop::{PollDriver, Poller, CLOSE_GRACE, POLL_ERROR_BACKOFF};
pub(crate) use worker::Worker;

use crate::ConnectConfig;

/// Initialize tracing/logging
///
/// `RUST_LOG` wins when set; otherwise `config.log_level` is used. Calling
/// this more than once is harmless.
pub fn init_tracing(config: &ConnectConfig) {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.log_level));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .try_init()
        .ok(); // Ignore if already initialized
}
