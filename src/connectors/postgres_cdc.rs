//! Change-data-capture source over Postgres LISTEN/NOTIFY.
//!
//! Triggers publish one JSON change record per row change on a notification
//! channel: `{table, operation, data, old_data?, timestamp?}`. Each record
//! becomes one `postgres.row.<operation>` event whose data is the record
//! itself. Malformed notifications are logged and skipped.
//!
//! Options: `dsn`, `tables` (list, informational), `channel` (default
//! `"cdc_changes"`), `poll_interval` (default 5s; accepted but unused by the
//! notification-driven loop).

use crate::config::ConnectorOptions;
use crate::event::JSON_CONTENT_TYPE;
use crate::runtime::{Deadline, PollDriver, Poller};
use crate::{
    Connector, ConnectorError, ConnectorResult, Event, EventData, EventSender, Source,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Registered type name
pub const TYPE_NAME: &str = "postgres.cdc";

const DEFAULT_CHANNEL: &str = "cdc_changes";
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);
const EVENT_TYPE_PREFIX: &str = "postgres.row.";

/// CDC source settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostgresCdcConfig {
    pub dsn: String,
    pub tables: Vec<String>,
    /// LISTEN/NOTIFY channel name
    pub channel: String,
    /// Fallback polling interval
    pub poll_interval: Duration,
}

impl PostgresCdcConfig {
    /// Decode from an option bag
    pub fn from_options(options: &ConnectorOptions) -> ConnectorResult<Self> {
        let channel = options
            .get_str("channel")
            .filter(|c| !c.is_empty())
            .unwrap_or(DEFAULT_CHANNEL);

        Ok(Self {
            dsn: options.string("dsn"),
            tables: options.string_list("tables"),
            channel: channel.to_string(),
            poll_interval: options.duration_or("poll_interval", DEFAULT_POLL_INTERVAL)?,
        })
    }
}

/// One row change as published by the database trigger
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeRecord {
    pub table: String,
    /// `insert`, `update` or `delete`
    pub operation: String,
    #[serde(default)]
    pub data: EventData,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub old_data: Option<EventData>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
}

/// LISTEN/NOTIFY operations the CDC source needs
#[async_trait]
pub trait PgListener: Send + Sync {
    async fn connect(&self, dsn: &str) -> ConnectorResult<()>;

    async fn listen(&self, channel: &str) -> ConnectorResult<()>;

    /// Block until the next notification and return its payload
    async fn wait_for_notification(&self) -> ConnectorResult<String>;

    async fn close(&self) -> ConnectorResult<()>;
}

struct CdcDriver {
    event_source: String,
    config: PostgresCdcConfig,
    listener: Arc<dyn PgListener>,
}

#[async_trait]
impl PollDriver for CdcDriver {
    type Message = String;

    async fn open(&self) -> ConnectorResult<()> {
        self.listener.connect(&self.config.dsn).await.map_err(|e| {
            ConnectorError::connection_with_source("postgres.cdc: connect failed", e)
        })?;

        if let Err(e) = self.listener.listen(&self.config.channel).await {
            let _ = self.listener.close().await;
            return Err(ConnectorError::connection_with_source(
                format!("postgres.cdc: listen on {:?} failed", self.config.channel),
                e,
            ));
        }
        Ok(())
    }

    async fn fetch(&self) -> ConnectorResult<Vec<String>> {
        Ok(vec![self.listener.wait_for_notification().await?])
    }

    fn translate(&self, payload: &String) -> ConnectorResult<Event> {
        notification_to_event(&self.event_source, payload)
    }

    async fn close(&self) -> ConnectorResult<()> {
        self.listener.close().await
    }
}

fn notification_to_event(event_source: &str, payload: &str) -> ConnectorResult<Event> {
    let change: ChangeRecord = serde_json::from_str(payload).map_err(|e| {
        ConnectorError::parse(format!("invalid change record: {}", e), payload)
    })?;

    let event_type = format!("{}{}", EVENT_TYPE_PREFIX, change.operation);
    let time = change.timestamp.unwrap_or_else(Utc::now);
    let data = EventData::from_value(&change)?;

    Ok(Event::new(event_source, event_type, data)
        .with_subject(change.table)
        .with_time(time)
        .with_datacontenttype(JSON_CONTENT_TYPE))
}

/// LISTEN/NOTIFY change-data-capture source
pub struct PostgresCdcSource {
    name: String,
    config: PostgresCdcConfig,
    listener: Option<Arc<dyn PgListener>>,
    poller: Poller<CdcDriver>,
}

impl PostgresCdcSource {
    /// Create a source without a listener; `start` will fail
    pub fn new(name: impl Into<String>, options: &ConnectorOptions) -> ConnectorResult<Self> {
        let name = name.into();
        let config = PostgresCdcConfig::from_options(options)?;
        Ok(Self {
            poller: Poller::new(&name, TYPE_NAME),
            name,
            config,
            listener: None,
        })
    }

    /// Create a source reading notifications through `listener`
    pub fn with_listener(
        name: impl Into<String>,
        options: &ConnectorOptions,
        listener: Arc<dyn PgListener>,
    ) -> ConnectorResult<Self> {
        let mut source = Self::new(name, options)?;
        source.listener = Some(listener);
        Ok(source)
    }

    /// Get the decoded configuration
    pub fn config(&self) -> &PostgresCdcConfig {
        &self.config
    }
}

#[async_trait]
impl Connector for PostgresCdcSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn connector_type(&self) -> &str {
        TYPE_NAME
    }

    async fn stop(&self, deadline: Deadline) -> ConnectorResult<()> {
        self.poller.stop(&deadline).await
    }

    fn healthy(&self) -> bool {
        self.poller.healthy()
    }
}

#[async_trait]
impl Source for PostgresCdcSource {
    async fn start(&self, cancel: CancellationToken, output: EventSender) -> ConnectorResult<()> {
        let listener = self.listener.clone().ok_or_else(|| {
            ConnectorError::config(format!(
                "postgres.cdc source {:?}: no listener configured",
                self.name
            ))
        })?;

        let driver = CdcDriver {
            event_source: format!("{}/{}", TYPE_NAME, self.name),
            config: self.config.clone(),
            listener,
        };
        self.poller.start(driver, &cancel, output).await?;

        info!(
            name = %self.name,
            channel = %self.config.channel,
            tables = ?self.config.tables,
            "postgres.cdc source started"
        );
        Ok(())
    }
}

/// Registry factory building CDC sources that share `listener`
///
/// The listener holds one connection, so only one instance created through
/// this factory should be running at a time.
pub fn factory_with_listener(
    listener: Arc<dyn PgListener>,
) -> impl Fn(&str, &ConnectorOptions) -> ConnectorResult<Arc<dyn Source>> + Send + Sync + 'static {
    move |name: &str, options: &ConnectorOptions| {
        let source = PostgresCdcSource::with_listener(name, options, listener.clone())?;
        Ok(Arc::new(source) as Arc<dyn Source>)
    }
}
