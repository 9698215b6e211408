//! Redis Streams consumer-group source.
//!
//! Reads batches with XREADGROUP semantics and acknowledges each entry after
//! it is enqueued. The consumer group is created on `start` when configured;
//! a failure there (typically "group already exists") is only logged.
//!
//! Options: `addr` (default `"localhost:6379"`), `stream` (required), `group`,
//! `consumer`, `batch_size` (default 10).

use crate::config::ConnectorOptions;
use crate::event::JSON_CONTENT_TYPE;
use crate::runtime::{Deadline, PollDriver, Poller};
use crate::{Connector, ConnectorError, ConnectorResult, Event, EventData, EventSender, Source};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Registered type name
pub const TYPE_NAME: &str = "redis.stream";

const DEFAULT_ADDR: &str = "localhost:6379";
const DEFAULT_EVENT_TYPE: &str = "redis.stream.message";
const DEFAULT_BATCH_SIZE: u32 = 10;
const TYPE_FIELD: &str = "type";
/// Group start id: deliver the whole stream history to a new group
const GROUP_START_ID: &str = "0";

/// Stream consumer settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedisStreamConfig {
    pub addr: String,
    pub stream: String,
    /// Consumer group name; no group is created when empty
    pub group: String,
    /// Consumer name within the group
    pub consumer: String,
    /// Upper bound on entries per read
    pub batch_size: u32,
}

impl RedisStreamConfig {
    /// Decode from an option bag
    pub fn from_options(options: &ConnectorOptions) -> ConnectorResult<Self> {
        let addr = options
            .get_str("addr")
            .filter(|a| !a.is_empty())
            .unwrap_or(DEFAULT_ADDR);

        Ok(Self {
            addr: addr.to_string(),
            stream: options.require_str("stream")?,
            group: options.string("group"),
            consumer: options.string("consumer"),
            batch_size: options.positive_u32_or("batch_size", DEFAULT_BATCH_SIZE),
        })
    }
}

/// One stream entry
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct StreamMessage {
    /// Entry id, e.g. `"1645000000000-0"`
    pub id: String,
    pub fields: BTreeMap<String, String>,
}

/// Stream operations the Redis source needs
#[async_trait]
pub trait RedisStreamClient: Send + Sync {
    async fn connect(&self, addr: &str) -> ConnectorResult<()>;

    async fn create_group(&self, stream: &str, group: &str, start_id: &str) -> ConnectorResult<()>;

    /// Blocking read of up to `count` new entries for this consumer
    async fn read_group(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        count: u32,
    ) -> ConnectorResult<Vec<StreamMessage>>;

    async fn ack(&self, stream: &str, group: &str, ids: &[String]) -> ConnectorResult<()>;

    async fn close(&self) -> ConnectorResult<()>;
}

struct StreamDriver {
    event_source: String,
    config: RedisStreamConfig,
    client: Arc<dyn RedisStreamClient>,
}

#[async_trait]
impl PollDriver for StreamDriver {
    type Message = StreamMessage;

    async fn open(&self) -> ConnectorResult<()> {
        self.client.connect(&self.config.addr).await.map_err(|e| {
            ConnectorError::connection_with_source(
                format!("redis.stream: connect to {} failed", self.config.addr),
                e,
            )
        })?;

        if !self.config.group.is_empty() {
            if let Err(e) = self
                .client
                .create_group(&self.config.stream, &self.config.group, GROUP_START_ID)
                .await
            {
                warn!(group = %self.config.group, error = %e, "create consumer group");
            }
        }
        Ok(())
    }

    async fn fetch(&self) -> ConnectorResult<Vec<StreamMessage>> {
        self.client
            .read_group(
                &self.config.stream,
                &self.config.group,
                &self.config.consumer,
                self.config.batch_size,
            )
            .await
    }

    fn translate(&self, message: &StreamMessage) -> ConnectorResult<Event> {
        message_to_event(&self.event_source, &self.config.stream, message)
    }

    async fn acknowledge(&self, message: &StreamMessage) -> ConnectorResult<()> {
        self.client
            .ack(
                &self.config.stream,
                &self.config.group,
                std::slice::from_ref(&message.id),
            )
            .await
            .map_err(|e| ConnectorError::transport(format!("ack {}: {}", message.id, e)))
    }

    async fn close(&self) -> ConnectorResult<()> {
        self.client.close().await
    }
}

fn message_to_event(
    event_source: &str,
    stream: &str,
    message: &StreamMessage,
) -> ConnectorResult<Event> {
    let event_type = message
        .fields
        .get(TYPE_FIELD)
        .filter(|t| !t.is_empty())
        .map_or(DEFAULT_EVENT_TYPE, String::as_str);

    Ok(Event::new(event_source, event_type, EventData::from_value(&message.fields)?)
        .with_subject(format!("{}/{}", stream, message.id))
        .with_datacontenttype(JSON_CONTENT_TYPE))
}

/// Redis Streams consumer-group source
pub struct RedisStreamSource {
    name: String,
    config: RedisStreamConfig,
    client: Option<Arc<dyn RedisStreamClient>>,
    poller: Poller<StreamDriver>,
}

impl RedisStreamSource {
    /// Create a source without a client; `start` will fail
    pub fn new(name: impl Into<String>, options: &ConnectorOptions) -> ConnectorResult<Self> {
        let name = name.into();
        let config = RedisStreamConfig::from_options(options)?;
        Ok(Self {
            poller: Poller::new(&name, TYPE_NAME),
            name,
            config,
            client: None,
        })
    }

    /// Create a source reading through `client`
    pub fn with_client(
        name: impl Into<String>,
        options: &ConnectorOptions,
        client: Arc<dyn RedisStreamClient>,
    ) -> ConnectorResult<Self> {
        let mut source = Self::new(name, options)?;
        source.client = Some(client);
        Ok(source)
    }

    /// Get the decoded configuration
    pub fn config(&self) -> &RedisStreamConfig {
        &self.config
    }
}

#[async_trait]
impl Connector for RedisStreamSource {
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
impl Source for RedisStreamSource {
    async fn start(&self, cancel: CancellationToken, output: EventSender) -> ConnectorResult<()> {
        let client = self.client.clone().ok_or_else(|| {
            ConnectorError::config(format!(
                "redis.stream source {:?}: no client configured",
                self.name
            ))
        })?;

        let driver = StreamDriver {
            event_source: format!("{}/{}", TYPE_NAME, self.name),
            config: self.config.clone(),
            client,
        };
        self.poller.start(driver, &cancel, output).await?;

        info!(
            name = %self.name,
            stream = %self.config.stream,
            group = %self.config.group,
            consumer = %self.config.consumer,
            "redis.stream source started"
        );
        Ok(())
    }
}

/// Registry factory building stream sources that share `client`
pub fn factory_with_client(
    client: Arc<dyn RedisStreamClient>,
) -> impl Fn(&str, &ConnectorOptions) -> ConnectorResult<Arc<dyn Source>> + Send + Sync + 'static {
    move |name: &str, options: &ConnectorOptions| {
        let source = RedisStreamSource::with_client(name, options, client.clone())?;
        Ok(Arc::new(source) as Arc<dyn Source>)
    }
}
