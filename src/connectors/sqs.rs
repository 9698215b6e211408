//! SQS-shaped queue connectors.
//!
//! The network client is injected through [`SqsClient`]; an instance built
//! without one is valid but fails `start`/`deliver` with a configuration
//! error.
//!
//! Options: `queue_url` (required), `region`, `max_messages` (default 10),
//! `wait_time_seconds` (default 20). The sink also reads `retry.*`.

use crate::config::ConnectorOptions;
use crate::event::JSON_CONTENT_TYPE;
use crate::retry::RetryPolicy;
use crate::runtime::{Deadline, PollDriver, Poller};
use crate::utils::{json_or_string, HealthState, LifecycleState};
use crate::{
    Connector, ConnectorError, ConnectorMetrics, ConnectorResult, Event, EventSender, Sink, Source,
};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Registered type name for both the source and the sink
pub const TYPE_NAME: &str = "sqs";

const DEFAULT_EVENT_TYPE: &str = "sqs.message";
const EVENT_TYPE_ATTRIBUTE: &str = "event_type";
const DEFAULT_MAX_MESSAGES: u32 = 10;
const DEFAULT_WAIT_TIME_SECONDS: u32 = 20;

/// Queue settings shared by source and sink
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SqsConfig {
    pub queue_url: String,
    pub region: String,
    /// Upper bound on messages per receive call
    pub max_messages: u32,
    /// Long-poll wait per receive call
    pub wait_time_seconds: u32,
}

impl SqsConfig {
    /// Decode from an option bag
    pub fn from_options(options: &ConnectorOptions) -> ConnectorResult<Self> {
        Ok(Self {
            queue_url: options.require_str("queue_url")?,
            region: options.string("region"),
            max_messages: options.positive_u32_or("max_messages", DEFAULT_MAX_MESSAGES),
            wait_time_seconds: options
                .non_negative_u32_or("wait_time_seconds", DEFAULT_WAIT_TIME_SECONDS),
        })
    }
}

/// One received queue message
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SqsMessage {
    pub message_id: String,
    pub receipt_handle: String,
    pub body: String,
    pub attributes: HashMap<String, String>,
}

/// One entry of a batch send
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SqsBatchEntry {
    /// Batch-local id, `entry-<index>`
    pub id: String,
    pub body: String,
    pub attributes: BTreeMap<String, String>,
}

/// Per-entry outcome of a batch send
#[derive(Debug)]
pub struct SqsBatchResult {
    pub id: String,
    pub message_id: Option<String>,
    pub error: Option<ConnectorError>,
}

/// Queue operations the SQS connectors need
#[async_trait]
pub trait SqsClient: Send + Sync {
    /// Long-poll for up to `max_messages` messages
    async fn receive_messages(
        &self,
        queue_url: &str,
        max_messages: u32,
        wait_time_seconds: u32,
    ) -> ConnectorResult<Vec<SqsMessage>>;

    async fn delete_message(&self, queue_url: &str, receipt_handle: &str) -> ConnectorResult<()>;

    /// Send one message, returning its id
    async fn send_message(
        &self,
        queue_url: &str,
        body: &str,
        attributes: &BTreeMap<String, String>,
    ) -> ConnectorResult<String>;

    /// Send several messages in one call
    ///
    /// `Err` means the whole call failed; per-entry failures are reported in
    /// the returned results, matched to entries by id.
    async fn send_message_batch(
        &self,
        queue_url: &str,
        entries: &[SqsBatchEntry],
    ) -> ConnectorResult<Vec<SqsBatchResult>>;
}

fn missing_client(role: &str, name: &str) -> ConnectorError {
    ConnectorError::config(format!("sqs {} {:?}: no SQS client configured", role, name))
}

struct SqsDriver {
    event_source: String,
    config: SqsConfig,
    client: Arc<dyn SqsClient>,
}

#[async_trait]
impl PollDriver for SqsDriver {
    type Message = SqsMessage;

    async fn fetch(&self) -> ConnectorResult<Vec<SqsMessage>> {
        self.client
            .receive_messages(
                &self.config.queue_url,
                self.config.max_messages,
                self.config.wait_time_seconds,
            )
            .await
    }

    fn translate(&self, message: &SqsMessage) -> ConnectorResult<Event> {
        Ok(message_to_event(&self.event_source, message))
    }

    async fn acknowledge(&self, message: &SqsMessage) -> ConnectorResult<()> {
        self.client
            .delete_message(&self.config.queue_url, &message.receipt_handle)
            .await
            .map_err(|e| {
                ConnectorError::transport(format!(
                    "delete message {}: {}",
                    message.message_id, e
                ))
            })
    }
}

fn message_to_event(event_source: &str, message: &SqsMessage) -> Event {
    let event_type = message
        .attributes
        .get(EVENT_TYPE_ATTRIBUTE)
        .filter(|t| !t.is_empty())
        .map_or(DEFAULT_EVENT_TYPE, String::as_str);

    Event::new(event_source, event_type, json_or_string(message.body.as_bytes()))
        .with_subject(message.message_id.clone())
        .with_datacontenttype(JSON_CONTENT_TYPE)
}

/// Queue poller source
pub struct SqsSource {
    name: String,
    config: SqsConfig,
    client: Option<Arc<dyn SqsClient>>,
    poller: Poller<SqsDriver>,
}

impl SqsSource {
    /// Create a source without a client; `start` will fail
    pub fn new(name: impl Into<String>, options: &ConnectorOptions) -> ConnectorResult<Self> {
        let name = name.into();
        let config = SqsConfig::from_options(options)?;
        Ok(Self {
            poller: Poller::new(&name, TYPE_NAME),
            name,
            config,
            client: None,
        })
    }

    /// Create a source polling through `client`
    pub fn with_client(
        name: impl Into<String>,
        options: &ConnectorOptions,
        client: Arc<dyn SqsClient>,
    ) -> ConnectorResult<Self> {
        let mut source = Self::new(name, options)?;
        source.client = Some(client);
        Ok(source)
    }

    /// Get the decoded configuration
    pub fn config(&self) -> &SqsConfig {
        &self.config
    }
}

#[async_trait]
impl Connector for SqsSource {
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
impl Source for SqsSource {
    async fn start(&self, cancel: CancellationToken, output: EventSender) -> ConnectorResult<()> {
        let client = self
            .client
            .clone()
            .ok_or_else(|| missing_client("source", &self.name))?;

        let driver = SqsDriver {
            event_source: format!("{}/{}", TYPE_NAME, self.name),
            config: self.config.clone(),
            client,
        };
        self.poller.start(driver, &cancel, output).await?;

        info!(
            name = %self.name,
            queue_url = %self.config.queue_url,
            region = %self.config.region,
            "sqs source started"
        );
        Ok(())
    }
}

/// Message attributes stamped on every sent event
fn event_attributes(event: &Event) -> BTreeMap<String, String> {
    let mut attributes = BTreeMap::new();
    attributes.insert("event_type".to_string(), event.event_type.clone());
    attributes.insert("event_source".to_string(), event.source.clone());
    if let Some(subject) = event.subject.as_ref().filter(|s| !s.is_empty()) {
        attributes.insert("event_subject".to_string(), subject.clone());
    }
    attributes
}

fn entry_id(index: usize) -> String {
    format!("entry-{}", index)
}

/// Queue sender sink
pub struct SqsSink {
    name: String,
    destination: String,
    config: SqsConfig,
    retry: RetryPolicy,
    client: Option<Arc<dyn SqsClient>>,
    health: HealthState,
    metrics: ConnectorMetrics,
}

impl SqsSink {
    /// Create a sink without a client; `deliver` will fail
    pub fn new(name: impl Into<String>, options: &ConnectorOptions) -> ConnectorResult<Self> {
        let name = name.into();
        Ok(Self {
            destination: format!("sqs sink {:?}", name),
            config: SqsConfig::from_options(options)?,
            retry: RetryPolicy::from_options(options)?,
            client: None,
            health: HealthState::running(),
            metrics: ConnectorMetrics::new(&name, TYPE_NAME),
            name,
        })
    }

    /// Create a sink sending through `client`
    pub fn with_client(
        name: impl Into<String>,
        options: &ConnectorOptions,
        client: Arc<dyn SqsClient>,
    ) -> ConnectorResult<Self> {
        let mut sink = Self::new(name, options)?;
        sink.client = Some(client);
        Ok(sink)
    }

    /// Get the decoded configuration
    pub fn config(&self) -> &SqsConfig {
        &self.config
    }

    fn client(&self) -> ConnectorResult<&dyn SqsClient> {
        if self.health.state() == LifecycleState::Stopped {
            return Err(ConnectorError::config(format!("{} is stopped", self.destination)));
        }
        self.client
            .as_deref()
            .ok_or_else(|| missing_client("sink", &self.name))
    }

    fn exhausted(&self, attempts: u32, err: ConnectorError) -> ConnectorError {
        ConnectorError::Delivery {
            destination: self.destination.clone(),
            attempts,
            source: Box::new(err),
        }
    }
}

/// Copy a cancellation or deadline error into another slot
fn interrupted(err: &ConnectorError) -> ConnectorError {
    match err {
        ConnectorError::Cancelled => ConnectorError::Cancelled,
        _ => ConnectorError::DeadlineExceeded,
    }
}

#[async_trait]
impl Connector for SqsSink {
    fn name(&self) -> &str {
        &self.name
    }

    fn connector_type(&self) -> &str {
        TYPE_NAME
    }

    async fn stop(&self, _deadline: Deadline) -> ConnectorResult<()> {
        self.health.mark_stopped();
        self.metrics.set_health(false);
        Ok(())
    }

    fn healthy(&self) -> bool {
        self.health.is_healthy()
    }
}

#[async_trait]
impl Sink for SqsSink {
    async fn deliver(&self, deadline: &Deadline, event: &Event) -> ConnectorResult<()> {
        let client = self.client()?;
        let body = event.to_json()?;
        let attributes = event_attributes(event);

        let queue_url = self.config.queue_url.as_str();
        let body = body.as_str();
        let attributes = &attributes;
        let event_id = event.id.as_str();

        self.retry
            .run(&self.destination, deadline, &self.metrics, move |_| async move {
                let message_id = client.send_message(queue_url, body, attributes).await?;
                debug!(event_id, message_id = %message_id, "sent to queue");
                Ok(())
            })
            .await
    }

    /// Native batch sends, retrying only the entries that failed
    ///
    /// Every round is one `send_message_batch` call carrying the entries
    /// still pending. Each event runs through the sink's retry policy on its
    /// own: a retryable failure (of the entry, or of the whole call) is sent
    /// again after the backoff, any other failure settles that slot at once,
    /// and an entry that runs out of attempts gets `Delivery`. When the
    /// deadline fires, every unsettled slot gets `Cancelled` or
    /// `DeadlineExceeded`.
    async fn deliver_batch(
        &self,
        deadline: &Deadline,
        events: &[Event],
    ) -> Vec<ConnectorResult<()>> {
        let client = match self.client() {
            Ok(client) => client,
            Err(_) => return events.iter().map(|_| self.client().map(|_| ())).collect(),
        };
        if events.is_empty() {
            return Vec::new();
        }

        let started = Instant::now();
        let mut slots: Vec<Option<ConnectorResult<()>>> = events.iter().map(|_| None).collect();
        let mut pending = Vec::with_capacity(events.len());
        for (index, event) in events.iter().enumerate() {
            match event.to_json() {
                Ok(body) => pending.push((
                    index,
                    SqsBatchEntry {
                        id: entry_id(index),
                        body,
                        attributes: event_attributes(event),
                    },
                )),
                Err(e) => slots[index] = Some(Err(e)),
            }
        }

        let mut attempt = 0;
        while !pending.is_empty() {
            attempt += 1;

            if attempt > 1 {
                let wait = self.retry.backoff(attempt);
                debug!(
                    name = %self.name,
                    attempt,
                    pending = pending.len(),
                    backoff = ?wait,
                    "retrying batch entries"
                );
                self.metrics.record_retry();
                let expired = tokio::select! {
                    biased;
                    err = deadline.expired() => Some(err),
                    _ = tokio::time::sleep(wait) => None,
                };
                if let Some(err) = expired {
                    for (index, _) in &pending {
                        slots[*index] = Some(Err(interrupted(&err)));
                    }
                    break;
                }
            }

            let batch: Vec<SqsBatchEntry> =
                pending.iter().map(|(_, entry)| entry.clone()).collect();
            self.metrics.record_attempt();
            let sent = tokio::select! {
                biased;
                err = deadline.expired() => Err(err),
                res = client.send_message_batch(&self.config.queue_url, &batch) => res,
            };

            let failures: Vec<((usize, SqsBatchEntry), ConnectorError)> = match sent {
                Ok(results) => {
                    let mut by_id: HashMap<String, ConnectorError> = results
                        .into_iter()
                        .filter_map(|r| r.error.map(|e| (r.id, e)))
                        .collect();
                    std::mem::take(&mut pending)
                        .into_iter()
                        .filter_map(|p| by_id.remove(&p.1.id).map(|e| (p, e)))
                        .collect()
                }
                Err(err) if err.is_cancellation() => {
                    for (index, _) in &pending {
                        slots[*index] = Some(Err(interrupted(&err)));
                    }
                    break;
                }
                Err(err) => {
                    warn!(name = %self.name, attempt, error = %err, "batch send failed");
                    let reason = err.to_string();
                    std::mem::take(&mut pending)
                        .into_iter()
                        .map(|p| {
                            let err = ConnectorError::transport(format!("batch send: {}", reason));
                            (p, err)
                        })
                        .collect()
                }
            };

            for ((index, entry), err) in failures {
                if err.is_retryable() && attempt < self.retry.max_attempts() {
                    pending.push((index, entry));
                } else {
                    warn!(
                        name = %self.name,
                        entry = index,
                        attempt,
                        error = %err,
                        "batch entry failed"
                    );
                    slots[index] = Some(Err(self.exhausted(attempt, err)));
                }
            }
        }

        let results: Vec<ConnectorResult<()>> =
            slots.into_iter().map(|s| s.unwrap_or(Ok(()))).collect();
        let elapsed = started.elapsed();
        for result in &results {
            self.metrics.record_delivery(result.is_ok(), elapsed);
        }
        results
    }
}

/// Registry factory building SQS sources that share `client`
pub fn source_factory_with_client(
    client: Arc<dyn SqsClient>,
) -> impl Fn(&str, &ConnectorOptions) -> ConnectorResult<Arc<dyn Source>> + Send + Sync + 'static {
    move |name: &str, options: &ConnectorOptions| {
        let source = SqsSource::with_client(name, options, client.clone())?;
        Ok(Arc::new(source) as Arc<dyn Source>)
    }
}

/// Registry factory building SQS sinks that share `client`
pub fn sink_factory_with_client(
    client: Arc<dyn SqsClient>,
) -> impl Fn(&str, &ConnectorOptions) -> ConnectorResult<Arc<dyn Sink>> + Send + Sync + 'static {
    move |name: &str, options: &ConnectorOptions| {
        let sink = SqsSink::with_client(name, options, client.clone())?;
        Ok(Arc::new(sink) as Arc<dyn Sink>)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_config_defaults() {
        let options = ConnectorOptions::new()
            .with("queue_url", "https://sqs.us-east-1.amazonaws.com/123/orders");
        let config = SqsConfig::from_options(&options).unwrap();
        assert_eq!(config.max_messages, 10);
        assert_eq!(config.wait_time_seconds, 20);
        assert_eq!(config.region, "");
    }

    #[test]
    fn test_config_numbers_accept_floats() {
        let options = ConnectorOptions::new()
            .with("queue_url", "q")
            .with("region", "eu-west-1")
            .with("max_messages", json!(5.0))
            .with("wait_time_seconds", json!(0));
        let config = SqsConfig::from_options(&options).unwrap();
        assert_eq!(config.region, "eu-west-1");
        assert_eq!(config.max_messages, 5);
        assert_eq!(config.wait_time_seconds, 0);
    }

    #[test]
    fn test_config_requires_queue_url() {
        let err = SqsConfig::from_options(&ConnectorOptions::new()).unwrap_err();
        assert!(err.to_string().contains("queue_url is required"));
    }

    #[test]
    fn test_message_translation() {
        let mut message = SqsMessage {
            message_id: "m-1".into(),
            receipt_handle: "r-1".into(),
            body: r#"{"order":42}"#.into(),
            attributes: HashMap::new(),
        };
        let event = message_to_event("sqs/orders", &message);
        assert_eq!(event.source, "sqs/orders");
        assert_eq!(event.event_type, "sqs.message");
        assert_eq!(event.subject.as_deref(), Some("m-1"));
        assert_eq!(event.data.get(), r#"{"order":42}"#);
        assert_eq!(event.datacontenttype.as_deref(), Some("application/json"));

        message.body = "plain text".into();
        message
            .attributes
            .insert("event_type".into(), "order.created".into());
        let event = message_to_event("sqs/orders", &message);
        assert_eq!(event.event_type, "order.created");
        assert_eq!(event.data.get(), r#""plain text""#);

        message.body = "  {\"order\": 7}\n".into();
        let event = message_to_event("sqs/orders", &message);
        assert_eq!(event.data.get(), "  {\"order\": 7}\n");
    }

    #[test]
    fn test_event_attributes() {
        let event = Event::new("webhook/in", "order.created", crate::EventData::null());
        let attributes = event_attributes(&event);
        assert_eq!(attributes.len(), 2);
        assert_eq!(attributes["event_type"], "order.created");
        assert_eq!(attributes["event_source"], "webhook/in");

        let attributes = event_attributes(&event.with_subject("order-7"));
        assert_eq!(attributes["event_subject"], "order-7");
    }
}
