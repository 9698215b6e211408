//! Integration tests for the connector registry with built-in and
//! client-injected factories.

use event_connect_core::connectors::redis_stream::{self, RedisStreamClient, StreamMessage};
use event_connect_core::{
    Connector, ConnectorError, ConnectorKind, ConnectorOptions, ConnectorResult, Deadline,
    Registry, Source,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

fn deadline() -> Deadline {
    Deadline::after(Duration::from_secs(5))
}

fn webhook_options() -> ConnectorOptions {
    ConnectorOptions::new().with("address", "127.0.0.1:0")
}

#[tokio::test]
async fn test_builtin_types() {
    let registry = Registry::with_builtin_connectors();

    let mut sources = registry.list_sources().await;
    sources.sort();
    assert_eq!(sources, vec!["postgres.cdc", "redis.stream", "sqs", "webhook"]);

    let mut sinks = registry.list_sinks().await;
    sinks.sort();
    assert_eq!(sinks, vec!["sqs", "webhook"]);

    let err = registry
        .register_sink("webhook", |_: &str, _: &ConnectorOptions| {
            Err(ConnectorError::config("unused"))
        })
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        ConnectorError::DuplicateType {
            kind: ConnectorKind::Sink,
            ..
        }
    ));
}

#[tokio::test]
async fn test_empty_registry() {
    let registry = Registry::new();
    assert!(registry.list_sources().await.is_empty());
    assert!(registry.list_sinks().await.is_empty());

    let err = registry
        .create_source("webhook", "ingest", &webhook_options())
        .await
        .err()
        .unwrap();
    assert!(matches!(err, ConnectorError::UnknownType { .. }));
}

#[tokio::test]
async fn test_instance_names_are_unique_across_kinds() {
    let registry = Registry::with_builtin_connectors();

    registry
        .create_source("webhook", "edge", &webhook_options())
        .await
        .unwrap();

    let sink_options = ConnectorOptions::new().with("url", "http://127.0.0.1:9/hook");
    let err = registry
        .create_sink("webhook", "edge", &sink_options)
        .await
        .err()
        .unwrap();
    assert!(matches!(err, ConnectorError::DuplicateInstance { ref name } if name == "edge"));

    registry
        .create_sink("webhook", "egress", &sink_options)
        .await
        .unwrap();
    assert_eq!(registry.instance_count().await, 2);

    let edge = registry.get_instance("edge").await.unwrap();
    assert_eq!(edge.kind(), ConnectorKind::Source);
    assert_eq!(edge.connector_type(), "webhook");
    assert!(edge.as_source().is_some());

    let egress = registry.get_instance("egress").await.unwrap();
    assert_eq!(egress.kind(), ConnectorKind::Sink);
    assert!(egress.as_sink().is_some());
    assert!(egress.healthy());

    registry.stop_all(deadline()).await.unwrap();
}

#[tokio::test]
async fn test_construction_errors_name_the_instance() {
    let registry = Registry::with_builtin_connectors();

    let err = registry
        .create_source("redis.stream", "no-stream", &ConnectorOptions::new())
        .await
        .err()
        .unwrap();
    let msg = err.to_string();
    assert!(msg.contains("no-stream"), "{}", msg);
    assert!(msg.contains("redis.stream"), "{}", msg);
    assert!(msg.contains("stream is required"), "{}", msg);
    assert!(registry.get_instance("no-stream").await.is_none());
}

#[tokio::test]
async fn test_stop_all_stops_running_sources() {
    let registry = Registry::with_builtin_connectors();
    let source = registry
        .create_source("webhook", "ingest", &webhook_options())
        .await
        .unwrap();

    let (tx, _rx) = mpsc::channel(10);
    source.start(CancellationToken::new(), tx).await.unwrap();
    assert!(source.healthy());

    registry.stop_all(deadline()).await.unwrap();
    assert!(!source.healthy());
    assert!(registry.get_instance("ingest").await.is_none());
    assert_eq!(registry.instance_count().await, 0);

    // names become free again
    registry
        .create_source("webhook", "ingest", &webhook_options())
        .await
        .unwrap();
    registry.stop_all(deadline()).await.unwrap();
}

#[tokio::test]
async fn test_builtin_pull_sources_need_a_client() {
    let registry = Registry::with_builtin_connectors();
    let options = ConnectorOptions::new().with("stream", "events");
    let source = registry
        .create_source("redis.stream", "events", &options)
        .await
        .unwrap();

    let (tx, _rx) = mpsc::channel(1);
    let err = source.start(CancellationToken::new(), tx).await.unwrap_err();
    assert!(matches!(err, ConnectorError::Configuration(_)));
}

struct CountingRedis {
    connects: AtomicUsize,
}

#[async_trait::async_trait]
impl RedisStreamClient for CountingRedis {
    async fn connect(&self, _addr: &str) -> ConnectorResult<()> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn create_group(
        &self,
        _stream: &str,
        _group: &str,
        _start_id: &str,
    ) -> ConnectorResult<()> {
        Ok(())
    }

    async fn read_group(
        &self,
        _stream: &str,
        _group: &str,
        _consumer: &str,
        _count: u32,
    ) -> ConnectorResult<Vec<StreamMessage>> {
        tokio::time::sleep(Duration::from_millis(10)).await;
        Ok(Vec::new())
    }

    async fn ack(&self, _stream: &str, _group: &str, _ids: &[String]) -> ConnectorResult<()> {
        Ok(())
    }

    async fn close(&self) -> ConnectorResult<()> {
        Ok(())
    }
}

#[tokio::test]
async fn test_client_injected_factory() {
    let client = Arc::new(CountingRedis {
        connects: AtomicUsize::new(0),
    });
    let registry = Registry::new();
    registry
        .register_source("redis.stream", redis_stream::factory_with_client(client.clone()))
        .await
        .unwrap();

    let options = ConnectorOptions::new().with("stream", "events");
    let source = registry
        .create_source("redis.stream", "events", &options)
        .await
        .unwrap();
    assert_eq!(source.connector_type(), "redis.stream");
    assert_eq!(client.connects.load(Ordering::SeqCst), 0, "factories must not do I/O");

    let (tx, _rx) = mpsc::channel(1);
    source.start(CancellationToken::new(), tx).await.unwrap();
    assert!(source.healthy());
    assert_eq!(client.connects.load(Ordering::SeqCst), 1);

    registry.stop_all(deadline()).await.unwrap();
    assert!(!source.healthy());
}
