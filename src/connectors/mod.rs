//! Built-in connectors.
//!
//! | Type | Source | Sink |
//! |---|---|---|
//! | `webhook` | [`webhook::WebhookSource`] | [`webhook::WebhookSink`] |
//! | `sqs` | [`sqs::SqsSource`] | [`sqs::SqsSink`] |
//! | `postgres.cdc` | [`postgres_cdc::PostgresCdcSource`] | |
//! | `redis.stream` | [`redis_stream::RedisStreamSource`] | |
//!
//! The pull-based connectors take their network client through a trait
//! ([`sqs::SqsClient`], [`postgres_cdc::PgListener`],
//! [`redis_stream::RedisStreamClient`]); bring your own implementation.

pub mod postgres_cdc;
pub mod redis_stream;
pub mod sqs;
pub mod webhook;

use crate::config::ConnectorOptions;
use crate::registry::{SinkFactory, SourceFactory};
use crate::{ConnectorResult, Sink, Source};
use std::sync::Arc;

fn webhook_source(name: &str, options: &ConnectorOptions) -> ConnectorResult<Arc<dyn Source>> {
    Ok(Arc::new(webhook::WebhookSource::new(name, options)?))
}

fn webhook_sink(name: &str, options: &ConnectorOptions) -> ConnectorResult<Arc<dyn Sink>> {
    Ok(Arc::new(webhook::WebhookSink::new(name, options)?))
}

fn sqs_source(name: &str, options: &ConnectorOptions) -> ConnectorResult<Arc<dyn Source>> {
    Ok(Arc::new(sqs::SqsSource::new(name, options)?))
}

fn sqs_sink(name: &str, options: &ConnectorOptions) -> ConnectorResult<Arc<dyn Sink>> {
    Ok(Arc::new(sqs::SqsSink::new(name, options)?))
}

fn postgres_cdc_source(name: &str, options: &ConnectorOptions) -> ConnectorResult<Arc<dyn Source>> {
    Ok(Arc::new(postgres_cdc::PostgresCdcSource::new(name, options)?))
}

fn redis_stream_source(name: &str, options: &ConnectorOptions) -> ConnectorResult<Arc<dyn Source>> {
    Ok(Arc::new(redis_stream::RedisStreamSource::new(name, options)?))
}

pub(crate) fn builtin_sources() -> Vec<(&'static str, SourceFactory)> {
    vec![
        (webhook::TYPE_NAME, Arc::new(webhook_source) as SourceFactory),
        (sqs::TYPE_NAME, Arc::new(sqs_source) as SourceFactory),
        (postgres_cdc::TYPE_NAME, Arc::new(postgres_cdc_source) as SourceFactory),
        (redis_stream::TYPE_NAME, Arc::new(redis_stream_source) as SourceFactory),
    ]
}

pub(crate) fn builtin_sinks() -> Vec<(&'static str, SinkFactory)> {
    vec![
        (webhook::TYPE_NAME, Arc::new(webhook_sink) as SinkFactory),
        (sqs::TYPE_NAME, Arc::new(sqs_sink) as SinkFactory),
    ]
}
