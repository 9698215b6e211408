//! Metrics and observability for connectors.
//!
//! Thin facade over the `metrics` crate. Every series is labeled with the
//! connector instance name and type; no exporter is installed here.

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use std::sync::Once;
use std::time::Duration;

static DESCRIBE: Once = Once::new();

/// Metrics collector for one connector instance
#[derive(Debug, Clone)]
pub struct ConnectorMetrics {
    /// Instance name for labeling
    connector_name: String,
    /// Type name for labeling
    connector_type: String,
}

impl ConnectorMetrics {
    /// Create a new metrics collector
    pub fn new(connector_name: impl Into<String>, connector_type: impl Into<String>) -> Self {
        DESCRIBE.call_once(Self::register_metrics);

        Self {
            connector_name: connector_name.into(),
            connector_type: connector_type.into(),
        }
    }

    /// Register metric descriptions
    fn register_metrics() {
        // Counters
        describe_counter!(
            "connector_events_emitted_total",
            "Total number of events a source enqueued onto the output queue"
        );
        describe_counter!(
            "connector_poll_errors_total",
            "Total number of failed fetches in a polling loop"
        );
        describe_counter!(
            "connector_messages_dropped_total",
            "Total number of inbound messages dropped because they could not be translated"
        );
        describe_counter!(
            "connector_ack_failures_total",
            "Total number of failed acknowledgements"
        );
        describe_counter!(
            "connector_delivery_attempts_total",
            "Total number of sink delivery attempts"
        );
        describe_counter!(
            "connector_delivery_retries_total",
            "Total number of sink delivery retries"
        );
        describe_counter!(
            "connector_deliveries_total",
            "Total number of completed sink deliveries, by outcome"
        );
        describe_counter!(
            "connector_webhook_responses_total",
            "Total number of webhook ingress responses, by status"
        );

        // Histograms
        describe_histogram!(
            "connector_delivery_duration_seconds",
            "Time spent delivering one event, retries included"
        );
        describe_histogram!(
            "connector_batch_size",
            "Number of messages in each fetched batch"
        );

        // Gauges
        describe_gauge!(
            "connector_health",
            "Connector health status (1 = healthy, 0 = unhealthy)"
        );
    }

    /// Record an event enqueued by a source
    pub fn record_emitted(&self) {
        counter!(
            "connector_events_emitted_total",
            "connector" => self.connector_name.clone(),
            "type" => self.connector_type.clone(),
        )
        .increment(1);
    }

    /// Record a failed fetch
    pub fn record_poll_error(&self) {
        counter!(
            "connector_poll_errors_total",
            "connector" => self.connector_name.clone(),
            "type" => self.connector_type.clone(),
        )
        .increment(1);
    }

    /// Record a message dropped before it became an event
    pub fn record_dropped(&self) {
        counter!(
            "connector_messages_dropped_total",
            "connector" => self.connector_name.clone(),
            "type" => self.connector_type.clone(),
        )
        .increment(1);
    }

    /// Record a failed acknowledgement
    pub fn record_ack_failure(&self) {
        counter!(
            "connector_ack_failures_total",
            "connector" => self.connector_name.clone(),
            "type" => self.connector_type.clone(),
        )
        .increment(1);
    }

    /// Record batch size
    pub fn record_batch_size(&self, size: usize) {
        histogram!(
            "connector_batch_size",
            "connector" => self.connector_name.clone(),
            "type" => self.connector_type.clone(),
        )
        .record(size as f64);
    }

    /// Record one delivery attempt
    pub fn record_attempt(&self) {
        counter!(
            "connector_delivery_attempts_total",
            "connector" => self.connector_name.clone(),
            "type" => self.connector_type.clone(),
        )
        .increment(1);
    }

    /// Record a retry attempt
    pub fn record_retry(&self) {
        counter!(
            "connector_delivery_retries_total",
            "connector" => self.connector_name.clone(),
            "type" => self.connector_type.clone(),
        )
        .increment(1);
    }

    /// Record the outcome and duration of one delivery
    pub fn record_delivery(&self, success: bool, duration: Duration) {
        let outcome = if success { "success" } else { "failure" };
        counter!(
            "connector_deliveries_total",
            "connector" => self.connector_name.clone(),
            "type" => self.connector_type.clone(),
            "outcome" => outcome,
        )
        .increment(1);
        histogram!(
            "connector_delivery_duration_seconds",
            "connector" => self.connector_name.clone(),
            "type" => self.connector_type.clone(),
        )
        .record(duration.as_secs_f64());
    }

    /// Record a webhook ingress response
    pub fn record_response(&self, status: u16) {
        counter!(
            "connector_webhook_responses_total",
            "connector" => self.connector_name.clone(),
            "type" => self.connector_type.clone(),
            "status" => status.to_string(),
        )
        .increment(1);
    }

    /// Set connector health status
    pub fn set_health(&self, healthy: bool) {
        gauge!(
            "connector_health",
            "connector" => self.connector_name.clone(),
            "type" => self.connector_type.clone(),
        )
        .set(if healthy { 1.0 } else { 0.0 });
    }
}
