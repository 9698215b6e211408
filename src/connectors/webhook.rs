//! HTTP webhook connectors.
//!
//! - [`WebhookSource`]: embedded axum listener turning POSTs into events
//! - [`WebhookSink`]: reqwest client POSTing events as CloudEvents JSON, with retries
//!
//! Source options: `address` (default `":8080"`, host optional), `path`
//! (default `"/webhook"`), `secret` (enables `X-Signature-256` checks).
//!
//! Sink options: `url` (required), `method` (default `POST`), `headers` (map),
//! `timeout` (default 30s per request), `retry.max_attempts`, `retry.backoff`.

use crate::config::ConnectorOptions;
use crate::retry::RetryPolicy;
use crate::runtime::{Deadline, Worker};
use crate::signature::{self, SIGNATURE_HEADER};
use crate::utils::{json_or_string, HealthState};
use crate::{
    Connector, ConnectorError, ConnectorMetrics, ConnectorResult, Event, EventSender, Sink, Source,
};
use async_trait::async_trait;
use axum::body::Body;
use axum::extract::State;
use axum::http::{HeaderMap, Method, StatusCode, Uri};
use axum::routing::any;
use axum::Router;
use reqwest::header::{HeaderName, HeaderValue, CONTENT_TYPE};
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, info_span, warn, Instrument};

/// Registered type name for both the source and the sink
pub const TYPE_NAME: &str = "webhook";

const DEFAULT_ADDRESS: &str = ":8080";
const DEFAULT_PATH: &str = "/webhook";
const DEFAULT_EVENT_TYPE: &str = "webhook.received";
const EVENT_TYPE_HEADER: &str = "x-event-type";
const MAX_BODY_BYTES: usize = 10 * 1024 * 1024;

/// Content type of outbound deliveries
pub const CLOUDEVENTS_CONTENT_TYPE: &str = "application/cloudevents+json";

const DEFAULT_SINK_TIMEOUT: Duration = Duration::from_secs(30);

/// Webhook source settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebhookSourceConfig {
    /// Listen address; `":8080"` binds all interfaces, port 0 lets the OS pick
    pub address: String,
    /// Route the handler is mounted on
    pub path: String,
    /// Shared HMAC secret; `None` disables signature checks
    pub secret: Option<String>,
}

impl WebhookSourceConfig {
    /// Decode from an option bag
    pub fn from_options(options: &ConnectorOptions) -> ConnectorResult<Self> {
        let mut path = options.string_or("path", DEFAULT_PATH);
        if !path.starts_with('/') {
            path.insert(0, '/');
        }
        let secret = options.get_str("secret").filter(|s| !s.is_empty());

        Ok(Self {
            address: options.string_or("address", DEFAULT_ADDRESS),
            path,
            secret: secret.map(str::to_string),
        })
    }

    /// Socket address to bind, with an omitted host meaning all interfaces
    fn bind_address(&self) -> String {
        if self.address.starts_with(':') {
            format!("0.0.0.0{}", self.address)
        } else {
            self.address.clone()
        }
    }
}

/// State shared between the source and its request handler
struct IngressState {
    event_source: String,
    secret: Option<Vec<u8>>,
    output: RwLock<Option<EventSender>>,
    metrics: ConnectorMetrics,
}

/// Push-based source receiving HTTP POSTs
pub struct WebhookSource {
    name: String,
    config: WebhookSourceConfig,
    state: Arc<IngressState>,
    health: HealthState,
    server: Mutex<Option<Worker>>,
    local_addr: OnceLock<SocketAddr>,
}

impl WebhookSource {
    /// Create a webhook source; performs no I/O
    pub fn new(name: impl Into<String>, options: &ConnectorOptions) -> ConnectorResult<Self> {
        let name = name.into();
        let config = WebhookSourceConfig::from_options(options)?;
        let state = Arc::new(IngressState {
            event_source: format!("{}/{}", TYPE_NAME, name),
            secret: config.secret.as_ref().map(|s| s.as_bytes().to_vec()),
            output: RwLock::new(None),
            metrics: ConnectorMetrics::new(&name, TYPE_NAME),
        });

        Ok(Self {
            name,
            config,
            state,
            health: HealthState::new(),
            server: Mutex::new(None),
            local_addr: OnceLock::new(),
        })
    }

    /// Get the decoded configuration
    pub fn config(&self) -> &WebhookSourceConfig {
        &self.config
    }

    /// Address the listener is bound to, once started
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr.get().copied()
    }

    /// The request handler mounted at the configured path
    ///
    /// Shares state with this source, so requests are answered with 503 until
    /// `start` has run and again after `stop`.
    pub fn router(&self) -> Router {
        Router::new()
            .route(&self.config.path, any(handle_request))
            .with_state(self.state.clone())
    }
}

async fn handle_request(
    State(state): State<Arc<IngressState>>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Body,
) -> StatusCode {
    let status = ingest(&state, method, uri, headers, body).await;
    state.metrics.record_response(status.as_u16());
    status
}

async fn ingest(
    state: &IngressState,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Body,
) -> StatusCode {
    let Some(output) = state.output.read().await.clone() else {
        return StatusCode::SERVICE_UNAVAILABLE;
    };

    if method != Method::POST {
        return StatusCode::METHOD_NOT_ALLOWED;
    }

    let body = match axum::body::to_bytes(body, MAX_BODY_BYTES).await {
        Ok(body) => body,
        Err(e) => {
            warn!(error = %e, "failed to read webhook body");
            return StatusCode::BAD_REQUEST;
        }
    };

    if let Some(secret) = &state.secret {
        let header = headers
            .get(SIGNATURE_HEADER)
            .and_then(|v| v.to_str().ok());
        if !signature::verify(secret, &body, header) {
            warn!(path = %uri.path(), "webhook signature verification failed");
            return StatusCode::UNAUTHORIZED;
        }
    }

    let event_type = headers
        .get(EVENT_TYPE_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .unwrap_or(DEFAULT_EVENT_TYPE);

    let event = Event::new(state.event_source.as_str(), event_type, json_or_string(&body))
        .with_subject(uri.path());

    match output.try_send(event) {
        Ok(()) => {
            state.metrics.record_emitted();
            StatusCode::ACCEPTED
        }
        Err(mpsc::error::TrySendError::Full(_)) => {
            state.metrics.record_dropped();
            warn!("output queue full; rejecting webhook");
            StatusCode::SERVICE_UNAVAILABLE
        }
        Err(mpsc::error::TrySendError::Closed(_)) => {
            state.metrics.record_dropped();
            warn!("output queue closed; rejecting webhook");
            StatusCode::SERVICE_UNAVAILABLE
        }
    }
}

#[async_trait]
impl Connector for WebhookSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn connector_type(&self) -> &str {
        TYPE_NAME
    }

    async fn stop(&self, deadline: Deadline) -> ConnectorResult<()> {
        self.health.mark_stopped();
        self.state.output.write().await.take();

        // an in-flight start holds this lock until it has settled
        let mut guard = tokio::select! {
            biased;
            guard = self.server.lock() => guard,
            err = deadline.expired() => return Err(err),
        };
        self.state.output.write().await.take();
        self.state.metrics.set_health(false);

        let Some(server) = guard.take() else {
            return Ok(());
        };
        drop(guard);
        server.shutdown(&deadline).await?;
        info!(name = %self.name, "webhook source stopped");
        Ok(())
    }

    fn healthy(&self) -> bool {
        self.health.is_healthy()
    }
}

#[async_trait]
impl Source for WebhookSource {
    async fn start(&self, cancel: CancellationToken, output: EventSender) -> ConnectorResult<()> {
        let mut server = self.server.lock().await;
        if server.is_some() {
            return Err(ConnectorError::config(format!(
                "webhook source {:?} is already running",
                self.name
            )));
        }
        if self.health.state() == crate::LifecycleState::Stopped {
            return Err(ConnectorError::config(format!(
                "webhook source {:?} was stopped and cannot be restarted",
                self.name
            )));
        }

        let bind = self.config.bind_address();
        let listener = TcpListener::bind(&bind).await.map_err(|e| {
            ConnectorError::connection_with_source(
                format!("webhook source {:?}: bind {}", self.name, bind),
                e,
            )
        })?;
        let local_addr = listener.local_addr()?;

        // `stop` may have run while binding
        if !self.health.mark_running() {
            info!(name = %self.name, "webhook source stopped while starting");
            return Err(ConnectorError::Cancelled);
        }
        self.state.metrics.set_health(true);
        let _ = self.local_addr.set(local_addr);

        *self.state.output.write().await = Some(output);

        let router = self.router();
        let span = info_span!("webhook_server", name = %self.name, address = %local_addr);
        *server = Some(Worker::spawn(&cancel, move |token| {
            async move {
                let shutdown = async move { token.cancelled().await };
                if let Err(e) = axum::serve(listener, router)
                    .with_graceful_shutdown(shutdown)
                    .await
                {
                    error!(error = %e, "webhook server failed");
                }
            }
            .instrument(span)
        }));

        info!(
            name = %self.name,
            address = %local_addr,
            path = %self.config.path,
            "webhook source listening"
        );
        Ok(())
    }
}

/// Webhook sink settings
#[derive(Debug, Clone)]
pub struct WebhookSinkConfig {
    pub url: reqwest::Url,
    pub method: reqwest::Method,
    pub headers: BTreeMap<String, String>,
    /// Per-request timeout
    pub timeout: Duration,
    pub retry: RetryPolicy,
}

impl WebhookSinkConfig {
    /// Decode from an option bag
    pub fn from_options(options: &ConnectorOptions) -> ConnectorResult<Self> {
        let url = options.require_str("url")?;
        let url = reqwest::Url::parse(&url)
            .map_err(|e| ConnectorError::config(format!("invalid url {:?}: {}", url, e)))?;

        let method = options.string_or("method", "POST").to_ascii_uppercase();
        let method = reqwest::Method::from_bytes(method.as_bytes())
            .map_err(|e| ConnectorError::config(format!("invalid method {:?}: {}", method, e)))?;

        let headers = options.string_map("headers");
        for (key, value) in &headers {
            HeaderName::from_bytes(key.as_bytes()).map_err(|e| {
                ConnectorError::config(format!("invalid header name {:?}: {}", key, e))
            })?;
            HeaderValue::from_str(value).map_err(|e| {
                ConnectorError::config(format!("invalid value for header {:?}: {}", key, e))
            })?;
        }

        Ok(Self {
            url,
            method,
            headers,
            timeout: options.duration_or("timeout", DEFAULT_SINK_TIMEOUT)?,
            retry: RetryPolicy::from_options(options)?,
        })
    }
}

/// Sink POSTing events to an HTTP endpoint
#[derive(Debug)]
pub struct WebhookSink {
    name: String,
    destination: String,
    config: WebhookSinkConfig,
    client: reqwest::Client,
    health: HealthState,
    metrics: ConnectorMetrics,
}

impl WebhookSink {
    /// Create a webhook sink; performs no I/O
    pub fn new(name: impl Into<String>, options: &ConnectorOptions) -> ConnectorResult<Self> {
        let name = name.into();
        let config = WebhookSinkConfig::from_options(options)?;
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| ConnectorError::config(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            destination: format!("webhook sink {:?}", name),
            metrics: ConnectorMetrics::new(&name, TYPE_NAME),
            name,
            config,
            client,
            health: HealthState::running(),
        })
    }

    /// Get the decoded configuration
    pub fn config(&self) -> &WebhookSinkConfig {
        &self.config
    }

    fn request(&self, body: Vec<u8>) -> reqwest::RequestBuilder {
        let mut request = self
            .client
            .request(self.config.method.clone(), self.config.url.clone())
            .header(CONTENT_TYPE, CLOUDEVENTS_CONTENT_TYPE);
        for (key, value) in &self.config.headers {
            request = request.header(key.as_str(), value.as_str());
        }
        request.body(body)
    }
}

#[async_trait]
impl Connector for WebhookSink {
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
impl Sink for WebhookSink {
    async fn deliver(&self, deadline: &Deadline, event: &Event) -> ConnectorResult<()> {
        if self.health.state() == crate::LifecycleState::Stopped {
            return Err(ConnectorError::config(format!("{} is stopped", self.destination)));
        }

        let body = event.to_json_bytes()?;
        self.config
            .retry
            .run(&self.destination, deadline, &self.metrics, |_| {
                let request = self.request(body.clone());
                async move {
                    let response = request.send().await.map_err(|e| {
                        ConnectorError::transport_with_source("webhook request failed", e)
                    })?;
                    let status = response.status();
                    if status.is_success() {
                        Ok(())
                    } else {
                        Err(ConnectorError::HttpStatus {
                            status: status.as_u16(),
                        })
                    }
                }
            })
            .await
    }
}
