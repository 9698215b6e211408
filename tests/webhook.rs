//! Integration tests for the webhook connectors
//!
//! The source is driven over real loopback HTTP with reqwest (and through its
//! router with `tower::ServiceExt::oneshot`); the sink posts to a loopback
//! axum server that records every request.

use axum::body::{Body, Bytes};
use axum::extract::State;
use axum::http::{HeaderMap, Request, StatusCode};
use axum::routing::post;
use axum::Router;
use event_connect_core::connectors::webhook::{WebhookSink, WebhookSource};
use event_connect_core::{
    signature, Connector, ConnectorError, ConnectorOptions, Deadline, Event, EventData, Sink,
    Source,
};
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;

const SECRET: &str = "test-secret-123";

fn source_options() -> ConnectorOptions {
    ConnectorOptions::new().with("address", "127.0.0.1:0")
}

async fn started_source(
    name: &str,
    options: ConnectorOptions,
    capacity: usize,
) -> (WebhookSource, mpsc::Receiver<Event>, String) {
    let source = WebhookSource::new(name, &options).unwrap();
    let (tx, rx) = mpsc::channel(capacity);
    source.start(CancellationToken::new(), tx).await.unwrap();
    let addr = source.local_addr().expect("bound address");
    let url = format!("http://{}{}", addr, source.config().path);
    (source, rx, url)
}

async fn recv(rx: &mut mpsc::Receiver<Event>) -> Event {
    tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("timeout waiting for event")
        .expect("output closed")
}

#[tokio::test]
async fn test_webhook_source_roundtrip() {
    let (source, mut rx, url) = started_source("test-hook", source_options(), 10).await;
    assert!(source.healthy());
    assert_eq!(source.name(), "test-hook");
    assert_eq!(source.connector_type(), "webhook");

    let resp = reqwest::Client::new()
        .post(&url)
        .body(r#"{"hello":"world"}"#)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::ACCEPTED);

    let event = recv(&mut rx).await;
    assert_eq!(event.source, "webhook/test-hook");
    assert_eq!(event.event_type, "webhook.received");
    assert_eq!(event.subject.as_deref(), Some("/webhook"));
    assert_eq!(event.data.get(), r#"{"hello":"world"}"#);
    assert!(rx.try_recv().is_err(), "exactly one event expected");

    source.stop(Deadline::after(Duration::from_secs(5))).await.unwrap();
    assert!(!source.healthy());
}

#[tokio::test]
async fn test_webhook_source_keeps_body_bytes() {
    let (source, mut rx, url) = started_source("exact", source_options(), 10).await;
    let body = "{\"hello\":\"world\"}\n";

    let resp = reqwest::Client::new().post(&url).body(body).send().await.unwrap();
    assert_eq!(resp.status(), StatusCode::ACCEPTED);
    assert_eq!(recv(&mut rx).await.data.get(), body);

    source.stop(Deadline::after(Duration::from_secs(5))).await.unwrap();
}

#[tokio::test]
async fn test_webhook_source_event_type_header_and_text_body() {
    let options = source_options().with("path", "/hooks/github");
    let (source, mut rx, url) = started_source("typed", options, 10).await;

    let resp = reqwest::Client::new()
        .post(&url)
        .header("X-Event-Type", "github.push")
        .body("plain text")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::ACCEPTED);

    let event = recv(&mut rx).await;
    assert_eq!(event.event_type, "github.push");
    assert_eq!(event.subject.as_deref(), Some("/hooks/github"));
    assert_eq!(event.data.get(), r#""plain text""#);

    source.stop(Deadline::after(Duration::from_secs(5))).await.unwrap();
}

#[tokio::test]
async fn test_webhook_source_signature_validation() {
    let options = source_options().with("secret", SECRET);
    let (source, mut rx, url) = started_source("signed", options, 10).await;
    let client = reqwest::Client::new();
    let body = r#"{"event":"push"}"#;

    // valid signature
    let header = signature::sign(SECRET.as_bytes(), body.as_bytes()).unwrap();
    let resp = client
        .post(&url)
        .header("X-Signature-256", &header)
        .body(body)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::ACCEPTED);
    assert_eq!(recv(&mut rx).await.data.get(), body);

    // body mutated after signing
    let resp = client
        .post(&url)
        .header("X-Signature-256", &header)
        .body(r#"{"event":"pull"}"#)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

    // signed with another secret
    let wrong = signature::sign(b"wrong-secret", body.as_bytes()).unwrap();
    let resp = client
        .post(&url)
        .header("X-Signature-256", wrong)
        .body(body)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

    // malformed digest
    let resp = client
        .post(&url)
        .header("X-Signature-256", "sha256=zzzz")
        .body(body)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

    // no signature at all
    let resp = client.post(&url).body(body).send().await.unwrap();
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

    assert!(rx.try_recv().is_err());
    source.stop(Deadline::after(Duration::from_secs(5))).await.unwrap();
}

#[tokio::test]
async fn test_webhook_source_method_not_allowed() {
    let (source, mut rx, url) = started_source("methods", source_options(), 10).await;

    let resp = reqwest::Client::new().get(&url).send().await.unwrap();
    assert_eq!(resp.status(), StatusCode::METHOD_NOT_ALLOWED);

    let resp = reqwest::Client::new().put(&url).body("{}").send().await.unwrap();
    assert_eq!(resp.status(), StatusCode::METHOD_NOT_ALLOWED);

    assert!(rx.try_recv().is_err());
    source.stop(Deadline::after(Duration::from_secs(5))).await.unwrap();
}

#[tokio::test]
async fn test_webhook_source_not_started_rejects() {
    let source = WebhookSource::new("idle", &source_options()).unwrap();
    assert!(!source.healthy());
    assert!(source.local_addr().is_none());

    let resp = source
        .router()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/webhook")
                .body(Body::from("{}"))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn test_webhook_source_queue_full() {
    let (source, mut rx, url) = started_source("full", source_options(), 1).await;
    let client = reqwest::Client::new();

    let first = client.post(&url).body("{}").send().await.unwrap();
    assert_eq!(first.status(), StatusCode::ACCEPTED);

    // nobody drained the queue; the handler must not block
    let second = tokio::time::timeout(
        Duration::from_secs(2),
        client.post(&url).body("{}").send(),
    )
    .await
    .expect("handler blocked on a full queue")
    .unwrap();
    assert_eq!(second.status(), StatusCode::SERVICE_UNAVAILABLE);

    recv(&mut rx).await;
    source.stop(Deadline::after(Duration::from_secs(5))).await.unwrap();
}

#[tokio::test]
async fn test_webhook_source_rejects_after_stop() {
    let (source, _rx, _url) = started_source("stopped", source_options(), 10).await;
    source.stop(Deadline::after(Duration::from_secs(5))).await.unwrap();

    let resp = source
        .router()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/webhook")
                .body(Body::from("{}"))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);

    let (tx, _rx) = mpsc::channel(1);
    let err = source.start(CancellationToken::new(), tx).await.unwrap_err();
    assert!(matches!(err, ConnectorError::Configuration(_)));
}

#[tokio::test]
async fn test_webhook_source_stop_racing_start_is_terminal() {
    for _ in 0..20 {
        let source = WebhookSource::new("racy", &source_options()).unwrap();
        let (tx, _rx) = mpsc::channel(1);

        let (started, stopped) = tokio::join!(
            source.start(CancellationToken::new(), tx),
            source.stop(Deadline::after(Duration::from_secs(5))),
        );
        stopped.unwrap();
        // start either finished first, was interrupted, or saw a stopped source
        assert!(matches!(
            started,
            Ok(()) | Err(ConnectorError::Cancelled) | Err(ConnectorError::Configuration(_))
        ));
        assert!(!source.healthy());

        let resp = source
            .router()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/webhook")
                    .body(Body::from("{}"))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
    }
}

#[tokio::test]
async fn test_webhook_source_bind_failure() {
    let occupied = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = occupied.local_addr().unwrap();

    let options = ConnectorOptions::new().with("address", addr.to_string());
    let source = WebhookSource::new("clash", &options).unwrap();
    let (tx, _rx) = mpsc::channel(1);

    let err = source.start(CancellationToken::new(), tx).await.unwrap_err();
    assert!(matches!(err, ConnectorError::Connection { .. }));
    assert!(!source.healthy());
}

/// Loopback HTTP endpoint recording every request
struct Target {
    calls: AtomicUsize,
    fail: Box<dyn Fn(usize) -> bool + Send + Sync>,
    requests: Mutex<Vec<(HeaderMap, Bytes)>>,
}

async fn receive(State(target): State<Arc<Target>>, headers: HeaderMap, body: Bytes) -> StatusCode {
    let call = target.calls.fetch_add(1, Ordering::SeqCst) + 1;
    target.requests.lock().unwrap().push((headers, body));
    if (target.fail)(call) {
        StatusCode::INTERNAL_SERVER_ERROR
    } else {
        StatusCode::OK
    }
}

async fn spawn_target(
    fail: impl Fn(usize) -> bool + Send + Sync + 'static,
) -> (Arc<Target>, String) {
    let target = Arc::new(Target {
        calls: AtomicUsize::new(0),
        fail: Box::new(fail),
        requests: Mutex::new(Vec::new()),
    });
    let app = Router::new()
        .route("/hook", post(receive))
        .with_state(target.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr: SocketAddr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (target, format!("http://{}/hook", addr))
}

fn sink_options(url: &str, max_attempts: f64) -> ConnectorOptions {
    ConnectorOptions::new()
        .with("url", url)
        .with("retry", json!({"max_attempts": max_attempts, "backoff": "1ms"}))
}

fn test_event(id: &str) -> Event {
    Event::new(
        "test/source",
        "test.event",
        EventData::from_json_string(r#"{"key":"value"}"#).unwrap(),
    )
    .with_id(id)
}

#[tokio::test]
async fn test_webhook_sink_deliver() {
    let (target, url) = spawn_target(|_| false).await;
    let options = sink_options(&url, 3.0).with("headers", json!({"X-Custom": "custom-value"}));
    let sink = WebhookSink::new("test-sink", &options).unwrap();
    assert!(sink.healthy());

    sink.deliver(&Deadline::after(Duration::from_secs(5)), &test_event("evt-001"))
        .await
        .unwrap();

    let requests = target.requests.lock().unwrap();
    assert_eq!(requests.len(), 1);
    let (headers, body) = &requests[0];
    assert_eq!(headers["content-type"], "application/cloudevents+json");
    assert_eq!(headers["x-custom"], "custom-value");

    let delivered: Value = serde_json::from_slice(body).unwrap();
    assert_eq!(delivered["id"], "evt-001");
    assert_eq!(delivered["type"], "test.event");
    assert_eq!(delivered["data"], json!({"key": "value"}));
}

#[tokio::test]
async fn test_webhook_sink_retry() {
    let (target, url) = spawn_target(|call| call <= 2).await;
    let sink = WebhookSink::new("retry-sink", &sink_options(&url, 5.0)).unwrap();

    sink.deliver(&Deadline::after(Duration::from_secs(5)), &test_event("evt-retry"))
        .await
        .unwrap();
    assert_eq!(target.calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_webhook_sink_all_retries_fail() {
    let (target, url) = spawn_target(|_| true).await;
    let sink = WebhookSink::new("fail-sink", &sink_options(&url, 2.0)).unwrap();

    let err = sink
        .deliver(&Deadline::after(Duration::from_secs(5)), &test_event("evt-fail"))
        .await
        .unwrap_err();
    let msg = err.to_string();
    assert!(msg.contains("delivery failed after 2 attempts"), "{}", msg);
    assert!(msg.contains("fail-sink"), "{}", msg);
    assert!(msg.contains("500"), "{}", msg);
    assert_eq!(target.calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_webhook_sink_connection_refused() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let url = format!("http://{}/hook", addr);
    let sink = WebhookSink::new("refused", &sink_options(&url, 2.0)).unwrap();
    let err = sink
        .deliver(&Deadline::after(Duration::from_secs(5)), &test_event("evt-refused"))
        .await
        .unwrap_err();
    assert!(matches!(err, ConnectorError::Delivery { attempts: 2, .. }), "{}", err);
}

#[tokio::test]
async fn test_webhook_sink_deadline_aborts_backoff() {
    let (_target, url) = spawn_target(|_| true).await;
    let options = ConnectorOptions::new()
        .with("url", url.as_str())
        .with("retry", json!({"max_attempts": 3, "backoff": "30s"}));
    let sink = WebhookSink::new("slow-sink", &options).unwrap();

    let err = tokio::time::timeout(
        Duration::from_secs(5),
        sink.deliver(&Deadline::after(Duration::from_millis(200)), &test_event("evt-slow")),
    )
    .await
    .expect("deliver ignored the deadline")
    .unwrap_err();
    assert!(matches!(err, ConnectorError::DeadlineExceeded));
}

#[tokio::test]
async fn test_webhook_sink_batch_partial_failure() {
    let (_target, url) = spawn_target(|call| call == 2).await;
    let sink = WebhookSink::new("batch-sink", &sink_options(&url, 1.0)).unwrap();

    let events = vec![test_event("b-1"), test_event("b-2"), test_event("b-3")];
    let results = sink
        .deliver_batch(&Deadline::after(Duration::from_secs(5)), &events)
        .await;

    assert_eq!(results.len(), 3);
    assert!(results[0].is_ok());
    assert!(results[1].is_err());
    assert!(results[2].is_ok());
}

#[tokio::test]
async fn test_webhook_sink_missing_url() {
    let err = WebhookSink::new("no-url", &ConnectorOptions::new()).unwrap_err();
    assert!(err.to_string().contains("url is required"));
}

#[tokio::test]
async fn test_webhook_sink_stopped() {
    let (target, url) = spawn_target(|_| false).await;
    let sink = WebhookSink::new("stopped-sink", &sink_options(&url, 1.0)).unwrap();

    sink.stop(Deadline::none()).await.unwrap();
    assert!(!sink.healthy());

    let err = sink
        .deliver(&Deadline::none(), &test_event("evt-late"))
        .await
        .unwrap_err();
    assert!(matches!(err, ConnectorError::Configuration(_)));
    assert_eq!(target.calls.load(Ordering::SeqCst), 0);
}
