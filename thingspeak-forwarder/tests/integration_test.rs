//! End-to-end tests against a local stand-in for the ThingSpeak API.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::post;
use axum::Json;
use parking_lot::Mutex;
use serde_json::{Value, json};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use thingspeak_common::{PortRegistry, PortTable, PortValue, ValueChangeEvent};
use thingspeak_forwarder::config::FieldMapping;
use thingspeak_forwarder::payload::FieldValues;
use thingspeak_forwarder::{
    HttpTransport, PortSubscriber, SendError, ThingSpeakClient, ThingSpeakConfig, UpdateTransport,
    ValueForwarder,
};
use zenoh::sample::SampleKind;

type Received = Arc<Mutex<Vec<Value>>>;

async fn update_handler(State(received): State<Received>, Json(body): Json<Value>) -> Json<Value> {
    received.lock().push(body);
    Json(json!({ "channel_id": 1, "entry_id": 42 }))
}

async fn rejecting_handler() -> (StatusCode, &'static str) {
    (StatusCode::BAD_REQUEST, "-1")
}

async fn plain_text_handler() -> &'static str {
    "accepted"
}

/// Start a fake ThingSpeak server on an ephemeral port.
async fn start_server() -> (SocketAddr, Received) {
    let received = Received::default();
    let router = Router::new()
        .route("/update.json", post(update_handler))
        .route("/rejected.json", post(rejecting_handler))
        .route("/plain.json", post(plain_text_handler))
        .with_state(received.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });

    (addr, received)
}

fn endpoint(addr: SocketAddr, path: &str) -> String {
    format!("http://{}{}", addr, path)
}

// =============================================================================
// HTTP transport
// =============================================================================

#[tokio::test]
async fn test_transport_posts_json_body() {
    let (addr, received) = start_server().await;
    let transport = HttpTransport::new(endpoint(addr, "/update.json"), None).unwrap();

    let body = json!({ "api_key": "KEY", "field1": 1.5 });
    transport.post_update(&body).await.unwrap();

    assert_eq!(received.lock().as_slice(), &[body]);
}

#[tokio::test]
async fn test_transport_error_status() {
    let (addr, _) = start_server().await;
    let transport = HttpTransport::new(endpoint(addr, "/rejected.json"), None).unwrap();

    let err = transport.post_update(&json!({})).await.unwrap_err();
    match err {
        SendError::Status { status, body } => {
            assert_eq!(status.as_u16(), 400);
            assert_eq!(body, "-1");
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn test_transport_not_found_is_error() {
    let (addr, _) = start_server().await;
    let transport = HttpTransport::new(endpoint(addr, "/missing.json"), None).unwrap();

    let err = transport.post_update(&json!({})).await.unwrap_err();
    assert!(matches!(err, SendError::Status { .. }));
}

#[tokio::test]
async fn test_transport_rejects_non_json_reply() {
    let (addr, _) = start_server().await;
    let transport = HttpTransport::new(endpoint(addr, "/plain.json"), None).unwrap();

    let err = transport.post_update(&json!({})).await.unwrap_err();
    assert!(matches!(err, SendError::InvalidResponse(_)));
}

/// Serve one request, answering 500 with a body cut short.
async fn start_truncating_server() -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();

        // Consume the whole request before answering
        let mut request = Vec::new();
        let mut buf = [0u8; 1024];
        loop {
            let n = socket.read(&mut buf).await.unwrap();
            if n == 0 {
                return;
            }
            request.extend_from_slice(&buf[..n]);
            if let Some(end) = find_headers_end(&request) {
                let headers = String::from_utf8_lossy(&request[..end]).to_lowercase();
                let content_length = headers
                    .lines()
                    .find_map(|line| line.strip_prefix("content-length:"))
                    .and_then(|v| v.trim().parse::<usize>().ok())
                    .unwrap_or(0);
                if request.len() >= end + content_length {
                    break;
                }
            }
        }

        socket
            .write_all(b"HTTP/1.1 500 Internal Server Error\r\ncontent-length: 100\r\n\r\nshort")
            .await
            .unwrap();
        socket.shutdown().await.unwrap();
    });
    addr
}

fn find_headers_end(data: &[u8]) -> Option<usize> {
    data.windows(4).position(|w| w == b"\r\n\r\n").map(|pos| pos + 4)
}

#[tokio::test]
async fn test_transport_reports_unreadable_error_body() {
    let addr = start_truncating_server().await;
    let transport = HttpTransport::new(endpoint(addr, "/update.json"), None).unwrap();

    let err = transport.post_update(&json!({})).await.unwrap_err();
    match err {
        SendError::Status { status, body } => {
            assert_eq!(status.as_u16(), 500);
            assert!(body.starts_with("<unreadable body:"), "body was {body:?}");
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn test_transport_connection_refused() {
    let transport = HttpTransport::new("http://127.0.0.1:1/update.json", None).unwrap();

    let err = transport.post_update(&json!({})).await.unwrap_err();
    assert!(matches!(err, SendError::Http(_)));
}

#[tokio::test]
async fn test_empty_values_make_no_request() {
    let (addr, received) = start_server().await;
    let transport = HttpTransport::new(endpoint(addr, "/update.json"), None).unwrap();
    let client = ThingSpeakClient::new("KEY", transport);

    let err = client
        .send_values(&FieldValues::new(), chrono::Utc::now())
        .await
        .unwrap_err();

    assert_eq!(err.to_string(), "Refusing to send empty values");
    assert!(received.lock().is_empty());
}

// =============================================================================
// Forwarder over HTTP
// =============================================================================

#[tokio::test]
async fn test_forwarder_sends_over_http() {
    let (addr, received) = start_server().await;
    let fields = FieldMapping::from([("temp".to_string(), 1), ("door".to_string(), 3)]);
    let config = ThingSpeakConfig::new("WRITEKEY", fields)
        .with_min_period(0)
        .with_endpoint(endpoint(addr, "/update.json"));
    let transport = HttpTransport::new(&config.endpoint, config.timeout()).unwrap();
    let mut forwarder =
        ValueForwarder::new(&config, transport, Arc::new(PortTable::new())).unwrap();

    let event = ValueChangeEvent::new("door", None, Some(PortValue::Boolean(true)))
        .with_timestamp(1_700_000_000_000);
    forwarder.on_value_change(&event).await;

    let bodies = received.lock().clone();
    assert_eq!(
        bodies,
        vec![json!({
            "api_key": "WRITEKEY",
            "created_at": "2023-11-14 22:13:20",
            "field3": true
        })]
    );
    assert_eq!(forwarder.stats().sends_succeeded, 1);
}

#[tokio::test]
async fn test_forwarder_survives_rejection() {
    let (addr, _) = start_server().await;
    let fields = FieldMapping::from([("temp".to_string(), 1)]);
    let config = ThingSpeakConfig::new("WRITEKEY", fields)
        .with_min_period(0)
        .with_endpoint(endpoint(addr, "/rejected.json"));
    let transport = HttpTransport::new(&config.endpoint, None).unwrap();
    let mut forwarder =
        ValueForwarder::new(&config, transport, Arc::new(PortTable::new())).unwrap();

    forwarder
        .on_value_change(&ValueChangeEvent::new(
            "temp",
            None,
            Some(PortValue::Number(20.0)),
        ))
        .await;

    assert!(forwarder.cached_values().is_empty());
    assert_eq!(forwarder.stats().sends_failed, 1);
}

// =============================================================================
// Bus samples
// =============================================================================

async fn subscriber_with_server() -> (PortSubscriber<HttpTransport>, Arc<PortTable>, Received) {
    let (addr, received) = start_server().await;
    let fields = FieldMapping::from([("livingroom/temp".to_string(), 1)]);
    let config = ThingSpeakConfig::new("KEY", fields)
        .with_min_period(0)
        .with_endpoint(endpoint(addr, "/update.json"));
    let transport = HttpTransport::new(&config.endpoint, None).unwrap();

    let ports = Arc::new(PortTable::with_ports(["livingroom/temp"]));
    let forwarder = ValueForwarder::new(&config, transport, ports.clone()).unwrap();
    let subscriber = PortSubscriber::new(
        forwarder,
        ports.clone(),
        Default::default(),
        "qtoggle/ports",
    );

    (subscriber, ports, received)
}

#[tokio::test]
async fn test_sample_updates_table_and_forwards() {
    let (mut subscriber, ports, received) = subscriber_with_server().await;

    subscriber
        .handle_sample(
            "qtoggle/ports/livingroom/temp",
            SampleKind::Put,
            br#"{"timestamp": 1700000000000, "value": 21.5}"#,
        )
        .await;

    assert_eq!(
        ports.last_read_value("livingroom/temp"),
        Some(Some(PortValue::Number(21.5)))
    );
    let bodies = received.lock().clone();
    assert_eq!(bodies.len(), 1);
    assert_eq!(bodies[0]["field1"], json!(21.5));
    assert_eq!(bodies[0]["created_at"], json!("2023-11-14 22:13:20"));
}

#[tokio::test]
async fn test_delete_sample_sends_null() {
    let (mut subscriber, ports, received) = subscriber_with_server().await;
    ports.update("livingroom/temp", Some(PortValue::Number(20.0)));

    subscriber
        .handle_sample("qtoggle/ports/livingroom/temp", SampleKind::Delete, b"")
        .await;

    assert_eq!(ports.last_read_value("livingroom/temp"), Some(None));
    let bodies = received.lock().clone();
    assert_eq!(bodies.len(), 1);
    assert_eq!(bodies[0]["field1"], Value::Null);
}

#[tokio::test]
async fn test_untracked_and_invalid_samples() {
    let (mut subscriber, ports, received) = subscriber_with_server().await;

    // Not a configured port
    subscriber
        .handle_sample("qtoggle/ports/kitchen/light", SampleKind::Put, b"true")
        .await;
    // Outside the prefix
    subscriber
        .handle_sample("other/livingroom/temp", SampleKind::Put, b"1")
        .await;
    // Undecodable payload
    subscriber
        .handle_sample("qtoggle/ports/livingroom/temp", SampleKind::Put, b"{oops")
        .await;

    // Object without a value
    subscriber
        .handle_sample("qtoggle/ports/livingroom/temp", SampleKind::Put, br#"{"val": 3}"#)
        .await;

    assert_eq!(ports.last_read_value("kitchen/light"), None);
    assert_eq!(ports.len(), 1);
    assert_eq!(ports.last_read_value("livingroom/temp"), Some(None));
    assert!(received.lock().is_empty());
    assert_eq!(subscriber.forwarder().stats().events_received, 0);
}

#[tokio::test]
async fn test_update_keeps_value_on_malformed_object() {
    let (mut subscriber, ports, received) = subscriber_with_server().await;
    ports.update("livingroom/temp", Some(PortValue::Number(20.0)));

    subscriber
        .handle_sample("qtoggle/ports/livingroom/temp", SampleKind::Put, b"{}")
        .await;

    assert_eq!(
        ports.last_read_value("livingroom/temp"),
        Some(Some(PortValue::Number(20.0)))
    );
    assert!(received.lock().is_empty());
}

#[tokio::test]
async fn test_bare_cbor_sample_is_forwarded() {
    let (mut subscriber, ports, received) = subscriber_with_server().await;
    let mut payload = Vec::new();
    ciborium::into_writer(&"closed", &mut payload).unwrap();
    assert_eq!(payload[0], b'f');

    subscriber
        .handle_sample("qtoggle/ports/livingroom/temp", SampleKind::Put, &payload)
        .await;

    assert_eq!(
        ports.last_read_value("livingroom/temp"),
        Some(Some(PortValue::Text("closed".to_string())))
    );
    let bodies = received.lock().clone();
    assert_eq!(bodies.len(), 1);
    assert_eq!(bodies[0]["field1"], json!("closed"));
}
