//! End-to-end client tests against a mock n8n server
//!
//! - Dry run never touches the network
//! - 503 with retries trips the breaker and propagates the 503
//! - Sync responses are mapped onto registered shapes
//! - Envelope and auth reach the webhook

use std::sync::Arc;
use std::time::Duration;

use ada_n8n_client::testing::{ManualClock, RecordingListener};
use ada_n8n_client::{
    ClientConfig, CommunicationMode, EventDispatcher, JsonPayload, N8nClient, N8nError,
    ResponseMapper, ResponseShape, ENVELOPE_KEY,
};
use serde_json::{json, Value};
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn build(config: ClientConfig, clock: &ManualClock) -> (N8nClient, Arc<RecordingListener>) {
    let events = Arc::new(EventDispatcher::new());
    let recorder = Arc::new(RecordingListener::default());
    events.subscribe(recorder.clone());
    let client = N8nClient::builder(config)
        .clock(Arc::new(clock.clone()))
        .events(events)
        .build()
        .unwrap();
    (client, recorder)
}

fn payload() -> Arc<JsonPayload> {
    Arc::new(JsonPayload::new(json!({"text": "hello"})))
}

// ═══════════════════════════════════════════════════════════════════════════
// Dry run
// ═══════════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn test_dry_run_returns_canned_response_without_io() {
    let mock_server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500))
        .expect(0)
        .mount(&mock_server)
        .await;

    let mut config = ClientConfig::new(mock_server.uri(), "app");
    config.dry_run = true;
    config.circuit_breaker_threshold = 1;
    let (client, _) = build(config, &ManualClock::new());

    for _ in 0..3 {
        let response = client
            .send(payload(), "wf", CommunicationMode::FireAndForget)
            .await
            .unwrap();

        assert_eq!(response.status_code, 200);
        assert_eq!(
            response.raw_data,
            json!({"dry_run": true, "correlation_id": response.correlation_id})
        );
    }

    assert!(!client.circuit_breaker().unwrap().is_open());
    assert_eq!(client.tracker().pending_count(), 0);
    assert!(client.is_healthy().await);
}

// ═══════════════════════════════════════════════════════════════════════════
// Retry and circuit breaker
// ═══════════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn test_503_with_retries_opens_breaker_and_propagates() {
    let mock_server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/webhook/wf"))
        .respond_with(ResponseTemplate::new(503).set_body_string("Service Unavailable"))
        .expect(3)
        .mount(&mock_server)
        .await;

    let mut config = ClientConfig::new(mock_server.uri(), "app");
    config.retry_attempts = 3;
    config.retry_delay_ms = 1000;
    config.circuit_breaker_threshold = 2;
    let clock = ManualClock::new();
    let (client, recorder) = build(config, &clock);

    let err = client
        .send(payload(), "wf", CommunicationMode::FireAndForget)
        .await
        .unwrap_err();

    match err {
        N8nError::Communication {
            status_code,
            message,
        } => {
            assert_eq!(status_code, 503);
            assert_eq!(message, "Service Unavailable");
        }
        other => panic!("expected 503 communication error, got {other:?}"),
    }
    assert!(client.circuit_breaker().unwrap().is_open());
    assert_eq!(recorder.count("n8n.request.retry"), 2);
    assert_eq!(recorder.count("n8n.request.failed"), 1);
    assert_eq!(
        clock.recorded_sleeps(),
        vec![Duration::from_millis(1000), Duration::from_millis(2000)]
    );
    assert_eq!(client.tracker().pending_count(), 0);

    let rejected = client
        .send(payload(), "wf", CommunicationMode::FireAndForget)
        .await;
    assert!(matches!(rejected, Err(N8nError::CircuitOpen { .. })));
}

#[tokio::test]
async fn test_breaker_closes_after_open_timeout() {
    let mock_server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500))
        .up_to_n_times(1)
        .mount(&mock_server)
        .await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"ok": true})))
        .mount(&mock_server)
        .await;

    let mut config = ClientConfig::new(mock_server.uri(), "app");
    config.retry_attempts = 0;
    config.circuit_breaker_threshold = 1;
    config.circuit_breaker_timeout_seconds = 60;
    let clock = ManualClock::new();
    let (client, _) = build(config, &clock);

    assert!(client
        .send(payload(), "wf", CommunicationMode::FireAndForget)
        .await
        .is_err());
    assert!(client.circuit_breaker().unwrap().is_open());

    clock.advance(Duration::from_secs(60));
    let response = client
        .send(payload(), "wf", CommunicationMode::FireAndForget)
        .await
        .unwrap();

    assert_eq!(response.raw_data["ok"], true);
    assert!(!client.circuit_breaker().unwrap().is_open());
}

// ═══════════════════════════════════════════════════════════════════════════
// Wire format and mapping
// ═══════════════════════════════════════════════════════════════════════════

#[derive(Debug, PartialEq)]
struct StatusReport {
    status: String,
    message: String,
    timestamp: Option<String>,
}

#[tokio::test]
async fn test_sync_response_mapped_onto_shape() {
    let mock_server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/webhook/status"))
        .and(header("authorization", "Bearer token-1"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"status": "done", "message": "all good", "extra": 1})),
        )
        .mount(&mock_server)
        .await;

    let mapper = Arc::new(ResponseMapper::new());
    mapper.register(
        ResponseShape::builder::<StatusReport>("status_report")
            .required("status")
            .required("message")
            .optional("timestamp", Value::Null)
            .construct_with(|args| {
                Ok(StatusReport {
                    status: args.get("status")?,
                    message: args.get("message")?,
                    timestamp: args.get("timestamp")?,
                })
            })
            .build(),
    );

    let mut config = ClientConfig::new(mock_server.uri(), "app");
    config.auth_token = Some("token-1".to_string());
    let client = N8nClient::builder(config).mapper(mapper).build().unwrap();

    let payload = Arc::new(JsonPayload::new(json!({"job": 7})).with_shape("status_report"));
    let response = client
        .send_sync(payload, "status", Duration::from_secs(10))
        .await
        .unwrap();

    let report = response
        .mapped_data
        .as_ref()
        .and_then(|m| m.downcast_ref::<StatusReport>())
        .unwrap();
    assert_eq!(
        report,
        &StatusReport {
            status: "done".to_string(),
            message: "all good".to_string(),
            timestamp: None,
        }
    );
    assert_eq!(response.raw_data["extra"], 1);
}

#[tokio::test]
async fn test_outbound_envelope() {
    let mock_server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(202))
        .mount(&mock_server)
        .await;

    let client = N8nClient::builder(ClientConfig::new(mock_server.uri(), "app"))
        .callback_url("https://app.example/n8n/callback")
        .build()
        .unwrap();

    let payload = Arc::new(
        JsonPayload::new(json!({"text": "hi"})).with_context(json!({"entity_id": 42})),
    );
    let handler = Arc::new(ada_n8n_client::FnHandler::new(
        "moderation",
        |_: &Value, _: &str| Ok(()),
    ));
    let id = client
        .send_with_callback(payload, "moderate", handler)
        .await
        .unwrap();

    let received = mock_server.received_requests().await.unwrap();
    assert_eq!(received.len(), 1);
    assert_eq!(received[0].url.path(), "/webhook/moderate");

    let body: Value = serde_json::from_slice(&received[0].body).unwrap();
    assert_eq!(body["text"], "hi");
    let envelope = &body[ENVELOPE_KEY];
    assert_eq!(envelope["correlation_id"], id.as_str());
    assert_eq!(envelope["client_id"], "app");
    assert_eq!(envelope["mode"], "async_callback");
    assert_eq!(envelope["callback_url"], "https://app.example/n8n/callback");
    assert_eq!(envelope["handler_id"], "moderation");
    assert_eq!(envelope["context"]["entity_id"], 42);

    assert!(client.tracker().is_pending(&id));
}
