//! Concurrent use of one client
//!
//! - Retry backoff suspends only the task that is backing off
//! - Callback dispatch and resolution racing on the same tracker

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use ada_n8n_client::{
    ClientConfig, CommunicationMode, FnHandler, JsonPayload, N8nClient, N8nResponse, ENVELOPE_KEY,
};
use chrono::Utc;
use serde_json::{json, Value};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn payload(n: usize) -> Arc<JsonPayload> {
    Arc::new(JsonPayload::new(json!({ "n": n })))
}

// ═══════════════════════════════════════════════════════════════════════════
// Backoff
// ═══════════════════════════════════════════════════════════════════════════

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_backoff_does_not_block_other_sends() {
    let mock_server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/webhook/slow"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&mock_server)
        .await;
    Mock::given(method("POST"))
        .and(path("/webhook/fast"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"ok": true})))
        .mount(&mock_server)
        .await;

    let mut config = ClientConfig::new(mock_server.uri(), "app");
    config.retry_attempts = 2;
    config.retry_delay_ms = 400;
    let client = Arc::new(N8nClient::new(config).unwrap());

    let slow = {
        let client = client.clone();
        tokio::spawn(async move {
            let started = Instant::now();
            let result = client
                .send(payload(0), "slow", CommunicationMode::FireAndForget)
                .await;
            (result.is_err(), started.elapsed())
        })
    };

    // the slow send is now sleeping between its two attempts
    tokio::time::sleep(Duration::from_millis(100)).await;

    let started = Instant::now();
    let fast = client
        .send(payload(1), "fast", CommunicationMode::FireAndForget)
        .await
        .unwrap();
    let fast_elapsed = started.elapsed();

    let (slow_failed, slow_elapsed) = slow.await.unwrap();

    assert_eq!(fast.raw_data["ok"], true);
    assert!(
        fast_elapsed < Duration::from_millis(300),
        "fast send took {fast_elapsed:?}"
    );
    assert!(slow_failed);
    assert!(slow_elapsed >= Duration::from_millis(400));
    assert_eq!(client.tracker().pending_count(), 0);
}

// ═══════════════════════════════════════════════════════════════════════════
// Callbacks
// ═══════════════════════════════════════════════════════════════════════════

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_callbacks_resolve_each_request_once() {
    let mut config = ClientConfig::new("http://n8n.test", "app");
    config.dry_run = true;
    let client = Arc::new(
        N8nClient::builder(config)
            .callback_url("http://app.test/n8n/callback")
            .build()
            .unwrap(),
    );
    let calls = Arc::new(AtomicUsize::new(0));

    let tasks = (0..32).map(|n| {
        let client = client.clone();
        let calls = calls.clone();
        tokio::spawn(async move {
            let handler = Arc::new(FnHandler::new("counter", move |_: &Value, _: &str| {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }));
            let id = client
                .send_with_callback(payload(n), "wf", handler)
                .await
                .unwrap();

            let callback = N8nResponse::from_callback_payload(
                json!({"n": n, ENVELOPE_KEY: {"correlation_id": id}}),
                Utc::now(),
            )
            .unwrap();

            // the same result delivered twice at once
            let callbacks = client.callback_handler();
            tokio::join!(callbacks.handle(&callback), callbacks.handle(&callback));
        })
    });

    for task in futures::future::join_all(tasks).await {
        task.unwrap();
    }

    assert_eq!(calls.load(Ordering::SeqCst), 32);
    assert_eq!(client.tracker().pending_count(), 0);
}
