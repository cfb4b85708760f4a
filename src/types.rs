//! Request and response types for n8n webhook calls
//!
//! Covers:
//! - Communication modes
//! - The outbound request and its wire envelope
//! - The response returned by sends and delivered by callbacks

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::error::{N8nError, Result};
use crate::mapper::MappedResponse;
use crate::payload::{Payload, ResponseHandler};

/// Reserved key carrying request metadata inside every webhook body.
pub const ENVELOPE_KEY: &str = "_n8n_envelope";

// ═══════════════════════════════════════════════════════════════════════════
// Communication Mode
// ═══════════════════════════════════════════════════════════════════════════

/// How the caller expects to receive the workflow result.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum CommunicationMode {
    /// Only the initial HTTP acknowledgement is awaited.
    FireAndForget,
    /// The workflow posts its result back to the callback route later.
    AsyncCallback,
    /// The caller waits for the workflow's response body.
    Sync,
}

impl CommunicationMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            CommunicationMode::FireAndForget => "fire_and_forget",
            CommunicationMode::AsyncCallback => "async_callback",
            CommunicationMode::Sync => "sync",
        }
    }
}

impl fmt::Display for CommunicationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Webhook Request
// ═══════════════════════════════════════════════════════════════════════════

/// A single outbound call to a workflow webhook.
///
/// Construction starts in fire-and-forget mode; `into_sync` and
/// `into_callback` are the only ways to switch modes, so a callback request
/// always carries both a handler and a callback URL.
#[derive(Clone)]
pub struct WebhookRequest {
    correlation_id: String,
    workflow_id: String,
    payload: Arc<dyn Payload>,
    mode: CommunicationMode,
    client_id: String,
    created_at: DateTime<Utc>,
    response_handler: Option<Arc<dyn ResponseHandler>>,
    callback_url: Option<String>,
    timeout: Option<Duration>,
}

impl WebhookRequest {
    pub fn new(
        correlation_id: impl Into<String>,
        workflow_id: impl Into<String>,
        payload: Arc<dyn Payload>,
        client_id: impl Into<String>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            correlation_id: correlation_id.into(),
            workflow_id: workflow_id.into(),
            payload,
            mode: CommunicationMode::FireAndForget,
            client_id: client_id.into(),
            created_at,
            response_handler: None,
            callback_url: None,
            timeout: None,
        }
    }

    /// Switch to synchronous mode with an optional transport timeout override.
    pub fn into_sync(mut self, timeout: Option<Duration>) -> Self {
        self.mode = CommunicationMode::Sync;
        self.timeout = timeout;
        self
    }

    /// Switch to callback mode; the workflow will post back to `callback_url`.
    pub fn into_callback(
        mut self,
        handler: Arc<dyn ResponseHandler>,
        callback_url: impl Into<String>,
    ) -> Self {
        self.mode = CommunicationMode::AsyncCallback;
        self.response_handler = Some(handler);
        self.callback_url = Some(callback_url.into());
        self
    }

    pub fn correlation_id(&self) -> &str {
        &self.correlation_id
    }

    pub fn workflow_id(&self) -> &str {
        &self.workflow_id
    }

    pub fn payload(&self) -> &Arc<dyn Payload> {
        &self.payload
    }

    pub fn mode(&self) -> CommunicationMode {
        self.mode
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn response_handler(&self) -> Option<&Arc<dyn ResponseHandler>> {
        self.response_handler.as_ref()
    }

    pub fn callback_url(&self) -> Option<&str> {
        self.callback_url.as_deref()
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// JSON body for the webhook: payload fields plus the reserved envelope.
    pub fn to_webhook_payload(&self) -> Value {
        let mut body = self.payload.to_payload();

        let mut envelope = Map::new();
        envelope.insert("correlation_id".to_string(), json!(self.correlation_id));
        envelope.insert("client_id".to_string(), json!(self.client_id));
        envelope.insert("mode".to_string(), json!(self.mode.as_str()));
        envelope.insert(
            "created_at".to_string(),
            json!(self.created_at.to_rfc3339_opts(SecondsFormat::Secs, false)),
        );
        envelope.insert(
            "context".to_string(),
            Value::Object(self.payload.context()),
        );

        if let Some(url) = &self.callback_url {
            envelope.insert("callback_url".to_string(), json!(url));
        }

        if let Some(handler) = &self.response_handler {
            envelope.insert("handler_id".to_string(), json!(handler.handler_id()));
        }

        body.insert(ENVELOPE_KEY.to_string(), Value::Object(envelope));
        Value::Object(body)
    }
}

impl fmt::Debug for WebhookRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WebhookRequest")
            .field("correlation_id", &self.correlation_id)
            .field("workflow_id", &self.workflow_id)
            .field("mode", &self.mode)
            .field("client_id", &self.client_id)
            .field("created_at", &self.created_at)
            .field(
                "response_handler",
                &self.response_handler.as_ref().map(|h| h.handler_id().to_string()),
            )
            .field("callback_url", &self.callback_url)
            .field("timeout", &self.timeout)
            .finish()
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// N8n Response
// ═══════════════════════════════════════════════════════════════════════════

/// Result of a send, or the body of an inbound callback.
#[derive(Debug, Clone)]
pub struct N8nResponse {
    pub correlation_id: String,
    pub raw_data: Value,
    pub mapped_data: Option<MappedResponse>,
    pub status_code: u16,
    pub received_at: DateTime<Utc>,
    /// Handler id echoed back in a callback envelope.
    pub handler_id: Option<String>,
    /// Client id echoed back in a callback envelope.
    pub client_id: Option<String>,
}

impl N8nResponse {
    pub fn new(
        correlation_id: impl Into<String>,
        raw_data: Value,
        status_code: u16,
        received_at: DateTime<Utc>,
    ) -> Self {
        Self {
            correlation_id: correlation_id.into(),
            raw_data,
            mapped_data: None,
            status_code,
            received_at,
            handler_id: None,
            client_id: None,
        }
    }

    pub fn with_mapped(mut self, mapped: Option<MappedResponse>) -> Self {
        self.mapped_data = mapped;
        self
    }

    /// Parse an inbound callback body.
    ///
    /// The body must be an object whose envelope carries a non-empty
    /// `correlation_id`; the whole body is kept as `raw_data`.
    pub fn from_callback_payload(payload: Value, received_at: DateTime<Utc>) -> Result<Self> {
        let Value::Object(body) = &payload else {
            return Err(N8nError::InvalidCallback("payload is not an object".to_string()));
        };

        let envelope = body
            .get(ENVELOPE_KEY)
            .and_then(Value::as_object)
            .ok_or_else(|| N8nError::InvalidCallback(format!("missing {ENVELOPE_KEY}")))?;

        let correlation_id = envelope
            .get("correlation_id")
            .and_then(Value::as_str)
            .filter(|id| !id.is_empty())
            .ok_or_else(|| N8nError::InvalidCallback("missing correlation_id".to_string()))?
            .to_string();

        let handler_id = envelope
            .get("handler_id")
            .and_then(Value::as_str)
            .map(str::to_string);
        let client_id = envelope
            .get("client_id")
            .and_then(Value::as_str)
            .map(str::to_string);

        Ok(Self {
            correlation_id,
            raw_data: payload,
            mapped_data: None,
            status_code: 200,
            received_at,
            handler_id,
            client_id,
        })
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status_code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payload::{FnHandler, JsonPayload};

    fn payload() -> Arc<dyn Payload> {
        Arc::new(
            JsonPayload::new(json!({"message": "hello"}))
                .with_context(json!({"entity_type": "post", "id": 7})),
        )
    }

    #[test]
    fn test_fire_and_forget_envelope() {
        let request = WebhookRequest::new("abc", "wf-1", payload(), "client-a", Utc::now());
        let body = request.to_webhook_payload();

        assert_eq!(body["message"], "hello");
        let envelope = &body[ENVELOPE_KEY];
        assert_eq!(envelope["correlation_id"], "abc");
        assert_eq!(envelope["client_id"], "client-a");
        assert_eq!(envelope["mode"], "fire_and_forget");
        assert_eq!(envelope["context"]["id"], 7);
        assert!(envelope.get("callback_url").is_none());
        assert!(envelope.get("handler_id").is_none());
        assert!(envelope["created_at"].as_str().unwrap().ends_with("+00:00"));
    }

    #[test]
    fn test_callback_request_carries_handler_and_url() {
        let handler = Arc::new(FnHandler::new("moderation", |_: &Value, _: &str| Ok(())));
        let request = WebhookRequest::new("abc", "wf-1", payload(), "client-a", Utc::now())
            .into_callback(handler, "https://app.example/n8n/callback");

        assert_eq!(request.mode(), CommunicationMode::AsyncCallback);
        assert!(request.response_handler().is_some());

        let envelope = &request.to_webhook_payload()[ENVELOPE_KEY];
        assert_eq!(envelope["mode"], "async_callback");
        assert_eq!(envelope["callback_url"], "https://app.example/n8n/callback");
        assert_eq!(envelope["handler_id"], "moderation");
    }

    #[test]
    fn test_sync_request_timeout_override() {
        let request = WebhookRequest::new("abc", "wf-1", payload(), "client-a", Utc::now())
            .into_sync(Some(Duration::from_secs(5)));

        assert_eq!(request.mode(), CommunicationMode::Sync);
        assert_eq!(request.timeout(), Some(Duration::from_secs(5)));
    }

    #[test]
    fn test_response_from_callback_payload() {
        let payload = json!({
            "allowed": false,
            ENVELOPE_KEY: {"correlation_id": "abc", "handler_id": "moderation", "client_id": "main"}
        });

        let response = N8nResponse::from_callback_payload(payload, Utc::now()).unwrap();
        assert_eq!(response.correlation_id, "abc");
        assert_eq!(response.handler_id.as_deref(), Some("moderation"));
        assert_eq!(response.client_id.as_deref(), Some("main"));
        assert_eq!(response.raw_data["allowed"], false);
        assert!(response.is_success());
    }

    #[test]
    fn test_response_from_callback_payload_rejects_missing_id() {
        let cases = [
            json!([1, 2]),
            json!({"allowed": true}),
            json!({ENVELOPE_KEY: {"correlation_id": null}}),
            json!({ENVELOPE_KEY: {"correlation_id": ""}}),
        ];

        for payload in cases {
            let result = N8nResponse::from_callback_payload(payload, Utc::now());
            assert!(matches!(result, Err(N8nError::InvalidCallback(_))));
        }
    }
}
