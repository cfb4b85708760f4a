//! HTTP transport to n8n
//!
//! [`Transport`] is the seam between the client and the network; the client
//! never builds HTTP requests itself. [`HttpTransport`] is the reqwest-backed
//! implementation.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE, USER_AGENT};
use tracing::{debug, warn};

use crate::config::ClientConfig;
use crate::error::{N8nError, Result};
use crate::types::WebhookRequest;

/// User agent sent with every webhook call.
pub const CLIENT_USER_AGENT: &str = concat!("ada-n8n-client/", env!("CARGO_PKG_VERSION"));

const HEALTH_TIMEOUT: Duration = Duration::from_secs(5);

/// Raw outcome of a webhook call. Any status is returned as-is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportResponse {
    pub status_code: u16,
    pub body: String,
}

impl TransportResponse {
    pub fn new(status_code: u16, body: impl Into<String>) -> Self {
        Self {
            status_code,
            body: body.into(),
        }
    }
}

#[async_trait]
pub trait Transport: Send + Sync {
    /// POST the request's webhook payload.
    ///
    /// Fails only when no HTTP response was obtained: `Timeout` for
    /// timeouts, `Communication` with status 0 otherwise.
    async fn send_webhook(&self, request: &WebhookRequest) -> Result<TransportResponse>;

    /// Probe the target's health endpoint.
    async fn health_check(&self) -> bool;
}

// ═══════════════════════════════════════════════════════════════════════════
// Reqwest Transport
// ═══════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone)]
pub struct HttpTransport {
    config: ClientConfig,
    http_client: reqwest::Client,
}

impl HttpTransport {
    pub fn new(config: ClientConfig) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(USER_AGENT, HeaderValue::from_static(CLIENT_USER_AGENT));

        for (name, value) in &config.default_headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| N8nError::Config(format!("invalid header name '{name}': {e}")))?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| N8nError::Config(format!("invalid value for header '{name}': {e}")))?;
            headers.insert(name, value);
        }

        let mut builder = reqwest::Client::builder()
            .timeout(config.timeout())
            .default_headers(headers);

        if let Some(proxy) = &config.proxy {
            let proxy = reqwest::Proxy::all(proxy)
                .map_err(|e| N8nError::Config(format!("invalid proxy '{proxy}': {e}")))?;
            builder = builder.proxy(proxy);
        }

        let http_client = builder
            .build()
            .map_err(|e| N8nError::Config(format!("failed to create HTTP client: {e}")))?;

        Ok(Self {
            config,
            http_client,
        })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send_webhook(&self, request: &WebhookRequest) -> Result<TransportResponse> {
        let url = self.config.webhook_url(request.workflow_id());
        let timeout = request.timeout().unwrap_or_else(|| self.config.timeout());

        debug!(
            correlation_id = %request.correlation_id(),
            url = %url,
            timeout_ms = timeout.as_millis() as u64,
            "POST webhook"
        );

        let mut call = self
            .http_client
            .post(&url)
            .timeout(timeout)
            .json(&request.to_webhook_payload());

        if let Some(token) = &self.config.auth_token {
            call = call.bearer_auth(token);
        }

        let response = call.send().await?;
        let status_code = response.status().as_u16();
        let body = response.text().await?;

        Ok(TransportResponse { status_code, body })
    }

    async fn health_check(&self) -> bool {
        let url = self.config.health_url();
        match self.http_client.get(&url).timeout(HEALTH_TIMEOUT).send().await {
            Ok(response) => response.status().as_u16() < 400,
            Err(e) => {
                warn!(client_id = %self.config.client_id, error = %e, "n8n health check failed");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::Utc;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;
    use crate::payload::JsonPayload;

    fn request(workflow_id: &str) -> WebhookRequest {
        WebhookRequest::new(
            "corr-1",
            workflow_id,
            Arc::new(JsonPayload::new(json!({"message": "hi"}))),
            "app",
            Utc::now(),
        )
    }

    #[tokio::test]
    async fn test_posts_payload_with_headers() {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/webhook/wf-1"))
            .and(header("authorization", "Bearer secret"))
            .and(header("content-type", "application/json"))
            .and(header("x-tenant", "acme"))
            .and(body_partial_json(json!({
                "message": "hi",
                "_n8n_envelope": {"correlation_id": "corr-1", "client_id": "app"}
            })))
            .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"ok":true}"#))
            .expect(1)
            .mount(&mock_server)
            .await;

        let mut config = ClientConfig::new(mock_server.uri(), "app");
        config.auth_token = Some("secret".to_string());
        config
            .default_headers
            .insert("X-Tenant".to_string(), "acme".to_string());
        let transport = HttpTransport::new(config).unwrap();

        let response = transport.send_webhook(&request("wf-1")).await.unwrap();
        assert_eq!(response, TransportResponse::new(200, r#"{"ok":true}"#));
    }

    #[tokio::test]
    async fn test_error_status_is_returned_not_raised() {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503).set_body_string("down"))
            .mount(&mock_server)
            .await;

        let transport = HttpTransport::new(ClientConfig::new(mock_server.uri(), "app")).unwrap();
        let response = transport.send_webhook(&request("wf")).await.unwrap();

        assert_eq!(response.status_code, 503);
        assert_eq!(response.body, "down");
    }

    #[tokio::test]
    async fn test_request_timeout_override() {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(500)))
            .mount(&mock_server)
            .await;

        let transport = HttpTransport::new(ClientConfig::new(mock_server.uri(), "app")).unwrap();
        let sync = request("wf").into_sync(Some(Duration::from_millis(50)));

        let result = transport.send_webhook(&sync).await;
        assert!(matches!(result, Err(N8nError::Timeout { .. })));
    }

    #[tokio::test]
    async fn test_connection_failure_has_no_status() {
        let transport = HttpTransport::new(ClientConfig::new("http://127.0.0.1:1", "app")).unwrap();
        let err = transport.send_webhook(&request("wf")).await.unwrap_err();

        assert_eq!(err.status_code(), None);
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn test_health_check() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/health"))
            .respond_with(ResponseTemplate::new(204))
            .mount(&mock_server)
            .await;

        let healthy = HttpTransport::new(ClientConfig::new(mock_server.uri(), "app")).unwrap();
        assert!(healthy.health_check().await);

        let failing_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&failing_server)
            .await;
        let unhealthy =
            HttpTransport::new(ClientConfig::new(failing_server.uri(), "app")).unwrap();
        assert!(!unhealthy.health_check().await);
    }

    #[test]
    fn test_invalid_header_rejected() {
        let mut config = ClientConfig::new("http://n8n", "app");
        config
            .default_headers
            .insert("bad header".to_string(), "x".to_string());

        assert!(matches!(HttpTransport::new(config), Err(N8nError::Config(_))));
    }
}
