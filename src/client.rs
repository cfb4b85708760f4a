//! n8n webhook client
//!
//! One client per configured n8n target. It owns its breaker, retry policy
//! and tracker; the response mapper and event dispatcher may be shared.
//!
//! ## Modes
//!
//! - `send` - fire-and-forget or sync, through breaker and retry
//! - `send_with_callback` - single dispatch, result arrives on the callback route
//! - `send_sync` - single dispatch with a per-request timeout

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Map, Value};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::callback::{invoke_handler, CallbackHandler};
use crate::circuit::CircuitBreaker;
use crate::clock::{Clock, SystemClock};
use crate::config::ClientConfig;
use crate::error::{N8nError, Result};
use crate::events::{EventDispatcher, N8nEvent};
use crate::mapper::{MappedResponse, ResponseMapper};
use crate::payload::{Payload, ResponseHandler};
use crate::retry::RetryPolicy;
use crate::tracker::RequestTracker;
use crate::transport::{HttpTransport, Transport, TransportResponse};
use crate::types::{CommunicationMode, N8nResponse, WebhookRequest};

// ═══════════════════════════════════════════════════════════════════════════
// Builder
// ═══════════════════════════════════════════════════════════════════════════

pub struct N8nClientBuilder {
    config: ClientConfig,
    transport: Option<Arc<dyn Transport>>,
    clock: Arc<dyn Clock>,
    events: Option<Arc<EventDispatcher>>,
    mapper: Option<Arc<ResponseMapper>>,
    callback_url: Option<String>,
}

impl N8nClientBuilder {
    /// Replace the reqwest transport, e.g. with an in-process fake.
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn events(mut self, events: Arc<EventDispatcher>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn mapper(mut self, mapper: Arc<ResponseMapper>) -> Self {
        self.mapper = Some(mapper);
        self
    }

    /// Absolute URL n8n posts callback results to.
    pub fn callback_url(mut self, url: impl Into<String>) -> Self {
        self.callback_url = Some(url.into());
        self
    }

    pub fn build(self) -> Result<N8nClient> {
        self.config.validate()?;

        let transport = match self.transport {
            Some(transport) => transport,
            None => Arc::new(HttpTransport::new(self.config.clone())?),
        };
        let events = self.events.unwrap_or_default();
        let mapper = self.mapper.unwrap_or_default();
        let tracker = Arc::new(RequestTracker::with_clock(self.clock.clone()));

        let circuit_breaker = self.config.enable_circuit_breaker.then(|| {
            Arc::new(CircuitBreaker::with_clock(
                self.config.client_id.clone(),
                self.config.circuit_breaker_threshold,
                self.config.circuit_breaker_timeout(),
                self.clock.clone(),
            ))
        });

        let retry_policy = (self.config.retry_attempts > 0).then(|| {
            RetryPolicy::new(
                self.config.retry_attempts,
                self.config.retry_delay(),
                events.clone(),
            )
            .with_clock(self.clock.clone())
        });

        let callback_handler = CallbackHandler::new(tracker.clone(), events.clone());

        Ok(N8nClient {
            config: self.config,
            transport,
            tracker,
            circuit_breaker,
            retry_policy,
            mapper,
            events,
            callback_handler,
            callback_url: self.callback_url,
            clock: self.clock,
        })
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Client
// ═══════════════════════════════════════════════════════════════════════════

pub struct N8nClient {
    config: ClientConfig,
    transport: Arc<dyn Transport>,
    tracker: Arc<RequestTracker>,
    circuit_breaker: Option<Arc<CircuitBreaker>>,
    retry_policy: Option<RetryPolicy>,
    mapper: Arc<ResponseMapper>,
    events: Arc<EventDispatcher>,
    callback_handler: CallbackHandler,
    callback_url: Option<String>,
    clock: Arc<dyn Clock>,
}

impl N8nClient {
    pub fn builder(config: ClientConfig) -> N8nClientBuilder {
        N8nClientBuilder {
            config,
            transport: None,
            clock: Arc::new(SystemClock),
            events: None,
            mapper: None,
            callback_url: None,
        }
    }

    /// Client with the reqwest transport and default collaborators.
    pub fn new(config: ClientConfig) -> Result<Self> {
        Self::builder(config).build()
    }

    /// Send in fire-and-forget or sync mode.
    ///
    /// Callback mode needs a handler and callback address; use
    /// [`send_with_callback`](Self::send_with_callback) for it.
    pub async fn send(
        &self,
        payload: Arc<dyn Payload>,
        workflow_id: &str,
        mode: CommunicationMode,
    ) -> Result<N8nResponse> {
        let request = match mode {
            CommunicationMode::FireAndForget => self.new_request(payload, workflow_id),
            CommunicationMode::Sync => self.new_request(payload, workflow_id).into_sync(None),
            CommunicationMode::AsyncCallback => return Err(N8nError::UnsupportedMode(mode)),
        };
        let request = Arc::new(request);
        self.tracker.track(request.clone())?;

        let result = self.dispatch_guarded(&request).await;
        self.tracker.complete(request.correlation_id());

        let transport_response = result?;
        Ok(self.build_response(&request, transport_response).await)
    }

    /// Dispatch once and return the correlation id without waiting for the result.
    ///
    /// The request stays tracked until its callback arrives or it expires.
    pub async fn send_with_callback(
        &self,
        payload: Arc<dyn Payload>,
        workflow_id: &str,
        handler: Arc<dyn ResponseHandler>,
    ) -> Result<String> {
        let callback_url = self.callback_url.clone().ok_or_else(|| {
            N8nError::Config(format!(
                "client '{}' has no callback URL configured",
                self.config.client_id
            ))
        })?;

        let request = Arc::new(
            self.new_request(payload, workflow_id)
                .into_callback(handler, callback_url),
        );
        self.tracker.track(request.clone())?;

        match self.dispatch_once(&request).await {
            Ok(_) => {
                info!(
                    correlation_id = %request.correlation_id(),
                    workflow_id = %workflow_id,
                    "n8n callback request dispatched"
                );
                Ok(request.correlation_id().to_string())
            }
            Err(e) => {
                self.tracker.complete(request.correlation_id());
                Err(e)
            }
        }
    }

    /// Send and wait for the workflow's response within `timeout`.
    pub async fn send_sync(
        &self,
        payload: Arc<dyn Payload>,
        workflow_id: &str,
        timeout: Duration,
    ) -> Result<N8nResponse> {
        let request = Arc::new(
            self.new_request(payload, workflow_id)
                .into_sync(Some(timeout)),
        );
        self.tracker.track(request.clone())?;

        let result = self.dispatch_once(&request).await;
        self.tracker.complete(request.correlation_id());

        let transport_response = result?;
        Ok(self.build_response(&request, transport_response).await)
    }

    pub fn client_id(&self) -> &str {
        &self.config.client_id
    }

    pub async fn is_healthy(&self) -> bool {
        if self.config.dry_run {
            return true;
        }
        self.transport.health_check().await
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn tracker(&self) -> &Arc<RequestTracker> {
        &self.tracker
    }

    pub fn circuit_breaker(&self) -> Option<&Arc<CircuitBreaker>> {
        self.circuit_breaker.as_ref()
    }

    pub fn retry_policy(&self) -> Option<&RetryPolicy> {
        self.retry_policy.as_ref()
    }

    pub fn callback_handler(&self) -> &CallbackHandler {
        &self.callback_handler
    }

    pub fn callback_url(&self) -> Option<&str> {
        self.callback_url.as_deref()
    }

    pub fn mapper(&self) -> &Arc<ResponseMapper> {
        &self.mapper
    }

    pub fn events(&self) -> &Arc<EventDispatcher> {
        &self.events
    }

    /// Map response data onto a registered shape.
    pub fn map_to(&self, data: &Value, shape_id: &str) -> Result<MappedResponse> {
        Ok(self.mapper.map_to(data, shape_id)?)
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Dispatch
    // ═══════════════════════════════════════════════════════════════════════

    fn new_request(&self, payload: Arc<dyn Payload>, workflow_id: &str) -> WebhookRequest {
        WebhookRequest::new(
            Uuid::new_v4().to_string(),
            workflow_id,
            payload,
            self.config.client_id.clone(),
            self.clock.now(),
        )
    }

    /// Breaker pre-flight, then retry loop over breaker-recorded attempts.
    async fn dispatch_guarded(&self, request: &WebhookRequest) -> Result<TransportResponse> {
        if let Some(breaker) = &self.circuit_breaker {
            breaker.check_and_throw()?;
        }

        match &self.retry_policy {
            Some(policy) => {
                policy
                    .execute_with_retry(|| self.attempt(request), request)
                    .await
            }
            None => self.attempt(request).await,
        }
    }

    async fn attempt(&self, request: &WebhookRequest) -> Result<TransportResponse> {
        let outcome = self.dispatch_once(request).await;

        if let Some(breaker) = &self.circuit_breaker {
            match &outcome {
                Ok(_) => breaker.record_success(),
                Err(_) => breaker.record_failure(),
            }
        }

        outcome
    }

    /// One transport call; statuses >= 400 become `Communication` errors.
    async fn dispatch_once(&self, request: &WebhookRequest) -> Result<TransportResponse> {
        let started = self.clock.now();
        let response = if self.config.dry_run {
            debug!(correlation_id = %request.correlation_id(), "Dry run, skipping transport");
            dry_run_response(request)
        } else {
            self.transport.send_webhook(request).await?
        };
        let duration = (self.clock.now() - started).to_std().unwrap_or_default();

        self.events.dispatch(N8nEvent::RequestSent {
            correlation_id: request.correlation_id().to_string(),
            workflow_id: request.workflow_id().to_string(),
            mode: request.mode(),
            client_id: request.client_id().to_string(),
            status_code: response.status_code,
            duration,
        });

        if response.status_code >= 400 {
            return Err(N8nError::Communication {
                status_code: response.status_code,
                message: response.body,
            });
        }

        Ok(response)
    }

    async fn build_response(
        &self,
        request: &WebhookRequest,
        transport_response: TransportResponse,
    ) -> N8nResponse {
        let correlation_id = request.correlation_id();
        let status_code = transport_response.status_code;
        let raw_data = parse_body(&transport_response.body);

        let mapped = request.payload().response_shape().and_then(|shape| {
            self.map_to(&raw_data, shape)
                .inspect_err(|e| {
                    warn!(
                        correlation_id = %correlation_id,
                        shape = %shape,
                        error = %e,
                        "Response mapping failed, keeping raw data"
                    )
                })
                .ok()
        });

        let handler = request.payload().response_handler();
        let mut error = None;
        if let Some(handler) = &handler {
            error = invoke_handler(handler, &raw_data, correlation_id)
                .await
                .err();
            if let Some(message) = &error {
                warn!(
                    correlation_id = %correlation_id,
                    handler_id = %handler.handler_id(),
                    error = %message,
                    "Inline response handler failed"
                );
            }
        }

        self.events.dispatch(N8nEvent::ResponseReceived {
            correlation_id: correlation_id.to_string(),
            handler_id: handler.map(|h| h.handler_id().to_string()),
            status_code,
            data: raw_data.clone(),
            error,
        });

        N8nResponse::new(correlation_id, raw_data, status_code, self.clock.now())
            .with_mapped(mapped)
    }
}

impl fmt::Debug for N8nClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("N8nClient")
            .field("client_id", &self.config.client_id)
            .field("base_url", &self.config.base_url)
            .field("dry_run", &self.config.dry_run)
            .field("circuit_breaker", &self.circuit_breaker)
            .field("retry_policy", &self.retry_policy)
            .field("callback_url", &self.callback_url)
            .finish_non_exhaustive()
    }
}

fn dry_run_response(request: &WebhookRequest) -> TransportResponse {
    let body = json!({
        "dry_run": true,
        "correlation_id": request.correlation_id(),
    });
    TransportResponse::new(200, body.to_string())
}

/// Empty or malformed bodies become an empty object.
fn parse_body(body: &str) -> Value {
    serde_json::from_str(body).unwrap_or_else(|_| Value::Object(Map::new()))
}
