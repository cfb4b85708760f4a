//! Payload and response handler capabilities
//!
//! A payload is whatever the application wants to send to a workflow. Besides
//! its body it may declare a response handler and a response shape; both are
//! optional and checked once per send.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};

/// Receives response data for a request, either inline or via callback.
#[async_trait]
pub trait ResponseHandler: Send + Sync {
    /// Process the data n8n returned for `correlation_id`.
    async fn handle_response(&self, data: &Value, correlation_id: &str) -> anyhow::Result<()>;

    /// Stable identifier, echoed in the outbound envelope and in logs.
    fn handler_id(&self) -> &str;
}

/// Data sent to an n8n workflow.
pub trait Payload: Send + Sync {
    /// Body fields of the webhook call.
    fn to_payload(&self) -> Map<String, Value>;

    /// Opaque context copied into the envelope.
    fn context(&self) -> Map<String, Value> {
        Map::new()
    }

    /// Handler invoked inline with the response of `send`.
    fn response_handler(&self) -> Option<Arc<dyn ResponseHandler>> {
        None
    }

    /// Registered response shape the raw data should be mapped onto.
    fn response_shape(&self) -> Option<&str> {
        None
    }
}

/// Ready-made payload built from JSON values.
#[derive(Clone, Default)]
pub struct JsonPayload {
    body: Map<String, Value>,
    context: Map<String, Value>,
    handler: Option<Arc<dyn ResponseHandler>>,
    shape: Option<String>,
}

impl JsonPayload {
    /// Objects become the body as-is; any other value is placed under `data`.
    pub fn new(body: Value) -> Self {
        let body = match body {
            Value::Object(map) => map,
            Value::Null => Map::new(),
            other => {
                let mut map = Map::new();
                map.insert("data".to_string(), other);
                map
            }
        };

        Self {
            body,
            ..Self::default()
        }
    }

    pub fn with_context(mut self, context: Value) -> Self {
        if let Value::Object(map) = context {
            self.context = map;
        }
        self
    }

    pub fn with_handler(mut self, handler: Arc<dyn ResponseHandler>) -> Self {
        self.handler = Some(handler);
        self
    }

    pub fn with_shape(mut self, shape_id: impl Into<String>) -> Self {
        self.shape = Some(shape_id.into());
        self
    }
}

impl fmt::Debug for JsonPayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JsonPayload")
            .field("body", &self.body)
            .field("context", &self.context)
            .field("handler", &self.handler.as_ref().map(|h| h.handler_id().to_string()))
            .field("shape", &self.shape)
            .finish()
    }
}

impl Payload for JsonPayload {
    fn to_payload(&self) -> Map<String, Value> {
        self.body.clone()
    }

    fn context(&self) -> Map<String, Value> {
        self.context.clone()
    }

    fn response_handler(&self) -> Option<Arc<dyn ResponseHandler>> {
        self.handler.clone()
    }

    fn response_shape(&self) -> Option<&str> {
        self.shape.as_deref()
    }
}

/// Response handler backed by a closure.
pub struct FnHandler<F> {
    id: String,
    f: F,
}

impl<F> FnHandler<F>
where
    F: Fn(&Value, &str) -> anyhow::Result<()> + Send + Sync,
{
    pub fn new(id: impl Into<String>, f: F) -> Self {
        Self { id: id.into(), f }
    }
}

#[async_trait]
impl<F> ResponseHandler for FnHandler<F>
where
    F: Fn(&Value, &str) -> anyhow::Result<()> + Send + Sync,
{
    async fn handle_response(&self, data: &Value, correlation_id: &str) -> anyhow::Result<()> {
        (self.f)(data, correlation_id)
    }

    fn handler_id(&self) -> &str {
        &self.id
    }
}
