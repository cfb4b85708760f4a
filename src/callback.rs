//! Inbound callback resolution
//!
//! A workflow started with `send_with_callback` posts its result back to the
//! callback route. The handler claims the pending request, runs the
//! registered response handler and finishes tracking.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use serde_json::Value;
use tracing::{error, info, warn};

use crate::error::{N8nError, Result};
use crate::events::{EventDispatcher, N8nEvent};
use crate::payload::ResponseHandler;
use crate::tracker::RequestTracker;
use crate::types::N8nResponse;

/// Run a response handler, turning errors and panics into a message.
pub(crate) async fn invoke_handler(
    handler: &Arc<dyn ResponseHandler>,
    data: &Value,
    correlation_id: &str,
) -> std::result::Result<(), String> {
    let outcome = AssertUnwindSafe(handler.handle_response(data, correlation_id))
        .catch_unwind()
        .await;

    match outcome {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(format!("{e:#}")),
        Err(panic) => Err(format!("handler panicked: {}", panic_message(&*panic))),
    }
}

pub(crate) fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(msg) = panic.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = panic.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Resolves callbacks against one client's tracker.
#[derive(Debug, Clone)]
pub struct CallbackHandler {
    tracker: Arc<RequestTracker>,
    events: Arc<EventDispatcher>,
}

impl CallbackHandler {
    pub fn new(tracker: Arc<RequestTracker>, events: Arc<EventDispatcher>) -> Self {
        Self { tracker, events }
    }

    pub fn tracker(&self) -> &Arc<RequestTracker> {
        &self.tracker
    }

    /// Process one callback. Never fails; unknown ids are logged and ignored.
    pub async fn handle(&self, response: &N8nResponse) {
        if let Err(e) = self.try_handle(response).await {
            warn!(
                correlation_id = %response.correlation_id,
                handler_id = ?response.handler_id,
                error = %e,
                "No pending request for n8n callback"
            );
        }
    }

    /// Process one callback, reporting a [`N8nError::TrackingMiss`] when no
    /// request is pending under its correlation id.
    ///
    /// Handler errors and panics are contained and never returned.
    pub async fn try_handle(&self, response: &N8nResponse) -> Result<()> {
        let correlation_id = response.correlation_id.as_str();
        info!(
            correlation_id = %correlation_id,
            handler_id = ?response.handler_id,
            "Processing n8n callback"
        );

        self.events.dispatch(N8nEvent::ResponseReceived {
            correlation_id: correlation_id.to_string(),
            handler_id: response.handler_id.clone(),
            status_code: response.status_code,
            data: response.raw_data.clone(),
            error: None,
        });

        let request = self
            .tracker
            .take(correlation_id)
            .ok_or_else(|| N8nError::TrackingMiss(correlation_id.to_string()))?;

        let Some(handler) = request.response_handler() else {
            warn!(
                correlation_id = %correlation_id,
                mode = %request.mode(),
                "Pending request has no response handler"
            );
            return Ok(());
        };

        match invoke_handler(handler, &response.raw_data, correlation_id).await {
            Ok(()) => info!(
                correlation_id = %correlation_id,
                handler_id = %handler.handler_id(),
                "n8n response handled"
            ),
            Err(message) => {
                error!(
                    correlation_id = %correlation_id,
                    handler_id = %handler.handler_id(),
                    error = %message,
                    "n8n response handler failed"
                );
                self.events.dispatch(N8nEvent::ResponseReceived {
                    correlation_id: correlation_id.to_string(),
                    handler_id: Some(handler.handler_id().to_string()),
                    status_code: response.status_code,
                    data: response.raw_data.clone(),
                    error: Some(message),
                });
            }
        }

        Ok(())
    }
}
