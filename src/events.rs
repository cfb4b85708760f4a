//! Request lifecycle notifications
//!
//! The client, retry policy and callback handler report what happens to each
//! request through an [`EventDispatcher`]. Listeners are synchronous and must
//! not block; [`LoggingListener`] turns events into tracing records.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use serde_json::Value;
use tracing::{error, info, warn};

use crate::types::CommunicationMode;

/// Something that happened to a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum N8nEvent {
    /// The webhook call completed at the HTTP level.
    RequestSent {
        correlation_id: String,
        workflow_id: String,
        mode: CommunicationMode,
        client_id: String,
        status_code: u16,
        duration: Duration,
    },
    /// Response data arrived, inline or through the callback route.
    ///
    /// `error` is set when the response handler failed.
    ResponseReceived {
        correlation_id: String,
        handler_id: Option<String>,
        status_code: u16,
        data: Value,
        error: Option<String>,
    },
    /// A failed attempt will be retried after `delay`.
    Retry {
        correlation_id: String,
        workflow_id: String,
        attempt: u32,
        max_attempts: u32,
        delay: Duration,
        error: String,
    },
    /// The request failed for good.
    RequestFailed {
        correlation_id: String,
        workflow_id: String,
        attempt: u32,
        error: String,
    },
}

impl N8nEvent {
    pub fn correlation_id(&self) -> &str {
        match self {
            N8nEvent::RequestSent { correlation_id, .. }
            | N8nEvent::ResponseReceived { correlation_id, .. }
            | N8nEvent::Retry { correlation_id, .. }
            | N8nEvent::RequestFailed { correlation_id, .. } => correlation_id,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            N8nEvent::RequestSent { .. } => "n8n.request.sent",
            N8nEvent::ResponseReceived { .. } => "n8n.response.received",
            N8nEvent::Retry { .. } => "n8n.request.retry",
            N8nEvent::RequestFailed { .. } => "n8n.request.failed",
        }
    }
}

/// Receives lifecycle events.
pub trait EventListener: Send + Sync {
    fn on_event(&self, event: &N8nEvent);
}

/// Fan-out of events to registered listeners.
#[derive(Default)]
pub struct EventDispatcher {
    listeners: RwLock<Vec<Arc<dyn EventListener>>>,
}

impl EventDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, listener: Arc<dyn EventListener>) {
        self.listeners.write().push(listener);
    }

    pub fn dispatch(&self, event: N8nEvent) {
        let listeners = self.listeners.read().clone();
        for listener in listeners {
            listener.on_event(&event);
        }
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.read().len()
    }
}

impl std::fmt::Debug for EventDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventDispatcher")
            .field("listeners", &self.listener_count())
            .finish()
    }
}

/// Writes every event to the tracing subscriber.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingListener;

impl EventListener for LoggingListener {
    fn on_event(&self, event: &N8nEvent) {
        match event {
            N8nEvent::RequestSent {
                correlation_id,
                workflow_id,
                mode,
                client_id,
                status_code,
                duration,
            } => info!(
                correlation_id = %correlation_id,
                workflow_id = %workflow_id,
                mode = %mode,
                client_id = %client_id,
                http_status = status_code,
                duration_ms = duration.as_millis() as u64,
                "N8n request sent"
            ),
            N8nEvent::ResponseReceived {
                correlation_id,
                handler_id,
                status_code,
                error: None,
                ..
            } => info!(
                correlation_id = %correlation_id,
                handler_id = ?handler_id,
                http_status = status_code,
                "N8n response received"
            ),
            N8nEvent::ResponseReceived {
                correlation_id,
                handler_id,
                error: Some(error),
                ..
            } => error!(
                correlation_id = %correlation_id,
                handler_id = ?handler_id,
                error = %error,
                "N8n response processing failed"
            ),
            N8nEvent::Retry {
                correlation_id,
                workflow_id,
                attempt,
                max_attempts,
                delay,
                error,
            } => warn!(
                correlation_id = %correlation_id,
                workflow_id = %workflow_id,
                attempt,
                max_attempts,
                delay_ms = delay.as_millis() as u64,
                previous_error = %error,
                "N8n request retry"
            ),
            N8nEvent::RequestFailed {
                correlation_id,
                workflow_id,
                attempt,
                error,
            } => error!(
                correlation_id = %correlation_id,
                workflow_id = %workflow_id,
                attempt,
                error = %error,
                "N8n request failed"
            ),
        }
    }
}
