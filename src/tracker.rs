//! Pending request tracking
//!
//! Maps correlation ids to in-flight requests so an inbound callback can be
//! routed back to the handler that issued it. State is process-local.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tracing::debug;

use crate::clock::{Clock, SystemClock};
use crate::error::{N8nError, Result};
use crate::payload::ResponseHandler;
use crate::types::WebhookRequest;

#[derive(Debug)]
pub struct RequestTracker {
    pending: RwLock<HashMap<String, Arc<WebhookRequest>>>,
    clock: Arc<dyn Clock>,
}

impl Default for RequestTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl RequestTracker {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            pending: RwLock::new(HashMap::new()),
            clock,
        }
    }

    /// Start tracking a request. Fails if its correlation id is already pending.
    pub fn track(&self, request: Arc<WebhookRequest>) -> Result<()> {
        let mut pending = self.pending.write();
        let id = request.correlation_id();
        if pending.contains_key(id) {
            return Err(N8nError::DuplicateCorrelationId(id.to_string()));
        }

        debug!(correlation_id = %id, mode = %request.mode(), "Tracking request");
        pending.insert(id.to_string(), request);
        Ok(())
    }

    pub fn get(&self, correlation_id: &str) -> Option<Arc<WebhookRequest>> {
        self.pending.read().get(correlation_id).cloned()
    }

    pub fn response_handler(&self, correlation_id: &str) -> Option<Arc<dyn ResponseHandler>> {
        self.pending
            .read()
            .get(correlation_id)
            .and_then(|request| request.response_handler().cloned())
    }

    /// Stop tracking. Returns whether the id was pending.
    pub fn complete(&self, correlation_id: &str) -> bool {
        self.take(correlation_id).is_some()
    }

    /// Remove and return the request in one step.
    pub fn take(&self, correlation_id: &str) -> Option<Arc<WebhookRequest>> {
        self.pending.write().remove(correlation_id)
    }

    pub fn pending_count(&self) -> usize {
        self.pending.read().len()
    }

    pub fn is_pending(&self, correlation_id: &str) -> bool {
        self.pending.read().contains_key(correlation_id)
    }

    /// Drop every request at least `max_age` old; returns how many were removed.
    pub fn sweep_expired(&self, max_age: Duration) -> usize {
        let max_age = chrono::Duration::from_std(max_age).unwrap_or(chrono::Duration::MAX);
        let now = self.clock.now();

        let mut pending = self.pending.write();
        let before = pending.len();
        pending.retain(|_, request| now - request.created_at() < max_age);
        before - pending.len()
    }
}
