//! Retry with exponential backoff
//!
//! Wraps an async operation and re-runs it while it fails with a retryable
//! error. Delay before attempt `n + 1` is `base_delay * 2^(n - 1)`; the wait
//! suspends only the calling task.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use crate::clock::{Clock, SystemClock};
use crate::error::{N8nError, Result};
use crate::events::{EventDispatcher, N8nEvent};
use crate::types::WebhookRequest;

/// Decides whether a failed attempt is worth repeating.
pub type RetryPredicate = Arc<dyn Fn(&N8nError) -> bool + Send + Sync>;

/// Backoff policy for one client.
#[derive(Clone)]
pub struct RetryPolicy {
    max_attempts: u32,
    base_delay: Duration,
    predicate: RetryPredicate,
    events: Arc<EventDispatcher>,
    clock: Arc<dyn Clock>,
}

impl RetryPolicy {
    /// `max_attempts` counts the first try; 0 behaves like 1.
    pub fn new(max_attempts: u32, base_delay: Duration, events: Arc<EventDispatcher>) -> Self {
        Self {
            max_attempts,
            base_delay,
            predicate: Arc::new(N8nError::is_retryable),
            events,
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_predicate(mut self, predicate: RetryPredicate) -> Self {
        self.predicate = predicate;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Delay slept after the given failed attempt (1-based).
    ///
    /// Saturates at `Duration::MAX` instead of overflowing.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1);
        2u32.checked_pow(exponent)
            .map_or(Duration::MAX, |factor| self.base_delay.saturating_mul(factor))
    }

    /// Run `operation` until it succeeds, fails permanently, or attempts run out.
    pub async fn execute_with_retry<T, F, Fut>(
        &self,
        mut operation: F,
        request: &WebhookRequest,
    ) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let attempts = self.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            let err = match operation().await {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };

            if attempt < attempts && (self.predicate)(&err) {
                let delay = self.delay_for(attempt);
                self.events.dispatch(N8nEvent::Retry {
                    correlation_id: request.correlation_id().to_string(),
                    workflow_id: request.workflow_id().to_string(),
                    attempt,
                    max_attempts: attempts,
                    delay,
                    error: err.to_string(),
                });

                self.clock.sleep(delay).await;
                attempt += 1;
                continue;
            }

            self.events.dispatch(N8nEvent::RequestFailed {
                correlation_id: request.correlation_id().to_string(),
                workflow_id: request.workflow_id().to_string(),
                attempt,
                error: err.to_string(),
            });
            return Err(err);
        }
    }
}

impl fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("max_attempts", &self.max_attempts)
            .field("base_delay", &self.base_delay)
            .finish_non_exhaustive()
    }
}
