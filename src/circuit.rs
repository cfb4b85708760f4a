//! Circuit breaker for a single n8n target
//!
//! ```text
//!   ┌────────┐  failures >= threshold   ┌──────┐
//!   │ Closed │ ───────────────────────▶ │ Open │
//!   └────────┘                          └──────┘
//!        ▲                                  │
//!        │  any success, or can_execute()   │
//!        └──── after the open timeout ──────┘
//! ```
//!
//! Every failure counts regardless of cause. A threshold of 0 disables
//! opening entirely while still counting failures.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tracing::{info, warn};

use crate::clock::{Clock, SystemClock};
use crate::error::{N8nError, Result};

/// Point-in-time view of the breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CircuitSnapshot {
    pub failure_count: u32,
    pub last_failure_time: Option<DateTime<Utc>>,
    pub is_open: bool,
}

#[derive(Debug, Default)]
struct CircuitState {
    failure_count: u32,
    last_failure_time: Option<DateTime<Utc>>,
    is_open: bool,
}

impl CircuitState {
    fn reset(&mut self) {
        self.failure_count = 0;
        self.last_failure_time = None;
        self.is_open = false;
    }
}

/// Failure-counting gate in front of one client's webhook target.
#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    threshold: u32,
    timeout: Duration,
    state: Mutex<CircuitState>,
    clock: Arc<dyn Clock>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, threshold: u32, timeout: Duration) -> Self {
        Self::with_clock(name, threshold, timeout, Arc::new(SystemClock))
    }

    pub fn with_clock(
        name: impl Into<String>,
        threshold: u32,
        timeout: Duration,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            name: name.into(),
            threshold,
            timeout,
            state: Mutex::new(CircuitState::default()),
            clock,
        }
    }

    /// Whether a call may proceed.
    ///
    /// An open breaker whose timeout has elapsed closes again here and lets
    /// the probe call through.
    pub fn can_execute(&self) -> bool {
        let mut state = self.state.lock();
        if !state.is_open {
            return true;
        }

        let Some(last_failure) = state.last_failure_time else {
            return true;
        };

        let elapsed = self.clock.now() - last_failure;
        let timeout = chrono::Duration::from_std(self.timeout).unwrap_or(chrono::Duration::MAX);
        if elapsed >= timeout {
            state.reset();
            info!(breaker = %self.name, "Circuit breaker timeout elapsed, closing");
            return true;
        }

        false
    }

    pub fn record_success(&self) {
        self.state.lock().reset();
    }

    pub fn record_failure(&self) {
        let mut state = self.state.lock();
        state.failure_count = state.failure_count.saturating_add(1);
        state.last_failure_time = Some(self.clock.now());

        if self.threshold > 0 && !state.is_open && state.failure_count >= self.threshold {
            state.is_open = true;
            warn!(
                breaker = %self.name,
                failures = state.failure_count,
                "Circuit breaker opened"
            );
        }
    }

    pub fn is_open(&self) -> bool {
        self.state.lock().is_open
    }

    pub fn failure_count(&self) -> u32 {
        self.state.lock().failure_count
    }

    pub fn snapshot(&self) -> CircuitSnapshot {
        let state = self.state.lock();
        CircuitSnapshot {
            failure_count: state.failure_count,
            last_failure_time: state.last_failure_time,
            is_open: state.is_open,
        }
    }

    /// Fail with [`N8nError::CircuitOpen`] when calls are currently blocked.
    pub fn check_and_throw(&self) -> Result<()> {
        if self.can_execute() {
            Ok(())
        } else {
            Err(N8nError::CircuitOpen {
                client_id: self.name.clone(),
            })
        }
    }
}
