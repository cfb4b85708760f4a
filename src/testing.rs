//! Test doubles for the clock and the event stream
//!
//! Available to unit tests and, with the `testing` feature, to integration
//! tests and downstream crates.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use parking_lot::Mutex;

use crate::clock::Clock;
use crate::events::{EventListener, N8nEvent};

/// Hand-driven clock for tests.
///
/// `sleep` does not wait; it advances the clock by the requested duration
/// and records it so backoff schedules can be asserted.
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Arc<Mutex<DateTime<Utc>>>,
    sleeps: Arc<Mutex<Vec<Duration>>>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::starting_at(Utc::now())
    }

    pub fn starting_at(start: DateTime<Utc>) -> Self {
        Self {
            now: Arc::new(Mutex::new(start)),
            sleeps: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Move the clock forward.
    pub fn advance(&self, duration: Duration) {
        let delta = chrono::Duration::from_std(duration).unwrap_or_else(|_| chrono::Duration::zero());
        let mut now = self.now.lock();
        *now = *now + delta;
    }

    /// Durations passed to `sleep`, in call order.
    pub fn recorded_sleeps(&self) -> Vec<Duration> {
        self.sleeps.lock().clone()
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock()
    }

    fn sleep(&self, duration: Duration) -> BoxFuture<'static, ()> {
        self.sleeps.lock().push(duration);
        self.advance(duration);
        Box::pin(std::future::ready(()))
    }
}

/// Listener that keeps every event for assertions.
#[derive(Debug, Default)]
pub struct RecordingListener {
    events: Mutex<Vec<N8nEvent>>,
}

impl RecordingListener {
    pub fn events(&self) -> Vec<N8nEvent> {
        self.events.lock().clone()
    }

    pub fn count(&self, name: &str) -> usize {
        self.events.lock().iter().filter(|e| e.name() == name).count()
    }
}

impl EventListener for RecordingListener {
    fn on_event(&self, event: &N8nEvent) {
        self.events.lock().push(event.clone());
    }
}
