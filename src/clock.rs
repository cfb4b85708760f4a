//! Time source abstraction
//!
//! The breaker, the tracker and the retry backoff all read time through a
//! [`Clock`] so tests can move time forward without waiting.

use std::fmt::Debug;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;

/// Source of wall-clock time and async delays.
pub trait Clock: Send + Sync + Debug {
    /// Current UTC time.
    fn now(&self) -> DateTime<Utc>;

    /// Suspend the calling task for `duration`.
    fn sleep(&self, duration: Duration) -> BoxFuture<'static, ()>;
}

/// Production clock backed by the system time and tokio timers.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    fn sleep(&self, duration: Duration) -> BoxFuture<'static, ()> {
        Box::pin(tokio::time::sleep(duration))
    }
}
