//! Background tasks for scheduled operations
//!
//! Implements:
//! - Tracker cleanup - drops pending requests older than the configured max age

use std::sync::Arc;
use std::time::Duration;

use tokio::time::interval;
use tracing::{debug, info};

use crate::config::TrackingSettings;
use crate::registry::ClientRegistry;

// ═══════════════════════════════════════════════════════════════════════════
// Tracker Cleanup
// ═══════════════════════════════════════════════════════════════════════════

/// Start the cleanup background task
///
/// Sweeps every client's tracker once per `cleanup_interval_seconds`.
pub async fn start_cleanup_task(registry: Arc<ClientRegistry>, tracking: TrackingSettings) {
    let mut ticker = interval(tracking.cleanup_interval());
    // First tick fires immediately.
    ticker.tick().await;

    loop {
        ticker.tick().await;
        sweep_once(&registry, tracking.max_request_age());
    }
}

/// Run one sweep over all clients; returns the number of requests removed.
pub fn sweep_once(registry: &ClientRegistry, max_age: Duration) -> usize {
    let removed = registry.sweep_expired(max_age);

    if removed > 0 {
        info!(
            removed,
            max_age_secs = max_age.as_secs(),
            "Cleared expired n8n requests"
        );
    } else {
        debug!(pending = registry.pending_count(), "No expired n8n requests");
    }

    removed
}
