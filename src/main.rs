//! Ada N8N Client - callback server
//!
//! Hosts the callback route for requests dispatched with
//! `send_with_callback` and sweeps expired pending requests.
//!
//! ## Endpoints
//!
//! - `POST /n8n/callback` - workflow results (path configurable)
//! - `GET /healthz` - per-client health check
//! - `GET /n8n/debug` - collected request data (when `debug.enabled`)
//!
//! ## Configuration
//!
//! `N8N_CONFIG` points to a YAML settings file; without it a single client is
//! built from `N8N_BASE_URL`, `N8N_CLIENT_ID` and friends.
//!
//! ## Background Tasks
//!
//! - Tracker cleanup (`tracking.cleanup_interval_seconds`)

use anyhow::Context;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use ada_n8n_client::config::{AppState, N8nSettings};
use ada_n8n_client::handlers::router;
use ada_n8n_client::tasks::start_cleanup_task;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "ada_n8n_client=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    dotenvy::dotenv().ok();
    let settings = match std::env::var("N8N_CONFIG") {
        Ok(path) => N8nSettings::from_file(&path)
            .with_context(|| format!("failed to load settings from {path}"))?,
        Err(_) => N8nSettings::from_env().context("failed to load settings from environment")?,
    };
    let bind_addr = settings.server.bind_addr();

    info!("Starting Ada N8N Client");
    info!("Clients: {}", settings.clients.len());
    info!("Callback route: {}", settings.callback.route_path);
    info!("Binding to: {}", bind_addr);

    // Create shared state
    let tracking = settings.tracking.clone();
    let state = AppState::new(settings).context("failed to build n8n clients")?;

    // Start background tasks
    let registry = state.registry.clone();
    tokio::spawn(async move {
        start_cleanup_task(registry, tracking).await;
    });

    info!("Background tasks started (tracker cleanup)");

    let app = router(state);

    // Start server
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("failed to bind to {bind_addr}"))?;

    info!("Server listening on {}", bind_addr);

    axum::serve(listener, app)
        .await
        .context("server failed")?;

    Ok(())
}
