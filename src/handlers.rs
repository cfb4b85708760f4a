//! HTTP handlers for the callback server
//!
//! Endpoints:
//! - POST {callback.route_path} - n8n workflow results for callback requests
//! - GET /healthz - per-client health
//! - GET /n8n/debug - collected requests, responses and errors

use std::panic::AssertUnwindSafe;

use axum::{
    body::Bytes,
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use futures::FutureExt;
use serde_json::{json, Value};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, warn};

use crate::callback::panic_message;
use crate::config::AppState;
use crate::types::N8nResponse;

/// Router with every endpoint, CORS and request tracing.
pub fn router(state: AppState) -> Router {
    let route_path = state.settings.callback.route_path.clone();

    Router::new()
        .route(&route_path, post(callback_handler))
        .route("/healthz", get(health_handler))
        .route("/n8n/debug", get(debug_handler))
        .layer(CorsLayer::new().allow_origin(Any).allow_methods(Any))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn bad_request(message: &str) -> (StatusCode, Json<Value>) {
    (StatusCode::BAD_REQUEST, Json(json!({ "error": message })))
}

// ═══════════════════════════════════════════════════════════════════════════
// Callback
// ═══════════════════════════════════════════════════════════════════════════

/// POST {callback.route_path}
///
/// Validates the body, then hands it to the owning client's callback handler.
pub async fn callback_handler(State(state): State<AppState>, body: Bytes) -> impl IntoResponse {
    if body.is_empty() {
        warn!("n8n callback received empty payload");
        return bad_request("Empty payload");
    }

    let data: Value = match serde_json::from_slice(&body) {
        Ok(data) => data,
        Err(e) => {
            error!(error = %e, "n8n callback received invalid JSON");
            return bad_request("Invalid JSON");
        }
    };

    if !data.is_object() {
        error!("n8n callback data is not an object");
        return bad_request("Invalid data format");
    }

    let response = match N8nResponse::from_callback_payload(data, Utc::now()) {
        Ok(response) => response,
        Err(e) => {
            error!(error = %e, "n8n callback missing correlation id");
            return bad_request("Missing correlation_id");
        }
    };

    let outcome = AssertUnwindSafe(state.registry.handle_callback(&response))
        .catch_unwind()
        .await;

    match outcome {
        Ok(Ok(())) => (StatusCode::OK, Json(json!({ "status": "success" }))),
        Ok(Err(e)) => {
            warn!(
                correlation_id = %response.correlation_id,
                error = %e,
                "n8n callback did not match a pending request"
            );
            (StatusCode::OK, Json(json!({ "status": "success" })))
        }
        Err(panic) => {
            error!(
                correlation_id = %response.correlation_id,
                error = %panic_message(&*panic),
                "n8n callback processing failed"
            );
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": "Callback processing failed" })),
            )
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Health Check
// ═══════════════════════════════════════════════════════════════════════════

/// GET /healthz
pub async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    let clients = state.registry.health().await;
    let status = if clients.values().all(|healthy| *healthy) {
        "ok"
    } else {
        "degraded"
    };

    (
        StatusCode::OK,
        Json(json!({
            "status": status,
            "clients": clients,
            "pending_requests": state.registry.pending_count(),
        })),
    )
}

// ═══════════════════════════════════════════════════════════════════════════
// Debug
// ═══════════════════════════════════════════════════════════════════════════

/// GET /n8n/debug
pub async fn debug_handler(State(state): State<AppState>) -> impl IntoResponse {
    match state.registry.collector() {
        Some(collector) => (StatusCode::OK, Json(collector.snapshot())),
        None => (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": "Debug collection is disabled" })),
        ),
    }
}
