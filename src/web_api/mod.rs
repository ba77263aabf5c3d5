//! WebAPI - REST API Endpoints
//!
//! ## Responsibilities
//!
//! - HTTP API routes
//! - Request validation
//! - Response formatting

mod routes;

pub use routes::create_router;

use axum::extract::State;
use axum::response::IntoResponse;
use axum::Json;
use serde_json::json;

use crate::models::HealthResponse;
use crate::state::AppState;

/// Health check endpoint
pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let detector_ok = state.detector.health_check().await.unwrap_or(false);

    let response = HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        detector_connected: detector_ok,
        active_streams: state.supervisor.active_count().await,
        connected_clients: state.hub.connection_count() as usize,
    };

    Json(response)
}

/// Status endpoint
pub async fn device_status(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({
        "service": "camtower",
        "version": env!("CARGO_PKG_VERSION"),
        "status": "running",
        "active_streams": state.supervisor.active_count().await,
        "connected_clients": state.hub.connection_count(),
    }))
}
