//! API Routes

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, Query, State,
    },
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::json;

use crate::error::Error;
use crate::fanout_hub::{parse_client_message, ClientMessage, ServerMessage};
use crate::models::{ApiResponse, CameraId};
use crate::state::AppState;

/// Create API router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Health & Status
        .route("/healthz", get(super::health_check))
        .route("/api/status", get(super::device_status))
        // Camera streams
        .route("/api/cameras/:id/start", post(start_camera))
        .route("/api/cameras/:id/stop", post(stop_camera))
        .route("/api/cameras/:id/detection/:enabled", post(toggle_detection))
        .route("/api/cameras/:id/active", get(camera_active))
        // Analytics
        .route("/api/analytics/:id", get(get_analytics))
        .route("/api/analytics/:id/hourly", get(get_hourly_analytics))
        // WebSocket
        .route("/api/ws", get(websocket_handler))
        .route("/api/ws/:client_id", get(websocket_handler_with_id))
        .with_state(state)
}

// ========================================
// Camera Streams
// ========================================

/// Request body for start_camera
#[derive(Debug, Deserialize)]
struct StartCameraRequest {
    address: String,
    port: Option<u16>,
}

/// Start a camera stream
/// POST /api/cameras/:id/start
async fn start_camera(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<StartCameraRequest>,
) -> impl IntoResponse {
    let camera_id = CameraId::from(id);
    let port = req.port.unwrap_or(8080);

    match state
        .supervisor
        .start(camera_id.clone(), &req.address, port)
        .await
    {
        Ok(()) => Json(ApiResponse::success(json!({
            "camera_id": camera_id,
            "message": "Camera stream started",
        })))
        .into_response(),
        Err(e) => e.into_response(),
    }
}

/// Stop a camera stream
/// POST /api/cameras/:id/stop
async fn stop_camera(State(state): State<AppState>, Path(id): Path<String>) -> impl IntoResponse {
    let camera_id = CameraId::from(id);
    state.supervisor.stop(&camera_id).await;

    Json(ApiResponse::success(json!({
        "camera_id": camera_id,
        "message": "Camera stream stopped",
    })))
}

/// Toggle detection for a running camera
/// POST /api/cameras/:id/detection/:enabled
async fn toggle_detection(
    State(state): State<AppState>,
    Path((id, enabled)): Path<(String, bool)>,
) -> impl IntoResponse {
    let camera_id = CameraId::from(id);

    if state
        .supervisor
        .set_detection_enabled(&camera_id, enabled)
        .await
    {
        Json(ApiResponse::success(json!({
            "camera_id": camera_id,
            "detection_enabled": enabled,
        })))
        .into_response()
    } else {
        Error::NotFound(format!("Camera not active: {}", camera_id)).into_response()
    }
}

/// Check whether a camera stream is active
/// GET /api/cameras/:id/active
async fn camera_active(State(state): State<AppState>, Path(id): Path<String>) -> impl IntoResponse {
    let camera_id = CameraId::from(id);
    let active = state.supervisor.is_active(&camera_id).await;

    Json(ApiResponse::success(json!({
        "camera_id": camera_id,
        "active": active,
    })))
}

// ========================================
// Analytics
// ========================================

#[derive(Debug, Deserialize)]
struct HoursQuery {
    hours: Option<i64>,
}

/// Analytics summary for a camera
/// GET /api/analytics/:id
async fn get_analytics(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<HoursQuery>,
) -> impl IntoResponse {
    let camera_id = CameraId::from(id);
    let hours = query.hours.unwrap_or(24).max(1);

    let summary = state.aggregator.summary(&camera_id).await;
    let peak = state.aggregator.peak_detection(&camera_id).await;
    let average = state.aggregator.average_per_hour(&camera_id, hours).await;

    Json(ApiResponse::success(json!({
        "camera_id": camera_id,
        "summary": summary,
        "peak_detection": peak,
        "average_per_hour": average,
        "window_hours": hours,
    })))
}

/// Hourly buckets for a camera
/// GET /api/analytics/:id/hourly?hours=24
async fn get_hourly_analytics(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<HoursQuery>,
) -> impl IntoResponse {
    let camera_id = CameraId::from(id);
    let hours = query.hours.unwrap_or(24).max(1);

    let buckets = state.aggregator.hourly_stats(&camera_id, hours).await;

    Json(ApiResponse::success(json!({
        "camera_id": camera_id,
        "window_hours": hours,
        "buckets": buckets,
    })))
}

// ========================================
// WebSocket
// ========================================

/// WebSocket endpoint with a server-assigned client id
/// GET /api/ws
async fn websocket_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
) -> impl IntoResponse {
    let client_id = uuid::Uuid::new_v4().to_string();
    ws.on_upgrade(move |socket| handle_websocket(socket, state, client_id))
}

/// WebSocket endpoint with a client-chosen id
/// GET /api/ws/:client_id
async fn websocket_handler_with_id(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Path(client_id): Path<String>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_websocket(socket, state, client_id))
}

async fn handle_websocket(socket: WebSocket, state: AppState, client_id: String) {
    let (mut sender, mut receiver) = socket.split();

    let mut rx = state.hub.connect(&client_id).await;
    tracing::info!(client_id = %client_id, "WebSocket client connected");

    state
        .hub
        .send_to(
            &client_id,
            &ServerMessage::Connected {
                client_id: client_id.clone(),
                timestamp: Utc::now().to_rfc3339(),
            },
        )
        .await;

    // Forward messages from the hub to the socket
    let send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if sender.send(Message::Text(msg)).await.is_err() {
                break;
            }
        }
    });

    // Handle incoming messages: ping, subscribe, unsubscribe
    let hub = state.hub.clone();
    let reader_id = client_id.clone();
    let recv_task = tokio::spawn(async move {
        while let Some(result) = receiver.next().await {
            match result {
                Ok(Message::Text(text)) => match parse_client_message(&text) {
                    Ok(Some(ClientMessage::Ping)) => {
                        hub.send_to(
                            &reader_id,
                            &ServerMessage::Pong {
                                timestamp: Utc::now().to_rfc3339(),
                            },
                        )
                        .await;
                    }
                    Ok(Some(ClientMessage::SubscribeCamera { camera_id })) => {
                        hub.subscribe(&reader_id, &camera_id).await;
                        hub.send_to(
                            &reader_id,
                            &ServerMessage::Subscribed {
                                camera_id,
                                timestamp: Utc::now().to_rfc3339(),
                            },
                        )
                        .await;
                    }
                    Ok(Some(ClientMessage::UnsubscribeCamera { camera_id })) => {
                        hub.unsubscribe(&reader_id, &camera_id).await;
                        hub.send_to(
                            &reader_id,
                            &ServerMessage::Unsubscribed {
                                camera_id,
                                timestamp: Utc::now().to_rfc3339(),
                            },
                        )
                        .await;
                    }
                    Ok(None) => {
                        // Unrecognized message type, ignored
                    }
                    Err(e) => {
                        tracing::warn!(client_id = %reader_id, error = %e, "Malformed client message");
                        break;
                    }
                },
                Ok(Message::Close(_)) => {
                    tracing::info!(client_id = %reader_id, "WebSocket client disconnected");
                    break;
                }
                Ok(_) => {
                    // Binary and control frames are ignored
                }
                Err(e) => {
                    tracing::warn!(client_id = %reader_id, error = %e, "WebSocket error");
                    break;
                }
            }
        }
    });

    // Either direction ending tears down the connection
    tokio::select! {
        _ = send_task => {},
        _ = recv_task => {},
    }

    state.hub.disconnect(&client_id).await;
    tracing::debug!(client_id = %client_id, "WebSocket connection cleaned up");
}
