//! Error handling for Camtower

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// Error types
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Camera source could not be reached (fatal when starting a camera)
    #[error("Camera unreachable: {0}")]
    SourceUnreachable(String),

    /// Transient frame read failure; fatal only past the consecutive-miss bound
    #[error("Frame read failed: {0}")]
    FrameRead(String),

    /// Detector call failed; the cycle skips detection and keeps relaying
    #[error("Detector error: {0}")]
    Detector(String),

    /// Delivery to a subscriber failed; handled per-client inside the hub
    #[error("Delivery error: {0}")]
    Delivery(String),

    /// Analytics persistence failure; logged, never aborts the stream loop
    #[error("Analytics write error: {0}")]
    AnalyticsWrite(String),

    /// Not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Validation error
    #[error("Validation error: {0}")]
    Validation(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// HTTP client error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Image decode/encode error
    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let (status, error_code, message) = match &self {
            Error::SourceUnreachable(msg) => {
                (StatusCode::BAD_GATEWAY, "CAMERA_UNREACHABLE", msg.clone())
            }
            Error::FrameRead(msg) => (StatusCode::BAD_GATEWAY, "FRAME_READ_ERROR", msg.clone()),
            Error::Detector(msg) => (StatusCode::BAD_GATEWAY, "DETECTOR_ERROR", msg.clone()),
            Error::Delivery(msg) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "DELIVERY_ERROR",
                msg.clone(),
            ),
            Error::AnalyticsWrite(msg) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "ANALYTICS_WRITE_ERROR",
                msg.clone(),
            ),
            Error::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg.clone()),
            Error::Validation(msg) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", msg.clone()),
            Error::Serialization(e) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "SERIALIZATION_ERROR",
                e.to_string(),
            ),
            Error::Http(e) => (StatusCode::BAD_GATEWAY, "HTTP_ERROR", e.to_string()),
            Error::Io(e) => (StatusCode::INTERNAL_SERVER_ERROR, "IO_ERROR", e.to_string()),
            Error::Image(e) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "IMAGE_ERROR",
                e.to_string(),
            ),
            Error::Internal(msg) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_ERROR",
                msg.clone(),
            ),
        };

        tracing::error!(
            status = %status,
            error_code = %error_code,
            message = %message,
            "Request error"
        );

        let body = Json(json!({
            "error_code": error_code,
            "message": message
        }));

        (status, body).into_response()
    }
}
