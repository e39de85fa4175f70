//! Error handling for the capture server

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
    /// Validation error (malformed capture spec, bad request fields)
    #[error("Validation error: {0}")]
    Validation(String),

    /// Unknown job identifier
    #[error("Job not found: {0}")]
    JobNotFound(String),

    /// Requested job transition is not legal from the current state
    #[error("Invalid transition: {0}")]
    InvalidTransition(String),

    /// Unknown session identifier
    #[error("Session not found: {0}")]
    SessionNotFound(String),

    /// Session already exists
    #[error("Session exists: {0}")]
    SessionExists(String),

    /// No camera discoverable on the bus
    #[error("No camera found: {0}")]
    DeviceNotFound(String),

    /// Camera claimed by another process
    #[error("Camera busy: {0}")]
    DeviceBusy(String),

    /// Operation requires a connected camera
    #[error("Camera not connected: {0}")]
    DeviceNotConnected(String),

    /// Camera connectivity required up front (job creation)
    #[error("Camera unavailable: {0}")]
    DeviceUnavailable(String),

    /// Image capture or transfer failed
    #[error("Capture failed: {0}")]
    CaptureFailed(String),

    /// Persisting the captured file failed for lack of space
    #[error("Insufficient storage: {0}")]
    InsufficientStorage(String),

    /// Write permission failure while persisting a capture
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// Setting name not supported by the device
    #[error("Unsupported setting: {0}")]
    UnsupportedSetting(String),

    /// Setting value rejected by the device
    #[error("Invalid value: {0}")]
    InvalidValue(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let (status, error_code, message) = match &self {
            Error::Validation(msg) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", msg.clone()),
            Error::JobNotFound(msg) => (StatusCode::NOT_FOUND, "JOB_NOT_FOUND", msg.clone()),
            Error::InvalidTransition(msg) => {
                (StatusCode::CONFLICT, "INVALID_TRANSITION", msg.clone())
            }
            Error::SessionNotFound(msg) => {
                (StatusCode::NOT_FOUND, "SESSION_NOT_FOUND", msg.clone())
            }
            Error::SessionExists(msg) => (StatusCode::CONFLICT, "SESSION_EXISTS", msg.clone()),
            Error::DeviceNotFound(msg) => (StatusCode::NOT_FOUND, "NO_CAMERA", msg.clone()),
            Error::DeviceBusy(msg) => (StatusCode::CONFLICT, "CAMERA_BUSY", msg.clone()),
            Error::DeviceNotConnected(msg) => (
                StatusCode::SERVICE_UNAVAILABLE,
                "CAMERA_NOT_CONNECTED",
                msg.clone(),
            ),
            Error::DeviceUnavailable(msg) => (
                StatusCode::SERVICE_UNAVAILABLE,
                "CAMERA_UNAVAILABLE",
                msg.clone(),
            ),
            Error::CaptureFailed(msg) => (StatusCode::BAD_GATEWAY, "CAPTURE_FAILED", msg.clone()),
            Error::InsufficientStorage(msg) => (
                StatusCode::INSUFFICIENT_STORAGE,
                "INSUFFICIENT_STORAGE",
                msg.clone(),
            ),
            Error::PermissionDenied(msg) => {
                (StatusCode::FORBIDDEN, "PERMISSION_DENIED", msg.clone())
            }
            Error::UnsupportedSetting(msg) => {
                (StatusCode::BAD_REQUEST, "UNSUPPORTED_SETTING", msg.clone())
            }
            Error::InvalidValue(msg) => (StatusCode::BAD_REQUEST, "INVALID_VALUE", msg.clone()),
            Error::Serialization(e) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "SERIALIZATION_ERROR",
                e.to_string(),
            ),
            Error::Io(e) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "IO_ERROR",
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
