//! API Routes

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{delete, get, post, put},
    Json, Router,
};
use serde::Deserialize;
use std::collections::BTreeMap;
use uuid::Uuid;

use crate::capture_job::{CaptureSequenceSpec, FrameKind};
use crate::error::{Error, Result};
use crate::models::ApiResponse;
use crate::session_store::CreateSessionRequest;
use crate::state::AppState;

/// Create API router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Health
        .route("/healthz", get(super::health_check))
        // Camera
        .route("/api/camera/status", get(camera_status))
        .route("/api/camera/connect", post(camera_connect))
        .route("/api/camera/disconnect", post(camera_disconnect))
        .route("/api/camera/detect", get(camera_detect))
        .route("/api/camera/settings", put(camera_update_settings))
        // Capture jobs
        .route("/api/capture/bulk/start", post(start_bulk_capture))
        .route("/api/capture/calibration/start", post(start_calibration_capture))
        .route("/api/capture/jobs", get(list_jobs))
        .route("/api/capture/jobs/:id", get(get_job))
        .route("/api/capture/jobs/:id", delete(remove_job))
        .route("/api/capture/jobs/:id/pause", post(pause_job))
        .route("/api/capture/jobs/:id/resume", post(resume_job))
        .route("/api/capture/jobs/:id/cancel", post(cancel_job))
        // Sessions
        .route("/api/sessions", get(list_sessions))
        .route("/api/sessions", post(create_session))
        .route("/api/sessions/:id", get(get_session))
        .route("/api/sessions/:id", delete(delete_session))
        .with_state(state)
}

// ========================================
// Camera Handlers
// ========================================

async fn camera_status(State(state): State<AppState>) -> Result<impl IntoResponse> {
    let status = state.gateway.status().await?;
    Ok(Json(ApiResponse::success(status)))
}

async fn camera_connect(State(state): State<AppState>) -> Result<impl IntoResponse> {
    state.gateway.connect().await?;
    let status = state.gateway.status().await?;
    Ok(Json(ApiResponse::success(status)))
}

async fn camera_disconnect(State(state): State<AppState>) -> Result<impl IntoResponse> {
    state.gateway.disconnect().await?;
    let status = state.gateway.status().await?;
    Ok(Json(ApiResponse::success(status)))
}

async fn camera_detect(State(state): State<AppState>) -> Result<impl IntoResponse> {
    let cameras = state.gateway.detect().await?;
    Ok(Json(ApiResponse::success(cameras)))
}

#[derive(Debug, Deserialize)]
struct UpdateSettingsRequest {
    settings: BTreeMap<String, String>,
}

async fn camera_update_settings(
    State(state): State<AppState>,
    Json(req): Json<UpdateSettingsRequest>,
) -> Result<impl IntoResponse> {
    if req.settings.is_empty() {
        return Err(Error::Validation("settings must not be empty".to_string()));
    }
    let pairs: Vec<(String, String)> = req.settings.into_iter().collect();
    let report = state.gateway.update_settings(&pairs).await?;
    Ok(Json(ApiResponse::success(report)))
}

// ========================================
// Capture Job Handlers
// ========================================

#[derive(Debug, Deserialize)]
struct BulkCaptureRequest {
    count: u32,
    #[serde(default)]
    interval_seconds: f64,
    #[serde(default)]
    delay_before_start: f64,
    #[serde(default)]
    session_id: Option<String>,
    #[serde(default)]
    base_name: Option<String>,
}

async fn start_bulk_capture(
    State(state): State<AppState>,
    Json(req): Json<BulkCaptureRequest>,
) -> Result<impl IntoResponse> {
    let spec = CaptureSequenceSpec {
        frame_kind: FrameKind::Light,
        frame_count: req.count,
        interval_seconds: req.interval_seconds,
        delay_before_start: req.delay_before_start,
        session_id: req.session_id,
        base_name: req.base_name,
        exposure_time: None,
        iso: None,
        target_adu: None,
    };
    let status = state.registry.create_job(spec).await?;
    Ok((StatusCode::CREATED, Json(ApiResponse::success(status))))
}

#[derive(Debug, Deserialize)]
struct CalibrationCaptureRequest {
    frame_type: FrameKind,
    count: u32,
    #[serde(default = "default_calibration_interval")]
    interval_seconds: f64,
    #[serde(default)]
    delay_before_start: f64,
    #[serde(default)]
    session_id: Option<String>,
    #[serde(default)]
    base_name: Option<String>,
    #[serde(default)]
    exposure_time: Option<String>,
    #[serde(default)]
    iso: Option<String>,
    #[serde(default)]
    target_adu: Option<u32>,
}

fn default_calibration_interval() -> f64 {
    2.0
}

async fn start_calibration_capture(
    State(state): State<AppState>,
    Json(req): Json<CalibrationCaptureRequest>,
) -> Result<impl IntoResponse> {
    if !req.frame_type.is_calibration() {
        return Err(Error::Validation(
            "frame_type must be one of dark, bias, flat, flat_dark".to_string(),
        ));
    }

    let spec = CaptureSequenceSpec {
        frame_kind: req.frame_type,
        frame_count: req.count,
        interval_seconds: req.interval_seconds,
        delay_before_start: req.delay_before_start,
        session_id: req.session_id,
        base_name: req.base_name,
        exposure_time: req.exposure_time,
        iso: req.iso,
        target_adu: req.target_adu,
    };
    let status = state.registry.create_job(spec).await?;
    Ok((StatusCode::CREATED, Json(ApiResponse::success(status))))
}

async fn list_jobs(State(state): State<AppState>) -> impl IntoResponse {
    let jobs = state.registry.list_jobs().await;
    Json(ApiResponse::success(jobs))
}

async fn get_job(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse> {
    let status = state.registry.get_status(id).await?;
    Ok(Json(ApiResponse::success(status)))
}

async fn pause_job(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse> {
    let status = state.registry.pause_job(id).await?;
    Ok(Json(ApiResponse::success(status)))
}

async fn resume_job(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse> {
    let status = state.registry.resume_job(id).await?;
    Ok(Json(ApiResponse::success(status)))
}

async fn cancel_job(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse> {
    let status = state.registry.cancel_job(id).await?;
    Ok(Json(ApiResponse::success(status)))
}

async fn remove_job(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse> {
    state.registry.remove_job(id).await?;
    Ok(Json(ApiResponse::success(serde_json::json!({
        "removed": id
    }))))
}

// ========================================
// Session Handlers
// ========================================

async fn list_sessions(State(state): State<AppState>) -> Result<impl IntoResponse> {
    let sessions = state.sessions.list_sessions().await?;
    Ok(Json(ApiResponse::success(sessions)))
}

async fn create_session(
    State(state): State<AppState>,
    Json(req): Json<CreateSessionRequest>,
) -> Result<impl IntoResponse> {
    let session = state.sessions.create_session(&req.name, &req.target).await?;
    Ok((StatusCode::CREATED, Json(ApiResponse::success(session))))
}

async fn get_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse> {
    let session = state.sessions.get_session(&id).await?;
    Ok(Json(ApiResponse::success(session)))
}

async fn delete_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse> {
    state.sessions.delete_session(&id).await?;
    Ok(Json(ApiResponse::success(serde_json::json!({
        "deleted": id
    }))))
}
