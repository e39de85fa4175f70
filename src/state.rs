//! Application state
//!
//! Holds all shared components and configuration

use crate::camera_gateway::CameraGateway;
use crate::job_registry::JobRegistry;
use crate::session_store::SessionStore;
use std::path::PathBuf;
use std::sync::Arc;

/// Application configuration
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Server host
    pub host: String,
    /// Server port
    pub port: u16,
    /// Root directory for session projects
    pub projects_root: PathBuf,
    /// Destination for captures without a session
    pub default_capture_dir: PathBuf,
    /// Destination for calibration frames without a session
    pub calibration_root: PathBuf,
    /// Seconds a terminal job stays queryable before eviction
    pub job_retention_secs: u64,
    /// Timeout for one capture-and-download invocation
    pub capture_timeout_secs: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            host: std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: std::env::var("PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(8080),
            projects_root: std::env::var("PROJECTS_ROOT")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("projects")),
            default_capture_dir: std::env::var("CAPTURE_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("captures/default")),
            calibration_root: std::env::var("CALIBRATION_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("calibration_frames")),
            job_retention_secs: std::env::var("JOB_RETENTION_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(300),
            capture_timeout_secs: std::env::var("CAPTURE_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(60),
        }
    }
}

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    /// Application config
    pub config: AppConfig,
    /// Camera gateway (exclusive device access)
    pub gateway: Arc<CameraGateway>,
    /// Session store
    pub sessions: Arc<SessionStore>,
    /// Capture job registry
    pub registry: Arc<JobRegistry>,
}
