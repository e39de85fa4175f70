//! Camera gateway data types

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::PathBuf;

/// Result of one physical capture
#[derive(Debug, Clone, Serialize)]
pub struct CaptureResult {
    /// Where the image landed on disk
    pub path: PathBuf,
    /// Final filename including the extension the camera provided
    pub filename: String,
    /// Completion timestamp
    pub captured_at: DateTime<Utc>,
}

/// Camera status snapshot
#[derive(Debug, Clone, Serialize)]
pub struct DeviceStatus {
    pub connected: bool,
    /// Sensor temperature in Celsius, when the body reports one
    pub temperature: Option<f64>,
}

/// Outcome of a best-effort settings batch
///
/// The gateway applies each key independently and reports what stuck;
/// the caller decides whether a partial application is acceptable.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SettingsReport {
    pub applied: Vec<String>,
    pub failed: Vec<FailedSetting>,
}

impl SettingsReport {
    pub fn all_applied(&self) -> bool {
        self.failed.is_empty()
    }
}

/// A setting the device rejected
#[derive(Debug, Clone, Serialize)]
pub struct FailedSetting {
    pub name: String,
    pub reason: String,
}
