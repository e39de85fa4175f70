//! Job states and status snapshots

use super::spec::FrameKind;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Job state machine
///
/// `Pending -> Running -> {Paused <-> Running} -> {Completed | Cancelled | Failed}`.
/// Pending exists only between construction and task start.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    #[default]
    Pending,
    Running,
    Paused,
    Completed,
    Cancelled,
    Failed,
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobState::Completed | JobState::Cancelled | JobState::Failed
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Pending => "pending",
            JobState::Running => "running",
            JobState::Paused => "paused",
            JobState::Completed => "completed",
            JobState::Cancelled => "cancelled",
            JobState::Failed => "failed",
        }
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Point-in-time view of a job, safe to serialize for status queries
#[derive(Debug, Clone, Serialize)]
pub struct JobStatus {
    pub job_id: Uuid,
    pub frame_kind: FrameKind,
    pub session_id: Option<String>,
    pub status: JobState,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub last_capture_at: Option<DateTime<Utc>>,
    pub total_frames: u32,
    pub completed_frames: u32,
    pub successful_frames: u32,
    pub failed_frames: u32,
    pub remaining_frames: u32,
    pub percentage: f64,
    pub interval_seconds: f64,
    pub estimated_completion: Option<DateTime<Utc>>,
    pub current_temperature: Option<f64>,
    pub output_directory: Option<String>,
    pub captured_files: Vec<String>,
    pub error_message: Option<String>,
}
