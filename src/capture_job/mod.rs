//! CaptureJob - pausable multi-frame capture sequences
//!
//! ## Responsibilities
//!
//! - One background task per job, capturing frames strictly in index order
//! - Cooperative pause/resume/cancel, observed between frames only
//! - Per-frame failure tolerance; a detected disconnect is the one fatal case
//! - Progress, ETA and sequence-summary bookkeeping
//!
//! Bulk (light) and calibration sequences share this engine; the frame kind
//! selects the pre-flight device settings, the naming prefix and the ETA
//! pacing mode.

pub mod spec;
pub mod status;

pub use spec::{CaptureSequenceSpec, FrameKind};
pub use status::{JobState, JobStatus};

use crate::camera_gateway::{CameraGateway, CaptureResult};
use crate::error::{Error, Result};
use crate::frame_naming::FrameNamer;
use crate::progress::{self, EtaMode};
use crate::session_store::SessionStore;
use chrono::{DateTime, Local, Utc};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Notify, RwLock};
use uuid::Uuid;

/// Poll interval of the pause idle-wait; resume/cancel become visible within
/// one interval even if the wakeup notification is missed
const PAUSE_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Fixed message retained when a disconnect aborts the sequence
const DISCONNECT_ERROR: &str = "Camera disconnected during capture sequence";

/// A single capture sequence with its own state and control flags
pub struct CaptureJob {
    job_id: Uuid,
    spec: CaptureSequenceSpec,
    created_at: DateTime<Utc>,
    /// Written by control calls, read by the job task
    paused: AtomicBool,
    cancelled: AtomicBool,
    /// Wakes the pause idle-wait early on resume/cancel
    control: Notify,
    inner: RwLock<JobInner>,
}

/// Mutable job fields; written by the owning task and by control calls only
#[derive(Default)]
struct JobInner {
    state: JobState,
    started_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
    last_capture_at: Option<DateTime<Utc>>,
    completed_frames: u32,
    successful_frames: u32,
    failed_frames: u32,
    captured_files: Vec<String>,
    current_temperature: Option<f64>,
    estimated_completion: Option<DateTime<Utc>>,
    output_directory: Option<PathBuf>,
    error_message: Option<String>,
}

impl CaptureJob {
    /// Construct a job in `Pending`; the spec must already be validated
    pub fn new(spec: CaptureSequenceSpec) -> Self {
        Self {
            job_id: Uuid::new_v4(),
            spec,
            created_at: Utc::now(),
            paused: AtomicBool::new(false),
            cancelled: AtomicBool::new(false),
            control: Notify::new(),
            inner: RwLock::new(JobInner::default()),
        }
    }

    pub fn job_id(&self) -> Uuid {
        self.job_id
    }

    pub fn spec(&self) -> &CaptureSequenceSpec {
        &self.spec
    }

    /// Pause a running job. The task observes the flag at the next
    /// between-frames checkpoint; an in-flight capture always finishes.
    pub async fn pause(&self) -> Result<()> {
        let mut inner = self.inner.write().await;
        if inner.state != JobState::Running {
            return Err(Error::InvalidTransition(format!(
                "cannot pause job {} in state {}",
                self.job_id, inner.state
            )));
        }
        inner.state = JobState::Paused;
        self.paused.store(true, Ordering::SeqCst);
        tracing::info!(job_id = %self.job_id, "Job paused");
        Ok(())
    }

    /// Resume a paused job
    pub async fn resume(&self) -> Result<()> {
        let mut inner = self.inner.write().await;
        if inner.state != JobState::Paused {
            return Err(Error::InvalidTransition(format!(
                "cannot resume job {} in state {}",
                self.job_id, inner.state
            )));
        }
        inner.state = JobState::Running;
        self.paused.store(false, Ordering::SeqCst);
        self.control.notify_waiters();
        tracing::info!(job_id = %self.job_id, "Job resumed");
        Ok(())
    }

    /// Cancel a job that has not yet finished. The state flips immediately;
    /// the in-flight frame, if any, still completes before the loop exits.
    /// A job cancelled while still `Pending` never captures at all.
    pub async fn cancel(&self) -> Result<()> {
        let mut inner = self.inner.write().await;
        if inner.state.is_terminal() {
            return Err(Error::InvalidTransition(format!(
                "cannot cancel job {} in state {}",
                self.job_id, inner.state
            )));
        }
        inner.state = JobState::Cancelled;
        inner.completed_at = Some(Utc::now());
        self.cancelled.store(true, Ordering::SeqCst);
        self.control.notify_waiters();
        tracing::info!(job_id = %self.job_id, "Job cancelled");
        Ok(())
    }

    /// Point-in-time status snapshot
    pub async fn status(&self) -> JobStatus {
        let inner = self.inner.read().await;
        JobStatus {
            job_id: self.job_id,
            frame_kind: self.spec.frame_kind,
            session_id: self.spec.session_id.clone(),
            status: inner.state,
            created_at: self.created_at,
            started_at: inner.started_at,
            completed_at: inner.completed_at,
            last_capture_at: inner.last_capture_at,
            total_frames: self.spec.frame_count,
            completed_frames: inner.completed_frames,
            successful_frames: inner.successful_frames,
            failed_frames: inner.failed_frames,
            remaining_frames: progress::remaining(self.spec.frame_count, inner.completed_frames),
            percentage: progress::percentage(inner.completed_frames, self.spec.frame_count),
            interval_seconds: self.spec.interval_seconds,
            estimated_completion: inner.estimated_completion,
            current_temperature: inner.current_temperature,
            output_directory: inner
                .output_directory
                .as_ref()
                .map(|p| p.display().to_string()),
            captured_files: inner.captured_files.clone(),
            error_message: inner.error_message.clone(),
        }
    }

    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    fn eta_mode(&self) -> EtaMode {
        if self.spec.frame_kind.is_calibration() {
            EtaMode::Observed
        } else {
            EtaMode::FixedInterval(self.spec.interval_seconds)
        }
    }
}

/// Executes one job's capture sequence against the shared collaborators
pub struct JobRunner {
    job: Arc<CaptureJob>,
    gateway: Arc<CameraGateway>,
    sessions: Arc<SessionStore>,
    default_capture_dir: PathBuf,
    calibration_root: PathBuf,
}

impl JobRunner {
    pub fn new(
        job: Arc<CaptureJob>,
        gateway: Arc<CameraGateway>,
        sessions: Arc<SessionStore>,
        default_capture_dir: PathBuf,
        calibration_root: PathBuf,
    ) -> Self {
        Self {
            job,
            gateway,
            sessions,
            default_capture_dir,
            calibration_root,
        }
    }

    /// Run the sequence to a terminal state
    pub async fn run(self) {
        let spec = self.job.spec().clone();
        let job_id = self.job.job_id();

        {
            let mut inner = self.job.inner.write().await;
            if inner.state != JobState::Pending {
                // Cancelled before the task got scheduled
                return;
            }
            inner.state = JobState::Running;
            inner.started_at = Some(Utc::now());
        }

        tracing::info!(
            job_id = %job_id,
            frame_kind = %spec.frame_kind,
            frames = spec.frame_count,
            session_id = ?spec.session_id,
            "Starting capture job"
        );

        if let Err(e) = self.execute(&spec).await {
            self.fail(e.to_string()).await;
        }
    }

    async fn execute(&self, spec: &CaptureSequenceSpec) -> Result<()> {
        let dest_dir = self.resolve_output_dir(spec).await?;
        {
            let mut inner = self.job.inner.write().await;
            inner.output_directory = Some(dest_dir.clone());
        }

        let namer = self.build_namer(spec).await;

        if spec.frame_kind.is_calibration() {
            self.apply_frame_settings(spec).await?;
        }

        if spec.delay_before_start > 0.0 {
            tracing::info!(
                job_id = %self.job.job_id(),
                delay_sec = spec.delay_before_start,
                "Waiting before first frame"
            );
            tokio::time::sleep(Duration::from_secs_f64(spec.delay_before_start)).await;
        }

        self.capture_loop(spec, &dest_dir, &namer).await?;
        self.finish(spec, &dest_dir).await;
        Ok(())
    }

    async fn capture_loop(
        &self,
        spec: &CaptureSequenceSpec,
        dest_dir: &Path,
        namer: &FrameNamer,
    ) -> Result<()> {
        for index in 1..=spec.frame_count {
            if self.job.is_cancelled() {
                break;
            }

            self.wait_while_paused().await;

            // Pause may have outlasted a cancel request
            if self.job.is_cancelled() {
                break;
            }

            if !self.gateway.is_connected() {
                return Err(Error::DeviceNotConnected(DISCONNECT_ERROR.to_string()));
            }

            if spec.frame_kind.is_calibration() {
                self.sample_temperature().await;
            }

            let filename = {
                let inner = self.job.inner.read().await;
                namer.frame_name(index, inner.current_temperature)
            };

            match self.gateway.capture(dest_dir, Some(&filename)).await {
                Ok(result) => {
                    self.record_success(spec, index, &result).await;
                }
                Err(Error::DeviceNotConnected(_)) => {
                    return Err(Error::DeviceNotConnected(DISCONNECT_ERROR.to_string()));
                }
                Err(e) => {
                    let mut inner = self.job.inner.write().await;
                    inner.failed_frames += 1;
                    tracing::warn!(
                        job_id = %self.job.job_id(),
                        frame = index,
                        error = %e,
                        "Frame capture failed, continuing"
                    );
                }
            }

            {
                let mut inner = self.job.inner.write().await;
                inner.completed_frames += 1;
                inner.estimated_completion = progress::estimate_completion(
                    Utc::now(),
                    inner.started_at,
                    inner.completed_frames,
                    spec.frame_count,
                    self.job.eta_mode(),
                );
            }

            if index < spec.frame_count && spec.interval_seconds > 0.0 {
                tokio::time::sleep(Duration::from_secs_f64(spec.interval_seconds)).await;
            }
        }

        Ok(())
    }

    async fn record_success(&self, spec: &CaptureSequenceSpec, index: u32, result: &CaptureResult) {
        let size_bytes = tokio::fs::metadata(&result.path).await.ok().map(|m| m.len());

        if let Some(session_id) = &spec.session_id {
            if let Err(e) = self
                .sessions
                .add_image_to_session(session_id, &result.filename, size_bytes, None)
                .await
            {
                tracing::warn!(
                    job_id = %self.job.job_id(),
                    session_id = %session_id,
                    error = %e,
                    "Failed to register capture with session"
                );
            }
        }

        let mut inner = self.job.inner.write().await;
        inner.successful_frames += 1;
        inner.captured_files.push(result.filename.clone());
        inner.last_capture_at = Some(result.captured_at);

        tracing::info!(
            job_id = %self.job.job_id(),
            frame = index,
            total = spec.frame_count,
            file = %result.filename,
            "Frame captured"
        );
    }

    /// Idle-wait while paused; a resume/cancel notification or the poll
    /// interval ends each wait round
    async fn wait_while_paused(&self) {
        while self.job.paused.load(Ordering::SeqCst) && !self.job.is_cancelled() {
            let _ = tokio::time::timeout(PAUSE_POLL_INTERVAL, self.job.control.notified()).await;
        }
    }

    async fn sample_temperature(&self) {
        if let Ok(status) = self.gateway.status().await {
            if status.temperature.is_some() {
                let mut inner = self.job.inner.write().await;
                inner.current_temperature = status.temperature;
            }
        }
    }

    /// Resolve kind-specific device settings and apply them before frame 1.
    /// Any error here fails the job without capturing.
    async fn apply_frame_settings(&self, spec: &CaptureSequenceSpec) -> Result<()> {
        let shutter = match spec.frame_kind {
            FrameKind::Light => return Ok(()),
            FrameKind::Dark | FrameKind::FlatDark => spec
                .exposure_time
                .clone()
                .ok_or_else(|| {
                    Error::Validation(format!(
                        "exposure_time is required for {} frames",
                        spec.frame_kind
                    ))
                })?,
            FrameKind::Bias => self.gateway.shortest_exposure().await?,
            FrameKind::Flat => match (spec.target_adu, &spec.exposure_time) {
                (Some(adu), _) => self.gateway.flat_exposure(adu).await?,
                (None, Some(exposure)) => exposure.clone(),
                (None, None) => {
                    return Err(Error::Validation(
                        "either target_adu or exposure_time is required for flat frames"
                            .to_string(),
                    ))
                }
            },
        };

        let mut settings = vec![("shutterspeed".to_string(), shutter)];
        if let Some(iso) = &spec.iso {
            settings.push(("iso".to_string(), iso.clone()));
        }

        let report = self.gateway.update_settings(&settings).await?;
        for failed in &report.failed {
            tracing::warn!(
                job_id = %self.job.job_id(),
                setting = %failed.name,
                reason = %failed.reason,
                "Pre-flight setting not applied"
            );
        }

        Ok(())
    }

    async fn resolve_output_dir(&self, spec: &CaptureSequenceSpec) -> Result<PathBuf> {
        let dir = match (&spec.session_id, spec.frame_kind) {
            (Some(session_id), FrameKind::Light) => {
                self.sessions.captures_path(session_id).await?
            }
            (Some(session_id), kind) => self.sessions.calibration_path(session_id, kind).await?,
            (None, FrameKind::Light) => self.default_capture_dir.clone(),
            (None, kind) => self
                .calibration_root
                .join(Local::now().format("%Y-%m-%d").to_string())
                .join(kind.dir_name()),
        };
        Ok(dir)
    }

    /// Filename prefix priority: explicit base name, then the session
    /// target, then the family default
    async fn build_namer(&self, spec: &CaptureSequenceSpec) -> FrameNamer {
        let prefix = if let Some(base_name) = &spec.base_name {
            base_name.clone()
        } else if let Some(session_id) = &spec.session_id {
            match self.sessions.get_session(session_id).await {
                Ok(session) => session.target,
                Err(_) => spec.frame_kind.default_prefix().to_string(),
            }
        } else {
            spec.frame_kind.default_prefix().to_string()
        };

        FrameNamer::new(prefix)
            .with_exposure(spec.exposure_time.clone())
            .with_iso(spec.iso.clone())
    }

    async fn finish(&self, spec: &CaptureSequenceSpec, dest_dir: &Path) {
        let completed = {
            let mut inner = self.job.inner.write().await;
            // Paused here means the pause landed during the final frame's
            // capture; every frame is done, so the job completes anyway
            if matches!(inner.state, JobState::Running | JobState::Paused) {
                self.job.paused.store(false, Ordering::SeqCst);
                inner.state = JobState::Completed;
                inner.completed_at = Some(Utc::now());
                tracing::info!(
                    job_id = %self.job.job_id(),
                    successful = inner.successful_frames,
                    failed = inner.failed_frames,
                    "Capture job completed"
                );
                true
            } else {
                tracing::info!(
                    job_id = %self.job.job_id(),
                    state = %inner.state,
                    completed_frames = inner.completed_frames,
                    "Capture job ended without completing"
                );
                false
            }
        };

        if completed {
            if let Err(e) = self.write_summary(spec, dest_dir).await {
                tracing::warn!(
                    job_id = %self.job.job_id(),
                    error = %e,
                    "Failed to write sequence summary"
                );
            }
        }
    }

    /// Persist the sequence-summary artifact next to the frames
    async fn write_summary(&self, spec: &CaptureSequenceSpec, dest_dir: &Path) -> Result<()> {
        let inner = self.job.inner.read().await;
        let summary = serde_json::json!({
            "job_id": self.job.job_id(),
            "frame_kind": spec.frame_kind,
            "session_id": spec.session_id.clone(),
            "total_frames": spec.frame_count,
            "completed_frames": inner.completed_frames,
            "successful_frames": inner.successful_frames,
            "failed_frames": inner.failed_frames,
            "captured_files": inner.captured_files.clone(),
            "settings": {
                "exposure_time": spec.exposure_time.clone(),
                "iso": spec.iso.clone(),
                "target_adu": spec.target_adu,
                "interval_seconds": spec.interval_seconds,
            },
            "timing": {
                "created_at": self.job.created_at.to_rfc3339(),
                "started_at": inner.started_at.map(|t| t.to_rfc3339()),
                "completed_at": inner.completed_at.map(|t| t.to_rfc3339()),
            },
            "output_directory": dest_dir.display().to_string(),
        });
        drop(inner);

        let path = dest_dir.join(format!("sequence_summary_{}.json", self.job.job_id()));
        tokio::fs::write(&path, serde_json::to_vec_pretty(&summary)?).await?;

        tracing::info!(
            job_id = %self.job.job_id(),
            path = %path.display(),
            "Sequence summary written"
        );
        Ok(())
    }

    async fn fail(&self, message: String) {
        let mut inner = self.job.inner.write().await;
        if inner.state.is_terminal() {
            // A cancel that raced the failure wins
            return;
        }
        inner.state = JobState::Failed;
        inner.error_message = Some(message.clone());
        inner.completed_at = Some(Utc::now());
        tracing::error!(
            job_id = %self.job.job_id(),
            error = %message,
            "Capture job failed"
        );
    }
}
