//! JobRegistry - capture job lifecycle and control routing
//!
//! ## Responsibilities
//!
//! - Job creation with fresh identifiers, spec validation up front
//! - Routing pause/resume/cancel/status queries by job id
//! - Snapshot listing of all tracked jobs
//! - Eviction of terminal jobs after a retention window
//!
//! The id-to-job map is the one piece of state touched by both control
//! callers and job tasks, so it lives behind a `tokio::sync::RwLock`; a
//! status read racing an eviction sees the job or gets `JobNotFound`, never
//! a half-removed entry.

use crate::camera_gateway::CameraGateway;
use crate::capture_job::{CaptureJob, CaptureSequenceSpec, JobRunner, JobStatus};
use crate::error::{Error, Result};
use crate::session_store::SessionStore;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use uuid::Uuid;

/// How long a terminal job stays queryable before eviction
pub const DEFAULT_JOB_RETENTION: Duration = Duration::from_secs(300);

/// Registry of all capture jobs in the process
pub struct JobRegistry {
    jobs: Arc<RwLock<HashMap<Uuid, Arc<CaptureJob>>>>,
    gateway: Arc<CameraGateway>,
    sessions: Arc<SessionStore>,
    retention: Duration,
    default_capture_dir: PathBuf,
    calibration_root: PathBuf,
}

impl JobRegistry {
    pub fn new(
        gateway: Arc<CameraGateway>,
        sessions: Arc<SessionStore>,
        default_capture_dir: PathBuf,
        calibration_root: PathBuf,
    ) -> Self {
        Self {
            jobs: Arc::new(RwLock::new(HashMap::new())),
            gateway,
            sessions,
            retention: DEFAULT_JOB_RETENTION,
            default_capture_dir,
            calibration_root,
        }
    }

    /// Override the retention window (tests use short windows)
    pub fn with_retention(mut self, retention: Duration) -> Self {
        self.retention = retention;
        self
    }

    /// Validate the spec, verify its collaborator references, store a fresh
    /// job and launch its task. Returns immediately with the initial status.
    pub async fn create_job(&self, spec: CaptureSequenceSpec) -> Result<JobStatus> {
        spec.validate()?;

        if let Some(session_id) = &spec.session_id {
            self.sessions.get_session(session_id).await?;
        }

        if !self.gateway.is_connected() {
            return Err(Error::DeviceUnavailable(
                "camera must be connected before starting a capture job".to_string(),
            ));
        }

        let job = Arc::new(CaptureJob::new(spec));
        let job_id = job.job_id();

        {
            let mut jobs = self.jobs.write().await;
            jobs.insert(job_id, job.clone());
        }

        let runner = JobRunner::new(
            job.clone(),
            self.gateway.clone(),
            self.sessions.clone(),
            self.default_capture_dir.clone(),
            self.calibration_root.clone(),
        );

        // One spawned task per job: run to a terminal state, linger for the
        // retention window, then evict. Exactly one removal per job.
        let jobs = self.jobs.clone();
        let retention = self.retention;
        tokio::spawn(async move {
            runner.run().await;
            tokio::time::sleep(retention).await;
            jobs.write().await.remove(&job_id);
            tracing::debug!(job_id = %job_id, "Job evicted from registry");
        });

        tracing::info!(
            job_id = %job_id,
            frame_kind = %job.spec().frame_kind,
            frames = job.spec().frame_count,
            "Capture job created"
        );

        Ok(job.status().await)
    }

    async fn get(&self, job_id: Uuid) -> Result<Arc<CaptureJob>> {
        self.jobs
            .read()
            .await
            .get(&job_id)
            .cloned()
            .ok_or_else(|| Error::JobNotFound(job_id.to_string()))
    }

    pub async fn get_status(&self, job_id: Uuid) -> Result<JobStatus> {
        Ok(self.get(job_id).await?.status().await)
    }

    pub async fn pause_job(&self, job_id: Uuid) -> Result<JobStatus> {
        let job = self.get(job_id).await?;
        job.pause().await?;
        Ok(job.status().await)
    }

    pub async fn resume_job(&self, job_id: Uuid) -> Result<JobStatus> {
        let job = self.get(job_id).await?;
        job.resume().await?;
        Ok(job.status().await)
    }

    pub async fn cancel_job(&self, job_id: Uuid) -> Result<JobStatus> {
        let job = self.get(job_id).await?;
        job.cancel().await?;
        Ok(job.status().await)
    }

    /// Explicitly drop a job from the registry, cancelling it first if it is
    /// still active
    pub async fn remove_job(&self, job_id: Uuid) -> Result<()> {
        let job = self.get(job_id).await?;
        // An already-terminal job cannot be cancelled; that is fine here
        let _ = job.cancel().await;
        self.jobs.write().await.remove(&job_id);
        tracing::info!(job_id = %job_id, "Job removed from registry");
        Ok(())
    }

    /// Snapshot of every tracked job, terminal ones included
    pub async fn list_jobs(&self) -> Vec<JobStatus> {
        let jobs: Vec<Arc<CaptureJob>> = {
            let jobs = self.jobs.read().await;
            jobs.values().cloned().collect()
        };

        let mut statuses = Vec::with_capacity(jobs.len());
        for job in jobs {
            statuses.push(job.status().await);
        }
        statuses
    }

    /// Number of tracked jobs not yet terminal
    pub async fn active_count(&self) -> usize {
        self.list_jobs()
            .await
            .iter()
            .filter(|s| !s.status.is_terminal())
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera_gateway::mock::{ScriptState, ScriptedTransport};
    use crate::camera_gateway::TransportError;
    use crate::capture_job::{FrameKind, JobState};
    use std::time::Duration;
    use tempfile::TempDir;

    struct Harness {
        registry: JobRegistry,
        gateway: Arc<CameraGateway>,
        sessions: Arc<SessionStore>,
        state: Arc<ScriptState>,
        _workdir: TempDir,
    }

    async fn harness() -> Harness {
        harness_with_delay(Duration::from_millis(5)).await
    }

    async fn harness_with_delay(capture_delay: Duration) -> Harness {
        let workdir = tempfile::tempdir().unwrap();
        let state = Arc::new(ScriptState::default());
        let transport = ScriptedTransport::new(state.clone()).with_capture_delay(capture_delay);
        let gateway = Arc::new(CameraGateway::new(Box::new(transport)));
        gateway.connect().await.unwrap();

        let sessions = Arc::new(SessionStore::new(workdir.path().join("projects")));
        let registry = JobRegistry::new(
            gateway.clone(),
            sessions.clone(),
            workdir.path().join("captures/default"),
            workdir.path().join("calibration_frames"),
        )
        .with_retention(Duration::from_secs(60));

        Harness {
            registry,
            gateway,
            sessions,
            state,
            _workdir: workdir,
        }
    }

    fn light_spec(count: u32) -> CaptureSequenceSpec {
        CaptureSequenceSpec {
            frame_kind: FrameKind::Light,
            frame_count: count,
            interval_seconds: 0.0,
            delay_before_start: 0.0,
            session_id: None,
            base_name: None,
            exposure_time: None,
            iso: None,
            target_adu: None,
        }
    }

    async fn wait_terminal(registry: &JobRegistry, job_id: Uuid) -> JobStatus {
        for _ in 0..500 {
            let status = registry.get_status(job_id).await.unwrap();
            if status.status.is_terminal() {
                return status;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("job {} did not reach a terminal state", job_id);
    }

    #[tokio::test]
    async fn test_job_runs_to_completion() {
        let h = harness().await;
        let created = h.registry.create_job(light_spec(3)).await.unwrap();

        let status = wait_terminal(&h.registry, created.job_id).await;
        assert_eq!(status.status, JobState::Completed);
        assert_eq!(status.successful_frames, 3);
        assert_eq!(status.failed_frames, 0);
        assert_eq!(status.completed_frames, 3);
        assert_eq!(status.remaining_frames, 0);
        assert_eq!(status.percentage, 100.0);
        assert!(status.completed_at.is_some());

        // Three distinct filenames
        let unique: std::collections::HashSet<_> = status.captured_files.iter().collect();
        assert_eq!(unique.len(), 3);
    }

    #[tokio::test]
    async fn test_completion_writes_sequence_summary() {
        let h = harness().await;
        let created = h.registry.create_job(light_spec(2)).await.unwrap();
        let status = wait_terminal(&h.registry, created.job_id).await;

        let dir = PathBuf::from(status.output_directory.unwrap());
        let summary_path = dir.join(format!("sequence_summary_{}.json", created.job_id));
        let raw = tokio::fs::read(&summary_path).await.unwrap();
        let summary: serde_json::Value = serde_json::from_slice(&raw).unwrap();
        assert_eq!(summary["successful_frames"], 2);
        assert_eq!(summary["captured_files"].as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_per_frame_failures_are_tolerated() {
        let h = harness().await;
        h.state.script_capture_outcomes(vec![
            Ok(()),
            Err(TransportError::Capture("transfer glitch".to_string())),
            Ok(()),
        ]);

        let created = h.registry.create_job(light_spec(3)).await.unwrap();
        let status = wait_terminal(&h.registry, created.job_id).await;

        assert_eq!(status.status, JobState::Completed);
        assert_eq!(status.successful_frames, 2);
        assert_eq!(status.failed_frames, 1);
        assert_eq!(status.completed_frames, 3);
    }

    #[tokio::test]
    async fn test_disconnect_mid_sequence_is_fatal() {
        let h = harness().await;
        h.state.script_capture_outcomes(vec![
            Ok(()),
            Ok(()),
            Err(TransportError::NotConnected),
        ]);

        let created = h.registry.create_job(light_spec(5)).await.unwrap();
        let status = wait_terminal(&h.registry, created.job_id).await;

        assert_eq!(status.status, JobState::Failed);
        assert!(status.error_message.is_some());
        assert!(status.completed_frames < 5);
        // No more capture calls after the disconnect
        assert_eq!(
            h.state
                .capture_calls
                .load(std::sync::atomic::Ordering::SeqCst),
            3
        );
    }

    #[tokio::test]
    async fn test_create_rejects_invalid_spec_before_device_calls() {
        let h = harness().await;
        let mut spec = light_spec(5);
        spec.frame_kind = FrameKind::Dark;
        // No exposure_time

        let result = h.registry.create_job(spec).await;
        assert!(matches!(result, Err(Error::Validation(_))));
        assert_eq!(
            h.state
                .capture_calls
                .load(std::sync::atomic::Ordering::SeqCst),
            0
        );
        assert!(h.registry.list_jobs().await.is_empty());
    }

    #[tokio::test]
    async fn test_create_requires_connected_camera() {
        let h = harness().await;
        h.gateway.disconnect().await.unwrap();

        let result = h.registry.create_job(light_spec(1)).await;
        assert!(matches!(result, Err(Error::DeviceUnavailable(_))));
    }

    #[tokio::test]
    async fn test_create_rejects_unknown_session() {
        let h = harness().await;
        let mut spec = light_spec(1);
        spec.session_id = Some("20250101_nowhere".to_string());

        let result = h.registry.create_job(spec).await;
        assert!(matches!(result, Err(Error::SessionNotFound(_))));
    }

    #[tokio::test]
    async fn test_pause_and_resume() {
        let h = harness().await;
        let mut spec = light_spec(200);
        spec.interval_seconds = 0.02;
        let created = h.registry.create_job(spec).await.unwrap();

        // Let a few frames land, then pause
        tokio::time::sleep(Duration::from_millis(100)).await;
        let paused = h.registry.pause_job(created.job_id).await.unwrap();
        assert_eq!(paused.status, JobState::Paused);

        // Progress stops once the pause takes effect
        tokio::time::sleep(Duration::from_millis(200)).await;
        let frozen = h.registry.get_status(created.job_id).await.unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;
        let still_frozen = h.registry.get_status(created.job_id).await.unwrap();
        assert_eq!(frozen.completed_frames, still_frozen.completed_frames);

        // Resuming lets it move again
        h.registry.resume_job(created.job_id).await.unwrap();
        tokio::time::sleep(Duration::from_millis(300)).await;
        let moving = h.registry.get_status(created.job_id).await.unwrap();
        assert!(moving.completed_frames > still_frozen.completed_frames);

        h.registry.cancel_job(created.job_id).await.unwrap();
        wait_terminal(&h.registry, created.job_id).await;
    }

    #[tokio::test]
    async fn test_cancel_stops_future_frames() {
        let h = harness().await;
        let mut spec = light_spec(200);
        spec.interval_seconds = 0.02;
        let created = h.registry.create_job(spec).await.unwrap();

        tokio::time::sleep(Duration::from_millis(80)).await;
        let cancelled = h.registry.cancel_job(created.job_id).await.unwrap();
        assert_eq!(cancelled.status, JobState::Cancelled);

        // Give the in-flight frame time to finish, then confirm the tally
        // stops moving
        tokio::time::sleep(Duration::from_millis(100)).await;
        let after = h.registry.get_status(created.job_id).await.unwrap();
        tokio::time::sleep(Duration::from_millis(150)).await;
        let later = h.registry.get_status(created.job_id).await.unwrap();
        assert_eq!(after.completed_frames, later.completed_frames);
        assert!(later.completed_frames < 200);
        assert_eq!(later.status, JobState::Cancelled);
    }

    #[tokio::test]
    async fn test_cancel_while_paused() {
        let h = harness().await;
        let mut spec = light_spec(100);
        spec.interval_seconds = 0.02;
        let created = h.registry.create_job(spec).await.unwrap();

        tokio::time::sleep(Duration::from_millis(60)).await;
        h.registry.pause_job(created.job_id).await.unwrap();
        h.registry.cancel_job(created.job_id).await.unwrap();

        let status = wait_terminal(&h.registry, created.job_id).await;
        assert_eq!(status.status, JobState::Cancelled);
    }

    #[tokio::test]
    async fn test_cancel_immediately_after_create() {
        let h = harness().await;
        let mut spec = light_spec(50);
        spec.interval_seconds = 0.02;
        let created = h.registry.create_job(spec).await.unwrap();

        // May land before the spawned task has run a single frame
        h.registry.cancel_job(created.job_id).await.unwrap();

        let status = wait_terminal(&h.registry, created.job_id).await;
        assert_eq!(status.status, JobState::Cancelled);
        assert!(status.completed_frames < 50);
    }

    #[tokio::test]
    async fn test_invalid_transitions() {
        let h = harness().await;
        let created = h.registry.create_job(light_spec(1)).await.unwrap();
        let completed = wait_terminal(&h.registry, created.job_id).await;
        assert_eq!(completed.status, JobState::Completed);

        // Pause on a completed job is rejected and changes nothing
        let result = h.registry.pause_job(created.job_id).await;
        assert!(matches!(result, Err(Error::InvalidTransition(_))));
        let status = h.registry.get_status(created.job_id).await.unwrap();
        assert_eq!(status.status, JobState::Completed);

        assert!(matches!(
            h.registry.resume_job(created.job_id).await,
            Err(Error::InvalidTransition(_))
        ));
        assert!(matches!(
            h.registry.cancel_job(created.job_id).await,
            Err(Error::InvalidTransition(_))
        ));
    }

    #[tokio::test]
    async fn test_resume_requires_paused() {
        let h = harness().await;
        let mut spec = light_spec(100);
        spec.interval_seconds = 0.02;
        let created = h.registry.create_job(spec).await.unwrap();

        let result = h.registry.resume_job(created.job_id).await;
        assert!(matches!(result, Err(Error::InvalidTransition(_))));

        h.registry.cancel_job(created.job_id).await.unwrap();
        wait_terminal(&h.registry, created.job_id).await;
    }

    #[tokio::test]
    async fn test_unknown_job_id() {
        let h = harness().await;
        let bogus = Uuid::new_v4();
        assert!(matches!(
            h.registry.get_status(bogus).await,
            Err(Error::JobNotFound(_))
        ));
        assert!(matches!(
            h.registry.pause_job(bogus).await,
            Err(Error::JobNotFound(_))
        ));
        assert!(matches!(
            h.registry.cancel_job(bogus).await,
            Err(Error::JobNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_concurrent_jobs_never_overlap_device_captures() {
        let h = harness_with_delay(Duration::from_millis(15)).await;

        let a = h.registry.create_job(light_spec(4)).await.unwrap();
        let b = h.registry.create_job(light_spec(4)).await.unwrap();

        let status_a = wait_terminal(&h.registry, a.job_id).await;
        let status_b = wait_terminal(&h.registry, b.job_id).await;

        assert_eq!(status_a.status, JobState::Completed);
        assert_eq!(status_b.status, JobState::Completed);
        assert!(!h.state.overlapped(), "device captures overlapped");
    }

    #[tokio::test]
    async fn test_eviction_after_retention() {
        let workdir = tempfile::tempdir().unwrap();
        let state = Arc::new(ScriptState::default());
        let transport = ScriptedTransport::new(state.clone());
        let gateway = Arc::new(CameraGateway::new(Box::new(transport)));
        gateway.connect().await.unwrap();
        let sessions = Arc::new(SessionStore::new(workdir.path().join("projects")));

        let registry = JobRegistry::new(
            gateway,
            sessions,
            workdir.path().join("captures/default"),
            workdir.path().join("calibration_frames"),
        )
        .with_retention(Duration::from_millis(200));

        let created = registry.create_job(light_spec(1)).await.unwrap();
        let status = wait_terminal(&registry, created.job_id).await;
        assert_eq!(status.status, JobState::Completed);

        // Still queryable within the retention window, gone afterwards
        assert!(registry.get_status(created.job_id).await.is_ok());
        tokio::time::sleep(Duration::from_millis(600)).await;
        assert!(matches!(
            registry.get_status(created.job_id).await,
            Err(Error::JobNotFound(_))
        ));
        assert!(registry.list_jobs().await.is_empty());
    }

    #[tokio::test]
    async fn test_calibration_preflight_applies_settings() {
        let h = harness().await;
        let spec = CaptureSequenceSpec {
            frame_kind: FrameKind::Dark,
            frame_count: 2,
            interval_seconds: 0.0,
            delay_before_start: 0.0,
            session_id: None,
            base_name: None,
            exposure_time: Some("30".to_string()),
            iso: Some("800".to_string()),
            target_adu: None,
        };

        let created = h.registry.create_job(spec).await.unwrap();
        let status = wait_terminal(&h.registry, created.job_id).await;
        assert_eq!(status.status, JobState::Completed);

        let applied = h.state.applied_settings.lock().unwrap().clone();
        assert!(applied.contains(&("shutterspeed".to_string(), "30".to_string())));
        assert!(applied.contains(&("iso".to_string(), "800".to_string())));

        // Calibration frames carry the exposure in their names
        assert!(status.captured_files.iter().all(|f| f.contains("exp30")));
    }

    #[tokio::test]
    async fn test_bias_uses_shortest_exposure() {
        let h = harness().await;
        let spec = CaptureSequenceSpec {
            frame_kind: FrameKind::Bias,
            frame_count: 1,
            interval_seconds: 0.0,
            delay_before_start: 0.0,
            session_id: None,
            base_name: None,
            exposure_time: None,
            iso: None,
            target_adu: None,
        };

        let created = h.registry.create_job(spec).await.unwrap();
        wait_terminal(&h.registry, created.job_id).await;

        let applied = h.state.applied_settings.lock().unwrap().clone();
        assert!(applied.contains(&("shutterspeed".to_string(), "1/4000".to_string())));
    }

    #[tokio::test]
    async fn test_session_capture_registers_images() {
        let h = harness().await;
        let session = h.sessions.create_session("M31 run", "m31").await.unwrap();

        let mut spec = light_spec(3);
        spec.session_id = Some(session.session_id.clone());
        let created = h.registry.create_job(spec).await.unwrap();
        let status = wait_terminal(&h.registry, created.job_id).await;
        assert_eq!(status.status, JobState::Completed);

        let stored = h.sessions.get_session(&session.session_id).await.unwrap();
        assert_eq!(stored.images.len(), 3);
        assert!(stored.total_size_bytes > 0);

        // Frames landed in the session captures directory and carry the
        // session target as prefix
        let captures = h.sessions.captures_path(&session.session_id).await.unwrap();
        for file in &status.captured_files {
            assert!(file.starts_with("m31_"));
            assert!(captures.join(file).exists());
        }
    }

    #[tokio::test]
    async fn test_eta_appears_after_first_frame() {
        let h = harness().await;
        let mut spec = light_spec(50);
        spec.interval_seconds = 0.05;
        // The start delay keeps frame 1 from landing before the first assert
        spec.delay_before_start = 0.3;
        let created = h.registry.create_job(spec).await.unwrap();

        // Nothing completed yet: no ETA
        assert!(created.estimated_completion.is_none());

        for _ in 0..400 {
            let status = h.registry.get_status(created.job_id).await.unwrap();
            if status.completed_frames >= 1 {
                assert!(status.estimated_completion.is_some());
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        h.registry.cancel_job(created.job_id).await.unwrap();
        wait_terminal(&h.registry, created.job_id).await;
    }

    #[tokio::test]
    async fn test_remove_job() {
        let h = harness().await;
        let created = h.registry.create_job(light_spec(1)).await.unwrap();
        wait_terminal(&h.registry, created.job_id).await;

        h.registry.remove_job(created.job_id).await.unwrap();
        assert!(matches!(
            h.registry.get_status(created.job_id).await,
            Err(Error::JobNotFound(_))
        ));
        assert!(matches!(
            h.registry.remove_job(created.job_id).await,
            Err(Error::JobNotFound(_))
        ));
    }
}
