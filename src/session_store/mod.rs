//! SessionStore - session-scoped capture organization
//!
//! ## Responsibilities
//!
//! - Flat-file session persistence (`projects/<id>/session.json`)
//! - Output directory resolution for capture jobs
//! - Registering captured images against a session
//!
//! A session owns a directory tree of `captures/`, `previews/` and one
//! calibration subdirectory per frame kind. Documents are rewritten whole on
//! every change; a store-wide lock serializes the read-modify-write so two
//! jobs feeding the same session cannot drop each other's images.

use crate::capture_job::FrameKind;
use crate::error::{Error, Result};
use chrono::{DateTime, Local, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tokio::fs;
use tokio::sync::Mutex;

const SESSION_FILE: &str = "session.json";

const CALIBRATION_KINDS: [FrameKind; 4] = [
    FrameKind::Dark,
    FrameKind::Bias,
    FrameKind::Flat,
    FrameKind::FlatDark,
];

/// A capture session (one project/target)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub session_id: String,
    pub name: String,
    /// Target designation, also used as the filename prefix fallback
    pub target: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub images: Vec<SessionImage>,
    #[serde(default)]
    pub total_size_bytes: u64,
}

/// One image registered against a session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionImage {
    pub filename: String,
    pub size_bytes: Option<u64>,
    pub focus_score: Option<f64>,
    pub added_at: DateTime<Utc>,
}

/// Request body for session creation
#[derive(Debug, Deserialize)]
pub struct CreateSessionRequest {
    pub name: String,
    pub target: String,
}

/// Flat-file session storage
pub struct SessionStore {
    projects_root: PathBuf,
    /// Serializes document rewrites
    write_lock: Mutex<()>,
}

impl SessionStore {
    pub fn new(projects_root: PathBuf) -> Self {
        Self {
            projects_root,
            write_lock: Mutex::new(()),
        }
    }

    fn session_dir(&self, session_id: &str) -> PathBuf {
        self.projects_root.join(session_id)
    }

    fn session_file(&self, session_id: &str) -> PathBuf {
        self.session_dir(session_id).join(SESSION_FILE)
    }

    /// Create a session and its directory tree. The id combines the date
    /// with a slug of the target, matching the on-disk layout.
    pub async fn create_session(&self, name: &str, target: &str) -> Result<Session> {
        let target = target.trim();
        if target.is_empty() {
            return Err(Error::Validation("target must not be empty".to_string()));
        }

        let session_id = format!("{}_{}", Local::now().format("%Y%m%d"), slugify(target));
        if fs::try_exists(self.session_file(&session_id))
            .await
            .unwrap_or(false)
        {
            return Err(Error::SessionExists(session_id));
        }

        let dir = self.session_dir(&session_id);
        fs::create_dir_all(dir.join("captures")).await?;
        fs::create_dir_all(dir.join("previews")).await?;
        for kind in CALIBRATION_KINDS {
            fs::create_dir_all(dir.join("calibration").join(kind.dir_name())).await?;
        }

        let now = Utc::now();
        let session = Session {
            session_id: session_id.clone(),
            name: name.to_string(),
            target: target.to_string(),
            created_at: now,
            updated_at: now,
            images: Vec::new(),
            total_size_bytes: 0,
        };
        self.save_session(&session).await?;

        tracing::info!(session_id = %session_id, target = %target, "Session created");
        Ok(session)
    }

    pub async fn get_session(&self, session_id: &str) -> Result<Session> {
        let raw = match fs::read(self.session_file(session_id)).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(Error::SessionNotFound(session_id.to_string()));
            }
            Err(e) => return Err(e.into()),
        };
        Ok(serde_json::from_slice(&raw)?)
    }

    /// All sessions on disk; unreadable documents are skipped with a warning
    pub async fn list_sessions(&self) -> Result<Vec<Session>> {
        let mut sessions = Vec::new();

        let mut entries = match fs::read_dir(&self.projects_root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(sessions),
            Err(e) => return Err(e.into()),
        };

        while let Some(entry) = entries.next_entry().await? {
            let session_id = entry.file_name().to_string_lossy().into_owned();
            match self.get_session(&session_id).await {
                Ok(session) => sessions.push(session),
                Err(Error::SessionNotFound(_)) => {}
                Err(e) => {
                    tracing::warn!(session_id = %session_id, error = %e, "Skipping unreadable session");
                }
            }
        }

        sessions.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(sessions)
    }

    pub async fn delete_session(&self, session_id: &str) -> Result<()> {
        let dir = self.session_dir(session_id);
        if !fs::try_exists(self.session_file(session_id))
            .await
            .unwrap_or(false)
        {
            return Err(Error::SessionNotFound(session_id.to_string()));
        }
        fs::remove_dir_all(&dir).await?;
        tracing::info!(session_id = %session_id, "Session deleted");
        Ok(())
    }

    /// Register a captured file against a session
    pub async fn add_image_to_session(
        &self,
        session_id: &str,
        filename: &str,
        size_bytes: Option<u64>,
        focus_score: Option<f64>,
    ) -> Result<()> {
        let _guard = self.write_lock.lock().await;

        let mut session = self.get_session(session_id).await?;
        session.images.push(SessionImage {
            filename: filename.to_string(),
            size_bytes,
            focus_score,
            added_at: Utc::now(),
        });
        session.total_size_bytes += size_bytes.unwrap_or(0);
        session.updated_at = Utc::now();
        self.save_session(&session).await?;

        tracing::debug!(
            session_id = %session_id,
            filename = %filename,
            size_bytes = ?size_bytes,
            "Image registered with session"
        );
        Ok(())
    }

    /// Directory light frames land in; the session must exist
    pub async fn captures_path(&self, session_id: &str) -> Result<PathBuf> {
        self.get_session(session_id).await?;
        Ok(self.session_dir(session_id).join("captures"))
    }

    /// Directory a calibration kind lands in; the session must exist
    pub async fn calibration_path(&self, session_id: &str, kind: FrameKind) -> Result<PathBuf> {
        self.get_session(session_id).await?;
        Ok(self
            .session_dir(session_id)
            .join("calibration")
            .join(kind.dir_name()))
    }

    async fn save_session(&self, session: &Session) -> Result<()> {
        let path = self.session_file(&session.session_id);
        fs::write(&path, serde_json::to_vec_pretty(session)?).await?;
        Ok(())
    }
}

/// Filesystem-safe slug of a target designation
fn slugify(target: &str) -> String {
    let mut slug = String::with_capacity(target.len());
    let mut last_was_sep = false;
    for c in target.chars() {
        if c.is_ascii_alphanumeric() {
            slug.push(c.to_ascii_lowercase());
            last_was_sep = false;
        } else if !last_was_sep && !slug.is_empty() {
            slug.push('_');
            last_was_sep = true;
        }
    }
    while slug.ends_with('_') {
        slug.pop();
    }
    slug
}
