//! CameraGateway - exclusive access to the tethered camera
//!
//! ## Responsibilities
//!
//! - connect/disconnect lifecycle around the vendor transport
//! - Single-operation-at-a-time serialization of every device call
//! - Capture with destination-directory creation and name fallback
//! - Best-effort settings batches with a per-key report
//!
//! The underlying device handle is not reentrant, so every operation holds
//! one `tokio::sync::Mutex` for its full duration. Concurrent callers block
//! until the device frees up rather than being rejected; `is_connected` reads
//! an atomic outside the lock and never blocks.

pub mod gphoto;
#[cfg(test)]
pub mod mock;
pub mod transport;
mod types;

pub use gphoto::GphotoTransport;
pub use transport::{CameraTransport, DetectedCamera, TransportError};
pub use types::{CaptureResult, DeviceStatus, FailedSetting, SettingsReport};

use crate::error::{Error, Result};
use chrono::{Local, Utc};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Mutex;

/// Exposure used for bias frames when the body does not list its choices
const FALLBACK_SHORTEST_EXPOSURE: &str = "1/4000";

/// Exposure used for flat frames when no better estimate is available
const FALLBACK_FLAT_EXPOSURE: &str = "1/60";

/// Gateway over the tethered camera
pub struct CameraGateway {
    /// Device critical section; held for the duration of one operation
    device: Mutex<Box<dyn CameraTransport>>,
    /// Tracked outside the lock so status queries never block on a capture
    connected: AtomicBool,
}

impl CameraGateway {
    pub fn new(transport: Box<dyn CameraTransport>) -> Self {
        Self {
            device: Mutex::new(transport),
            connected: AtomicBool::new(false),
        }
    }

    /// Connect to the camera. Calling while already connected is a no-op
    /// success.
    pub async fn connect(&self) -> Result<bool> {
        if self.is_connected() {
            tracing::debug!("Camera already connected");
            return Ok(true);
        }

        let mut device = self.device.lock().await;
        device.connect().await.map_err(|e| self.map_transport(e))?;
        self.connected.store(true, Ordering::SeqCst);
        tracing::info!("Camera connected");
        Ok(true)
    }

    /// Disconnect from the camera. Succeeds even if already disconnected.
    pub async fn disconnect(&self) -> Result<bool> {
        let mut device = self.device.lock().await;
        device
            .disconnect()
            .await
            .map_err(|e| self.map_transport(e))?;
        self.connected.store(false, Ordering::SeqCst);
        tracing::info!("Camera disconnected");
        Ok(true)
    }

    /// Non-blocking connectivity query
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Capture one frame into `dest_dir`, creating it if absent. Without a
    /// caller-provided name a timestamp name is used.
    pub async fn capture(&self, dest_dir: &Path, name: Option<&str>) -> Result<CaptureResult> {
        if !self.is_connected() {
            return Err(Error::DeviceNotConnected(
                "capture requires a connected camera".to_string(),
            ));
        }

        let mut device = self.device.lock().await;

        tokio::fs::create_dir_all(dest_dir)
            .await
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::PermissionDenied => Error::PermissionDenied(format!(
                    "cannot create {}: {}",
                    dest_dir.display(),
                    e
                )),
                _ => Error::Io(e),
            })?;

        let name = match name {
            Some(n) => n.to_string(),
            None => format!("capture_{}", Local::now().format("%Y%m%d_%H%M%S")),
        };

        let frame = device
            .capture_to(dest_dir, &name)
            .await
            .map_err(|e| self.map_transport(e))?;

        tracing::debug!(
            filename = %frame.filename,
            dir = %dest_dir.display(),
            "Frame captured"
        );

        Ok(CaptureResult {
            path: frame.path,
            filename: frame.filename,
            captured_at: Utc::now(),
        })
    }

    /// Camera status snapshot. Never errors for a disconnected camera.
    pub async fn status(&self) -> Result<DeviceStatus> {
        if !self.is_connected() {
            return Ok(DeviceStatus {
                connected: false,
                temperature: None,
            });
        }

        let mut device = self.device.lock().await;
        match device.read_status().await {
            Ok(readout) => Ok(DeviceStatus {
                connected: true,
                temperature: readout.temperature,
            }),
            Err(TransportError::NotConnected) => {
                self.connected.store(false, Ordering::SeqCst);
                Ok(DeviceStatus {
                    connected: false,
                    temperature: None,
                })
            }
            Err(e) => {
                tracing::warn!(error = %e, "Status readout failed");
                Ok(DeviceStatus {
                    connected: true,
                    temperature: None,
                })
            }
        }
    }

    /// Apply a settings batch key by key, reporting what stuck and what the
    /// device rejected. A disconnect aborts the batch.
    pub async fn update_settings(&self, settings: &[(String, String)]) -> Result<SettingsReport> {
        if !self.is_connected() {
            return Err(Error::DeviceNotConnected(
                "settings require a connected camera".to_string(),
            ));
        }

        let mut device = self.device.lock().await;
        let mut report = SettingsReport::default();

        for (name, value) in settings {
            match device.apply_setting(name, value).await {
                Ok(()) => report.applied.push(name.clone()),
                Err(TransportError::NotConnected) => {
                    self.connected.store(false, Ordering::SeqCst);
                    return Err(Error::DeviceNotConnected(
                        "camera disconnected while applying settings".to_string(),
                    ));
                }
                Err(e) => {
                    tracing::warn!(setting = %name, error = %e, "Setting rejected");
                    report.failed.push(FailedSetting {
                        name: name.clone(),
                        reason: e.to_string(),
                    });
                }
            }
        }

        tracing::info!(
            applied = report.applied.len(),
            failed = report.failed.len(),
            "Camera settings updated"
        );

        Ok(report)
    }

    /// List cameras on the bus
    pub async fn detect(&self) -> Result<Vec<DetectedCamera>> {
        let mut device = self.device.lock().await;
        device.detect().await.map_err(|e| self.map_transport(e))
    }

    /// Fastest exposure the body offers, for bias frames
    pub async fn shortest_exposure(&self) -> Result<String> {
        let choices = {
            let mut device = self.device.lock().await;
            device
                .exposure_choices()
                .await
                .map_err(|e| self.map_transport(e))?
        };

        let shortest = choices
            .iter()
            .filter_map(|c| parse_exposure_secs(c).map(|secs| (secs, c)))
            .min_by(|(a, _), (b, _)| a.total_cmp(b))
            .map(|(_, c)| c.clone());

        Ok(shortest.unwrap_or_else(|| FALLBACK_SHORTEST_EXPOSURE.to_string()))
    }

    /// Derive an exposure aimed at the target brightness level for flats.
    /// TODO: meter a test frame and solve for the target ADU instead of the
    /// fixed fallback.
    pub async fn flat_exposure(&self, _target_adu: u32) -> Result<String> {
        let choices = {
            let mut device = self.device.lock().await;
            device
                .exposure_choices()
                .await
                .map_err(|e| self.map_transport(e))?
        };

        if choices.iter().any(|c| c == FALLBACK_FLAT_EXPOSURE) {
            return Ok(FALLBACK_FLAT_EXPOSURE.to_string());
        }
        Ok(choices
            .first()
            .cloned()
            .unwrap_or_else(|| FALLBACK_FLAT_EXPOSURE.to_string()))
    }

    /// Transport error mapping; a NotConnected report also drops the
    /// connectivity flag so later queries see the disconnect.
    fn map_transport(&self, e: TransportError) -> Error {
        match e {
            TransportError::NotDetected => Error::DeviceNotFound("no camera detected".to_string()),
            TransportError::Busy => {
                Error::DeviceBusy("camera claimed by another process".to_string())
            }
            TransportError::NotConnected => {
                self.connected.store(false, Ordering::SeqCst);
                Error::DeviceNotConnected("camera not connected".to_string())
            }
            TransportError::Capture(msg) => Error::CaptureFailed(msg),
            TransportError::Storage(msg) => Error::InsufficientStorage(msg),
            TransportError::Permission(msg) => Error::PermissionDenied(msg),
            TransportError::UnsupportedSetting(name) => Error::UnsupportedSetting(name),
            TransportError::InvalidValue { name, value } => {
                Error::InvalidValue(format!("{}={}", name, value))
            }
            TransportError::Timeout(secs) => {
                Error::CaptureFailed(format!("camera operation timed out ({}s)", secs))
            }
            TransportError::Io(msg) => Error::Internal(msg),
        }
    }
}

/// Parse a vendor exposure string ("1/4000", "0.5", "30", "30s") into seconds
fn parse_exposure_secs(exposure: &str) -> Option<f64> {
    let cleaned = exposure.trim().trim_end_matches(['s', '"']);
    if let Some((num, den)) = cleaned.split_once('/') {
        let num: f64 = num.trim().parse().ok()?;
        let den: f64 = den.trim().parse().ok()?;
        if den == 0.0 {
            return None;
        }
        return Some(num / den);
    }
    cleaned.parse().ok()
}
