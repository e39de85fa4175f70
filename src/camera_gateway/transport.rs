//! Vendor-protocol seam
//!
//! The gateway never talks to the tether library directly; it drives a
//! [`CameraTransport`] object and maps transport failures onto the crate
//! error taxonomy. Production uses the gphoto2 CLI transport, tests use a
//! scripted mock.

use async_trait::async_trait;
use std::path::{Path, PathBuf};

/// Transport-level failure
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// No camera discoverable on the bus
    #[error("no camera detected")]
    NotDetected,

    /// Device claimed by another process
    #[error("camera claimed by another process")]
    Busy,

    /// Operation issued against a disconnected device
    #[error("camera not connected")]
    NotConnected,

    /// Capture or image transfer failed
    #[error("capture failed: {0}")]
    Capture(String),

    /// Persisting the image failed for lack of space
    #[error("storage full: {0}")]
    Storage(String),

    /// Write permission failure
    #[error("permission denied: {0}")]
    Permission(String),

    /// Setting name unknown to the device
    #[error("setting not supported: {0}")]
    UnsupportedSetting(String),

    /// Setting value rejected by the device
    #[error("value rejected for {name}: {value}")]
    InvalidValue { name: String, value: String },

    /// Operation exceeded the transport timeout
    #[error("operation timed out after {0}s")]
    Timeout(u64),

    /// Lower-level I/O failure
    #[error("transport error: {0}")]
    Io(String),
}

/// A frame delivered by the transport
#[derive(Debug, Clone)]
pub struct TransportCapture {
    pub path: PathBuf,
    pub filename: String,
}

/// Raw device readout
#[derive(Debug, Clone, Default)]
pub struct DeviceReadout {
    pub temperature: Option<f64>,
}

/// Camera discovered on the bus
#[derive(Debug, Clone, serde::Serialize)]
pub struct DetectedCamera {
    pub model: String,
    pub port: String,
}

/// Opaque tether driver. The device handle is not reentrant: the gateway
/// holds its device lock across every call, so implementations see at most
/// one operation in flight.
#[async_trait]
pub trait CameraTransport: Send + Sync {
    async fn connect(&mut self) -> Result<(), TransportError>;

    async fn disconnect(&mut self) -> Result<(), TransportError>;

    /// Capture one frame into `dest_dir` under `name` (extension chosen by
    /// the camera). The directory is guaranteed to exist.
    async fn capture_to(
        &mut self,
        dest_dir: &Path,
        name: &str,
    ) -> Result<TransportCapture, TransportError>;

    async fn read_status(&mut self) -> Result<DeviceReadout, TransportError>;

    async fn apply_setting(&mut self, name: &str, value: &str) -> Result<(), TransportError>;

    /// Exposure choices the body offers, as vendor strings (e.g. "1/4000").
    async fn exposure_choices(&mut self) -> Result<Vec<String>, TransportError>;

    /// List cameras on the bus without claiming one.
    async fn detect(&mut self) -> Result<Vec<DetectedCamera>, TransportError>;
}
