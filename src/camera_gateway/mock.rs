//! Scripted transport for tests

use super::transport::{
    CameraTransport, DetectedCamera, DeviceReadout, TransportCapture, TransportError,
};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Shared observation/scripting state for a [`ScriptedTransport`]
#[derive(Default)]
pub struct ScriptState {
    in_flight: AtomicBool,
    /// Set if two captures ever overlapped (device lock violation)
    pub overlap_detected: AtomicBool,
    pub capture_calls: AtomicU32,
    /// Outcome per capture call, consumed front to back; empty means success
    pub capture_script: Mutex<VecDeque<Result<(), TransportError>>>,
    pub applied_settings: Mutex<Vec<(String, String)>>,
    /// Setting names the device rejects
    pub unsupported_settings: Mutex<Vec<String>>,
    pub temperature: Mutex<Option<f64>>,
}

impl ScriptState {
    pub fn script_capture_outcomes(&self, outcomes: Vec<Result<(), TransportError>>) {
        *self.capture_script.lock().unwrap() = outcomes.into();
    }

    pub fn overlapped(&self) -> bool {
        self.overlap_detected.load(Ordering::SeqCst)
    }
}

/// Transport whose behavior is driven by a [`ScriptState`]
pub struct ScriptedTransport {
    pub state: Arc<ScriptState>,
    /// Synthetic capture duration, to widen the overlap window
    pub capture_delay: Duration,
    connected: bool,
}

impl ScriptedTransport {
    pub fn new(state: Arc<ScriptState>) -> Self {
        Self {
            state,
            capture_delay: Duration::from_millis(5),
            connected: false,
        }
    }

    pub fn with_capture_delay(mut self, delay: Duration) -> Self {
        self.capture_delay = delay;
        self
    }
}

#[async_trait]
impl CameraTransport for ScriptedTransport {
    async fn connect(&mut self) -> Result<(), TransportError> {
        self.connected = true;
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<(), TransportError> {
        self.connected = false;
        Ok(())
    }

    async fn capture_to(
        &mut self,
        dest_dir: &Path,
        name: &str,
    ) -> Result<TransportCapture, TransportError> {
        if !self.connected {
            return Err(TransportError::NotConnected);
        }

        if self.state.in_flight.swap(true, Ordering::SeqCst) {
            self.state.overlap_detected.store(true, Ordering::SeqCst);
        }
        self.state.capture_calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.capture_delay).await;

        let outcome = self
            .state
            .capture_script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Ok(()));

        self.state.in_flight.store(false, Ordering::SeqCst);

        match outcome {
            Ok(()) => {
                let filename = format!("{}.cr2", name);
                let path = dest_dir.join(&filename);
                tokio::fs::write(&path, b"RAW")
                    .await
                    .map_err(|e| TransportError::Io(e.to_string()))?;
                Ok(TransportCapture { path, filename })
            }
            Err(e) => {
                if matches!(e, TransportError::NotConnected) {
                    self.connected = false;
                }
                Err(e)
            }
        }
    }

    async fn read_status(&mut self) -> Result<DeviceReadout, TransportError> {
        if !self.connected {
            return Err(TransportError::NotConnected);
        }
        Ok(DeviceReadout {
            temperature: *self.state.temperature.lock().unwrap(),
        })
    }

    async fn apply_setting(&mut self, name: &str, value: &str) -> Result<(), TransportError> {
        if !self.connected {
            return Err(TransportError::NotConnected);
        }
        if self
            .state
            .unsupported_settings
            .lock()
            .unwrap()
            .iter()
            .any(|s| s == name)
        {
            return Err(TransportError::UnsupportedSetting(name.to_string()));
        }
        self.state
            .applied_settings
            .lock()
            .unwrap()
            .push((name.to_string(), value.to_string()));
        Ok(())
    }

    async fn exposure_choices(&mut self) -> Result<Vec<String>, TransportError> {
        Ok(vec![
            "30".to_string(),
            "1/60".to_string(),
            "1/1000".to_string(),
            "1/4000".to_string(),
        ])
    }

    async fn detect(&mut self) -> Result<Vec<DetectedCamera>, TransportError> {
        Ok(vec![DetectedCamera {
            model: "Scripted Camera".to_string(),
            port: "usb:000,000".to_string(),
        }])
    }
}
