//! gphoto2 CLI transport
//!
//! Drives a tethered camera through the gphoto2 command line tool. Every
//! invocation runs with `kill_on_drop(true)` under a timeout, so a hung
//! camera never leaves a zombie process behind: when the timeout fires the
//! future is cancelled, the child is dropped and SIGKILL is delivered.

use super::transport::{
    CameraTransport, DetectedCamera, DeviceReadout, TransportCapture, TransportError,
};
use async_trait::async_trait;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;

/// Default per-invocation timeout for non-capture commands
const COMMAND_TIMEOUT_SECS: u64 = 15;

/// gphoto2-backed transport
pub struct GphotoTransport {
    /// Timeout for the capture-and-download invocation
    capture_timeout_secs: u64,
    claimed: bool,
}

impl GphotoTransport {
    pub fn new(capture_timeout_secs: u64) -> Self {
        Self {
            capture_timeout_secs,
            claimed: false,
        }
    }

    /// Run gphoto2 with the given args, killing the process on timeout.
    async fn run(&self, args: &[&str], timeout_secs: u64) -> Result<String, TransportError> {
        let child = Command::new("gphoto2")
            .args(args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| TransportError::Io(format!("gphoto2 spawn failed: {}", e)))?;

        let timeout = Duration::from_secs(timeout_secs);

        match tokio::time::timeout(timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => {
                if !output.status.success() {
                    let stderr = String::from_utf8_lossy(&output.stderr);
                    return Err(classify_stderr(stderr.trim()));
                }
                Ok(String::from_utf8_lossy(&output.stdout).into_owned())
            }
            Ok(Err(e)) => Err(TransportError::Io(format!(
                "gphoto2 execution failed: {}",
                e
            ))),
            Err(_) => {
                tracing::warn!(
                    timeout_sec = timeout_secs,
                    args = ?args,
                    "gphoto2 timeout, process killed via kill_on_drop"
                );
                Err(TransportError::Timeout(timeout_secs))
            }
        }
    }

    fn parse_auto_detect(output: &str) -> Vec<DetectedCamera> {
        // Two header lines, then "<model>   <port>" rows
        output
            .lines()
            .skip(2)
            .filter_map(|line| {
                let line = line.trim_end();
                if line.is_empty() {
                    return None;
                }
                let port_start = line.rfind(char::is_whitespace)?;
                let (model, port) = line.split_at(port_start);
                Some(DetectedCamera {
                    model: model.trim().to_string(),
                    port: port.trim().to_string(),
                })
            })
            .collect()
    }
}

/// Map gphoto2 stderr onto transport errors
fn classify_stderr(stderr: &str) -> TransportError {
    let lower = stderr.to_lowercase();
    if lower.contains("could not claim") || lower.contains("device busy") {
        TransportError::Busy
    } else if lower.contains("no camera found") || lower.contains("could not detect") {
        TransportError::NotDetected
    } else if lower.contains("no space left") {
        TransportError::Storage(stderr.to_string())
    } else if lower.contains("permission denied") {
        TransportError::Permission(stderr.to_string())
    } else if lower.contains("bad parameters") || lower.contains("not found in configuration") {
        TransportError::UnsupportedSetting(stderr.to_string())
    } else {
        TransportError::Capture(stderr.to_string())
    }
}

#[async_trait]
impl CameraTransport for GphotoTransport {
    async fn connect(&mut self) -> Result<(), TransportError> {
        if self.claimed {
            return Ok(());
        }
        let output = self.run(&["--auto-detect"], COMMAND_TIMEOUT_SECS).await?;
        if Self::parse_auto_detect(&output).is_empty() {
            return Err(TransportError::NotDetected);
        }
        // Claim the device once so later operations fail fast if another
        // process grabs it.
        self.run(&["--summary"], COMMAND_TIMEOUT_SECS).await?;
        self.claimed = true;
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<(), TransportError> {
        // The CLI releases the device between invocations; dropping the
        // claim flag is all that is needed.
        self.claimed = false;
        Ok(())
    }

    async fn capture_to(
        &mut self,
        dest_dir: &Path,
        name: &str,
    ) -> Result<TransportCapture, TransportError> {
        if !self.claimed {
            return Err(TransportError::NotConnected);
        }

        // %C expands to the extension the camera reports for the file
        let template = dest_dir.join(format!("{}.%C", name));
        let template = template.to_string_lossy().into_owned();

        self.run(
            &[
                "--capture-image-and-download",
                "--filename",
                template.as_str(),
                "--force-overwrite",
            ],
            self.capture_timeout_secs,
        )
        .await?;

        // Find the downloaded file by stem; the extension came from the camera
        let mut entries = tokio::fs::read_dir(dest_dir)
            .await
            .map_err(|e| TransportError::Io(e.to_string()))?;
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| TransportError::Io(e.to_string()))?
        {
            let path = entry.path();
            if path.file_stem().and_then(|s| s.to_str()) == Some(name) {
                let filename = path
                    .file_name()
                    .map(|f| f.to_string_lossy().into_owned())
                    .unwrap_or_else(|| name.to_string());
                return Ok(TransportCapture { path, filename });
            }
        }

        Err(TransportError::Capture(format!(
            "downloaded file for {} not found in {}",
            name,
            dest_dir.display()
        )))
    }

    async fn read_status(&mut self) -> Result<DeviceReadout, TransportError> {
        if !self.claimed {
            return Err(TransportError::NotConnected);
        }
        // Not every body exposes a temperature widget; absence is not an error
        match self
            .run(&["--get-config", "cameratemperature"], COMMAND_TIMEOUT_SECS)
            .await
        {
            Ok(output) => {
                let temperature = output
                    .lines()
                    .find_map(|line| line.trim().strip_prefix("Current:"))
                    .and_then(|v| v.trim().parse::<f64>().ok());
                Ok(DeviceReadout { temperature })
            }
            Err(TransportError::NotConnected) => Err(TransportError::NotConnected),
            Err(_) => Ok(DeviceReadout::default()),
        }
    }

    async fn apply_setting(&mut self, name: &str, value: &str) -> Result<(), TransportError> {
        if !self.claimed {
            return Err(TransportError::NotConnected);
        }
        let assignment = format!("{}={}", name, value);
        match self
            .run(&["--set-config", assignment.as_str()], COMMAND_TIMEOUT_SECS)
            .await
        {
            Ok(_) => Ok(()),
            Err(TransportError::Capture(msg)) if msg.to_lowercase().contains("failed to set") => {
                Err(TransportError::InvalidValue {
                    name: name.to_string(),
                    value: value.to_string(),
                })
            }
            Err(e) => Err(e),
        }
    }

    async fn exposure_choices(&mut self) -> Result<Vec<String>, TransportError> {
        if !self.claimed {
            return Err(TransportError::NotConnected);
        }
        let output = self
            .run(&["--get-config", "shutterspeed"], COMMAND_TIMEOUT_SECS)
            .await?;
        let choices = output
            .lines()
            .filter_map(|line| {
                let rest = line.trim().strip_prefix("Choice:")?;
                // "Choice: 12 1/4000" -> "1/4000"
                rest.trim().split_once(' ').map(|(_, v)| v.trim().to_string())
            })
            .collect();
        Ok(choices)
    }

    async fn detect(&mut self) -> Result<Vec<DetectedCamera>, TransportError> {
        let output = self.run(&["--auto-detect"], COMMAND_TIMEOUT_SECS).await?;
        Ok(Self::parse_auto_detect(&output))
    }
}
