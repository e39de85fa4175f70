//! Frame filename generation
//!
//! Names follow `{prefix}_{params}_{timestamp}_f{NNN}`. The timestamp is
//! taken at generation time, and the 1-based frame index suffix keeps names
//! distinct even when a fast loop produces several frames within the same
//! second.

use chrono::Local;

/// Filename generator for one capture sequence
#[derive(Debug, Clone)]
pub struct FrameNamer {
    prefix: String,
    exposure: Option<String>,
    iso: Option<String>,
}

impl FrameNamer {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            exposure: None,
            iso: None,
        }
    }

    pub fn with_exposure(mut self, exposure: Option<String>) -> Self {
        self.exposure = exposure;
        self
    }

    pub fn with_iso(mut self, iso: Option<String>) -> Self {
        self.iso = iso;
        self
    }

    /// Name for the frame at the given 1-based index. The temperature is
    /// sampled per frame, so it is passed per call rather than stored.
    pub fn frame_name(&self, index: u32, temperature: Option<f64>) -> String {
        let timestamp = Local::now().format("%Y%m%d_%H%M%S");

        let mut params: Vec<String> = Vec::new();
        if let Some(exposure) = &self.exposure {
            params.push(format!("exp{}", sanitize_exposure(exposure)));
        }
        if let Some(iso) = &self.iso {
            params.push(format!("iso{}", iso));
        }
        if let Some(temperature) = temperature {
            params.push(format!("temp{:.1}C", temperature));
        }

        if params.is_empty() {
            format!("{}_{}_f{:03}", self.prefix, timestamp, index)
        } else {
            format!(
                "{}_{}_{}_f{:03}",
                self.prefix,
                params.join("_"),
                timestamp,
                index
            )
        }
    }
}

/// Make a vendor exposure string filename-safe ("1/60" -> "1-60", '30"' -> "30s")
pub fn sanitize_exposure(exposure: &str) -> String {
    exposure.replace('/', "-").replace('"', "s")
}
