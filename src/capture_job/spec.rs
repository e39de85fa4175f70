//! Capture sequence specification

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Upper bound for light (bulk) sequences
pub const MAX_LIGHT_FRAMES: u32 = 1000;
/// Upper bound for calibration sequences
pub const MAX_CALIBRATION_FRAMES: u32 = 200;

const MAX_INTERVAL_SECS: f64 = 3600.0;
const MAX_START_DELAY_SECS: f64 = 300.0;
const MIN_TARGET_ADU: u32 = 10_000;
const MAX_TARGET_ADU: u32 = 50_000;

/// Frame family a sequence captures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum FrameKind {
    /// Regular exposures (bulk capture)
    #[default]
    Light,
    /// Sensor noise at a given exposure, lens covered
    Dark,
    /// Readout noise, shortest exposure
    Bias,
    /// Flat field for vignetting/dust correction
    Flat,
    /// Darks matching the flat exposure
    FlatDark,
}

impl FrameKind {
    pub fn is_calibration(&self) -> bool {
        !matches!(self, FrameKind::Light)
    }

    /// Kinds whose exposure must come from the caller
    pub fn requires_exposure(&self) -> bool {
        matches!(self, FrameKind::Dark | FrameKind::FlatDark)
    }

    /// Filename prefix when neither a base name nor a session target applies
    pub fn default_prefix(&self) -> &'static str {
        match self {
            FrameKind::Light => "bulk",
            FrameKind::Dark => "dark_frame",
            FrameKind::Bias => "bias_frame",
            FrameKind::Flat => "flat_frame",
            FrameKind::FlatDark => "flat_dark_frame",
        }
    }

    /// Directory name for on-disk organization
    pub fn dir_name(&self) -> &'static str {
        match self {
            FrameKind::Light => "light",
            FrameKind::Dark => "dark",
            FrameKind::Bias => "bias",
            FrameKind::Flat => "flat",
            FrameKind::FlatDark => "flat_dark",
        }
    }
}

impl fmt::Display for FrameKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.dir_name())
    }
}

/// Immutable description of one capture sequence
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptureSequenceSpec {
    #[serde(default)]
    pub frame_kind: FrameKind,
    pub frame_count: u32,
    #[serde(default)]
    pub interval_seconds: f64,
    #[serde(default)]
    pub delay_before_start: f64,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub base_name: Option<String>,
    /// Required for dark and flat-dark frames
    #[serde(default)]
    pub exposure_time: Option<String>,
    #[serde(default)]
    pub iso: Option<String>,
    /// Target brightness level for flat frames
    #[serde(default)]
    pub target_adu: Option<u32>,
}

impl CaptureSequenceSpec {
    /// Reject malformed specs before a job is ever created. The running
    /// task can rely on every kind-specific field being present.
    pub fn validate(&self) -> Result<()> {
        if self.frame_count == 0 {
            return Err(Error::Validation("frame_count must be positive".to_string()));
        }

        let max_frames = if self.frame_kind.is_calibration() {
            MAX_CALIBRATION_FRAMES
        } else {
            MAX_LIGHT_FRAMES
        };
        if self.frame_count > max_frames {
            return Err(Error::Validation(format!(
                "frame_count {} exceeds limit of {} for {} frames",
                self.frame_count, max_frames, self.frame_kind
            )));
        }

        if !self.interval_seconds.is_finite()
            || !(0.0..=MAX_INTERVAL_SECS).contains(&self.interval_seconds)
        {
            return Err(Error::Validation(format!(
                "interval_seconds must be between 0 and {}",
                MAX_INTERVAL_SECS
            )));
        }

        if !self.delay_before_start.is_finite()
            || !(0.0..=MAX_START_DELAY_SECS).contains(&self.delay_before_start)
        {
            return Err(Error::Validation(format!(
                "delay_before_start must be between 0 and {}",
                MAX_START_DELAY_SECS
            )));
        }

        if self.frame_kind.requires_exposure() && self.exposure_time.is_none() {
            return Err(Error::Validation(format!(
                "exposure_time is required for {} frames",
                self.frame_kind
            )));
        }

        if self.frame_kind == FrameKind::Flat
            && self.exposure_time.is_none()
            && self.target_adu.is_none()
        {
            return Err(Error::Validation(
                "either target_adu or exposure_time is required for flat frames".to_string(),
            ));
        }

        if let Some(adu) = self.target_adu {
            if !(MIN_TARGET_ADU..=MAX_TARGET_ADU).contains(&adu) {
                return Err(Error::Validation(format!(
                    "target_adu must be between {} and {}",
                    MIN_TARGET_ADU, MAX_TARGET_ADU
                )));
            }
        }

        Ok(())
    }
}
