use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::capture::error::{CaptureError, Result};
use crate::capture::types::{CropWindow, IoMethod, Mode3d, PixelFormat, VideoStandard};

/// No-signal detection settings.
///
/// Channel values are fractions of full scale. A frame counts as dark when
/// every sampled pixel is at or below the threshold color; `frames` dark
/// frames in a row suppress output. `frames == 0` behaves as 1.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct SignalThreshold {
    pub red: f32,
    pub green: f32,
    pub blue: f32,
    pub frames: u32,
}

impl Default for SignalThreshold {
    fn default() -> Self {
        Self {
            red: 0.1,
            green: 0.1,
            blue: 0.1,
            frames: 50,
        }
    }
}

impl SignalThreshold {
    /// Threshold color in 8-bit channels, truncating.
    pub fn color(&self) -> [u8; 3] {
        [self.red, self.green, self.blue].map(|c| (c.clamp(0.0, 1.0) * 255.0) as u8)
    }

    /// Reject channel fractions outside 0.0..=1.0.
    pub fn validate(&self) -> Result<()> {
        for (name, value) in [("red", self.red), ("green", self.green), ("blue", self.blue)] {
            if !(0.0..=1.0).contains(&value) {
                return Err(CaptureError::Config(format!(
                    "{name} signal threshold {value} is outside 0.0..=1.0"
                )));
            }
        }
        Ok(())
    }
}

/// Everything needed to open and run a grabber.
///
/// `None` leaves the corresponding device setting unchanged.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct CaptureConfig {
    pub device: PathBuf,
    pub input: Option<u32>,
    pub standard: Option<VideoStandard>,
    pub pixel_format: Option<PixelFormat>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub frame_decimation: u32,
    pub horizontal_decimation: u32,
    pub vertical_decimation: u32,
    pub io_method: IoMethod,
    pub crop: CropWindow,
    pub mode_3d: Mode3d,
    pub signal_threshold: SignalThreshold,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            device: PathBuf::from("/dev/video0"),
            input: None,
            standard: None,
            pixel_format: None,
            width: None,
            height: None,
            frame_decimation: 1,
            horizontal_decimation: 8,
            vertical_decimation: 8,
            io_method: IoMethod::default(),
            crop: CropWindow::default(),
            mode_3d: Mode3d::default(),
            signal_threshold: SignalThreshold::default(),
        }
    }
}

impl CaptureConfig {
    /// Reject settings the pipeline cannot run with.
    pub fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("frame decimation", self.frame_decimation),
            ("horizontal decimation", self.horizontal_decimation),
            ("vertical decimation", self.vertical_decimation),
        ] {
            if value == 0 {
                return Err(CaptureError::Config(format!("{name} must be at least 1")));
            }
        }
        if self.width == Some(0) || self.height == Some(0) {
            return Err(CaptureError::Config("requested size must be non-zero".to_string()));
        }
        self.signal_threshold.validate()
    }
}
