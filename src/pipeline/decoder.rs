//! Per-buffer decision: skip, drop, or decode and run signal tracking.

use tracing::{debug, info, warn};

use super::signal::{has_signal, SignalTracker, SignalTransition};
use super::transform::{FrameGeometry, OutputImage};
use crate::capture::error::{CaptureError, Result};
use crate::capture::types::{CropWindow, Mode3d, NegotiatedFormat};
use crate::diagnostics::stats::DiagnosticStats;
use crate::settings::types::{CaptureConfig, SignalThreshold};

/// Why a buffer produced no image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// The device filled a different number of bytes than one frame.
    Size { expected: usize, actual: usize },
    /// Crop and 3D mode leave no pixels.
    Geometry,
}

/// Result of feeding one dequeued buffer to the decoder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodeOutcome {
    /// Skipped by frame decimation.
    Skipped,
    Dropped(DropReason),
    /// Decoded. `image` is `None` while the signal is lost.
    Decoded {
        image: Option<OutputImage>,
        transition: Option<SignalTransition>,
    },
}

pub struct FrameDecoder {
    format: NegotiatedFormat,
    frame_decimation: u32,
    horizontal_decimation: u32,
    vertical_decimation: u32,
    crop: CropWindow,
    mode: Mode3d,
    geometry: Option<FrameGeometry>,
    frame_counter: u32,
    threshold_color: [u8; 3],
    tracker: SignalTracker,
    stats: DiagnosticStats,
}

impl FrameDecoder {
    /// Build a decoder for `format` with the live settings from `config`.
    pub fn new(format: NegotiatedFormat, config: &CaptureConfig) -> Result<Self> {
        config.validate()?;
        let mut decoder = Self {
            format,
            frame_decimation: config.frame_decimation,
            horizontal_decimation: config.horizontal_decimation,
            vertical_decimation: config.vertical_decimation,
            crop: CropWindow::default(),
            mode: config.mode_3d,
            geometry: None,
            frame_counter: 0,
            threshold_color: config.signal_threshold.color(),
            tracker: SignalTracker::new(config.signal_threshold.frames),
            stats: DiagnosticStats::new(),
        };
        decoder.set_crop(config.crop)?;
        Ok(decoder)
    }

    pub fn format(&self) -> NegotiatedFormat {
        self.format
    }

    pub fn crop(&self) -> CropWindow {
        self.crop
    }

    pub fn mode_3d(&self) -> Mode3d {
        self.mode
    }

    pub fn stats(&self) -> &DiagnosticStats {
        &self.stats
    }

    pub fn stats_mut(&mut self) -> &mut DiagnosticStats {
        &mut self.stats
    }

    pub fn tracker(&self) -> &SignalTracker {
        &self.tracker
    }

    /// Output size for the current settings, if any pixels remain.
    pub fn output_size(&self) -> Option<(u32, u32)> {
        self.geometry.as_ref().map(|g| (g.width(), g.height()))
    }

    fn rebuild_geometry(&self, crop: CropWindow, mode: Mode3d) -> Option<FrameGeometry> {
        FrameGeometry::new(
            &self.format,
            crop,
            mode,
            self.horizontal_decimation,
            self.vertical_decimation,
        )
    }

    /// Replace the crop window. Rejected if it leaves no pixels in the
    /// current 3D mode.
    pub fn set_crop(&mut self, crop: CropWindow) -> Result<()> {
        let (width, height) = self.mode.effective_size(self.format.width, self.format.height);
        if !crop.fits(width, height) {
            return Err(CaptureError::InvalidCrop(format!(
                "{crop:?} does not fit {width}x{height}"
            )));
        }
        let geometry = self.rebuild_geometry(crop, self.mode).ok_or_else(|| {
            CaptureError::InvalidCrop(format!(
                "{crop:?} leaves no output pixels at decimation {}x{}",
                self.horizontal_decimation, self.vertical_decimation
            ))
        })?;
        self.crop = crop;
        self.geometry = Some(geometry);
        Ok(())
    }

    /// Switch 3D mode. A crop that no longer fits drops frames until fixed.
    pub fn set_mode_3d(&mut self, mode: Mode3d) {
        self.mode = mode;
        self.geometry = self.rebuild_geometry(self.crop, mode);
        if self.geometry.is_none() {
            warn!("crop {:?} leaves no pixels in {mode:?} mode, frames will be dropped", self.crop);
        }
    }

    /// Replace the no-signal threshold; the dark-frame counter starts over.
    pub fn set_signal_threshold(&mut self, threshold: SignalThreshold) {
        self.threshold_color = threshold.color();
        self.tracker.set_threshold(threshold.frames);
    }

    /// Process the bytes of one dequeued buffer.
    pub fn decode(&mut self, bytes: &[u8]) -> DecodeOutcome {
        self.frame_counter += 1;
        if self.frame_counter < self.frame_decimation {
            self.stats.record_skip();
            return DecodeOutcome::Skipped;
        }

        // A wrong-size buffer leaves the gate open for the next one.
        if bytes.len() != self.format.frame_size {
            warn!(
                "dropping frame: {} bytes, expected {}",
                bytes.len(),
                self.format.frame_size
            );
            self.stats.record_drop();
            return DecodeOutcome::Dropped(DropReason::Size {
                expected: self.format.frame_size,
                actual: bytes.len(),
            });
        }
        self.frame_counter = 0;

        let Some(geometry) = self.geometry.as_ref() else {
            debug!("dropping frame: empty geometry");
            self.stats.record_drop();
            return DecodeOutcome::Dropped(DropReason::Geometry);
        };

        let image = geometry.decode(&self.format, bytes);
        self.stats.record_decoded(bytes.len());

        let decision = self.tracker.update(has_signal(&image, self.threshold_color));
        match decision.transition {
            Some(SignalTransition::Lost) => warn!("signal lost, suppressing output"),
            Some(SignalTransition::Regained) => info!("signal regained"),
            None => {}
        }

        let image = if decision.emit {
            self.stats.record_emitted();
            Some(image)
        } else {
            self.stats.record_suppressed();
            None
        };
        DecodeOutcome::Decoded {
            image,
            transition: decision.transition,
        }
    }
}
