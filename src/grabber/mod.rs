//! Public capture surface: start/stop, live settings and event delivery.
//!
//! The host calls [`Grabber::on_readable`] whenever the device descriptor
//! becomes readable; decoded frames and signal transitions reach the
//! consumer through the registered [`EventCallback`].

pub mod readiness;
pub mod watch;

use std::os::unix::io::RawFd;

use tracing::info;

use crate::capture::device::CaptureDevice;
use crate::capture::error::{CaptureError, Result};
use crate::capture::session::DeviceSession;
use crate::capture::types::{CropWindow, Mode3d, NegotiatedFormat};
use crate::diagnostics::stats::DiagnosticSnapshot;
use crate::pipeline::decoder::{DecodeOutcome, FrameDecoder};
use crate::pipeline::signal::SignalTransition;
use crate::pipeline::transform::OutputImage;
use crate::settings::types::{CaptureConfig, SignalThreshold};

pub use readiness::{ManualReadiness, Readiness};

/// Delivered to the consumer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GrabberEvent {
    Frame(OutputImage),
    SignalLost,
    SignalRegained,
}

/// Consumer callback, invoked on the thread that calls `on_readable`.
pub type EventCallback = Box<dyn Fn(GrabberEvent) + Send>;

/// What one readable notification produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadOutcome {
    /// Nothing to read (EAGAIN or a tolerated glitch).
    NoData,
    /// Skipped by frame decimation.
    Skipped,
    /// Wrong size or empty geometry.
    Dropped,
    /// An image was handed to the consumer.
    Emitted,
    /// Decoded but withheld while the signal is lost.
    Suppressed,
}

pub struct Grabber<D: CaptureDevice, R: Readiness = ManualReadiness> {
    session: DeviceSession<D>,
    decoder: FrameDecoder,
    readiness: R,
    callback: Option<EventCallback>,
}

#[cfg(target_os = "linux")]
impl Grabber<crate::capture::v4l2::V4l2Device> {
    /// Open the configured V4L2 device with manual readiness.
    pub fn open(config: &CaptureConfig) -> Result<Self> {
        let session = DeviceSession::open(config)?;
        Self::new(session, ManualReadiness::new(), config)
    }
}

impl<D: CaptureDevice, R: Readiness> Grabber<D, R> {
    /// Wrap a negotiated session. Readiness is registered and left disabled.
    pub fn new(session: DeviceSession<D>, mut readiness: R, config: &CaptureConfig) -> Result<Self> {
        let mut decoder = FrameDecoder::new(session.format(), config)?;
        readiness
            .register(session.raw_fd())
            .map_err(|e| CaptureError::io("register", e))?;
        readiness.set_enabled(false);
        decoder
            .stats_mut()
            .set_device(Some(session.capabilities().card.clone()));
        Ok(Self {
            session,
            decoder,
            readiness,
            callback: None,
        })
    }

    /// Register the consumer, replacing any previous one.
    pub fn on_event(&mut self, callback: EventCallback) {
        self.callback = Some(callback);
    }

    pub fn format(&self) -> NegotiatedFormat {
        self.session.format()
    }

    pub fn session(&self) -> &DeviceSession<D> {
        &self.session
    }

    pub fn readiness(&self) -> &R {
        &self.readiness
    }

    pub fn raw_fd(&self) -> RawFd {
        self.session.raw_fd()
    }

    pub fn is_started(&self) -> bool {
        self.readiness.is_enabled()
    }

    /// Start streaming and enable readiness. No-op when started.
    pub fn start(&mut self) -> Result<()> {
        if self.readiness.is_enabled() {
            return Ok(());
        }
        self.session.start_capturing()?;
        self.decoder.stats_mut().reset();
        self.readiness.set_enabled(true);
        info!("{}: grabber started", self.session.name());
        Ok(())
    }

    /// Disable readiness, then stop streaming. No-op when stopped.
    pub fn stop(&mut self) -> Result<()> {
        if !self.readiness.is_enabled() {
            return Ok(());
        }
        self.readiness.set_enabled(false);
        self.session.stop_capturing()?;
        info!("{}: grabber stopped", self.session.name());
        Ok(())
    }

    /// Handle one readable notification: read a buffer, decode it and
    /// deliver the result. Ignored while stopped.
    pub fn on_readable(&mut self) -> Result<ReadOutcome> {
        if !self.readiness.is_enabled() {
            return Ok(ReadOutcome::NoData);
        }
        let decoder = &mut self.decoder;
        let Some(outcome) = self.session.next_frame(|frame| decoder.decode(frame.bytes))? else {
            self.decoder.stats_mut().record_no_data();
            return Ok(ReadOutcome::NoData);
        };

        Ok(match outcome {
            DecodeOutcome::Skipped => ReadOutcome::Skipped,
            DecodeOutcome::Dropped(_) => ReadOutcome::Dropped,
            DecodeOutcome::Decoded { image, transition } => {
                match transition {
                    Some(SignalTransition::Lost) => self.dispatch(GrabberEvent::SignalLost),
                    Some(SignalTransition::Regained) => self.dispatch(GrabberEvent::SignalRegained),
                    None => {}
                }
                match image {
                    Some(image) => {
                        self.dispatch(GrabberEvent::Frame(image));
                        ReadOutcome::Emitted
                    }
                    None => ReadOutcome::Suppressed,
                }
            }
        })
    }

    fn dispatch(&self, event: GrabberEvent) {
        if let Some(callback) = &self.callback {
            callback(event);
        }
    }

    /// Replace the crop window; rejected if it leaves no pixels.
    pub fn set_crop(&mut self, crop: CropWindow) -> Result<()> {
        self.decoder.set_crop(crop)
    }

    pub fn crop(&self) -> CropWindow {
        self.decoder.crop()
    }

    pub fn set_3d_mode(&mut self, mode: Mode3d) {
        self.decoder.set_mode_3d(mode);
    }

    pub fn mode_3d(&self) -> Mode3d {
        self.decoder.mode_3d()
    }

    /// Replace the no-signal threshold; the dark-frame counter starts over.
    pub fn set_signal_threshold(&mut self, threshold: SignalThreshold) -> Result<()> {
        threshold.validate()?;
        self.decoder.set_signal_threshold(threshold);
        Ok(())
    }

    pub fn diagnostics(&self) -> DiagnosticSnapshot {
        self.decoder.stats().snapshot()
    }

    /// Stop and release the device.
    pub fn close(&mut self) -> Result<()> {
        self.stop()?;
        self.session.close()
    }
}
