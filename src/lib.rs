//! V4L2 frame grabber for ambient lighting.
//!
//! Opens a capture device, negotiates a packed pixel format, streams frames
//! through one of three buffer strategies and turns each frame into a small
//! RGB image after crop, 3D split and decimation. A no-signal detector
//! suppresses output while the source shows only black.
//!
//! ```no_run
//! use v4l_grabber::{CaptureConfig, Grabber, GrabberEvent};
//!
//! # fn main() -> v4l_grabber::Result<()> {
//! let config = CaptureConfig::default();
//! let mut grabber = Grabber::open(&config)?;
//! grabber.on_event(Box::new(|event| {
//!     if let GrabberEvent::Frame(image) = event {
//!         println!("{}x{}", image.width, image.height);
//!     }
//! }));
//! grabber.start()?;
//! loop {
//!     // Call whenever the descriptor from `grabber.raw_fd()` is readable.
//!     grabber.on_readable()?;
//! }
//! # }
//! ```

pub mod capture;
pub mod diagnostics;
pub mod grabber;
pub mod pipeline;
pub mod settings;

pub use capture::error::{CaptureError, Result};
pub use capture::session::DeviceSession;
pub use capture::types::{CropWindow, IoMethod, Mode3d, NegotiatedFormat, PixelFormat, VideoStandard};
pub use diagnostics::stats::DiagnosticSnapshot;
pub use grabber::{EventCallback, Grabber, GrabberEvent, ManualReadiness, ReadOutcome, Readiness};
pub use pipeline::transform::OutputImage;
pub use settings::types::{CaptureConfig, SignalThreshold};
