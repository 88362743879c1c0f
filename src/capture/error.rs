use std::io;

use thiserror::Error;

use crate::capture::types::IoMethod;

/// Capture subsystem errors.
///
/// Everything here is fatal for the operation that produced it. Transient
/// device conditions (EAGAIN, EIO) never surface as a `CaptureError`.
#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("device not found: {0}")]
    DeviceNotFound(String),

    #[error("not a video capture device: {0}")]
    NotACaptureDevice(String),

    #[error("{path} does not support {method} i/o")]
    UnsupportedIoMode { path: String, method: IoMethod },

    #[error("unsupported pixel format: {0}")]
    UnsupportedFormat(String),

    #[error("device granted {granted} buffers, at least 2 are required")]
    InsufficientBuffers { granted: u32 },

    #[error("{op} failed: {source}")]
    DeviceIo {
        op: &'static str,
        #[source]
        source: io::Error,
    },

    #[error("invalid crop window: {0}")]
    InvalidCrop(String),

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl CaptureError {
    /// Wrap a failed device call.
    pub fn io(op: &'static str, source: io::Error) -> Self {
        Self::DeviceIo { op, source }
    }

    /// The underlying system error code, if this is a device I/O failure.
    pub fn errno(&self) -> Option<i32> {
        match self {
            Self::DeviceIo { source, .. } => source.raw_os_error(),
            _ => None,
        }
    }
}

/// Convenience Result alias.
pub type Result<T> = std::result::Result<T, CaptureError>;
