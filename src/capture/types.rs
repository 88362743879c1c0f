use serde::{Deserialize, Serialize};
use std::fmt;
use std::ptr::NonNull;

/// Packed pixel layouts the pipeline can decode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PixelFormat {
    Uyvy,
    Yuyv,
    Rgb32,
}

impl PixelFormat {
    /// V4L2 fourcc code for this layout.
    pub fn fourcc(self) -> [u8; 4] {
        match self {
            Self::Uyvy => *b"UYVY",
            Self::Yuyv => *b"YUYV",
            Self::Rgb32 => *b"RGB4",
        }
    }

    /// Map a device fourcc back to a supported layout.
    pub fn from_fourcc(fourcc: [u8; 4]) -> Option<Self> {
        match &fourcc {
            b"UYVY" => Some(Self::Uyvy),
            b"YUYV" => Some(Self::Yuyv),
            b"RGB4" => Some(Self::Rgb32),
            _ => None,
        }
    }

    /// Bytes per pixel in the packed buffer.
    pub fn bytes_per_pixel(self) -> usize {
        match self {
            Self::Uyvy | Self::Yuyv => 2,
            Self::Rgb32 => 4,
        }
    }
}

impl fmt::Display for PixelFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&fourcc_str(self.fourcc()))
    }
}

/// Render a fourcc as text, replacing non-printable bytes.
pub fn fourcc_str(fourcc: [u8; 4]) -> String {
    fourcc
        .iter()
        .map(|&b| if b.is_ascii_graphic() { b as char } else { '?' })
        .collect()
}

/// Analog video standard to select on the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VideoStandard {
    Pal,
    Ntsc,
}

impl VideoStandard {
    /// `v4l2_std_id` mask covering every variant of the standard.
    pub fn std_id(self) -> u64 {
        match self {
            Self::Pal => 0x0000_00ff,
            Self::Ntsc => 0x0000_b000,
        }
    }
}

/// How frame memory is shared between device and application.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IoMethod {
    Read,
    #[default]
    Mmap,
    Userptr,
}

impl fmt::Display for IoMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Read => "read",
            Self::Mmap => "mmap",
            Self::Userptr => "userptr",
        })
    }
}

/// Memory type passed to buffer requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferMemory {
    Mmap,
    Userptr,
}

/// Capability bits relevant to capture.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Capabilities {
    pub driver: String,
    pub card: String,
    pub video_capture: bool,
    pub streaming: bool,
    pub read_write: bool,
}

impl Capabilities {
    /// Whether the device can serve the given I/O method.
    pub fn supports(&self, method: IoMethod) -> bool {
        match method {
            IoMethod::Read => self.read_write,
            IoMethod::Mmap | IoMethod::Userptr => self.streaming,
        }
    }
}

/// Single-planar capture format as exchanged with the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceFormat {
    pub width: u32,
    pub height: u32,
    pub fourcc: [u8; 4],
}

/// Format the device actually accepted, fixed for the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NegotiatedFormat {
    pub pixel_format: PixelFormat,
    pub width: u32,
    pub height: u32,
    pub frame_size: usize,
}

impl NegotiatedFormat {
    pub fn new(pixel_format: PixelFormat, width: u32, height: u32) -> Self {
        Self {
            pixel_format,
            width,
            height,
            frame_size: width as usize * height as usize * pixel_format.bytes_per_pixel(),
        }
    }

    /// Bytes per source row.
    pub fn stride(&self) -> usize {
        self.width as usize * self.pixel_format.bytes_per_pixel()
    }
}

/// Result of querying one mmap buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferInfo {
    pub index: u32,
    pub length: usize,
    pub offset: u32,
}

/// Buffer handed back by a dequeue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DequeuedBuffer {
    pub index: u32,
    pub bytes_used: usize,
    /// User-pointer address (userptr mode only, 0 otherwise).
    pub userptr: usize,
    pub length: usize,
}

/// Buffer handed to the device by a queue call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueBuffer {
    Mmap { index: u32 },
    Userptr { index: u32, ptr: usize, length: usize },
}

impl QueueBuffer {
    pub fn index(&self) -> u32 {
        match *self {
            Self::Mmap { index } | Self::Userptr { index, .. } => index,
        }
    }
}

/// Ownership state of one pool slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BufferState {
    /// Held by the application, not visible to the device.
    Free,
    /// Owned by the device, waiting to be filled.
    Queued,
    /// Dequeued and lent to the decoder.
    Filled,
}

/// A device memory region mapped into the process.
///
/// Does not unmap itself: regions go back through
/// [`CaptureDevice::unmap_buffer`](crate::capture::device::CaptureDevice::unmap_buffer)
/// so unmap failures can be reported.
#[derive(Debug)]
pub struct MappedRegion {
    ptr: NonNull<u8>,
    len: usize,
}

// The mapping is owned exclusively by the pool holding it.
unsafe impl Send for MappedRegion {}

impl MappedRegion {
    /// # Safety
    ///
    /// `ptr` must point to `len` readable bytes that stay valid until the
    /// region is passed back to the device that created it.
    pub unsafe fn from_raw_parts(ptr: NonNull<u8>, len: usize) -> Self {
        Self { ptr, len }
    }

    pub fn as_ptr(&self) -> *mut u8 {
        self.ptr.as_ptr()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn as_slice(&self) -> &[u8] {
        // SAFETY: guaranteed by the `from_raw_parts` contract.
        unsafe { std::slice::from_raw_parts(self.ptr.as_ptr(), self.len) }
    }
}

/// Margins excluded from the output image, in source pixels.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CropWindow {
    pub left: u32,
    pub right: u32,
    pub top: u32,
    pub bottom: u32,
}

impl CropWindow {
    pub fn new(left: u32, right: u32, top: u32, bottom: u32) -> Self {
        Self {
            left,
            right,
            top,
            bottom,
        }
    }

    /// Check the window leaves at least one pixel on each axis.
    pub fn fits(&self, width: u32, height: u32) -> bool {
        u64::from(self.left) + u64::from(self.right) < u64::from(width)
            && u64::from(self.top) + u64::from(self.bottom) < u64::from(height)
    }
}

/// Stereoscopic layout of the incoming signal.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode3d {
    #[default]
    Off,
    SideBySide,
    TopAndBottom,
}

impl Mode3d {
    /// Width and height of the single view used for output.
    pub fn effective_size(self, width: u32, height: u32) -> (u32, u32) {
        match self {
            Self::Off => (width, height),
            Self::SideBySide => (width / 2, height),
            Self::TopAndBottom => (width, height / 2),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fourcc_round_trips_for_supported_formats() {
        for format in [PixelFormat::Uyvy, PixelFormat::Yuyv, PixelFormat::Rgb32] {
            assert_eq!(PixelFormat::from_fourcc(format.fourcc()), Some(format));
        }
        assert_eq!(PixelFormat::from_fourcc(*b"MJPG"), None);
    }

    #[test]
    fn fourcc_str_masks_unprintable_bytes() {
        assert_eq!(fourcc_str(*b"MJPG"), "MJPG");
        assert_eq!(fourcc_str([b'A', 0, b'B', 0xff]), "A?B?");
    }

    #[test]
    fn negotiated_frame_size_follows_bytes_per_pixel() {
        assert_eq!(NegotiatedFormat::new(PixelFormat::Uyvy, 720, 576).frame_size, 829_440);
        assert_eq!(NegotiatedFormat::new(PixelFormat::Yuyv, 4, 4).frame_size, 32);
        assert_eq!(NegotiatedFormat::new(PixelFormat::Rgb32, 4, 4).frame_size, 64);
        assert_eq!(NegotiatedFormat::new(PixelFormat::Rgb32, 4, 4).stride(), 16);
    }

    #[test]
    fn capabilities_gate_io_methods() {
        let caps = Capabilities {
            video_capture: true,
            streaming: true,
            ..Default::default()
        };
        assert!(caps.supports(IoMethod::Mmap));
        assert!(caps.supports(IoMethod::Userptr));
        assert!(!caps.supports(IoMethod::Read));
    }

    #[test]
    fn crop_window_fit_is_strict() {
        assert!(CropWindow::new(1, 2, 0, 0).fits(4, 1));
        assert!(!CropWindow::new(2, 2, 0, 0).fits(4, 1));
        assert!(!CropWindow::new(0, 0, 1, 0).fits(4, 1));
        assert!(!CropWindow::new(u32::MAX, 1, 0, 0).fits(4, 4));
    }

    #[test]
    fn mode_3d_halves_one_axis() {
        assert_eq!(Mode3d::Off.effective_size(1920, 1080), (1920, 1080));
        assert_eq!(Mode3d::SideBySide.effective_size(1920, 1080), (960, 1080));
        assert_eq!(Mode3d::TopAndBottom.effective_size(1920, 1080), (1920, 540));
    }

    #[test]
    fn queue_buffer_reports_index() {
        assert_eq!(QueueBuffer::Mmap { index: 3 }.index(), 3);
        let q = QueueBuffer::Userptr {
            index: 1,
            ptr: 0x1000,
            length: 32,
        };
        assert_eq!(q.index(), 1);
    }

    #[test]
    fn config_enums_use_lowercase_json() {
        assert_eq!(serde_json::to_value(IoMethod::Userptr).unwrap(), "userptr");
        assert_eq!(serde_json::to_value(PixelFormat::Rgb32).unwrap(), "rgb32");
        assert_eq!(serde_json::to_value(Mode3d::SideBySide).unwrap(), "side_by_side");
        let std: VideoStandard = serde_json::from_str("\"ntsc\"").unwrap();
        assert_eq!(std, VideoStandard::Ntsc);
    }
}
