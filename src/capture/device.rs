//! `CaptureDevice` trait: the syscall-level device protocol.
//!
//! The real `V4l2Device` and the `MockDevice` both implement this trait,
//! so sessions, buffer pools and the decoder are tested without hardware.
//!
//! Methods return `io::Result` so the raw errno reaches the places that
//! tell "nothing ready" (EAGAIN) and "transient glitch" (EIO) apart from
//! real failures. EINTR is retried by the implementation and never
//! surfaces.

use std::io;
use std::os::unix::io::RawFd;

use super::types::{
    BufferInfo, BufferMemory, Capabilities, DequeuedBuffer, DeviceFormat, MappedRegion,
    QueueBuffer, VideoStandard,
};

/// Abstraction over an opened video capture device.
pub trait CaptureDevice: Send {
    /// Descriptor used for readiness registration.
    fn raw_fd(&self) -> RawFd;

    /// Query driver capabilities (VIDIOC_QUERYCAP).
    fn query_capabilities(&self) -> io::Result<Capabilities>;

    /// Reset the crop rectangle to the driver default (VIDIOC_CROPCAP + VIDIOC_S_CROP).
    fn reset_crop(&self) -> io::Result<()>;

    /// Select a video input (VIDIOC_S_INPUT).
    fn set_input(&self, index: u32) -> io::Result<()>;

    /// Select a video standard (VIDIOC_S_STD).
    fn set_standard(&self, standard: VideoStandard) -> io::Result<()>;

    /// Read the current capture format (VIDIOC_G_FMT).
    fn get_format(&self) -> io::Result<DeviceFormat>;

    /// Push a capture format (VIDIOC_S_FMT). The driver may adjust it.
    fn set_format(&self, format: &DeviceFormat) -> io::Result<()>;

    /// Request `count` buffers of the given memory type (VIDIOC_REQBUFS).
    ///
    /// Returns the number of buffers granted. A count of zero releases them.
    fn request_buffers(&self, memory: BufferMemory, count: u32) -> io::Result<u32>;

    /// Query length and offset of an mmap buffer (VIDIOC_QUERYBUF).
    fn query_buffer(&self, index: u32) -> io::Result<BufferInfo>;

    /// Map a queried buffer into the process.
    fn map_buffer(&self, info: &BufferInfo) -> io::Result<MappedRegion>;

    /// Unmap a region created by `map_buffer`.
    fn unmap_buffer(&self, region: MappedRegion) -> io::Result<()>;

    /// Hand a buffer to the device (VIDIOC_QBUF).
    fn queue_buffer(&self, buffer: QueueBuffer) -> io::Result<()>;

    /// Take the next filled buffer (VIDIOC_DQBUF).
    fn dequeue_buffer(&self, memory: BufferMemory) -> io::Result<DequeuedBuffer>;

    /// Start streaming (VIDIOC_STREAMON).
    fn stream_on(&self) -> io::Result<()>;

    /// Stop streaming (VIDIOC_STREAMOFF). Drops every queued buffer.
    fn stream_off(&self) -> io::Result<()>;

    /// Read one frame with `read()`.
    fn read(&self, buf: &mut [u8]) -> io::Result<usize>;

    /// Close the descriptor. Further calls fail with EBADF.
    fn close(&mut self);
}

/// Whether the error means "no data yet, try on the next wakeup".
pub fn is_no_data(err: &io::Error) -> bool {
    err.raw_os_error() == Some(libc::EAGAIN) || err.kind() == io::ErrorKind::WouldBlock
}

/// Whether the error is the transient EIO some drivers report mid-stream.
pub fn is_glitch(err: &io::Error) -> bool {
    err.raw_os_error() == Some(libc::EIO)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn eagain_is_no_data() {
        assert!(is_no_data(&io::Error::from_raw_os_error(libc::EAGAIN)));
        assert!(!is_no_data(&io::Error::from_raw_os_error(libc::EIO)));
    }

    #[test]
    fn eio_is_glitch() {
        assert!(is_glitch(&io::Error::from_raw_os_error(libc::EIO)));
        assert!(!is_glitch(&io::Error::from_raw_os_error(libc::EINVAL)));
    }

    /// Verify the trait is object-safe (buffer pools take `&dyn CaptureDevice`).
    #[test]
    fn trait_is_object_safe() {
        fn _accepts_dyn(_device: &dyn CaptureDevice) {}
    }

    #[test]
    fn trait_object_is_send() {
        fn assert_send<T: Send>() {}
        assert_send::<Box<dyn CaptureDevice>>();
    }
}
