//! Mock capture device for testing without real V4L2 hardware.
//!
//! Uses a builder pattern to configure capabilities, format negotiation,
//! buffer grants and queued frames, plus one-shot errno injection per
//! operation. Clones share state, so a test keeps a handle while the
//! session owns the device.

use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::os::unix::io::{AsRawFd, RawFd};
use std::os::unix::net::UnixStream;
use std::ptr::NonNull;
use std::sync::Arc;

use parking_lot::Mutex;

use super::device::CaptureDevice;
use super::types::{
    BufferInfo, BufferMemory, Capabilities, DequeuedBuffer, DeviceFormat, MappedRegion,
    PixelFormat, QueueBuffer, VideoStandard,
};

const MOCK_PAGE_SIZE: u32 = 4096;

/// Configurable errno injection for a specific operation.
#[derive(Debug, Clone, Copy)]
struct ErrorInjection {
    operation: &'static str,
    errno: i32,
    /// Matching calls that still succeed before this one fires.
    skip: u32,
}

#[derive(Debug)]
struct MockState {
    capabilities: Capabilities,
    format: DeviceFormat,
    supported: Vec<[u8; 4]>,
    max_size: Option<(u32, u32)>,
    buffer_grant: Option<u32>,
    buffer_length: Option<usize>,
    mmap_supported: bool,
    userptr_supported: bool,
    requested: u32,
    memory: Option<BufferMemory>,
    mapped: Vec<Option<Box<[u8]>>>,
    queued: VecDeque<QueueBuffer>,
    frames: VecDeque<Vec<u8>>,
    streaming: bool,
    input: Option<u32>,
    standard: Option<VideoStandard>,
    crop_reset: bool,
    closed: bool,
    calls: Vec<&'static str>,
    error_injections: Vec<ErrorInjection>,
}

/// Readiness socket pair: one byte on `tx` per pushed frame.
#[derive(Debug)]
struct Wakeup {
    tx: UnixStream,
    rx: UnixStream,
}

/// Mock V4L2 device.
#[derive(Debug, Clone)]
pub struct MockDevice {
    state: Arc<Mutex<MockState>>,
    wakeup: Arc<Wakeup>,
}

impl Default for MockDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl MockDevice {
    /// A 4x4 UYVY device supporting every I/O method.
    pub fn new() -> Self {
        let (tx, rx) = UnixStream::pair().expect("failed to create mock wakeup socket");
        tx.set_nonblocking(true)
            .expect("failed to make mock wakeup socket non-blocking");
        rx.set_nonblocking(true)
            .expect("failed to make mock wakeup socket non-blocking");

        Self {
            state: Arc::new(Mutex::new(MockState {
                capabilities: Capabilities {
                    driver: "mock".to_string(),
                    card: "Mock Capture".to_string(),
                    video_capture: true,
                    streaming: true,
                    read_write: true,
                },
                format: DeviceFormat {
                    width: 4,
                    height: 4,
                    fourcc: PixelFormat::Uyvy.fourcc(),
                },
                supported: Vec::new(),
                max_size: None,
                buffer_grant: None,
                buffer_length: None,
                mmap_supported: true,
                userptr_supported: true,
                requested: 0,
                memory: None,
                mapped: Vec::new(),
                queued: VecDeque::new(),
                frames: VecDeque::new(),
                streaming: false,
                input: None,
                standard: None,
                crop_reset: false,
                closed: false,
                calls: Vec::new(),
                error_injections: Vec::new(),
            })),
            wakeup: Arc::new(Wakeup { tx, rx }),
        }
    }

    /// Replace the reported capabilities.
    pub fn with_capabilities(self, capabilities: Capabilities) -> Self {
        self.state.lock().capabilities = capabilities;
        self
    }

    /// Set the current device format.
    pub fn with_format(self, width: u32, height: u32, format: PixelFormat) -> Self {
        self.with_raw_format(DeviceFormat {
            width,
            height,
            fourcc: format.fourcc(),
        })
    }

    /// Set the current device format from a raw fourcc.
    pub fn with_raw_format(self, format: DeviceFormat) -> Self {
        self.state.lock().format = format;
        self
    }

    /// Only accept these fourccs on `set_format`; others are silently kept.
    pub fn with_supported_fourccs(self, fourccs: &[[u8; 4]]) -> Self {
        self.state.lock().supported = fourccs.to_vec();
        self
    }

    /// Clamp requested sizes to this maximum.
    pub fn with_max_size(self, width: u32, height: u32) -> Self {
        self.state.lock().max_size = Some((width, height));
        self
    }

    /// Grant exactly `count` mmap buffers regardless of the request.
    pub fn granting_buffers(self, count: u32) -> Self {
        self.state.lock().buffer_grant = Some(count);
        self
    }

    /// Report this length from `query_buffer` instead of the frame size.
    pub fn with_buffer_length(self, length: usize) -> Self {
        self.state.lock().buffer_length = Some(length);
        self
    }

    /// Reject mmap buffer requests with EINVAL.
    pub fn without_mmap(self) -> Self {
        self.state.lock().mmap_supported = false;
        self
    }

    /// Reject user-pointer buffer requests with EINVAL.
    pub fn without_userptr(self) -> Self {
        self.state.lock().userptr_supported = false;
        self
    }

    /// Fail the next call of `operation` with `errno`.
    ///
    /// Operation names match the trait methods: `"query_capabilities"`,
    /// `"reset_crop"`, `"set_input"`, `"set_standard"`, `"get_format"`,
    /// `"set_format"`, `"request_buffers"`, `"query_buffer"`,
    /// `"map_buffer"`, `"unmap_buffer"`, `"queue_buffer"`,
    /// `"dequeue_buffer"`, `"stream_on"`, `"stream_off"`, `"read"`.
    /// Injections for the same operation fire in insertion order.
    pub fn with_error(self, operation: &'static str, errno: i32) -> Self {
        self.inject_error(operation, errno);
        self
    }

    /// Same as [`with_error`](Self::with_error) on a shared handle.
    pub fn inject_error(&self, operation: &'static str, errno: i32) {
        self.inject_error_after(operation, 0, errno);
    }

    /// Let `skip` calls to `operation` succeed, then fail the next one.
    pub fn inject_error_after(&self, operation: &'static str, skip: u32, errno: i32) {
        self.state.lock().error_injections.push(ErrorInjection {
            operation,
            errno,
            skip,
        });
    }

    /// Make a frame available and signal readiness.
    pub fn push_frame(&self, data: Vec<u8>) {
        self.state.lock().frames.push_back(data);
        // A full socket buffer already means "readable".
        let _ = (&self.wakeup.tx).write(&[1]);
    }

    /// Frames pushed but not yet delivered.
    pub fn pending_frames(&self) -> usize {
        self.state.lock().frames.len()
    }

    /// Number of buffers currently queued to the device.
    pub fn queued_count(&self) -> usize {
        self.state.lock().queued.len()
    }

    /// Number of regions currently mapped.
    pub fn mapped_count(&self) -> usize {
        self.state.lock().mapped.iter().filter(|m| m.is_some()).count()
    }

    pub fn is_streaming(&self) -> bool {
        self.state.lock().streaming
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    pub fn input(&self) -> Option<u32> {
        self.state.lock().input
    }

    pub fn standard(&self) -> Option<VideoStandard> {
        self.state.lock().standard
    }

    pub fn crop_was_reset(&self) -> bool {
        self.state.lock().crop_reset
    }

    /// Successful and failed calls, in order.
    pub fn calls(&self) -> Vec<&'static str> {
        self.state.lock().calls.clone()
    }

    fn drain_wakeup(&self) {
        let mut scratch = [0u8; 64];
        while matches!((&self.wakeup.rx).read(&mut scratch), Ok(n) if n > 0) {}
    }
}

impl MockState {
    /// Record the call and fire a pending injection for it.
    fn enter(&mut self, operation: &'static str) -> io::Result<()> {
        self.calls.push(operation);
        if self.closed {
            return Err(io::Error::from_raw_os_error(libc::EBADF));
        }
        if let Some(pos) = self
            .error_injections
            .iter()
            .position(|e| e.operation == operation)
        {
            let injection = &mut self.error_injections[pos];
            if injection.skip > 0 {
                injection.skip -= 1;
                return Ok(());
            }
            let injection = self.error_injections.remove(pos);
            return Err(io::Error::from_raw_os_error(injection.errno));
        }
        Ok(())
    }

    fn frame_size(&self) -> usize {
        let bpp = PixelFormat::from_fourcc(self.format.fourcc).map_or(2, |f| f.bytes_per_pixel());
        self.format.width as usize * self.format.height as usize * bpp
    }
}

fn einval() -> io::Error {
    io::Error::from_raw_os_error(libc::EINVAL)
}

fn eagain() -> io::Error {
    io::Error::from_raw_os_error(libc::EAGAIN)
}

impl CaptureDevice for MockDevice {
    fn raw_fd(&self) -> RawFd {
        self.wakeup.rx.as_raw_fd()
    }

    fn query_capabilities(&self) -> io::Result<Capabilities> {
        let mut state = self.state.lock();
        state.enter("query_capabilities")?;
        Ok(state.capabilities.clone())
    }

    fn reset_crop(&self) -> io::Result<()> {
        let mut state = self.state.lock();
        state.enter("reset_crop")?;
        state.crop_reset = true;
        Ok(())
    }

    fn set_input(&self, index: u32) -> io::Result<()> {
        let mut state = self.state.lock();
        state.enter("set_input")?;
        state.input = Some(index);
        Ok(())
    }

    fn set_standard(&self, standard: VideoStandard) -> io::Result<()> {
        let mut state = self.state.lock();
        state.enter("set_standard")?;
        state.standard = Some(standard);
        Ok(())
    }

    fn get_format(&self) -> io::Result<DeviceFormat> {
        let mut state = self.state.lock();
        state.enter("get_format")?;
        Ok(state.format)
    }

    fn set_format(&self, format: &DeviceFormat) -> io::Result<()> {
        let mut state = self.state.lock();
        state.enter("set_format")?;
        let (width, height) = match state.max_size {
            Some((max_w, max_h)) => (format.width.min(max_w), format.height.min(max_h)),
            None => (format.width, format.height),
        };
        state.format.width = width;
        state.format.height = height;
        if state.supported.is_empty() || state.supported.contains(&format.fourcc) {
            state.format.fourcc = format.fourcc;
        }
        Ok(())
    }

    fn request_buffers(&self, memory: BufferMemory, count: u32) -> io::Result<u32> {
        let mut state = self.state.lock();
        state.enter("request_buffers")?;
        let supported = match memory {
            BufferMemory::Mmap => state.mmap_supported,
            BufferMemory::Userptr => state.userptr_supported,
        };
        if !supported || state.streaming {
            return Err(einval());
        }
        if count == 0 {
            state.requested = 0;
            state.memory = None;
            state.queued.clear();
            return Ok(0);
        }
        let granted = match memory {
            BufferMemory::Mmap => state.buffer_grant.unwrap_or(count),
            BufferMemory::Userptr => count,
        };
        state.requested = granted;
        state.memory = Some(memory);
        state.mapped = (0..granted).map(|_| None).collect();
        Ok(granted)
    }

    fn query_buffer(&self, index: u32) -> io::Result<BufferInfo> {
        let mut state = self.state.lock();
        state.enter("query_buffer")?;
        if index >= state.requested || state.memory != Some(BufferMemory::Mmap) {
            return Err(einval());
        }
        Ok(BufferInfo {
            index,
            length: state.buffer_length.unwrap_or_else(|| state.frame_size()),
            offset: index * MOCK_PAGE_SIZE,
        })
    }

    fn map_buffer(&self, info: &BufferInfo) -> io::Result<MappedRegion> {
        let mut state = self.state.lock();
        state.enter("map_buffer")?;
        let slot = state
            .mapped
            .get_mut(info.index as usize)
            .ok_or_else(einval)?;
        let mut memory = vec![0u8; info.length].into_boxed_slice();
        let ptr = NonNull::new(memory.as_mut_ptr()).ok_or_else(einval)?;
        *slot = Some(memory);
        // SAFETY: the boxed slice lives in `mapped` until `unmap_buffer`.
        Ok(unsafe { MappedRegion::from_raw_parts(ptr, info.length) })
    }

    fn unmap_buffer(&self, region: MappedRegion) -> io::Result<()> {
        let mut state = self.state.lock();
        state.enter("unmap_buffer")?;
        let slot = state
            .mapped
            .iter_mut()
            .find(|m| m.as_ref().is_some_and(|b| b.as_ptr() == region.as_ptr() as *const u8))
            .ok_or_else(einval)?;
        *slot = None;
        Ok(())
    }

    fn queue_buffer(&self, buffer: QueueBuffer) -> io::Result<()> {
        let mut state = self.state.lock();
        state.enter("queue_buffer")?;
        let memory_matches = matches!(
            (state.memory, buffer),
            (Some(BufferMemory::Mmap), QueueBuffer::Mmap { .. })
                | (Some(BufferMemory::Userptr), QueueBuffer::Userptr { .. })
        );
        let duplicate = state.queued.iter().any(|q| q.index() == buffer.index());
        if !memory_matches || buffer.index() >= state.requested || duplicate {
            return Err(einval());
        }
        state.queued.push_back(buffer);
        Ok(())
    }

    fn dequeue_buffer(&self, memory: BufferMemory) -> io::Result<DequeuedBuffer> {
        let mut state = self.state.lock();
        state.enter("dequeue_buffer")?;
        if !state.streaming || state.memory != Some(memory) {
            return Err(einval());
        }
        if state.frames.is_empty() || state.queued.is_empty() {
            drop(state);
            self.drain_wakeup();
            return Err(eagain());
        }
        let (Some(frame), Some(buffer)) = (state.frames.pop_front(), state.queued.pop_front())
        else {
            return Err(eagain());
        };

        match buffer {
            QueueBuffer::Mmap { index } => {
                let region = state.mapped[index as usize]
                    .as_mut()
                    .ok_or_else(einval)?;
                let n = frame.len().min(region.len());
                region[..n].copy_from_slice(&frame[..n]);
                Ok(DequeuedBuffer {
                    index,
                    bytes_used: n,
                    userptr: 0,
                    length: region.len(),
                })
            }
            QueueBuffer::Userptr { index, ptr, length } => {
                let n = frame.len().min(length);
                // SAFETY: the pool guarantees `ptr..ptr+length` stays
                // allocated while the buffer is queued.
                unsafe { std::ptr::copy_nonoverlapping(frame.as_ptr(), ptr as *mut u8, n) };
                Ok(DequeuedBuffer {
                    index,
                    bytes_used: n,
                    userptr: ptr,
                    length,
                })
            }
        }
    }

    fn stream_on(&self) -> io::Result<()> {
        let mut state = self.state.lock();
        state.enter("stream_on")?;
        if state.memory.is_none() {
            return Err(einval());
        }
        state.streaming = true;
        Ok(())
    }

    fn stream_off(&self) -> io::Result<()> {
        let mut state = self.state.lock();
        state.enter("stream_off")?;
        state.streaming = false;
        state.queued.clear();
        Ok(())
    }

    fn read(&self, buf: &mut [u8]) -> io::Result<usize> {
        let mut state = self.state.lock();
        state.enter("read")?;
        match state.frames.pop_front() {
            Some(frame) => {
                let n = frame.len().min(buf.len());
                buf[..n].copy_from_slice(&frame[..n]);
                Ok(n)
            }
            None => {
                drop(state);
                self.drain_wakeup();
                Err(eagain())
            }
        }
    }

    fn close(&mut self) {
        let mut state = self.state.lock();
        state.calls.push("close");
        state.closed = true;
        state.streaming = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_mock_reports_4x4_uyvy() {
        let mock = MockDevice::new();
        let format = mock.get_format().unwrap();
        assert_eq!((format.width, format.height), (4, 4));
        assert_eq!(format.fourcc, *b"UYVY");
    }

    #[test]
    fn set_format_clamps_and_ignores_unsupported_fourcc() {
        let mock = MockDevice::new()
            .with_max_size(640, 480)
            .with_supported_fourccs(&[*b"UYVY", *b"YUYV"]);
        mock.set_format(&DeviceFormat {
            width: 1920,
            height: 1080,
            fourcc: *b"RGB4",
        })
        .unwrap();
        let format = mock.get_format().unwrap();
        assert_eq!((format.width, format.height), (640, 480));
        assert_eq!(format.fourcc, *b"UYVY");
    }

    #[test]
    fn error_injection_fires_once() {
        let mock = MockDevice::new().with_error("query_capabilities", libc::ENOTTY);
        let err = mock.query_capabilities().unwrap_err();
        assert_eq!(err.raw_os_error(), Some(libc::ENOTTY));
        assert!(mock.query_capabilities().is_ok());
    }

    #[test]
    fn mmap_frames_land_in_mapped_region() {
        let mock = MockDevice::new();
        assert_eq!(mock.request_buffers(BufferMemory::Mmap, 2).unwrap(), 2);
        let info = mock.query_buffer(1).unwrap();
        assert_eq!(info.length, 32);
        let region = mock.map_buffer(&info).unwrap();
        mock.queue_buffer(QueueBuffer::Mmap { index: 1 }).unwrap();
        mock.stream_on().unwrap();
        mock.push_frame(vec![7u8; 32]);

        let buf = mock.dequeue_buffer(BufferMemory::Mmap).unwrap();
        assert_eq!(buf.index, 1);
        assert_eq!(buf.bytes_used, 32);
        assert!(region.as_slice().iter().all(|&b| b == 7));
        mock.unmap_buffer(region).unwrap();
        assert_eq!(mock.mapped_count(), 0);
    }

    #[test]
    fn dequeue_without_frames_is_eagain() {
        let mock = MockDevice::new();
        mock.request_buffers(BufferMemory::Mmap, 2).unwrap();
        mock.queue_buffer(QueueBuffer::Mmap { index: 0 }).unwrap();
        mock.stream_on().unwrap();
        let err = mock.dequeue_buffer(BufferMemory::Mmap).unwrap_err();
        assert_eq!(err.raw_os_error(), Some(libc::EAGAIN));
    }

    #[test]
    fn double_queue_is_rejected() {
        let mock = MockDevice::new();
        mock.request_buffers(BufferMemory::Mmap, 2).unwrap();
        mock.queue_buffer(QueueBuffer::Mmap { index: 0 }).unwrap();
        assert!(mock.queue_buffer(QueueBuffer::Mmap { index: 0 }).is_err());
        assert!(mock.queue_buffer(QueueBuffer::Mmap { index: 5 }).is_err());
    }

    #[test]
    fn delayed_injection_fires_after_skipped_calls() {
        let mock = MockDevice::new();
        mock.request_buffers(BufferMemory::Mmap, 3).unwrap();
        mock.inject_error_after("queue_buffer", 1, libc::EINVAL);
        mock.queue_buffer(QueueBuffer::Mmap { index: 0 }).unwrap();
        let err = mock.queue_buffer(QueueBuffer::Mmap { index: 1 }).unwrap_err();
        assert_eq!(err.raw_os_error(), Some(libc::EINVAL));
        mock.queue_buffer(QueueBuffer::Mmap { index: 1 }).unwrap();
        assert_eq!(mock.queued_count(), 2);
    }

    #[test]
    fn stream_off_drops_queued_buffers() {
        let mock = MockDevice::new();
        mock.request_buffers(BufferMemory::Mmap, 2).unwrap();
        mock.queue_buffer(QueueBuffer::Mmap { index: 0 }).unwrap();
        mock.queue_buffer(QueueBuffer::Mmap { index: 1 }).unwrap();
        mock.stream_on().unwrap();
        mock.stream_off().unwrap();
        assert_eq!(mock.queued_count(), 0);
        assert!(!mock.is_streaming());
    }

    #[test]
    fn read_copies_frame_and_reports_eagain_when_empty() {
        let mock = MockDevice::new();
        mock.push_frame(vec![1, 2, 3]);
        let mut buf = [0u8; 8];
        assert_eq!(mock.read(&mut buf).unwrap(), 3);
        assert_eq!(&buf[..3], &[1, 2, 3]);
        let err = mock.read(&mut buf).unwrap_err();
        assert_eq!(err.raw_os_error(), Some(libc::EAGAIN));
    }

    #[test]
    fn closed_mock_fails_with_ebadf() {
        let mut mock = MockDevice::new();
        mock.close();
        assert!(mock.is_closed());
        let err = mock.get_format().unwrap_err();
        assert_eq!(err.raw_os_error(), Some(libc::EBADF));
    }

    #[test]
    fn clones_share_state() {
        let mock = MockDevice::new();
        let handle = mock.clone();
        handle.push_frame(vec![0; 4]);
        assert_eq!(mock.pending_frames(), 1);
    }

    #[test]
    fn mock_is_send() {
        fn assert_send<T: Send>() {}
        assert_send::<MockDevice>();
    }
}
