//! An opened, negotiated capture device and its buffer pool.

use std::io;
use std::os::unix::io::RawFd;

use tracing::{debug, info, warn};

use super::buffers::{self, BufferPool, Dequeued};
use super::device::CaptureDevice;
use super::error::{CaptureError, Result};
use super::types::{
    fourcc_str, BufferState, Capabilities, IoMethod, NegotiatedFormat, PixelFormat,
};
use crate::settings::types::CaptureConfig;

/// A filled buffer lent to the decoder for the duration of one call.
#[derive(Debug, Clone, Copy)]
pub struct FilledFrame<'a> {
    pub index: usize,
    /// The bytes the device reported as used.
    pub bytes: &'a [u8],
}

/// Owns the device, the negotiated format and the buffer pool.
pub struct DeviceSession<D: CaptureDevice> {
    device: D,
    name: String,
    capabilities: Capabilities,
    format: NegotiatedFormat,
    method: IoMethod,
    pool: Option<Box<dyn BufferPool>>,
    streaming: bool,
    closed: bool,
}

#[cfg(target_os = "linux")]
impl DeviceSession<super::v4l2::V4l2Device> {
    /// Open the device named in `config` and negotiate.
    pub fn open(config: &CaptureConfig) -> Result<Self> {
        let device = super::v4l2::V4l2Device::open(&config.device)?;
        Self::with_device(device, config)
    }
}

impl<D: CaptureDevice> DeviceSession<D> {
    /// Negotiate on an already opened device.
    ///
    /// On failure the device is closed before the error is returned.
    pub fn with_device(mut device: D, config: &CaptureConfig) -> Result<Self> {
        let name = config.device.display().to_string();
        let negotiated = negotiate(&device, config, &name).and_then(|(capabilities, format)| {
            let pool = buffers::allocate(config.io_method, &device, &name, format.frame_size)?;
            Ok((capabilities, format, pool))
        });

        match negotiated {
            Ok((capabilities, format, pool)) => {
                info!(
                    "{name}: {} {}x{} via {} i/o, {} buffers",
                    format.pixel_format,
                    format.width,
                    format.height,
                    config.io_method,
                    pool.states().len()
                );
                Ok(Self {
                    device,
                    name,
                    capabilities,
                    format,
                    method: config.io_method,
                    pool: Some(pool),
                    streaming: false,
                    closed: false,
                })
            }
            Err(e) => {
                device.close();
                Err(e)
            }
        }
    }

    pub fn format(&self) -> NegotiatedFormat {
        self.format
    }

    pub fn io_method(&self) -> IoMethod {
        self.method
    }

    pub fn capabilities(&self) -> &Capabilities {
        &self.capabilities
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn device(&self) -> &D {
        &self.device
    }

    pub fn raw_fd(&self) -> RawFd {
        self.device.raw_fd()
    }

    pub fn is_streaming(&self) -> bool {
        self.streaming
    }

    /// Ownership state of every buffer in the pool.
    pub fn buffer_states(&self) -> Vec<BufferState> {
        self.pool
            .as_ref()
            .map(|p| p.states().to_vec())
            .unwrap_or_default()
    }

    /// Enqueue every buffer and start streaming. No-op when streaming.
    pub fn start_capturing(&mut self) -> Result<()> {
        if self.streaming {
            return Ok(());
        }
        let pool = self.pool.as_mut().ok_or_else(closed)?;
        let started = pool.enqueue_all(&self.device).and_then(|()| {
            if self.method == IoMethod::Read {
                return Ok(());
            }
            self.device
                .stream_on()
                .map_err(|e| CaptureError::io("VIDIOC_STREAMON", e))
        });
        if let Err(e) = started {
            // STREAMOFF is what makes the driver drop buffers queued so far.
            if self.method != IoMethod::Read {
                if let Err(off) = self.device.stream_off() {
                    debug!("stream off after failed start: {off}");
                }
            }
            pool.stream_stopped();
            return Err(e);
        }
        self.streaming = true;
        info!("{}: streaming started", self.name);
        Ok(())
    }

    /// Stop streaming; every buffer returns to the application.
    pub fn stop_capturing(&mut self) -> Result<()> {
        if !self.streaming {
            return Ok(());
        }
        if self.method != IoMethod::Read {
            self.device
                .stream_off()
                .map_err(|e| CaptureError::io("VIDIOC_STREAMOFF", e))?;
        }
        if let Some(pool) = self.pool.as_mut() {
            pool.stream_stopped();
        }
        self.streaming = false;
        info!("{}: streaming stopped", self.name);
        Ok(())
    }

    /// Take the next filled buffer, lend it to `decode`, then requeue it.
    ///
    /// Returns `Ok(None)` when nothing was ready. The buffer is requeued
    /// whatever `decode` does with it.
    pub fn next_frame<R>(&mut self, decode: impl FnOnce(FilledFrame<'_>) -> R) -> Result<Option<R>> {
        let pool = self.pool.as_mut().ok_or_else(closed)?;
        let slot = match pool.dequeue(&self.device)? {
            Dequeued::Frame(slot) => slot,
            Dequeued::NotReady => return Ok(None),
        };
        let data = pool.data(slot.index);
        let output = decode(FilledFrame {
            index: slot.index,
            bytes: &data[..slot.bytes_used.min(data.len())],
        });
        pool.requeue(&self.device, slot.index)?;
        Ok(Some(output))
    }

    /// Stop streaming, release buffers and close the device.
    ///
    /// Safe to call more than once. Buffer release errors are returned
    /// after the device has been closed.
    pub fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        if let Err(e) = self.stop_capturing() {
            debug!("{}: stop before close failed: {e}", self.name);
            self.streaming = false;
        }
        let released = match self.pool.take() {
            Some(mut pool) => pool.release(&self.device),
            None => Ok(()),
        };
        self.device.close();
        self.closed = true;
        released
    }
}

impl<D: CaptureDevice> Drop for DeviceSession<D> {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!("{}: error closing device: {e}", self.name);
        }
    }
}

fn closed() -> CaptureError {
    CaptureError::io("session", io::Error::from_raw_os_error(libc::EBADF))
}

/// Query, configure and re-read the device, in the order drivers expect.
fn negotiate(
    device: &dyn CaptureDevice,
    config: &CaptureConfig,
    name: &str,
) -> Result<(Capabilities, NegotiatedFormat)> {
    let capabilities = device.query_capabilities().map_err(|e| {
        if e.raw_os_error() == Some(libc::EINVAL) {
            CaptureError::NotACaptureDevice(name.to_string())
        } else {
            CaptureError::io("VIDIOC_QUERYCAP", e)
        }
    })?;
    if !capabilities.video_capture {
        return Err(CaptureError::NotACaptureDevice(name.to_string()));
    }
    if !capabilities.supports(config.io_method) {
        return Err(CaptureError::UnsupportedIoMode {
            path: name.to_string(),
            method: config.io_method,
        });
    }
    debug!("{name}: {} ({})", capabilities.card, capabilities.driver);

    if let Err(e) = device.reset_crop() {
        debug!("{name}: crop reset not supported: {e}");
    }
    if let Some(input) = config.input {
        device
            .set_input(input)
            .map_err(|e| CaptureError::io("VIDIOC_S_INPUT", e))?;
    }
    if let Some(standard) = config.standard {
        device
            .set_standard(standard)
            .map_err(|e| CaptureError::io("VIDIOC_S_STD", e))?;
    }

    let mut requested = device
        .get_format()
        .map_err(|e| CaptureError::io("VIDIOC_G_FMT", e))?;
    if let Some(pixel_format) = config.pixel_format {
        requested.fourcc = pixel_format.fourcc();
    }
    if let Some(width) = config.width {
        requested.width = width;
    }
    if let Some(height) = config.height {
        requested.height = height;
    }
    device
        .set_format(&requested)
        .map_err(|e| CaptureError::io("VIDIOC_S_FMT", e))?;
    let applied = device
        .get_format()
        .map_err(|e| CaptureError::io("VIDIOC_G_FMT", e))?;

    let pixel_format = PixelFormat::from_fourcc(applied.fourcc)
        .ok_or_else(|| CaptureError::UnsupportedFormat(fourcc_str(applied.fourcc)))?;
    if applied.width == 0 || applied.height == 0 {
        return Err(CaptureError::UnsupportedFormat(format!(
            "{pixel_format} {}x{}",
            applied.width, applied.height
        )));
    }
    Ok((
        capabilities,
        NegotiatedFormat::new(pixel_format, applied.width, applied.height),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::mock::MockDevice;
    use crate::capture::types::{DeviceFormat, VideoStandard};

    fn config(method: IoMethod) -> CaptureConfig {
        CaptureConfig {
            device: "/dev/video-mock".into(),
            io_method: method,
            ..CaptureConfig::default()
        }
    }

    fn assert_pool_invariant(session: &DeviceSession<MockDevice>) {
        let states = session.buffer_states();
        let owned = states
            .iter()
            .filter(|s| matches!(s, BufferState::Queued | BufferState::Filled))
            .count();
        assert_eq!(owned, states.len());
    }

    #[test]
    fn negotiation_follows_driver_order() {
        let mock = MockDevice::new();
        let cfg = CaptureConfig {
            input: Some(1),
            standard: Some(VideoStandard::Ntsc),
            ..config(IoMethod::Mmap)
        };
        let _session = DeviceSession::with_device(mock.clone(), &cfg).unwrap();

        let calls = mock.calls();
        let setup: Vec<_> = calls
            .iter()
            .copied()
            .take_while(|c| *c != "request_buffers")
            .collect();
        assert_eq!(
            setup,
            [
                "query_capabilities",
                "reset_crop",
                "set_input",
                "set_standard",
                "get_format",
                "set_format",
                "get_format",
            ]
        );
        assert_eq!(mock.input(), Some(1));
        assert_eq!(mock.standard(), Some(VideoStandard::Ntsc));
        assert!(mock.crop_was_reset());
    }

    #[test]
    fn unchanged_settings_are_not_pushed() {
        let mock = MockDevice::new();
        let _session = DeviceSession::with_device(mock.clone(), &config(IoMethod::Read)).unwrap();
        let calls = mock.calls();
        assert!(!calls.contains(&"set_input"));
        assert!(!calls.contains(&"set_standard"));
    }

    #[test]
    fn negotiated_format_comes_from_refetch() {
        let mock = MockDevice::new().with_max_size(320, 240);
        let cfg = CaptureConfig {
            width: Some(1920),
            height: Some(1080),
            pixel_format: Some(PixelFormat::Yuyv),
            ..config(IoMethod::Mmap)
        };
        let session = DeviceSession::with_device(mock, &cfg).unwrap();
        let format = session.format();
        assert_eq!((format.width, format.height), (320, 240));
        assert_eq!(format.pixel_format, PixelFormat::Yuyv);
        assert_eq!(format.frame_size, 320 * 240 * 2);
    }

    #[test]
    fn crop_reset_failure_is_ignored() {
        let mock = MockDevice::new().with_error("reset_crop", libc::ENOTTY);
        assert!(DeviceSession::with_device(mock, &config(IoMethod::Mmap)).is_ok());
    }

    #[test]
    fn unsupported_pixel_format_is_rejected_and_device_closed() {
        let mock = MockDevice::new().with_raw_format(DeviceFormat {
            width: 640,
            height: 480,
            fourcc: *b"MJPG",
        });
        let err = DeviceSession::with_device(mock.clone(), &config(IoMethod::Mmap))
            .err()
            .unwrap();
        assert!(matches!(err, CaptureError::UnsupportedFormat(ref f) if f == "MJPG"));
        assert!(mock.is_closed());
    }

    #[test]
    fn capability_checks() {
        let no_capture = MockDevice::new().with_capabilities(Capabilities {
            streaming: true,
            ..Capabilities::default()
        });
        assert!(matches!(
            DeviceSession::with_device(no_capture, &config(IoMethod::Mmap)).err(),
            Some(CaptureError::NotACaptureDevice(_))
        ));

        let no_streaming = || {
            MockDevice::new().with_capabilities(Capabilities {
                video_capture: true,
                read_write: true,
                ..Capabilities::default()
            })
        };
        assert!(matches!(
            DeviceSession::with_device(no_streaming(), &config(IoMethod::Userptr)).err(),
            Some(CaptureError::UnsupportedIoMode {
                method: IoMethod::Userptr,
                ..
            })
        ));
        // The failed open above closed its device; read mode needs a fresh one.
        assert!(DeviceSession::with_device(no_streaming(), &config(IoMethod::Read)).is_ok());

        let no_read = MockDevice::new().with_capabilities(Capabilities {
            video_capture: true,
            streaming: true,
            ..Capabilities::default()
        });
        assert!(DeviceSession::with_device(no_read, &config(IoMethod::Read)).is_err());
    }

    #[test]
    fn querycap_einval_means_not_a_capture_device() {
        let mock = MockDevice::new().with_error("query_capabilities", libc::EINVAL);
        assert!(matches!(
            DeviceSession::with_device(mock, &config(IoMethod::Mmap)).err(),
            Some(CaptureError::NotACaptureDevice(_))
        ));
    }

    #[test]
    fn streaming_keeps_every_buffer_owned() {
        for method in [IoMethod::Mmap, IoMethod::Userptr] {
            let mock = MockDevice::new();
            let mut session = DeviceSession::with_device(mock.clone(), &config(method)).unwrap();
            assert!(session.buffer_states().iter().all(|s| *s == BufferState::Free));

            session.start_capturing().unwrap();
            assert_pool_invariant(&session);
            assert!(mock.is_streaming());

            for i in 0..10u8 {
                mock.push_frame(vec![i; 32]);
                let seen = session
                    .next_frame(|frame| {
                        assert_eq!(frame.bytes.len(), 32);
                        frame.bytes[0]
                    })
                    .unwrap();
                assert_eq!(seen, Some(i));
                assert_pool_invariant(&session);
            }
            assert_eq!(mock.queued_count(), session.buffer_states().len());

            session.stop_capturing().unwrap();
            assert!(session.buffer_states().iter().all(|s| *s == BufferState::Free));
        }
    }

    #[test]
    fn next_frame_without_data_is_none() {
        let mock = MockDevice::new();
        let mut session = DeviceSession::with_device(mock, &config(IoMethod::Mmap)).unwrap();
        session.start_capturing().unwrap();
        assert_eq!(session.next_frame(|_| ()).unwrap(), None);
    }

    #[test]
    fn start_and_stop_are_idempotent() {
        let mock = MockDevice::new();
        let mut session = DeviceSession::with_device(mock.clone(), &config(IoMethod::Mmap)).unwrap();
        session.start_capturing().unwrap();
        session.start_capturing().unwrap();
        session.stop_capturing().unwrap();
        session.stop_capturing().unwrap();
        let stream_ons = mock.calls().iter().filter(|c| **c == "stream_on").count();
        assert_eq!(stream_ons, 1);
    }

    #[test]
    fn failed_stream_on_leaves_buffers_free() {
        let mock = MockDevice::new().with_error("stream_on", libc::EBUSY);
        let mut session = DeviceSession::with_device(mock, &config(IoMethod::Mmap)).unwrap();
        let err = session.start_capturing().unwrap_err();
        assert_eq!(err.errno(), Some(libc::EBUSY));
        assert!(!session.is_streaming());
        assert!(session.buffer_states().iter().all(|s| *s == BufferState::Free));
        session.start_capturing().unwrap();
    }

    #[test]
    fn failed_enqueue_releases_queued_buffers() {
        for method in [IoMethod::Mmap, IoMethod::Userptr] {
            let mock = MockDevice::new();
            let mut session = DeviceSession::with_device(mock.clone(), &config(method)).unwrap();
            mock.inject_error_after("queue_buffer", 2, libc::EINVAL);

            let err = session.start_capturing().unwrap_err();
            assert_eq!(err.errno(), Some(libc::EINVAL));
            assert!(!session.is_streaming());
            assert_eq!(mock.queued_count(), 0);
            assert!(session.buffer_states().iter().all(|s| *s == BufferState::Free));

            session.start_capturing().unwrap();
            assert_eq!(mock.queued_count(), session.buffer_states().len());
        }
    }

    #[test]
    fn read_mode_never_touches_stream_ioctls() {
        let mock = MockDevice::new();
        let mut session = DeviceSession::with_device(mock.clone(), &config(IoMethod::Read)).unwrap();
        session.start_capturing().unwrap();
        mock.push_frame(vec![3; 32]);
        assert_eq!(session.next_frame(|f| f.bytes.len()).unwrap(), Some(32));
        session.stop_capturing().unwrap();
        let calls = mock.calls();
        assert!(!calls.contains(&"stream_on"));
        assert!(!calls.contains(&"stream_off"));
    }

    #[test]
    fn close_is_idempotent_and_unmaps() {
        let mock = MockDevice::new();
        let mut session = DeviceSession::with_device(mock.clone(), &config(IoMethod::Mmap)).unwrap();
        session.start_capturing().unwrap();
        assert_eq!(mock.mapped_count(), 4);
        session.close().unwrap();
        session.close().unwrap();
        assert_eq!(mock.mapped_count(), 0);
        assert!(mock.is_closed());
        assert!(session.next_frame(|_| ()).is_err());
    }

    #[test]
    fn drop_closes_device() {
        let mock = MockDevice::new();
        {
            let _session = DeviceSession::with_device(mock.clone(), &config(IoMethod::Userptr)).unwrap();
        }
        assert!(mock.is_closed());
    }

    #[test]
    fn fatal_dequeue_error_propagates() {
        let mock = MockDevice::new();
        let mut session = DeviceSession::with_device(mock.clone(), &config(IoMethod::Mmap)).unwrap();
        session.start_capturing().unwrap();
        mock.inject_error("dequeue_buffer", libc::ENODEV);
        let err = session.next_frame(|_| ()).unwrap_err();
        assert_eq!(err.errno(), Some(libc::ENODEV));
    }
}
