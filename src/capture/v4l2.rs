//! Real V4L2 device backed by the `v4l` crate.
//!
//! High-level calls (capabilities, format) go through `v4l::Device`;
//! buffer management uses raw ioctls on the device descriptor because the
//! session owns the buffer arena itself.

use std::fs;
use std::io;
use std::mem;
use std::os::raw::{c_int, c_ulong, c_void};
use std::os::unix::fs::FileTypeExt;
use std::os::unix::io::RawFd;
use std::path::{Path, PathBuf};
use std::ptr::{self, NonNull};

use tracing::{debug, info};
use v4l::buffer::Type;
use v4l::capability::Flags;
use v4l::memory::Memory;
use v4l::v4l2::{self, vidioc};
use v4l::v4l_sys::{v4l2_buffer, v4l2_crop, v4l2_cropcap, v4l2_requestbuffers};
use v4l::video::Capture;
use v4l::{Device, FourCC};

use super::device::CaptureDevice;
use super::error::{CaptureError, Result};
use super::types::{
    BufferInfo, BufferMemory, Capabilities, DequeuedBuffer, DeviceFormat, MappedRegion,
    QueueBuffer, VideoStandard,
};

/// An opened `/dev/videoN` capture node.
pub struct V4l2Device {
    path: PathBuf,
    device: Option<Device>,
}

impl V4l2Device {
    /// Open `path` non-blocking and read-write.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let name = path.display().to_string();
        let metadata = fs::metadata(&path).map_err(|_| CaptureError::DeviceNotFound(name.clone()))?;
        if !metadata.file_type().is_char_device() {
            return Err(CaptureError::NotACaptureDevice(name));
        }

        let device = Device::with_path(&path).map_err(|e| CaptureError::io("open", e))?;
        set_nonblocking(device.handle().fd()).map_err(|e| CaptureError::io("fcntl", e))?;
        info!("opened capture device {name}");
        Ok(Self {
            path,
            device: Some(device),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn device(&self) -> io::Result<&Device> {
        self.device.as_ref().ok_or_else(ebadf)
    }

    fn fd(&self) -> io::Result<RawFd> {
        Ok(self.device()?.handle().fd())
    }

    /// ioctl with EINTR retry.
    fn xioctl<T>(&self, request: vidioc::_IOC_TYPE, arg: &mut T) -> io::Result<()> {
        let fd = self.fd()?;
        loop {
            // SAFETY: `arg` is the struct the request expects and outlives the call.
            match unsafe { v4l2::ioctl(fd, request, arg as *mut T as *mut c_void) } {
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                result => return result,
            }
        }
    }
}

fn ebadf() -> io::Error {
    io::Error::from_raw_os_error(libc::EBADF)
}

fn set_nonblocking(fd: RawFd) -> io::Result<()> {
    // SAFETY: plain fcntl on a descriptor we own.
    let flags = unsafe { libc::fcntl(fd, libc::F_GETFL) };
    if flags < 0 {
        return Err(io::Error::last_os_error());
    }
    if flags & libc::O_NONBLOCK != 0 {
        return Ok(());
    }
    // SAFETY: as above.
    if unsafe { libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) } < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

fn memory_code(memory: BufferMemory) -> u32 {
    match memory {
        BufferMemory::Mmap => Memory::Mmap as u32,
        BufferMemory::Userptr => Memory::UserPtr as u32,
    }
}

fn capture_type() -> u32 {
    Type::VideoCapture as u32
}

fn capabilities_from_flags(driver: String, card: String, flags: Flags) -> Capabilities {
    Capabilities {
        driver,
        card,
        video_capture: flags.contains(Flags::VIDEO_CAPTURE),
        streaming: flags.contains(Flags::STREAMING),
        read_write: flags.contains(Flags::READ_WRITE),
    }
}

impl CaptureDevice for V4l2Device {
    fn raw_fd(&self) -> RawFd {
        self.fd().unwrap_or(-1)
    }

    fn query_capabilities(&self) -> io::Result<Capabilities> {
        let caps = self.device()?.query_caps()?;
        Ok(capabilities_from_flags(
            caps.driver,
            caps.card,
            caps.capabilities,
        ))
    }

    fn reset_crop(&self) -> io::Result<()> {
        // SAFETY: zeroed is a valid bit pattern for these C structs.
        let mut cropcap: v4l2_cropcap = unsafe { mem::zeroed() };
        cropcap.type_ = capture_type();
        self.xioctl(vidioc::VIDIOC_CROPCAP, &mut cropcap)?;

        // SAFETY: as above.
        let mut crop: v4l2_crop = unsafe { mem::zeroed() };
        crop.type_ = capture_type();
        crop.c = cropcap.defrect;
        self.xioctl(vidioc::VIDIOC_S_CROP, &mut crop)
    }

    fn set_input(&self, index: u32) -> io::Result<()> {
        let mut index = index as c_int;
        self.xioctl(vidioc::VIDIOC_S_INPUT, &mut index)
    }

    fn set_standard(&self, standard: VideoStandard) -> io::Result<()> {
        let mut id: u64 = standard.std_id();
        self.xioctl(vidioc::VIDIOC_S_STD, &mut id)
    }

    fn get_format(&self) -> io::Result<DeviceFormat> {
        let format = self.device()?.format()?;
        Ok(DeviceFormat {
            width: format.width,
            height: format.height,
            fourcc: format.fourcc.repr,
        })
    }

    fn set_format(&self, format: &DeviceFormat) -> io::Result<()> {
        let device = self.device()?;
        let mut current = device.format()?;
        current.width = format.width;
        current.height = format.height;
        current.fourcc = FourCC::new(&format.fourcc);
        device.set_format(&current)?;
        Ok(())
    }

    fn request_buffers(&self, memory: BufferMemory, count: u32) -> io::Result<u32> {
        // SAFETY: zeroed is a valid bit pattern.
        let mut request: v4l2_requestbuffers = unsafe { mem::zeroed() };
        request.count = count;
        request.type_ = capture_type();
        request.memory = memory_code(memory);
        self.xioctl(vidioc::VIDIOC_REQBUFS, &mut request)?;
        Ok(request.count)
    }

    fn query_buffer(&self, index: u32) -> io::Result<BufferInfo> {
        // SAFETY: zeroed is a valid bit pattern.
        let mut buf: v4l2_buffer = unsafe { mem::zeroed() };
        buf.type_ = capture_type();
        buf.memory = Memory::Mmap as u32;
        buf.index = index;
        self.xioctl(vidioc::VIDIOC_QUERYBUF, &mut buf)?;
        Ok(BufferInfo {
            index,
            length: buf.length as usize,
            // SAFETY: QUERYBUF on an mmap buffer fills `m.offset`.
            offset: unsafe { buf.m.offset },
        })
    }

    fn map_buffer(&self, info: &BufferInfo) -> io::Result<MappedRegion> {
        let fd = self.fd()?;
        // SAFETY: length and offset come from VIDIOC_QUERYBUF for this fd.
        let ptr = unsafe {
            v4l2::mmap(
                ptr::null_mut(),
                info.length,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED,
                fd,
                info.offset as libc::off_t,
            )?
        };
        let ptr = NonNull::new(ptr as *mut u8).ok_or_else(|| io::Error::from_raw_os_error(libc::ENOMEM))?;
        // SAFETY: the mapping stays valid until `unmap_buffer`.
        Ok(unsafe { MappedRegion::from_raw_parts(ptr, info.length) })
    }

    fn unmap_buffer(&self, region: MappedRegion) -> io::Result<()> {
        // SAFETY: the region was produced by `map_buffer` and is unmapped once.
        unsafe { v4l2::munmap(region.as_ptr() as *mut c_void, region.len()) }
    }

    fn queue_buffer(&self, buffer: QueueBuffer) -> io::Result<()> {
        // SAFETY: zeroed is a valid bit pattern.
        let mut buf: v4l2_buffer = unsafe { mem::zeroed() };
        buf.type_ = capture_type();
        buf.index = buffer.index();
        match buffer {
            QueueBuffer::Mmap { .. } => buf.memory = Memory::Mmap as u32,
            QueueBuffer::Userptr { ptr, length, .. } => {
                buf.memory = Memory::UserPtr as u32;
                buf.m.userptr = ptr as c_ulong;
                buf.length = length as u32;
            }
        }
        self.xioctl(vidioc::VIDIOC_QBUF, &mut buf)
    }

    fn dequeue_buffer(&self, memory: BufferMemory) -> io::Result<DequeuedBuffer> {
        // SAFETY: zeroed is a valid bit pattern.
        let mut buf: v4l2_buffer = unsafe { mem::zeroed() };
        buf.type_ = capture_type();
        buf.memory = memory_code(memory);
        self.xioctl(vidioc::VIDIOC_DQBUF, &mut buf)?;
        let userptr = match memory {
            // SAFETY: DQBUF on a user-pointer queue fills `m.userptr`.
            BufferMemory::Userptr => unsafe { buf.m.userptr } as usize,
            BufferMemory::Mmap => 0,
        };
        Ok(DequeuedBuffer {
            index: buf.index,
            bytes_used: buf.bytesused as usize,
            userptr,
            length: buf.length as usize,
        })
    }

    fn stream_on(&self) -> io::Result<()> {
        let mut typ = capture_type() as c_int;
        self.xioctl(vidioc::VIDIOC_STREAMON, &mut typ)
    }

    fn stream_off(&self) -> io::Result<()> {
        let mut typ = capture_type() as c_int;
        self.xioctl(vidioc::VIDIOC_STREAMOFF, &mut typ)
    }

    fn read(&self, buf: &mut [u8]) -> io::Result<usize> {
        let fd = self.fd()?;
        loop {
            // SAFETY: `buf` is a valid writable region of `buf.len()` bytes.
            let n = unsafe { libc::read(fd, buf.as_mut_ptr() as *mut c_void, buf.len()) };
            if n >= 0 {
                return Ok(n as usize);
            }
            let err = io::Error::last_os_error();
            if err.kind() != io::ErrorKind::Interrupted {
                return Err(err);
            }
        }
    }

    fn close(&mut self) {
        if self.device.take().is_some() {
            debug!("closed capture device {}", self.path.display());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_path_is_not_found() {
        let err = V4l2Device::open("/dev/does-not-exist-video").err().unwrap();
        assert!(matches!(err, CaptureError::DeviceNotFound(_)));
    }

    #[test]
    fn regular_file_is_not_a_capture_device() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let err = V4l2Device::open(file.path()).err().unwrap();
        assert!(matches!(err, CaptureError::NotACaptureDevice(_)));
    }

    #[test]
    fn flags_map_to_capabilities() {
        let caps = capabilities_from_flags(
            "uvcvideo".to_string(),
            "USB grabber".to_string(),
            Flags::VIDEO_CAPTURE | Flags::STREAMING,
        );
        assert!(caps.video_capture);
        assert!(caps.streaming);
        assert!(!caps.read_write);
    }

    #[test]
    fn memory_codes_match_v4l2() {
        assert_eq!(memory_code(BufferMemory::Mmap), 1);
        assert_eq!(memory_code(BufferMemory::Userptr), 2);
        assert_eq!(capture_type(), 1);
    }

    #[test]
    fn v4l2_device_is_send() {
        fn assert_send<T: Send>() {}
        assert_send::<V4l2Device>();
    }
}
