//! Frame storage strategies.
//!
//! Each strategy owns a fixed arena of byte regions indexed `0..N` and
//! tracks the ownership of every slot explicitly with [`BufferState`].
//! The session holds exactly one pool, chosen when the device is opened.

use std::io;

use tracing::{debug, warn};

use super::device::{is_glitch, is_no_data, CaptureDevice};
use super::error::{CaptureError, Result};
use super::types::{BufferMemory, BufferState, IoMethod, MappedRegion, QueueBuffer};

/// Buffers asked for in mmap and userptr mode.
pub const REQUESTED_BUFFERS: u32 = 4;

/// Fewest mmap buffers that still allow capture and decode to overlap.
pub const MIN_MMAP_BUFFERS: u32 = 2;

/// A buffer lent to the decoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FilledSlot {
    pub index: usize,
    pub bytes_used: usize,
}

/// Outcome of asking a pool for the next filled buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dequeued {
    Frame(FilledSlot),
    /// Nothing ready (EAGAIN, or a tolerated EIO with no buffer attached).
    NotReady,
}

/// Capability set shared by the three strategies.
pub trait BufferPool: Send {
    fn method(&self) -> IoMethod;

    /// Hand every buffer to the device before streaming starts.
    fn enqueue_all(&mut self, device: &dyn CaptureDevice) -> Result<()>;

    /// Take the next filled buffer, if any.
    fn dequeue(&mut self, device: &dyn CaptureDevice) -> Result<Dequeued>;

    /// Contents of a slot.
    fn data(&self, index: usize) -> &[u8];

    /// Give a dequeued slot back to the device.
    fn requeue(&mut self, device: &dyn CaptureDevice, index: usize) -> Result<()>;

    /// Streaming stopped: the device dropped every queued buffer.
    fn stream_stopped(&mut self);

    /// Free, unmap or release all storage.
    fn release(&mut self, device: &dyn CaptureDevice) -> Result<()>;

    fn states(&self) -> &[BufferState];
}

/// Create the pool for `method`.
pub fn allocate(
    method: IoMethod,
    device: &dyn CaptureDevice,
    device_name: &str,
    frame_size: usize,
) -> Result<Box<dyn BufferPool>> {
    Ok(match method {
        IoMethod::Read => Box::new(ReadPool::new(frame_size)),
        IoMethod::Mmap => Box::new(MmapPool::allocate(device, device_name)?),
        IoMethod::Userptr => Box::new(UserptrPool::allocate(device, device_name, frame_size)?),
    })
}

fn request_error(device_name: &str, method: IoMethod, err: io::Error) -> CaptureError {
    if err.raw_os_error() == Some(libc::EINVAL) {
        CaptureError::UnsupportedIoMode {
            path: device_name.to_string(),
            method,
        }
    } else {
        CaptureError::io("VIDIOC_REQBUFS", err)
    }
}

fn mark_filled(states: &mut [BufferState], index: usize) -> Result<()> {
    match states.get_mut(index) {
        Some(state) => {
            *state = BufferState::Filled;
            Ok(())
        }
        None => Err(CaptureError::io(
            "VIDIOC_DQBUF",
            io::Error::new(
                io::ErrorKind::InvalidData,
                format!("device returned unknown buffer {index}"),
            ),
        )),
    }
}

/// Classify a failed DQBUF into "no frame" or a fatal error.
/// EIO is skipped with every slot left as it was. A driver that dequeued a
/// buffer despite the error keeps it out of rotation until the next
/// STREAMOFF, which returns all slots to the application.
fn dequeue_error(err: io::Error, states: &[BufferState]) -> Result<Dequeued> {
    if is_no_data(&err) {
        return Ok(Dequeued::NotReady);
    }
    if is_glitch(&err) {
        let queued = states.iter().filter(|s| **s == BufferState::Queued).count();
        warn!(
            "transient I/O error while dequeuing, skipping wakeup ({queued} of {} buffers assumed queued)",
            states.len()
        );
        return Ok(Dequeued::NotReady);
    }
    Err(CaptureError::io("VIDIOC_DQBUF", err))
}

/// Single heap buffer filled with `read()`.
pub struct ReadPool {
    buffer: Vec<u8>,
    states: [BufferState; 1],
}

impl ReadPool {
    pub fn new(frame_size: usize) -> Self {
        Self {
            buffer: vec![0; frame_size],
            states: [BufferState::Free],
        }
    }
}

impl BufferPool for ReadPool {
    fn method(&self) -> IoMethod {
        IoMethod::Read
    }

    fn enqueue_all(&mut self, _device: &dyn CaptureDevice) -> Result<()> {
        self.states[0] = BufferState::Queued;
        Ok(())
    }

    fn dequeue(&mut self, device: &dyn CaptureDevice) -> Result<Dequeued> {
        let bytes_used = match device.read(&mut self.buffer) {
            Ok(n) => n,
            Err(e) if is_no_data(&e) => return Ok(Dequeued::NotReady),
            Err(e) if is_glitch(&e) => {
                warn!("transient I/O error on read, using buffer as is");
                self.buffer.len()
            }
            Err(e) => return Err(CaptureError::io("read", e)),
        };
        self.states[0] = BufferState::Filled;
        Ok(Dequeued::Frame(FilledSlot {
            index: 0,
            bytes_used,
        }))
    }

    fn data(&self, _index: usize) -> &[u8] {
        &self.buffer
    }

    fn requeue(&mut self, _device: &dyn CaptureDevice, _index: usize) -> Result<()> {
        self.states[0] = BufferState::Queued;
        Ok(())
    }

    fn stream_stopped(&mut self) {
        self.states[0] = BufferState::Free;
    }

    fn release(&mut self, _device: &dyn CaptureDevice) -> Result<()> {
        self.buffer = Vec::new();
        self.states[0] = BufferState::Free;
        Ok(())
    }

    fn states(&self) -> &[BufferState] {
        &self.states
    }
}

/// Device buffers mapped into the process.
pub struct MmapPool {
    regions: Vec<MappedRegion>,
    states: Vec<BufferState>,
}

impl MmapPool {
    /// Request, query and map the device buffers.
    ///
    /// On failure every region mapped so far is unmapped again.
    pub fn allocate(device: &dyn CaptureDevice, device_name: &str) -> Result<Self> {
        let granted = device
            .request_buffers(BufferMemory::Mmap, REQUESTED_BUFFERS)
            .map_err(|e| request_error(device_name, IoMethod::Mmap, e))?;
        if granted < MIN_MMAP_BUFFERS {
            let _ = device.request_buffers(BufferMemory::Mmap, 0);
            return Err(CaptureError::InsufficientBuffers { granted });
        }

        let mut pool = Self {
            regions: Vec::with_capacity(granted as usize),
            states: Vec::with_capacity(granted as usize),
        };
        for index in 0..granted {
            let mapped = device
                .query_buffer(index)
                .map_err(|e| CaptureError::io("VIDIOC_QUERYBUF", e))
                .and_then(|info| {
                    device
                        .map_buffer(&info)
                        .map_err(|e| CaptureError::io("mmap", e))
                });
            match mapped {
                Ok(region) => {
                    pool.regions.push(region);
                    pool.states.push(BufferState::Free);
                }
                Err(e) => {
                    if let Err(cleanup) = pool.release(device) {
                        debug!("cleanup after failed mapping also failed: {cleanup}");
                    }
                    return Err(e);
                }
            }
        }
        debug!("mapped {granted} buffers");
        Ok(pool)
    }
}

impl BufferPool for MmapPool {
    fn method(&self) -> IoMethod {
        IoMethod::Mmap
    }

    fn enqueue_all(&mut self, device: &dyn CaptureDevice) -> Result<()> {
        for index in 0..self.regions.len() {
            self.requeue(device, index)?;
        }
        Ok(())
    }

    fn dequeue(&mut self, device: &dyn CaptureDevice) -> Result<Dequeued> {
        let buf = match device.dequeue_buffer(BufferMemory::Mmap) {
            Ok(buf) => buf,
            Err(e) => return dequeue_error(e, &self.states),
        };
        let index = buf.index as usize;
        mark_filled(&mut self.states, index)?;
        Ok(Dequeued::Frame(FilledSlot {
            index,
            bytes_used: buf.bytes_used.min(self.regions[index].len()),
        }))
    }

    fn data(&self, index: usize) -> &[u8] {
        self.regions[index].as_slice()
    }

    fn requeue(&mut self, device: &dyn CaptureDevice, index: usize) -> Result<()> {
        device
            .queue_buffer(QueueBuffer::Mmap {
                index: index as u32,
            })
            .map_err(|e| CaptureError::io("VIDIOC_QBUF", e))?;
        self.states[index] = BufferState::Queued;
        Ok(())
    }

    fn stream_stopped(&mut self) {
        self.states.fill(BufferState::Free);
    }

    /// Unmap every region. The first unmap failure is returned after all
    /// regions have been attempted.
    fn release(&mut self, device: &dyn CaptureDevice) -> Result<()> {
        let mut first_error = None;
        for region in self.regions.drain(..) {
            if let Err(e) = device.unmap_buffer(region) {
                first_error.get_or_insert(CaptureError::io("munmap", e));
            }
        }
        self.states.clear();
        if let Err(e) = device.request_buffers(BufferMemory::Mmap, 0) {
            debug!("releasing mmap buffers failed: {e}");
        }
        first_error.map_or(Ok(()), Err)
    }

    fn states(&self) -> &[BufferState] {
        &self.states
    }
}

/// Heap buffers handed to the device by address.
pub struct UserptrPool {
    buffers: Vec<Vec<u8>>,
    states: Vec<BufferState>,
}

impl UserptrPool {
    pub fn allocate(
        device: &dyn CaptureDevice,
        device_name: &str,
        frame_size: usize,
    ) -> Result<Self> {
        device
            .request_buffers(BufferMemory::Userptr, REQUESTED_BUFFERS)
            .map_err(|e| request_error(device_name, IoMethod::Userptr, e))?;
        let count = REQUESTED_BUFFERS as usize;
        Ok(Self {
            buffers: (0..count).map(|_| vec![0; frame_size]).collect(),
            states: vec![BufferState::Free; count],
        })
    }
}

impl BufferPool for UserptrPool {
    fn method(&self) -> IoMethod {
        IoMethod::Userptr
    }

    fn enqueue_all(&mut self, device: &dyn CaptureDevice) -> Result<()> {
        for index in 0..self.buffers.len() {
            self.requeue(device, index)?;
        }
        Ok(())
    }

    fn dequeue(&mut self, device: &dyn CaptureDevice) -> Result<Dequeued> {
        let buf = match device.dequeue_buffer(BufferMemory::Userptr) {
            Ok(buf) => buf,
            Err(e) => return dequeue_error(e, &self.states),
        };
        let index = self
            .buffers
            .iter()
            .position(|b| b.as_ptr() as usize == buf.userptr && b.len() == buf.length)
            .unwrap_or(usize::MAX);
        mark_filled(&mut self.states, index)?;
        Ok(Dequeued::Frame(FilledSlot {
            index,
            bytes_used: buf.bytes_used.min(self.buffers[index].len()),
        }))
    }

    fn data(&self, index: usize) -> &[u8] {
        &self.buffers[index]
    }

    fn requeue(&mut self, device: &dyn CaptureDevice, index: usize) -> Result<()> {
        let buffer = &mut self.buffers[index];
        device
            .queue_buffer(QueueBuffer::Userptr {
                index: index as u32,
                ptr: buffer.as_mut_ptr() as usize,
                length: buffer.len(),
            })
            .map_err(|e| CaptureError::io("VIDIOC_QBUF", e))?;
        self.states[index] = BufferState::Queued;
        Ok(())
    }

    fn stream_stopped(&mut self) {
        self.states.fill(BufferState::Free);
    }

    fn release(&mut self, device: &dyn CaptureDevice) -> Result<()> {
        self.buffers.clear();
        self.states.clear();
        if let Err(e) = device.request_buffers(BufferMemory::Userptr, 0) {
            debug!("releasing userptr buffers failed: {e}");
        }
        Ok(())
    }

    fn states(&self) -> &[BufferState] {
        &self.states
    }
}
