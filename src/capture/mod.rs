pub mod buffers;
pub mod device;
pub mod error;
pub mod mock;
pub mod session;
pub mod types;
#[cfg(target_os = "linux")]
pub mod v4l2;
