use std::io;
use std::os::unix::io::RawFd;

/// Host hook that reports "descriptor readable" and can be switched off.
///
/// The grabber registers its descriptor once and toggles the hook with
/// start/stop. Disabling is always safe, also when already disabled.
pub trait Readiness: Send {
    fn register(&mut self, fd: RawFd) -> io::Result<()>;

    fn set_enabled(&mut self, enabled: bool);

    fn is_enabled(&self) -> bool;
}

/// Flag-only readiness for hosts that poll the grabber themselves.
#[derive(Debug, Default, Clone)]
pub struct ManualReadiness {
    fd: Option<RawFd>,
    enabled: bool,
}

impl ManualReadiness {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registered descriptor, if any.
    pub fn fd(&self) -> Option<RawFd> {
        self.fd
    }
}

impl Readiness for ManualReadiness {
    fn register(&mut self, fd: RawFd) -> io::Result<()> {
        if fd < 0 {
            return Err(io::Error::from_raw_os_error(libc::EBADF));
        }
        self.fd = Some(fd);
        Ok(())
    }

    fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    fn is_enabled(&self) -> bool {
        self.enabled
    }
}
