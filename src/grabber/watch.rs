//! Tokio host for the readiness contract.

use tokio::io::unix::AsyncFd;
use tokio::io::Interest;
use tokio::sync::Notify;
use tracing::debug;

use super::{Grabber, ReadOutcome, Readiness};
use crate::capture::device::CaptureDevice;
use crate::capture::error::{CaptureError, Result};

/// Start the grabber and feed it readiness edges until `shutdown` fires.
///
/// Each edge is drained until the device reports no data. The grabber is
/// stopped on shutdown; a fatal error stops the loop and is returned with
/// the grabber left as it was.
pub async fn drive<D, R>(grabber: &mut Grabber<D, R>, shutdown: &Notify) -> Result<()>
where
    D: CaptureDevice,
    R: Readiness,
{
    let fd = AsyncFd::with_interest(grabber.raw_fd(), Interest::READABLE)
        .map_err(|e| CaptureError::io("AsyncFd", e))?;
    grabber.start()?;

    loop {
        tokio::select! {
            _ = shutdown.notified() => {
                debug!("capture driver shutting down");
                break;
            }
            guard = fd.readable() => {
                let mut guard = guard.map_err(|e| CaptureError::io("poll", e))?;
                while grabber.on_readable()? != ReadOutcome::NoData {}
                guard.clear_ready();
            }
        }
    }

    drop(fd);
    grabber.stop()
}
