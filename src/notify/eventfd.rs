//! Linux readiness notifier backed by an `eventfd`.

use std::io;
use std::os::fd::{AsFd, AsRawFd, BorrowedFd, OwnedFd, RawFd};

use rustix::event::{EventfdFlags, eventfd};

/// Kernel-side readable/unreadable toggle.
///
/// The counter is written only from the unsignaled state and read only from
/// the signaled state, so it is always 0 or 1 and the non-blocking reads
/// below never see an empty counter.
pub(crate) struct Notifier {
    fd: OwnedFd,
}

impl Notifier {
    /// Creates the notifier in the unsignaled state.
    pub(crate) fn new() -> io::Result<Self> {
        let fd = eventfd(0, EventfdFlags::CLOEXEC | EventfdFlags::NONBLOCK)?;
        Ok(Self { fd })
    }

    /// Makes the fd readable. The notifier must currently be unsignaled.
    pub(crate) fn signal(&self) -> io::Result<()> {
        let written = rustix::io::write(&self.fd, &1u64.to_ne_bytes())?;
        debug_assert_eq!(written, 8);
        Ok(())
    }

    /// Makes the fd unreadable. The notifier must currently be signaled.
    pub(crate) fn clear(&self) -> io::Result<()> {
        let mut counter = [0u8; 8];
        let read = rustix::io::read(&self.fd, &mut counter[..])?;
        debug_assert_eq!(read, 8);
        debug_assert_eq!(u64::from_ne_bytes(counter), 1);
        Ok(())
    }
}

impl AsRawFd for Notifier {
    fn as_raw_fd(&self) -> RawFd {
        self.fd.as_raw_fd()
    }
}

impl AsFd for Notifier {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.fd.as_fd()
    }
}
