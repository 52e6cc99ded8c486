//! Self-pipe readiness notifier for unix systems without `eventfd`.

use std::io;
use std::os::fd::{AsFd, AsRawFd, BorrowedFd, OwnedFd, RawFd};

use rustix::pipe::{PipeFlags, pipe_with};

/// Kernel-side readable/unreadable toggle.
///
/// At most one byte is ever in flight: `signal` writes it from the
/// unsignaled state, `clear` reads it from the signaled state. The pipe
/// therefore never fills and neither end needs to be non-blocking.
pub(crate) struct Notifier {
    read_end: OwnedFd,
    write_end: OwnedFd,
}

impl Notifier {
    /// Creates the notifier in the unsignaled state.
    pub(crate) fn new() -> io::Result<Self> {
        let (read_end, write_end) = pipe_with(PipeFlags::CLOEXEC)?;
        Ok(Self {
            read_end,
            write_end,
        })
    }

    /// Makes the read end readable. The notifier must currently be unsignaled.
    pub(crate) fn signal(&self) -> io::Result<()> {
        let written = rustix::io::write(&self.write_end, &[1u8])?;
        debug_assert_eq!(written, 1);
        Ok(())
    }

    /// Makes the read end unreadable. The notifier must currently be signaled.
    pub(crate) fn clear(&self) -> io::Result<()> {
        let mut byte = [0u8; 1];
        let read = rustix::io::read(&self.read_end, &mut byte[..])?;
        debug_assert_eq!(read, 1);
        Ok(())
    }
}

impl AsRawFd for Notifier {
    fn as_raw_fd(&self) -> RawFd {
        self.read_end.as_raw_fd()
    }
}

impl AsFd for Notifier {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.read_end.as_fd()
    }
}
