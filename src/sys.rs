//! Descriptor helpers
//!
//! fcntl(2), read(2), write(2) and close(2) over borrowed descriptors,
//! keeping the errno instead of folding it into `std::io::Error`.

use nix::fcntl::{FcntlArg, OFlag, fcntl};
use nix::unistd;
use std::os::fd::{AsRawFd, BorrowedFd, IntoRawFd, OwnedFd};

/// Get the file status flags of a descriptor
pub fn status_flags(fd: BorrowedFd<'_>) -> nix::Result<OFlag> {
    let flags = fcntl(fd, FcntlArg::F_GETFL)?;
    Ok(OFlag::from_bits_retain(flags))
}

/// Replace the file status flags of a descriptor
pub fn set_status_flags(fd: BorrowedFd<'_>, flags: OFlag) -> nix::Result<()> {
    fcntl(fd, FcntlArg::F_SETFL(flags))?;
    Ok(())
}

/// Switch a descriptor to non-blocking mode
///
/// Returns the flags that were in effect before the change.
pub fn set_nonblocking(fd: BorrowedFd<'_>) -> nix::Result<OFlag> {
    let saved = status_flags(fd)?;
    if !saved.contains(OFlag::O_NONBLOCK) {
        set_status_flags(fd, saved | OFlag::O_NONBLOCK)?;
    }
    Ok(saved)
}

/// read(2) into `buf`
pub fn read(fd: BorrowedFd<'_>, buf: &mut [u8]) -> nix::Result<usize> {
    unistd::read(fd, buf)
}

/// write(2) from `buf`
pub fn write(fd: BorrowedFd<'_>, buf: &[u8]) -> nix::Result<usize> {
    unistd::write(fd, buf)
}

/// close(2) an owned descriptor, reporting the result
///
/// The descriptor is consumed either way; Linux never leaves it open after
/// a failed close.
pub fn close(fd: OwnedFd) -> nix::Result<()> {
    unistd::close(fd.into_raw_fd())
}

/// Keeps a descriptor in non-blocking mode for the guard's lifetime
///
/// The original status flags are restored on drop. Guards over descriptors
/// that share one open file description (stdin and stdout on a terminal)
/// must be dropped in reverse order of creation, which plain scoping gives.
pub struct NonBlocking<'fd> {
    fd: BorrowedFd<'fd>,
    saved: OFlag,
}

impl<'fd> NonBlocking<'fd> {
    /// Switch `fd` to non-blocking mode until the guard is dropped
    pub fn enable(fd: BorrowedFd<'fd>) -> nix::Result<Self> {
        let saved = set_nonblocking(fd)?;
        Ok(Self { fd, saved })
    }
}

impl Drop for NonBlocking<'_> {
    fn drop(&mut self) {
        if !self.saved.contains(OFlag::O_NONBLOCK)
            && let Err(errno) = set_status_flags(self.fd, self.saved)
        {
            tracing::debug!(fd = self.fd.as_raw_fd(), %errno, "failed to restore descriptor flags");
        }
    }
}
