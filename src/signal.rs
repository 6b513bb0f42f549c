//! Termination signal handling
//!
//! SIGINT and SIGTERM cancel a [`CancellationToken`]. The token pairs a
//! flag with a self-pipe: the forwarding loop polls the pipe's read end, so
//! a signal that lands just before `poll(2)` still wakes it.

use crate::error::{Error, Result};
use nix::errno::Errno;
use nix::fcntl::OFlag;
use nix::sys::signal::{SaFlags, SigAction, SigHandler, SigSet, Signal, sigaction};
use nix::unistd::pipe2;
use std::os::fd::{AsFd, BorrowedFd, OwnedFd};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

/// Token the signal handler fires; set once, never reset
#[derive(Debug, Clone)]
pub struct CancellationToken {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    cancelled: AtomicBool,
    wake_rx: OwnedFd,
    wake_tx: OwnedFd,
}

impl Inner {
    /// Async-signal-safe: one atomic store and one write(2)
    fn trigger(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
        // A full pipe already wakes the reader
        let _ = crate::sys::write(self.wake_tx.as_fd(), &[1]);
    }
}

impl CancellationToken {
    /// Create an uncancelled token with its wake pipe
    pub fn new() -> Result<Self> {
        let (wake_rx, wake_tx) =
            pipe2(OFlag::O_NONBLOCK | OFlag::O_CLOEXEC).map_err(Error::WakePipe)?;
        Ok(Self {
            inner: Arc::new(Inner {
                cancelled: AtomicBool::new(false),
                wake_rx,
                wake_tx,
            }),
        })
    }

    /// Request cancellation
    pub fn cancel(&self) {
        self.inner.trigger();
    }

    /// Check if cancellation has been requested
    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// Descriptor that becomes readable once the token is cancelled
    pub fn wake_fd(&self) -> BorrowedFd<'_> {
        self.inner.wake_rx.as_fd()
    }

    /// Empty the wake pipe
    pub fn drain(&self) {
        let mut buf = [0u8; 64];
        while let Ok(n) = crate::sys::read(self.wake_fd(), &mut buf) {
            if n == 0 {
                break;
            }
        }
    }
}

/// Token the installed handler cancels
static HANDLER_TOKEN: OnceLock<Arc<Inner>> = OnceLock::new();

extern "C" fn handle_termination(_signum: libc::c_int) {
    let saved = Errno::last_raw();
    if let Some(inner) = HANDLER_TOKEN.get() {
        inner.trigger();
    }
    Errno::set_raw(saved);
}

/// Route SIGINT and SIGTERM to `token`
///
/// Handlers are installed without `SA_RESTART` so a blocked `poll(2)`
/// returns `EINTR`. Only one token per process can be installed.
pub fn install(token: &CancellationToken) -> Result<()> {
    HANDLER_TOKEN
        .set(Arc::clone(&token.inner))
        .map_err(|_| Error::SignalInstalled)?;

    let action = SigAction::new(
        SigHandler::Handler(handle_termination),
        SaFlags::empty(),
        SigSet::empty(),
    );
    for signal in [Signal::SIGINT, Signal::SIGTERM] {
        unsafe { sigaction(signal, &action) }.map_err(|errno| Error::Signal {
            signal: signal.as_str(),
            errno,
        })?;
    }
    Ok(())
}
