//! Readiness-driven forwarding between the device and stdio
//!
//! One thread, one `poll(2)` per iteration, no timeout. Each direction owns
//! a [`PendingBuffer`]; a source is only polled for input while its
//! destination's buffer is empty, which is the only backpressure there is.

use super::pending::PendingBuffer;
use crate::error::{Error, Result};
use crate::signal::CancellationToken;
use crate::sys::{self, NonBlocking};
use nix::errno::Errno;
use nix::poll::{PollFd, PollFlags, PollTimeout, poll};
use std::fmt;
use std::num::NonZeroUsize;
use std::os::fd::BorrowedFd;
use tracing::{debug, info, trace, warn};

/// Default per-direction buffer size
pub const DEFAULT_BUFFER_LEN: NonZeroUsize = NonZeroUsize::new(65536).unwrap();

/// Revents that make a read worth attempting
const READABLE: PollFlags = PollFlags::POLLIN
    .union(PollFlags::POLLHUP)
    .union(PollFlags::POLLERR);

/// Revents that make a write worth attempting
const WRITABLE: PollFlags = PollFlags::POLLOUT
    .union(PollFlags::POLLHUP)
    .union(PollFlags::POLLERR);

/// One side of the relay
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endpoint {
    Device,
    Input,
    Output,
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Endpoint::Device => write!(f, "tun device"),
            Endpoint::Input => write!(f, "stdin"),
            Endpoint::Output => write!(f, "stdout"),
        }
    }
}

/// Why forwarding stopped without an error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The cancellation token fired
    Cancelled,
    /// The device reported end-of-file
    DeviceClosed,
}

/// Descriptors and buffer size for one forwarding run
#[derive(Debug, Clone, Copy)]
pub struct Session<'fd> {
    pub device: BorrowedFd<'fd>,
    pub input: BorrowedFd<'fd>,
    pub output: BorrowedFd<'fd>,
    pub capacity: NonZeroUsize,
}

impl<'fd> Session<'fd> {
    pub fn new(
        device: BorrowedFd<'fd>,
        input: BorrowedFd<'fd>,
        output: BorrowedFd<'fd>,
        capacity: NonZeroUsize,
    ) -> Self {
        Self {
            device,
            input,
            output,
            capacity,
        }
    }
}

/// Forward until cancelled, the device closes, or an I/O error occurs
///
/// Input and output are non-blocking for the duration of the call and get
/// their original flags back on return. The device is expected to be
/// non-blocking already.
pub fn run(session: &Session<'_>, token: &CancellationToken) -> Result<Outcome> {
    // Declared input first so stdout's flags are restored first
    let _input = NonBlocking::enable(session.input).map_err(|errno| Error::Stdio {
        endpoint: Endpoint::Input,
        errno,
    })?;
    let _output = NonBlocking::enable(session.output).map_err(|errno| Error::Stdio {
        endpoint: Endpoint::Output,
        errno,
    })?;

    Forwarder::new(session).run(token)
}

#[derive(Debug, Clone, Copy)]
enum Slot {
    Wake,
    Device,
    Input,
    Output,
}

#[derive(Debug, PartialEq, Eq)]
enum Received {
    Data,
    WouldBlock,
    Eof,
}

struct Forwarder<'s, 'fd> {
    session: &'s Session<'fd>,
    /// stdin -> device
    to_device: PendingBuffer,
    /// device -> stdout
    to_output: PendingBuffer,
    input_open: bool,
}

impl<'s, 'fd> Forwarder<'s, 'fd> {
    fn new(session: &'s Session<'fd>) -> Self {
        Self {
            session,
            to_device: PendingBuffer::new(session.capacity),
            to_output: PendingBuffer::new(session.capacity),
            input_open: true,
        }
    }

    fn run(&mut self, token: &CancellationToken) -> Result<Outcome> {
        debug!(capacity = self.to_device.capacity(), "forwarding started");

        loop {
            let ready = match self.wait(token) {
                Ok(ready) => ready,
                Err(Errno::EINTR) => {
                    debug!("readiness wait interrupted");
                    if token.is_cancelled() {
                        return Ok(self.shutdown());
                    }
                    continue;
                }
                Err(errno) => return Err(Error::Poll(errno)),
            };

            if token.is_cancelled() {
                return Ok(self.shutdown());
            }

            for (slot, revents) in ready.ready() {
                match slot {
                    Slot::Wake => token.drain(),
                    Slot::Device => {
                        if revents.intersects(WRITABLE) && !self.to_device.is_empty() {
                            transmit(self.session.device, &mut self.to_device, Endpoint::Device)?;
                        }
                        if revents.intersects(READABLE)
                            && self.to_output.is_empty()
                            && receive(self.session.device, &mut self.to_output, Endpoint::Device)?
                                == Received::Eof
                        {
                            info!("tun device closed");
                            return Ok(Outcome::DeviceClosed);
                        }
                    }
                    Slot::Input => {
                        if revents.intersects(READABLE)
                            && self.to_device.is_empty()
                            && receive(self.session.input, &mut self.to_device, Endpoint::Input)?
                                == Received::Eof
                        {
                            info!("stdin reached end of file, forwarding device to stdout only");
                            self.input_open = false;
                        }
                    }
                    Slot::Output => {
                        if revents.intersects(WRITABLE) && !self.to_output.is_empty() {
                            transmit(self.session.output, &mut self.to_output, Endpoint::Output)?;
                        }
                    }
                }
            }
        }
    }

    /// Block until something we care about is ready
    fn wait<'t>(&self, token: &'t CancellationToken) -> nix::Result<PollSet<'t>>
    where
        'fd: 't,
    {
        let mut device = PollFlags::empty();
        if self.to_output.is_empty() {
            device |= PollFlags::POLLIN;
        }
        if !self.to_device.is_empty() {
            device |= PollFlags::POLLOUT;
        }

        let mut set = PollSet::new(token.wake_fd());
        set.watch(Slot::Wake, token.wake_fd(), PollFlags::POLLIN);
        set.watch(Slot::Device, self.session.device, device);
        if self.input_open && self.to_device.is_empty() {
            set.watch(Slot::Input, self.session.input, PollFlags::POLLIN);
        }
        if !self.to_output.is_empty() {
            set.watch(Slot::Output, self.session.output, PollFlags::POLLOUT);
        }

        poll(&mut set.fds[..set.len], PollTimeout::NONE)?;
        Ok(set)
    }

    /// Stop reading and push out whatever is already buffered
    fn shutdown(&mut self) -> Outcome {
        info!("Received interrupt, exiting");
        flush_best_effort(self.session.device, &mut self.to_device, Endpoint::Device);
        flush_best_effort(self.session.output, &mut self.to_output, Endpoint::Output);
        Outcome::Cancelled
    }
}

/// Wake pipe, device, input and output
const MAX_WATCHED: usize = 4;

/// Descriptors for one `poll(2)` call, tagged with their role
struct PollSet<'a> {
    slots: [Slot; MAX_WATCHED],
    fds: [PollFd<'a>; MAX_WATCHED],
    len: usize,
}

impl<'a> PollSet<'a> {
    /// Empty set; `filler` only pads the unused entries
    fn new(filler: BorrowedFd<'a>) -> Self {
        Self {
            slots: [Slot::Wake; MAX_WATCHED],
            fds: std::array::from_fn(|_| PollFd::new(filler, PollFlags::empty())),
            len: 0,
        }
    }

    /// Add `fd` unless there is nothing to wait for
    ///
    /// Unwatched descriptors stay out of the set entirely: poll reports
    /// POLLHUP even for an empty event mask.
    fn watch(&mut self, slot: Slot, fd: BorrowedFd<'a>, events: PollFlags) {
        if !events.is_empty() {
            self.slots[self.len] = slot;
            self.fds[self.len] = PollFd::new(fd, events);
            self.len += 1;
        }
    }

    /// Entries with non-empty revents
    fn ready(&self) -> impl Iterator<Item = (Slot, PollFlags)> + '_ {
        self.slots[..self.len]
            .iter()
            .copied()
            .zip(
                self.fds[..self.len]
                    .iter()
                    .map(|fd| fd.revents().unwrap_or(PollFlags::empty())),
            )
            .filter(|(_, revents)| !revents.is_empty())
    }
}

/// Read once from `fd` into the (empty) pending buffer
fn receive(fd: BorrowedFd<'_>, pending: &mut PendingBuffer, from: Endpoint) -> Result<Received> {
    match pending.fill(|buf| sys::read(fd, buf)) {
        Ok(0) => Ok(Received::Eof),
        Ok(n) => {
            trace!(from = %from, bytes = n, "read");
            Ok(Received::Data)
        }
        Err(Errno::EAGAIN | Errno::EINTR) => Ok(Received::WouldBlock),
        Err(errno) => Err(Error::Read {
            endpoint: from,
            errno,
        }),
    }
}

/// Write once from the front of the pending buffer; returns bytes written
fn transmit(fd: BorrowedFd<'_>, pending: &mut PendingBuffer, to: Endpoint) -> Result<usize> {
    match sys::write(fd, pending.as_slice()) {
        Ok(n) => {
            pending.consume(n);
            trace!(to = %to, bytes = n, remaining = pending.len(), "wrote");
            Ok(n)
        }
        Err(Errno::EAGAIN | Errno::EINTR) => Ok(0),
        Err(errno) => Err(Error::Write {
            endpoint: to,
            errno,
        }),
    }
}

fn flush_best_effort(fd: BorrowedFd<'_>, pending: &mut PendingBuffer, to: Endpoint) {
    while !pending.is_empty() {
        match transmit(fd, pending, to) {
            Ok(0) => break,
            Ok(_) => {}
            Err(e) => {
                warn!(error = %e, "flush at shutdown failed");
                break;
            }
        }
    }
    if !pending.is_empty() {
        debug!(endpoint = %to, bytes = pending.len(), "discarding unflushed data");
    }
}
