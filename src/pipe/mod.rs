//! C1: the pipe transport. A pipe is one of two things -- a shared-memory
//! ring (`ring`, the default, lower latency) or an `AF_UNIX` socketpair
//! (`socketpair`, used for the master<->queue control channel and as a
//! fallback). [`PipeTransport`] unifies them behind one set of blocking
//! read/write calls so [`framed`] does not need to know which is in use.

pub mod framed;
pub mod ring;
pub mod socketpair;

use std::os::fd::{AsFd, BorrowedFd};

use nix::poll::{poll, PollFd, PollFlags, PollTimeout};
use nix::sys::wait::{waitpid, WaitStatus};
use nix::unistd::Pid;

pub use ring::RingHalf;
pub use socketpair::SocketPairHalf;

use crate::error::PipeError;

/// One endpoint of a process-pair channel.
pub enum PipeTransport {
    Ring(RingHalf),
    Socket(SocketPairHalf),
}

impl PipeTransport {
    pub fn write_all_blocking(&self, buf: &[u8]) -> Result<(), PipeError> {
        match self {
            PipeTransport::Ring(r) => r.write_all_blocking(buf),
            PipeTransport::Socket(s) => s.write_all_blocking(buf),
        }
    }

    pub fn read_exact_blocking(&self, buf: &mut [u8]) -> Result<(), PipeError> {
        match self {
            PipeTransport::Ring(r) => r.read_exact_blocking(buf),
            PipeTransport::Socket(s) => s.read_exact_blocking(buf),
        }
    }

    pub fn bytes_readable_nonblocking(&self) -> Result<usize, PipeError> {
        match self {
            PipeTransport::Ring(r) => Ok(r.bytes_readable_nonblocking()),
            PipeTransport::Socket(s) => s.bytes_readable_nonblocking(),
        }
    }

    pub fn good(&self) -> bool {
        match self {
            // A broken ring surfaces as a read/write error on next use,
            // not as a liveness flag -- there is no analogue of a closed
            // socket for a shared mapping that outlives both endpoints.
            PipeTransport::Ring(_) => true,
            PipeTransport::Socket(s) => s.good(),
        }
    }

    /// The fd a multi-pipe [`poll_many`] call watches for this transport's
    /// readiness.
    fn poll_fd(&self) -> BorrowedFd<'_> {
        match self {
            PipeTransport::Ring(r) => r.doorbell_fd(),
            PipeTransport::Socket(s) => s.as_fd(),
        }
    }

    /// Must be called after `poll_many` reports this transport ready,
    /// before re-checking `bytes_readable_nonblocking`.
    fn on_poll_ready(&self) {
        if let PipeTransport::Ring(r) = self {
            r.drain_doorbell();
        }
    }
}

/// Blocks until at least one of `transports` has data to read, returning
/// the number of ready transports. Used by the queue process to
/// multiplex worker pipes and the master control channel on one thread.
pub fn poll_many(transports: &[&PipeTransport]) -> Result<usize, PipeError> {
    let mut fds: Vec<PollFd> = transports
        .iter()
        .map(|t| PollFd::new(t.poll_fd(), PollFlags::POLLIN))
        .collect();
    let n = poll(&mut fds, PollTimeout::NONE).map_err(PipeError::Nix)?;
    for (transport, fd) in transports.iter().zip(fds.iter()) {
        if fd.revents().is_some_and(|r| r.contains(PollFlags::POLLIN)) {
            transport.on_poll_ready();
        }
    }
    Ok(n as usize)
}

/// Waits for a child process to exit and returns its status. This is the
/// parent side of the C4 shutdown protocol: after the queue process has
/// been told to stop accepting new tasks and has drained in-flight work,
/// the master reaps it (and each worker) with this.
pub fn close_and_wait(pid: Pid) -> Result<WaitStatus, PipeError> {
    waitpid(pid, None).map_err(PipeError::Nix)
}
