//! The socketpair fallback transport: a plain `AF_UNIX` `SOCK_STREAM`
//! pair, used for the master<->queue control channel (where a handshake
//! needs to be unambiguous even before any ring is mapped) and for any
//! pipe the caller did not ask to back with shared memory.

use std::io::{Read, Write};
use std::os::fd::{AsFd, AsRawFd, BorrowedFd, RawFd};
use std::os::unix::net::UnixStream;

use nix::sys::socket::{socketpair, AddressFamily, SockFlag, SockType};

use crate::error::PipeError;

/// One end of an `AF_UNIX` socketpair. Implements `Read`/`Write` directly
/// via the underlying `UnixStream`, so `super::framed` can treat it the
/// same way it treats a [`super::ring::RingHalf`].
pub struct SocketPairHalf {
    stream: UnixStream,
}

impl SocketPairHalf {
    /// Builds both ends of a socketpair. Must be called before `fork` so
    /// both processes inherit one fd each.
    pub fn pair() -> Result<(SocketPairHalf, SocketPairHalf), PipeError> {
        let (a, b) = socketpair(
            AddressFamily::Unix,
            SockType::Stream,
            None,
            SockFlag::empty(),
        )
        .map_err(PipeError::Nix)?;
        Ok((
            SocketPairHalf {
                stream: UnixStream::from(a),
            },
            SocketPairHalf {
                stream: UnixStream::from(b),
            },
        ))
    }

    pub fn bytes_readable_nonblocking(&self) -> Result<usize, PipeError> {
        // SOCK_STREAM sockets report the number of bytes queued to read
        // via `FIONREAD`; nix does not wrap the ioctl generically, so we
        // use `MSG_PEEK` with a throwaway buffer capped at a sane size
        // instead of reaching for raw `ioctl`.
        use nix::sys::socket::{recv, MsgFlags};
        let mut probe = [0u8; 4096];
        match recv(
            self.stream.as_raw_fd(),
            &mut probe,
            MsgFlags::MSG_PEEK | MsgFlags::MSG_DONTWAIT,
        ) {
            Ok(n) => Ok(n),
            Err(nix::Error::EAGAIN) => Ok(0),
            Err(e) => Err(PipeError::Nix(e)),
        }
    }

    pub fn good(&self) -> bool {
        self.bytes_readable_nonblocking().is_ok()
    }

    pub fn write_all_blocking(&self, buf: &[u8]) -> Result<(), PipeError> {
        (&self.stream).write_all(buf).map_err(PipeError::Io)
    }

    pub fn read_exact_blocking(&self, buf: &mut [u8]) -> Result<(), PipeError> {
        (&self.stream).read_exact(buf).map_err(PipeError::Io)
    }
}

impl Read for SocketPairHalf {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.stream.read(buf)
    }
}

impl Write for SocketPairHalf {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.stream.write(buf)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.stream.flush()
    }
}

impl AsRawFd for SocketPairHalf {
    fn as_raw_fd(&self) -> RawFd {
        self.stream.as_raw_fd()
    }
}

impl AsFd for SocketPairHalf {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.stream.as_fd()
    }
}
