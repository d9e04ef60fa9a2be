//! The shared-memory ring transport: a lock-free single-producer /
//! single-consumer byte ring living in anonymous `MAP_SHARED` memory, so
//! it survives `fork` and is visible to both ends of a pipe without a
//! syscall per byte. Lower latency than the socketpair fallback
//! (`super::socketpair`), at the cost of needing an auxiliary "doorbell"
//! pipe to make it `poll`-able.

use std::num::NonZeroUsize;
use std::os::fd::{AsFd, AsRawFd, BorrowedFd, OwnedFd, RawFd};
use std::ptr::NonNull;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use nix::fcntl::{fcntl, FcntlArg, OFlag};
use nix::sys::mman::{mmap_anonymous, munmap, MapFlags, ProtFlags};
use nix::unistd::{pipe, read as nix_read, write as nix_write};

use crate::error::PipeError;

#[repr(C)]
struct RingHeader {
    /// Next byte index to write, monotonically increasing (never wraps
    /// except via `usize` overflow, which is unreachable in practice).
    head: AtomicUsize,
    /// Next byte index to read.
    tail: AtomicUsize,
}

/// A fixed-capacity byte ring mapped `MAP_SHARED | MAP_ANONYMOUS` before
/// `fork`, so both the parent and every child see the same physical
/// pages at the same virtual address.
///
/// Layout: `[RingHeader][data; capacity]`. `capacity` must be a power of
/// two so index wrapping is a cheap mask.
struct SharedRing {
    map: NonNull<u8>,
    map_len: usize,
    capacity: usize,
}

unsafe impl Send for SharedRing {}
unsafe impl Sync for SharedRing {}

impl SharedRing {
    fn new(capacity: usize) -> Result<Self, PipeError> {
        assert!(
            capacity.is_power_of_two(),
            "ring capacity must be a power of two, got {capacity}"
        );
        let map_len = std::mem::size_of::<RingHeader>() + capacity;
        let map = unsafe {
            mmap_anonymous(
                None,
                NonZeroUsize::new(map_len).expect("ring size is non-zero"),
                ProtFlags::PROT_READ | ProtFlags::PROT_WRITE,
                MapFlags::MAP_SHARED,
            )
        }
        .map_err(PipeError::Nix)?;
        let ring = SharedRing {
            map: map.cast(),
            map_len,
            capacity,
        };
        ring.header().head.store(0, Ordering::Relaxed);
        ring.header().tail.store(0, Ordering::Relaxed);
        Ok(ring)
    }

    fn header(&self) -> &RingHeader {
        unsafe { &*(self.map.as_ptr() as *const RingHeader) }
    }

    fn data(&self) -> *mut u8 {
        unsafe { self.map.as_ptr().add(std::mem::size_of::<RingHeader>()) }
    }

    fn used(&self) -> usize {
        let head = self.header().head.load(Ordering::Acquire);
        let tail = self.header().tail.load(Ordering::Acquire);
        head.wrapping_sub(tail)
    }

    fn free(&self) -> usize {
        self.capacity - self.used()
    }

    fn readable(&self) -> usize {
        self.used()
    }

    /// Copies as much of `buf` into the ring as there is room for.
    /// Returns the number of bytes actually written; `0` means the ring
    /// is full and the caller must wait for the peer to drain it.
    fn write(&self, buf: &[u8]) -> usize {
        let n = buf.len().min(self.free());
        let head = self.header().head.load(Ordering::Relaxed);
        for (i, &b) in buf[..n].iter().enumerate() {
            let idx = head.wrapping_add(i) & (self.capacity - 1);
            unsafe { self.data().add(idx).write(b) };
        }
        self.header()
            .head
            .store(head.wrapping_add(n), Ordering::Release);
        n
    }

    /// Copies as much of the ring's contents into `buf` as are
    /// available. Returns the number of bytes actually read; `0` means
    /// the ring is empty.
    fn read(&self, buf: &mut [u8]) -> usize {
        let n = buf.len().min(self.readable());
        let tail = self.header().tail.load(Ordering::Relaxed);
        for (i, item) in buf.iter_mut().take(n).enumerate() {
            let idx = tail.wrapping_add(i) & (self.capacity - 1);
            *item = unsafe { *self.data().add(idx) };
        }
        self.header()
            .tail
            .store(tail.wrapping_add(n), Ordering::Release);
        n
    }
}

impl Drop for SharedRing {
    fn drop(&mut self) {
        unsafe {
            let _ = munmap(self.map.cast(), self.map_len);
        }
    }
}

/// A non-blocking pipe used purely to make a [`SharedRing`] observable by
/// `poll`. Whichever side publishes bytes (a writer filling the ring, a
/// reader draining it) "rings the bell"; the other side wakes from
/// `poll`, re-checks the ring's counters, and only then does real work.
/// Coalesced wakeups across multiple writes are harmless -- the ring
/// counters are the source of truth, the doorbell is only a hint.
struct Doorbell {
    read_fd: OwnedFd,
    write_fd: OwnedFd,
}

impl Doorbell {
    fn new() -> Result<Self, PipeError> {
        let (read_fd, write_fd) = pipe().map_err(PipeError::Nix)?;
        for fd in [&read_fd, &write_fd] {
            let flags = fcntl(fd.as_raw_fd(), FcntlArg::F_GETFL).map_err(PipeError::Nix)?;
            let mut flags = OFlag::from_bits_truncate(flags);
            flags.insert(OFlag::O_NONBLOCK);
            fcntl(fd.as_raw_fd(), FcntlArg::F_SETFL(flags)).map_err(PipeError::Nix)?;
        }
        Ok(Doorbell { read_fd, write_fd })
    }

    fn ring(&self) {
        // Best-effort: a full doorbell pipe means a wakeup is already
        // pending, so EAGAIN here is not a bug.
        let _ = nix_write(&self.write_fd, &[0u8]);
    }

    /// Drains every pending byte so the read end does not stay readable
    /// after a single wakeup has already been consumed.
    fn drain(&self) {
        let mut buf = [0u8; 64];
        loop {
            match nix_read(self.read_fd.as_raw_fd(), &mut buf) {
                Ok(0) => break,
                Ok(n) if n < buf.len() => break,
                Ok(_) => continue,
                Err(_) => break,
            }
        }
    }

    fn read_fd(&self) -> BorrowedFd<'_> {
        self.read_fd.as_fd()
    }
}

/// One direction of a ring-backed, `poll`-able, blocking byte stream.
/// A full-duplex pipe is two of these, one per direction, built before
/// `fork` so both ends inherit the shared mapping and the doorbell fds.
pub struct RingHalf {
    /// The ring this half writes into.
    tx: Arc<SharedRing>,
    /// The ring this half reads from.
    rx: Arc<SharedRing>,
    tx_bell: Arc<Doorbell>,
    rx_bell: Arc<Doorbell>,
}

impl RingHalf {
    /// Builds both directions of a ring-backed pipe. Returns
    /// `(endpoint_a, endpoint_b)`; `endpoint_a` writes into the ring
    /// `endpoint_b` reads from, and vice versa. Must be called before
    /// `fork` so the mappings and doorbell fds are inherited by every
    /// process that will use either endpoint.
    pub fn pair(capacity: usize) -> Result<(RingHalf, RingHalf), PipeError> {
        let ring_a_to_b = Arc::new(SharedRing::new(capacity)?);
        let ring_b_to_a = Arc::new(SharedRing::new(capacity)?);
        let bell_a_to_b = Arc::new(Doorbell::new()?);
        let bell_b_to_a = Arc::new(Doorbell::new()?);

        let a = RingHalf {
            tx: ring_a_to_b.clone(),
            rx: ring_b_to_a.clone(),
            tx_bell: bell_a_to_b.clone(),
            rx_bell: bell_b_to_a.clone(),
        };
        let b = RingHalf {
            tx: ring_b_to_a,
            rx: ring_a_to_b,
            tx_bell: bell_b_to_a,
            rx_bell: bell_a_to_b,
        };
        Ok((a, b))
    }

    pub fn write_all_blocking(&self, mut buf: &[u8]) -> Result<(), PipeError> {
        while !buf.is_empty() {
            let n = self.tx.write(buf);
            if n == 0 {
                std::thread::yield_now();
                continue;
            }
            self.tx_bell.ring();
            buf = &buf[n..];
        }
        Ok(())
    }

    pub fn read_exact_blocking(&self, mut buf: &mut [u8]) -> Result<(), PipeError> {
        while !buf.is_empty() {
            let n = self.rx.read(buf);
            if n == 0 {
                self.wait_readable()?;
                continue;
            }
            self.rx_bell.ring();
            let tmp = buf;
            buf = &mut tmp[n..];
        }
        Ok(())
    }

    pub fn bytes_readable_nonblocking(&self) -> usize {
        self.rx.readable()
    }

    /// Blocks (infinite timeout) until the receive ring has at least one
    /// byte available.
    fn wait_readable(&self) -> Result<(), PipeError> {
        use nix::poll::{poll, PollFd, PollFlags, PollTimeout};
        loop {
            if self.rx.readable() > 0 {
                return Ok(());
            }
            let mut fds = [PollFd::new(self.rx_bell.read_fd(), PollFlags::POLLIN)];
            poll(&mut fds, PollTimeout::NONE).map_err(PipeError::Nix)?;
            self.rx_bell.drain();
        }
    }

    /// The fd a multi-pipe `poll` should watch for `POLLIN` readiness on
    /// this half.
    pub fn doorbell_fd(&self) -> BorrowedFd<'_> {
        self.rx_bell.read_fd()
    }

    /// Call after `poll` reports this half's doorbell fd ready, before
    /// re-checking `bytes_readable_nonblocking`.
    pub fn drain_doorbell(&self) {
        self.rx_bell.drain();
    }
}

impl AsRawFd for RingHalf {
    fn as_raw_fd(&self) -> RawFd {
        self.rx_bell.read_fd.as_raw_fd()
    }
}
