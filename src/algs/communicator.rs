//! Thin façade over in-process (`RayonComm`) or inter-process (`MpiComm`)
//! message passing.
//!
//! Messages are *contiguous byte slices*. All handles are waitable but
//! non-blocking: callers post every send and receive of a phase first and
//! then `.wait()` on them. A receive handle yields `None` when the transfer
//! failed; the coarse mesh turns that into a `CommError`.

use crate::mesh_error::CmeshError;
use bytes::Bytes;
use dashmap::DashMap;
use once_cell::sync::Lazy;
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicU16, Ordering};
use std::time::{Duration, Instant};

/// Base of a block of message tags reserved for one collective operation.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct CommTag(pub u16);

impl CommTag {
    #[inline]
    pub const fn base(self) -> u16 {
        self.0
    }
    #[inline]
    pub const fn as_u16(self) -> u16 {
        self.0
    }
    /// The `k`-th tag of the reserved block.
    #[inline]
    pub const fn offset(self, k: u16) -> CommTag {
        CommTag(self.0.wrapping_add(k))
    }
}

/// First tag handed out by `reserve_tag_range`.
pub const FIRST_TAG: u16 = 0x2000;

/// Non-blocking point-to-point communication.
pub trait Communicator {
    /// Handle returned by `isend`.
    type SendHandle: Wait;
    /// Handle returned by `irecv`.
    type RecvHandle: Wait;

    /// Post a send of `buf` to `peer`.
    fn isend(&self, peer: usize, tag: u16, buf: &[u8]) -> Self::SendHandle;
    /// Post a receive from `peer`; at most `buf.len()` bytes are delivered.
    fn irecv(&self, peer: usize, tag: u16, buf: &mut [u8]) -> Self::RecvHandle;

    /// This process's rank in `0..size()`.
    fn rank(&self) -> usize;
    /// Number of cooperating processes.
    fn size(&self) -> usize;

    /// Reserve `n` consecutive tags. Every rank must reserve in the same
    /// order so that the blocks line up.
    fn reserve_tag_range(&self, n: u16) -> Result<CommTag, CmeshError>;

    /// True for the single-process stand-in that never moves data.
    fn is_no_comm(&self) -> bool {
        false
    }
}

/// Anything that can be waited on.
pub trait Wait {
    /// Wait for completion and return the received data (if any).
    fn wait(self) -> Option<Vec<u8>>;
}

impl Wait for () {
    fn wait(self) -> Option<Vec<u8>> {
        None
    }
}

/// Single-process communicator: rank 0 of 1. Any attempt to actually send
/// or receive completes without data.
#[derive(Clone, Debug, Default)]
pub struct NoComm;

impl Communicator for NoComm {
    type SendHandle = ();
    type RecvHandle = ();

    fn isend(&self, _peer: usize, _tag: u16, _buf: &[u8]) {}
    fn irecv(&self, _peer: usize, _tag: u16, _buf: &mut [u8]) {}

    fn rank(&self) -> usize {
        0
    }
    fn size(&self) -> usize {
        1
    }
    fn reserve_tag_range(&self, _n: u16) -> Result<CommTag, CmeshError> {
        Ok(CommTag(FIRST_TAG))
    }
    fn is_no_comm(&self) -> bool {
        true
    }
}

// --- RayonComm: in-process ranks over a shared mailbox ---

type Key = (usize, usize, u16); // (src, dst, tag)

/// Message queues shared by the ranks of one in-process world.
#[derive(Debug, Default)]
pub struct Mailbox {
    slots: DashMap<Key, VecDeque<Bytes>>,
    lock: Mutex<()>,
    posted: Condvar,
}

impl Mailbox {
    fn post(&self, key: Key, data: Bytes) {
        self.slots.entry(key).or_default().push_back(data);
        let _guard = self.lock.lock();
        self.posted.notify_all();
    }

    fn try_take(&self, key: &Key) -> Option<Bytes> {
        let data = self.slots.get_mut(key).and_then(|mut q| q.pop_front())?;
        // `remove_if` rechecks under the shard lock, so a racing post keeps its queue.
        self.slots.remove_if(key, |_, q| q.is_empty());
        Some(data)
    }

    fn take(&self, key: Key, timeout: Option<Duration>) -> Option<Bytes> {
        let deadline = timeout.map(|t| Instant::now() + t);
        loop {
            if let Some(b) = self.try_take(&key) {
                return Some(b);
            }
            if deadline.is_some_and(|d| Instant::now() >= d) {
                return None;
            }
            // Short waits: a post between `try_take` and `wait_for` is only
            // noticed on the next round.
            let mut guard = self.lock.lock();
            self.posted.wait_for(&mut guard, Duration::from_millis(2));
        }
    }
}

static GLOBAL_MAILBOX: Lazy<Arc<Mailbox>> = Lazy::new(|| Arc::new(Mailbox::default()));

/// Receive handle of a [`RayonComm`].
pub struct LocalHandle {
    mailbox: Arc<Mailbox>,
    key: Key,
    cap: usize,
    timeout: Option<Duration>,
}

impl Wait for LocalHandle {
    fn wait(self) -> Option<Vec<u8>> {
        let bytes = self.mailbox.take(self.key, self.timeout)?;
        let n = bytes.len().min(self.cap);
        Some(bytes[..n].to_vec())
    }
}

/// In-process communicator: each rank is a thread holding its own
/// `RayonComm`, all sharing one mailbox. Messages between a pair of ranks
/// with the same tag are delivered in FIFO order.
#[derive(Clone, Debug)]
pub struct RayonComm {
    rank: usize,
    size: usize,
    mailbox: Arc<Mailbox>,
    next_tag: Arc<AtomicU16>,
    recv_timeout: Option<Duration>,
}

impl RayonComm {
    /// Rank `rank` of `size` on the process-global mailbox.
    pub fn new(rank: usize, size: usize) -> Self {
        Self::on_mailbox(rank, size, Arc::clone(&GLOBAL_MAILBOX))
    }

    /// `size` ranks sharing a private mailbox; element `r` is rank `r`.
    pub fn world(size: usize) -> Vec<RayonComm> {
        let mailbox = Arc::new(Mailbox::default());
        (0..size)
            .map(|rank| Self::on_mailbox(rank, size, Arc::clone(&mailbox)))
            .collect()
    }

    fn on_mailbox(rank: usize, size: usize, mailbox: Arc<Mailbox>) -> Self {
        Self {
            rank,
            size,
            mailbox,
            next_tag: Arc::new(AtomicU16::new(FIRST_TAG)),
            recv_timeout: None,
        }
    }

    /// Give up on receives after `timeout`; `wait` then yields `None`.
    pub fn with_recv_timeout(mut self, timeout: Duration) -> Self {
        self.recv_timeout = Some(timeout);
        self
    }
}

impl Communicator for RayonComm {
    type SendHandle = ();
    type RecvHandle = LocalHandle;

    fn isend(&self, peer: usize, tag: u16, buf: &[u8]) -> Self::SendHandle {
        log::trace!("[rank {}] isend {} bytes to {peer} (tag {tag:#x})", self.rank, buf.len());
        self.mailbox
            .post((self.rank, peer, tag), Bytes::copy_from_slice(buf));
    }

    fn irecv(&self, peer: usize, tag: u16, buf: &mut [u8]) -> Self::RecvHandle {
        LocalHandle {
            mailbox: Arc::clone(&self.mailbox),
            key: (peer, self.rank, tag),
            cap: buf.len(),
            timeout: self.recv_timeout,
        }
    }

    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.size
    }

    fn reserve_tag_range(&self, n: u16) -> Result<CommTag, CmeshError> {
        Ok(CommTag(self.next_tag.fetch_add(n, Ordering::Relaxed)))
    }
}

// --- MPI backend (feature = "mpi-support") ---
#[cfg(feature = "mpi-support")]
mod mpi_backend {
    use super::*;
    use mpi::environment::Universe;
    use mpi::request::{Request, StaticScope};
    use mpi::topology::SimpleCommunicator;
    use mpi::traits::*;
    use std::cell::Cell;

    /// Communicator over `MPI_COMM_WORLD`.
    pub struct MpiComm {
        _universe: Universe,
        world: SimpleCommunicator,
        rank: usize,
        size: usize,
        next_tag: Cell<u16>,
    }

    impl MpiComm {
        /// Initialise MPI. Fails if MPI was already initialised.
        pub fn new() -> Result<Self, CmeshError> {
            let universe = mpi::initialize()
                .ok_or_else(|| CmeshError::comm(0, "MPI already initialised"))?;
            let world = universe.world();
            let rank = world.rank() as usize;
            let size = world.size() as usize;
            Ok(Self {
                _universe: universe,
                world,
                rank,
                size,
                next_tag: Cell::new(FIRST_TAG),
            })
        }
    }

    /// Pending non-blocking send; owns its buffer until completion.
    pub struct MpiSendHandle {
        req: Option<Request<'static, [u8], StaticScope>>,
        buf: *mut [u8],
    }

    impl Wait for MpiSendHandle {
        fn wait(mut self) -> Option<Vec<u8>> {
            if let Some(req) = self.req.take() {
                req.wait();
            }
            // SAFETY: `buf` came from `Box::leak` in `isend` and the request
            // that borrowed it has completed.
            drop(unsafe { Box::from_raw(self.buf) });
            None
        }
    }

    /// Receive posted lazily: the blocking receive happens in `wait`, after
    /// all sends of the phase are in flight.
    pub struct MpiRecvHandle {
        world: SimpleCommunicator,
        peer: i32,
        tag: i32,
        cap: usize,
    }

    impl Wait for MpiRecvHandle {
        fn wait(self) -> Option<Vec<u8>> {
            let (mut data, _status) = self
                .world
                .process_at_rank(self.peer)
                .receive_vec_with_tag::<u8>(self.tag);
            data.truncate(self.cap);
            Some(data)
        }
    }

    impl Communicator for MpiComm {
        type SendHandle = MpiSendHandle;
        type RecvHandle = MpiRecvHandle;

        fn isend(&self, peer: usize, tag: u16, buf: &[u8]) -> MpiSendHandle {
            let data: &'static mut [u8] = Box::leak(buf.to_vec().into_boxed_slice());
            let ptr: *mut [u8] = data;
            // SAFETY: the leaked buffer stays alive until `wait` reclaims it.
            let shared: &'static [u8] = unsafe { &*ptr };
            let req = self
                .world
                .process_at_rank(peer as i32)
                .immediate_send_with_tag(StaticScope, shared, tag as i32);
            MpiSendHandle {
                req: Some(req),
                buf: ptr,
            }
        }

        fn irecv(&self, peer: usize, tag: u16, buf: &mut [u8]) -> MpiRecvHandle {
            MpiRecvHandle {
                world: SimpleCommunicator::world(),
                peer: peer as i32,
                tag: tag as i32,
                cap: buf.len(),
            }
        }

        fn rank(&self) -> usize {
            self.rank
        }

        fn size(&self) -> usize {
            self.size
        }

        fn reserve_tag_range(&self, n: u16) -> Result<CommTag, CmeshError> {
            let base = self.next_tag.get();
            self.next_tag.set(base.wrapping_add(n));
            Ok(CommTag(base))
        }
    }
}

#[cfg(feature = "mpi-support")]
pub use mpi_backend::MpiComm;
