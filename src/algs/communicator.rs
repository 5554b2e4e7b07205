//! Thin façade over intra-process (threaded) or inter-process (MPI) message passing.
//!
//! Messages are contiguous byte slices. Sends are buffered and never block;
//! receives complete on [`Wait::wait`]. Every `(src, dst, tag)` channel is
//! FIFO, so two collectives that happen to reuse a tag cannot steal each
//! other's messages as long as all ranks issue them in the same order.

use bytes::Bytes;
use dashmap::DashMap;
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

/// Non-blocking point-to-point interface.
pub trait Communicator {
    /// Handle returned by `isend`.
    type SendHandle: Wait;
    /// Handle returned by `irecv`.
    type RecvHandle: Wait;

    fn isend(&self, peer: usize, tag: u16, buf: &[u8]) -> Self::SendHandle;
    /// Post a receive of at most `buf.len()` bytes; the data comes back from `wait`.
    fn irecv(&self, peer: usize, tag: u16, buf: &mut [u8]) -> Self::RecvHandle;

    fn rank(&self) -> usize;
    fn size(&self) -> usize;

    /// True for the serial backend, which short-circuits every exchange.
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

/// Message tag newtype.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct CommTag(u16);

impl CommTag {
    pub const fn new(tag: u16) -> Self {
        CommTag(tag)
    }
    pub const fn as_u16(self) -> u16 {
        self.0
    }
    pub const fn offset(self, by: u16) -> Self {
        CommTag(self.0.wrapping_add(by))
    }
}

/// Tag pair used by a size-then-payload exchange.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct ExchangeTags {
    pub sizes: CommTag,
    pub data: CommTag,
}

impl ExchangeTags {
    pub const fn from_base(base: CommTag) -> Self {
        Self {
            sizes: base,
            data: base.offset(1),
        }
    }
}

/// Hands out consecutive [`ExchangeTags`] starting at a base tag.
#[derive(Clone, Debug)]
pub struct TagSequence {
    next: CommTag,
}

impl TagSequence {
    pub fn new(base: u16) -> Self {
        Self {
            next: CommTag::new(base),
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn next(&mut self) -> ExchangeTags {
        let tags = ExchangeTags::from_base(self.next);
        self.next = self.next.offset(2);
        tags
    }
}

/// Single-process communicator: rank 0 of 1, every exchange is local.
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
    fn is_no_comm(&self) -> bool {
        true
    }
}

// --- RayonComm: intra-process ranks on separate threads ---
type Key = (usize, usize, u16); // (src, dst, tag)

#[derive(Default)]
struct Mailbox {
    queues: DashMap<Key, VecDeque<Bytes>>,
    generation: Mutex<u64>,
    arrived: Condvar,
}

impl Mailbox {
    fn post(&self, key: Key, payload: Bytes) {
        self.queues.entry(key).or_default().push_back(payload);
        let mut g = self.generation.lock();
        *g = g.wrapping_add(1);
        self.arrived.notify_all();
    }

    fn pop(&self, key: &Key) -> Option<Bytes> {
        self.queues.get_mut(key).and_then(|mut q| q.pop_front())
    }

    fn take(&self, key: Key) -> Bytes {
        let mut g = self.generation.lock();
        loop {
            if let Some(b) = self.pop(&key) {
                return b;
            }
            self.arrived.wait_for(&mut g, Duration::from_millis(5));
        }
    }
}

/// Pending receive on a [`RayonComm`] mailbox.
pub struct LocalHandle {
    mailbox: Arc<Mailbox>,
    key: Key,
    len: usize,
}

impl Wait for LocalHandle {
    fn wait(self) -> Option<Vec<u8>> {
        let bytes = self.mailbox.take(self.key);
        let n = bytes.len().min(self.len);
        Some(bytes[..n].to_vec())
    }
}

/// One rank of an in-process world. Ranks of the same world share a mailbox;
/// ranks of different worlds never see each other's messages.
#[derive(Clone)]
pub struct RayonComm {
    rank: usize,
    size: usize,
    mailbox: Arc<Mailbox>,
}

impl std::fmt::Debug for RayonComm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RayonComm")
            .field("rank", &self.rank)
            .field("size", &self.size)
            .finish()
    }
}

impl RayonComm {
    /// Create all `size` ranks of a fresh world.
    pub fn world(size: usize) -> Vec<RayonComm> {
        let mailbox = Arc::new(Mailbox::default());
        (0..size)
            .map(|rank| RayonComm {
                rank,
                size,
                mailbox: Arc::clone(&mailbox),
            })
            .collect()
    }
}

impl Communicator for RayonComm {
    type SendHandle = ();
    type RecvHandle = LocalHandle;

    fn isend(&self, peer: usize, tag: u16, buf: &[u8]) {
        self.mailbox
            .post((self.rank, peer, tag), Bytes::copy_from_slice(buf));
    }

    fn irecv(&self, peer: usize, tag: u16, buf: &mut [u8]) -> LocalHandle {
        LocalHandle {
            mailbox: Arc::clone(&self.mailbox),
            key: (peer, self.rank, tag),
            len: buf.len(),
        }
    }

    fn rank(&self) -> usize {
        self.rank
    }
    fn size(&self) -> usize {
        self.size
    }
}

// --- MPI backend (feature = "mpi-support") ---
#[cfg(feature = "mpi-support")]
mod mpi_backend {
    use super::{Communicator, Wait};
    use crate::balance_error::BalanceError;
    use mpi::request::StaticScope;
    use mpi::topology::SimpleCommunicator;
    use mpi::traits::{Communicator as _, Destination, Source};

    pub struct MpiComm {
        world: SimpleCommunicator,
        _universe: mpi::environment::Universe,
        rank: usize,
        size: usize,
    }

    impl MpiComm {
        /// Initialize MPI and wrap `MPI_COMM_WORLD`.
        pub fn new() -> Result<Self, BalanceError> {
            let universe = mpi::initialize().ok_or_else(|| BalanceError::CommError {
                neighbor: 0,
                message: "MPI was already initialized".into(),
            })?;
            let world = universe.world();
            let rank = world.rank() as usize;
            let size = world.size() as usize;
            Ok(Self {
                world,
                _universe: universe,
                rank,
                size,
            })
        }
    }

    /// Outstanding immediate send; frees the send buffer once complete.
    pub struct MpiSendHandle(Box<dyn FnOnce()>);

    impl Wait for MpiSendHandle {
        fn wait(self) -> Option<Vec<u8>> {
            (self.0)();
            None
        }
    }

    /// Completed receive.
    pub struct MpiRecvHandle(Vec<u8>);

    impl Wait for MpiRecvHandle {
        fn wait(self) -> Option<Vec<u8>> {
            Some(self.0)
        }
    }

    impl Communicator for MpiComm {
        type SendHandle = MpiSendHandle;
        type RecvHandle = MpiRecvHandle;

        fn isend(&self, peer: usize, tag: u16, buf: &[u8]) -> MpiSendHandle {
            let raw: *mut [u8] = Box::into_raw(buf.to_vec().into_boxed_slice());
            // SAFETY: `raw` stays alive until the request has completed below.
            let data: &'static [u8] = unsafe { &*raw };
            let req = self
                .world
                .process_at_rank(peer as i32)
                .immediate_send_with_tag(StaticScope, data, tag as i32);
            MpiSendHandle(Box::new(move || {
                req.wait();
                // SAFETY: the request completed, nothing else references `raw`.
                drop(unsafe { Box::from_raw(raw) });
            }))
        }

        fn irecv(&self, peer: usize, tag: u16, buf: &mut [u8]) -> MpiRecvHandle {
            let (mut msg, _status) = self
                .world
                .process_at_rank(peer as i32)
                .receive_vec_with_tag::<u8>(tag as i32);
            msg.truncate(buf.len());
            MpiRecvHandle(msg)
        }

        fn rank(&self) -> usize {
            self.rank
        }
        fn size(&self) -> usize {
            self.size
        }
    }
}

#[cfg(feature = "mpi-support")]
pub use mpi_backend::MpiComm;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rayon_roundtrip_two_ranks() {
        let world = RayonComm::world(2);
        let mut recv_buf = [0u8; 4];
        let recv_handle = world[1].irecv(0, 7, &mut recv_buf);
        world[0].isend(1, 7, &[1, 2, 3, 4]).wait();
        let data = recv_handle.wait().expect("data from rank 0");
        recv_buf.copy_from_slice(&data);
        assert_eq!(&recv_buf, &[1, 2, 3, 4]);
    }

    #[test]
    fn channels_are_fifo() {
        let world = RayonComm::world(2);
        world[0].isend(1, 3, &[1]);
        world[0].isend(1, 3, &[2]);
        let mut b = [0u8; 1];
        let first = world[1].irecv(0, 3, &mut b).wait().unwrap();
        let second = world[1].irecv(0, 3, &mut b).wait().unwrap();
        assert_eq!((first[0], second[0]), (1, 2));
    }

    #[test]
    fn worlds_are_isolated() {
        let a = RayonComm::world(2);
        let b = RayonComm::world(2);
        a[0].isend(1, 1, &[10]);
        b[0].isend(1, 1, &[20]);
        let mut buf = [0u8; 1];
        assert_eq!(b[1].irecv(0, 1, &mut buf).wait().unwrap(), vec![20]);
        assert_eq!(a[1].irecv(0, 1, &mut buf).wait().unwrap(), vec![10]);
    }

    #[test]
    fn receive_truncates_to_buffer() {
        let world = RayonComm::world(2);
        world[1].isend(0, 0, &[1, 2, 3]);
        let mut buf = [0u8; 2];
        assert_eq!(world[0].irecv(1, 0, &mut buf).wait().unwrap(), vec![1, 2]);
    }

    #[test]
    fn receive_blocks_until_sent() {
        let world = RayonComm::world(2);
        let (c0, c1) = (world[0].clone(), world[1].clone());
        std::thread::scope(|s| {
            s.spawn(move || {
                let mut buf = [0u8; 1];
                let got = c1.irecv(0, 5, &mut buf).wait().unwrap();
                assert_eq!(got, vec![99]);
            });
            std::thread::sleep(Duration::from_millis(20));
            c0.isend(1, 5, &[99]);
        });
    }

    #[test]
    fn tag_sequence_advances_in_pairs() {
        let mut seq = TagSequence::new(100);
        let a = seq.next();
        let b = seq.next();
        assert_eq!((a.sizes.as_u16(), a.data.as_u16()), (100, 101));
        assert_eq!((b.sizes.as_u16(), b.data.as_u16()), (102, 103));
    }

    #[test]
    fn no_comm_is_single_rank() {
        let c = NoComm;
        assert_eq!((c.rank(), c.size()), (0, 1));
        assert!(c.is_no_comm());
        assert!(c.isend(0, 0, &[1]).wait().is_none());
    }
}
