use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::{Duration, Instant};

use chain::config::{MAX_CACHE_HASH, MAX_INV_CACHE_HASH};
use containers::Bytes32;
use parking_lot::{Mutex, RwLock};
use tokio::sync::{OwnedSemaphorePermit, mpsc, watch};
use tracing::debug;

use super::{flight_heights::FlightHeights, hash_cache::HashCache, requested_blocks::RequestedBlocks};
use crate::error::SyncError;
use crate::message::Message;
use crate::node::PeerInfo;
use crate::types::{Direction, Frame, PeerState};

/// Peer is the designated header-sync source.
pub const SYNC_HEADERS: u8 = 0x01;
/// Header sync from this peer failed; it is not chosen again this session.
pub const SYNC_FAILED: u8 = 0x02;

#[derive(Debug, Clone, Copy, Default)]
struct Identity {
    id: u64,
    version: u32,
    services: u64,
    port: u16,
    relay: bool,
    height: u64,
}

/// Session state for one connected remote node.
///
/// Every collection has its own lock so the reader task, the sync driver and
/// relay can touch different parts of the same session concurrently.
pub struct RemotePeer {
    addr: SocketAddr,
    direction: Direction,
    magic: u32,
    identity: RwLock<Identity>,
    last_rx: Mutex<Instant>,
    state: AtomicU8,
    sync_flags: AtomicU8,
    outbound: Mutex<Option<mpsc::UnboundedSender<Frame>>>,
    closed: watch::Sender<bool>,
    flight_heights: RwLock<FlightHeights>,
    cached_hashes: RwLock<HashCache>,
    inv_request_hashes: RwLock<HashCache>,
    requested_blocks: RwLock<RequestedBlocks>,
    header_permits: Mutex<VecDeque<OwnedSemaphorePermit>>,
    header_requested_at: Mutex<Option<Instant>>,
}

impl RemotePeer {
    pub fn new(
        addr: SocketAddr,
        direction: Direction,
        magic: u32,
        outbound: mpsc::UnboundedSender<Frame>,
    ) -> Self {
        Self {
            addr,
            direction,
            magic,
            identity: RwLock::new(Identity::default()),
            last_rx: Mutex::new(Instant::now()),
            state: AtomicU8::new(PeerState::Init as u8),
            sync_flags: AtomicU8::new(0),
            outbound: Mutex::new(Some(outbound)),
            closed: watch::channel(false).0,
            flight_heights: RwLock::new(FlightHeights::new()),
            cached_hashes: RwLock::new(HashCache::new(MAX_CACHE_HASH)),
            inv_request_hashes: RwLock::new(HashCache::new(MAX_INV_CACHE_HASH)),
            requested_blocks: RwLock::new(RequestedBlocks::new()),
            header_permits: Mutex::new(VecDeque::new()),
            header_requested_at: Mutex::new(None),
        }
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// Refresh everything learned from a version message in one step.
    #[allow(clippy::too_many_arguments)]
    pub fn update_info(
        &self,
        time: Instant,
        version: u32,
        services: u64,
        port: u16,
        nonce: u64,
        relay: bool,
        height: u64,
    ) {
        *self.identity.write() = Identity {
            id: nonce,
            version,
            services,
            port,
            relay,
            height,
        };
        self.update_rx_time(time);
    }

    pub fn update_rx_time(&self, time: Instant) {
        *self.last_rx.lock() = time;
    }

    pub fn last_rx(&self) -> Instant {
        *self.last_rx.lock()
    }

    pub fn set_height(&self, height: u64) {
        self.identity.write().height = height;
    }

    pub fn state(&self) -> PeerState {
        PeerState::from_u8(self.state.load(Ordering::Acquire)).unwrap_or(PeerState::Inactivity)
    }

    pub fn is_established(&self) -> bool {
        self.state() == PeerState::Establish
    }

    /// Move from `old` to `new`; fails if the current state is not `old` or
    /// the transition is not allowed.
    pub fn compare_and_set_state(&self, old: PeerState, new: PeerState) -> bool {
        if !old.can_transition_to(new) {
            return false;
        }
        self.state
            .compare_exchange(old as u8, new as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub fn is_sync_headers(&self) -> bool {
        self.sync_flags.load(Ordering::Acquire) & SYNC_HEADERS != 0
    }

    pub fn set_sync_headers(&self, on: bool) {
        self.set_flag(SYNC_HEADERS, on);
    }

    pub fn is_sync_failed(&self) -> bool {
        self.sync_flags.load(Ordering::Acquire) & SYNC_FAILED != 0
    }

    pub fn set_sync_failed(&self, on: bool) {
        self.set_flag(SYNC_FAILED, on);
    }

    fn set_flag(&self, flag: u8, on: bool) {
        if on {
            self.sync_flags.fetch_or(flag, Ordering::AcqRel);
        } else {
            self.sync_flags.fetch_and(!flag, Ordering::AcqRel);
        }
    }

    pub fn send(&self, message: &Message) -> Result<(), SyncError> {
        self.send_frame(message.to_frame(self.magic).into())
    }

    pub fn send_frame(&self, frame: Frame) -> Result<(), SyncError> {
        let outbound = self.outbound.lock();
        match outbound.as_ref() {
            Some(sender) => sender.send(frame).map_err(|_| SyncError::PeerClosed(self.id())),
            None => Err(SyncError::PeerClosed(self.id())),
        }
    }

    // Flight heights

    pub fn store_flight_height(
        &self,
        height: u32,
        hash: Bytes32,
        permit: Option<OwnedSemaphorePermit>,
    ) -> bool {
        self.flight_heights.write().store(height, hash, permit)
    }

    pub fn remove_flight_height(&self, height: u32) -> bool {
        self.flight_heights.write().remove(height).is_some()
    }

    pub fn remove_flight_hash(&self, hash: &Bytes32) -> Option<u32> {
        self.flight_heights.write().remove_hash(hash).map(|e| e.height)
    }

    pub fn remove_flight_heights_less_than(&self, threshold: u32) -> usize {
        self.flight_heights.write().remove_less_than(threshold)
    }

    pub fn flight_heights(&self) -> Vec<u32> {
        self.flight_heights.read().heights()
    }

    pub fn flight_entries(&self) -> Vec<(u32, Bytes32)> {
        self.flight_heights.read().entries().collect()
    }

    // Seen-hash cache

    pub fn cache_hash(&self, hash: Bytes32) -> bool {
        self.cached_hashes.write().insert(hash)
    }

    pub fn exist_hash(&self, hash: &Bytes32) -> bool {
        self.cached_hashes.read().contains(hash)
    }

    // Requested inventory cache

    pub fn cache_inv_hash(&self, hash: Bytes32) -> bool {
        self.inv_request_hashes.write().insert(hash)
    }

    pub fn exist_inv_hash(&self, hash: &Bytes32) -> bool {
        self.inv_request_hashes.read().contains(hash)
    }

    pub fn delete_inv_hash(&self, hash: &Bytes32) -> bool {
        self.inv_request_hashes.write().remove(hash)
    }

    // Requested blocks

    pub fn add_requested_block(&self, hash: Bytes32, at: Instant) {
        self.requested_blocks.write().insert(hash, at);
    }

    /// Hand a window slot to a queued request. False if it was answered or
    /// given up on while waiting.
    pub fn dispatch_requested_block(&self, hash: &Bytes32, at: Instant, permit: OwnedSemaphorePermit) -> bool {
        self.requested_blocks.write().dispatch(hash, at, permit)
    }

    pub fn remove_requested_block(&self, hash: &Bytes32) -> Option<Instant> {
        self.requested_blocks.write().remove(hash)
    }

    pub fn is_block_requested(&self, hash: &Bytes32) -> bool {
        self.requested_blocks.read().contains(hash)
    }

    pub fn stale_requests(&self, now: Instant, timeout: Duration) -> Vec<Bytes32> {
        self.requested_blocks.read().stale(now, timeout)
    }

    pub fn requested_block_count(&self) -> usize {
        self.requested_blocks.read().len()
    }

    // Header requests

    pub fn push_header_permit(&self, permit: OwnedSemaphorePermit, at: Instant) {
        self.header_permits.lock().push_back(permit);
        *self.header_requested_at.lock() = Some(at);
    }

    /// Give back the oldest header slot held for this peer.
    pub fn release_header_permit(&self) -> bool {
        let released = self.header_permits.lock().pop_front().is_some();
        if self.header_permits.lock().is_empty() {
            *self.header_requested_at.lock() = None;
        }
        released
    }

    pub fn header_requested_at(&self) -> Option<Instant> {
        *self.header_requested_at.lock()
    }

    pub fn header_permits_held(&self) -> usize {
        self.header_permits.lock().len()
    }

    /// Resolves once [`Self::close`] has run.
    pub fn closed_signal(&self) -> watch::Receiver<bool> {
        self.closed.subscribe()
    }

    /// Tear the session down: mark it inactive, release every flight-window
    /// slot, empty the caches and drop the connection handle. Idempotent.
    pub fn close(&self) {
        self.state.store(PeerState::Inactivity as u8, Ordering::Release);

        self.flight_heights.write().clear();
        self.cached_hashes.write().clear();
        self.inv_request_hashes.write().clear();
        self.requested_blocks.write().clear();
        self.header_permits.lock().clear();
        *self.header_requested_at.lock() = None;

        if self.outbound.lock().take().is_some() {
            debug!(peer = format_args!("{:#x}", self.id()), addr = %self.addr, "peer session closed");
        }
        self.closed.send_replace(true);
    }
}

impl PeerInfo for RemotePeer {
    fn id(&self) -> u64 {
        self.identity.read().id
    }

    fn version(&self) -> u32 {
        self.identity.read().version
    }

    fn services(&self) -> u64 {
        self.identity.read().services
    }

    fn port(&self) -> u16 {
        self.identity.read().port
    }

    fn relay(&self) -> bool {
        self.identity.read().relay
    }

    fn height(&self) -> u64 {
        self.identity.read().height
    }
}

impl std::fmt::Debug for RemotePeer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemotePeer")
            .field("id", &format_args!("{:#x}", self.id()))
            .field("addr", &self.addr)
            .field("state", &self.state())
            .field("height", &self.height())
            .finish()
    }
}
