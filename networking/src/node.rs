use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::Arc;

use chain::config::PROTOCOL_VERSION;
use chain::{ConfigError, NodeConfig};
use containers::{Bytes32, Checkpoint};
use k256::{PublicKey, SecretKey};
use metrics::Metrics;
use parking_lot::{Mutex, RwLock};

use crate::ledger::Ledger;
use crate::message::VersionPayload;
use crate::sync::config::{MAX_PROCESSED_IDS, MAX_RETRY_COUNT};
use crate::sync::{CheckpointRegistry, FlightWindow, HashCache, NeighborSet, SyncState};

/// Identity and capabilities shared by the local node and its peers.
pub trait PeerInfo {
    fn id(&self) -> u64;
    fn version(&self) -> u32;
    fn services(&self) -> u64;
    fn port(&self) -> u16;
    fn relay(&self) -> bool;
    fn height(&self) -> u64;
}

/// Effective connection limits after clamping the configured values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeLimits {
    pub max_outbound: usize,
    pub max_peers: usize,
    pub get_addr_max: usize,
    pub sync_reqs: usize,
    pub min_conn_cnt: usize,
}

impl From<&NodeConfig> for NodeLimits {
    fn from(config: &NodeConfig) -> Self {
        Self {
            max_outbound: config.effective_max_outbound(),
            max_peers: config.effective_max_peers(),
            get_addr_max: config.effective_get_addr_max(),
            sync_reqs: config.effective_sync_reqs(),
            min_conn_cnt: config.effective_min_conn_cnt(),
        }
    }
}

pub struct LocalNode {
    id: u64,
    public_key: PublicKey,
    services: u64,
    port: u16,
    limits: NodeLimits,
    ledger: Arc<dyn Ledger>,
}

impl LocalNode {
    pub fn new(public_key: PublicKey, config: &NodeConfig, ledger: Arc<dyn Ledger>) -> Self {
        Self {
            id: node_id(&public_key),
            public_key,
            services: config.node_type.services(),
            port: config.node_port,
            limits: NodeLimits::from(config),
            ledger,
        }
    }

    /// Local node with a fresh random key.
    pub fn generate(config: &NodeConfig, ledger: Arc<dyn Ledger>) -> Self {
        let secret = SecretKey::random(&mut rand::thread_rng());
        Self::new(secret.public_key(), config, ledger)
    }

    pub fn public_key(&self) -> &PublicKey {
        &self.public_key
    }

    pub fn limits(&self) -> NodeLimits {
        self.limits
    }
}

/// First 8 bytes of the compressed public key, little-endian.
pub fn node_id(public_key: &PublicKey) -> u64 {
    let compressed = public_key.to_sec1_bytes();
    let mut id = [0u8; 8];
    id.copy_from_slice(&compressed[..8]);
    u64::from_le_bytes(id)
}

impl PeerInfo for LocalNode {
    fn id(&self) -> u64 {
        self.id
    }

    fn version(&self) -> u32 {
        PROTOCOL_VERSION
    }

    fn services(&self) -> u64 {
        self.services
    }

    fn port(&self) -> u16 {
        self.port
    }

    fn relay(&self) -> bool {
        true
    }

    fn height(&self) -> u64 {
        self.ledger.current_height().0 as u64
    }
}

impl std::fmt::Debug for LocalNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalNode")
            .field("id", &format_args!("{:#x}", self.id))
            .field("services", &self.services)
            .field("port", &self.port)
            .field("limits", &self.limits)
            .finish()
    }
}

/// Which sync mode is running and against whom.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncStatus {
    pub state: SyncState,
    pub sync_peer: Option<u64>,
    /// Checkpoint bounding the current headers-first run.
    pub target: Option<Checkpoint>,
}

/// Addresses we know about, are dialing, or failed to reach.
#[derive(Debug, Default)]
pub struct AddressBook {
    known: RwLock<HashSet<SocketAddr>>,
    connecting: RwLock<HashSet<SocketAddr>>,
    retry: RwLock<HashMap<SocketAddr, u32>>,
}

impl AddressBook {
    pub fn add_known(&self, addr: SocketAddr) -> bool {
        self.known.write().insert(addr)
    }

    pub fn remove_known(&self, addr: &SocketAddr) -> bool {
        self.known.write().remove(addr)
    }

    pub fn is_known(&self, addr: &SocketAddr) -> bool {
        self.known.read().contains(addr)
    }

    pub fn known(&self) -> Vec<SocketAddr> {
        self.known.read().iter().copied().collect()
    }

    /// False if a dial to `addr` is already running.
    pub fn try_begin_connecting(&self, addr: SocketAddr) -> bool {
        self.connecting.write().insert(addr)
    }

    pub fn finish_connecting(&self, addr: &SocketAddr) -> bool {
        self.connecting.write().remove(addr)
    }

    pub fn is_connecting(&self, addr: &SocketAddr) -> bool {
        self.connecting.read().contains(addr)
    }

    pub fn connecting_count(&self) -> usize {
        self.connecting.read().len()
    }

    /// Count a failed dial. Returns the new failure count.
    pub fn record_failure(&self, addr: SocketAddr) -> u32 {
        let mut retry = self.retry.write();
        let count = retry.entry(addr).or_insert(0);
        *count += 1;
        *count
    }

    pub fn reset_retry(&self, addr: &SocketAddr) {
        self.retry.write().remove(addr);
    }

    pub fn retry_count(&self, addr: &SocketAddr) -> u32 {
        self.retry.read().get(addr).copied().unwrap_or(0)
    }

    pub fn retries_exhausted(&self, addr: &SocketAddr) -> bool {
        self.retry_count(addr) >= MAX_RETRY_COUNT
    }
}

/// Everything the session tasks, the sync driver and relay share.
pub struct NodeContext {
    pub local: LocalNode,
    pub config: NodeConfig,
    pub ledger: Arc<dyn Ledger>,
    pub neighbors: NeighborSet,
    pub checkpoints: CheckpointRegistry,
    pub window: FlightWindow,
    pub addresses: AddressBook,
    pub metrics: Arc<Metrics>,
    sync: Mutex<SyncStatus>,
    processed_ids: Mutex<HashCache>,
}

impl NodeContext {
    pub fn new(
        local: LocalNode,
        config: NodeConfig,
        ledger: Arc<dyn Ledger>,
        metrics: Arc<Metrics>,
    ) -> Result<Self, ConfigError> {
        let checkpoints = CheckpointRegistry::new(config.checkpoints()?)?;
        let window = FlightWindow::new(local.limits().sync_reqs);
        Ok(Self {
            local,
            config,
            ledger,
            neighbors: NeighborSet::new(),
            checkpoints,
            window,
            addresses: AddressBook::default(),
            metrics,
            sync: Mutex::new(SyncStatus::default()),
            processed_ids: Mutex::new(HashCache::new(MAX_PROCESSED_IDS)),
        })
    }

    pub fn magic(&self) -> u32 {
        self.config.magic
    }

    pub fn local_height(&self) -> u64 {
        self.local.height()
    }

    pub fn sync_status(&self) -> SyncStatus {
        *self.sync.lock()
    }

    pub fn is_header_syncing(&self) -> bool {
        self.sync.lock().state == SyncState::HeadersFirst
    }

    /// Enter `state` with `peer` as the source. Fails if a sync is already
    /// running, so only one caller wins per attempt.
    pub fn begin_sync(&self, state: SyncState, peer: u64, target: Option<Checkpoint>) -> bool {
        let mut sync = self.sync.lock();
        if sync.state.is_syncing() || !sync.state.can_transition_to(state) {
            return false;
        }
        *sync = SyncStatus {
            state,
            sync_peer: Some(peer),
            target,
        };
        true
    }

    /// Turn a running headers-first attempt into blocks-first, keeping the
    /// sync peer and dropping the checkpoint target.
    pub fn fall_back_to_blocks_first(&self) -> bool {
        let mut sync = self.sync.lock();
        if sync.state != SyncState::HeadersFirst || !sync.state.can_transition_to(SyncState::BlocksFirst) {
            return false;
        }
        sync.state = SyncState::BlocksFirst;
        sync.target = None;
        true
    }

    /// Back to idle. Returns the peer that was the sync source, if any.
    pub fn end_sync(&self) -> Option<u64> {
        let mut sync = self.sync.lock();
        let previous = sync.sync_peer;
        *sync = SyncStatus::default();
        previous
    }

    /// Record a transaction or consensus id. False if it was seen recently.
    pub fn mark_processed(&self, hash: Bytes32) -> bool {
        self.processed_ids.lock().insert(hash)
    }

    pub fn is_processed(&self, hash: &Bytes32) -> bool {
        self.processed_ids.lock().contains(hash)
    }

    pub fn version_payload(&self, timestamp: u32) -> VersionPayload {
        VersionPayload {
            version: self.local.version(),
            services: self.local.services(),
            timestamp,
            port: self.local.port(),
            nonce: self.local.id(),
            start_height: self.local.height(),
            relay: self.local.relay(),
        }
    }
}

impl std::fmt::Debug for NodeContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeContext")
            .field("local", &self.local)
            .field("neighbors", &self.neighbors.count())
            .field("sync", &self.sync_status())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::MemoryLedger;
    use containers::Block;
    use pretty_assertions::assert_eq;

    fn context() -> NodeContext {
        let ledger: Arc<dyn Ledger> = Arc::new(MemoryLedger::new(Block::genesis()));
        let config = NodeConfig::default();
        let local = LocalNode::generate(&config, ledger.clone());
        NodeContext::new(local, config, ledger, Arc::new(Metrics::new())).unwrap()
    }

    #[test]
    fn test_node_id_is_compressed_key_prefix() {
        let secret = SecretKey::from_slice(&[7u8; 32]).unwrap();
        let public = secret.public_key();
        let compressed = public.to_sec1_bytes();
        assert_eq!(compressed.len(), 33);
        let expected = u64::from_le_bytes(compressed[..8].try_into().unwrap());
        assert_eq!(node_id(&public), expected);
    }

    #[test]
    fn test_only_one_sync_begins() {
        let ctx = context();
        assert!(ctx.begin_sync(SyncState::BlocksFirst, 1, None));
        assert!(!ctx.begin_sync(SyncState::HeadersFirst, 2, None));
        assert_eq!(ctx.sync_status().sync_peer, Some(1));

        assert_eq!(ctx.end_sync(), Some(1));
        assert_eq!(ctx.sync_status(), SyncStatus::default());
        assert!(ctx.begin_sync(SyncState::HeadersFirst, 2, None));
        assert!(ctx.is_header_syncing());
        assert!(!ctx.begin_sync(SyncState::BlocksFirst, 3, None));
    }

    #[test]
    fn test_headers_first_falls_back_to_blocks_first() {
        let ctx = context();
        assert!(!ctx.fall_back_to_blocks_first());

        let target = "7:6f2b3c1d9e0a4b5c6d7e8f90112233445566778899aabbccddeeff0011223344"
            .parse()
            .unwrap();
        assert!(ctx.begin_sync(SyncState::HeadersFirst, 2, Some(target)));
        assert!(ctx.fall_back_to_blocks_first());

        let status = ctx.sync_status();
        assert_eq!(status.state, SyncState::BlocksFirst);
        assert_eq!(status.sync_peer, Some(2));
        assert_eq!(status.target, None);
        assert!(!ctx.fall_back_to_blocks_first());
    }

    #[test]
    fn test_processed_ids_deduplicate() {
        let ctx = context();
        let hash = Bytes32([9; 32]);
        assert!(ctx.mark_processed(hash));
        assert!(!ctx.mark_processed(hash));
        assert!(ctx.is_processed(&hash));
    }

    #[test]
    fn test_retry_count_exhausts() {
        let book = AddressBook::default();
        let addr: SocketAddr = "127.0.0.1:20338".parse().unwrap();
        for _ in 0..MAX_RETRY_COUNT {
            assert!(!book.retries_exhausted(&addr));
            book.record_failure(addr);
        }
        assert!(book.retries_exhausted(&addr));
        book.reset_retry(&addr);
        assert_eq!(book.retry_count(&addr), 0);
    }

    #[test]
    fn test_version_payload_advertises_local_node() {
        let ctx = context();
        let version = ctx.version_payload(42);
        assert_eq!(version.nonce, ctx.local.id());
        assert_eq!(version.start_height, 0);
        assert_eq!(version.port, ctx.config.node_port);
        assert!(version.relay);
    }
}
