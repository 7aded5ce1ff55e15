use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use parking_lot::RwLock;

use super::peer::RemotePeer;
use crate::node::PeerInfo;

/// All registered peer sessions, keyed by node id.
#[derive(Debug, Default)]
pub struct NeighborSet {
    peers: RwLock<HashMap<u64, Arc<RemotePeer>>>,
}

impl NeighborSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns false if a peer with the same id is already registered.
    pub fn add(&self, peer: Arc<RemotePeer>) -> bool {
        let mut peers = self.peers.write();
        let id = peer.id();
        if peers.contains_key(&id) {
            return false;
        }
        peers.insert(id, peer);
        true
    }

    /// Remove `peer` if it is the session registered under its id.
    pub fn remove(&self, peer: &Arc<RemotePeer>) -> bool {
        let mut peers = self.peers.write();
        match peers.get(&peer.id()) {
            Some(registered) if Arc::ptr_eq(registered, peer) => {
                peers.remove(&peer.id());
                true
            }
            _ => false,
        }
    }

    pub fn get(&self, id: u64) -> Option<Arc<RemotePeer>> {
        self.peers.read().get(&id).cloned()
    }

    pub fn contains(&self, id: u64) -> bool {
        self.peers.read().contains_key(&id)
    }

    pub fn contains_addr(&self, addr: &SocketAddr) -> bool {
        self.peers.read().values().any(|p| p.addr() == *addr)
    }

    pub fn count(&self) -> usize {
        self.peers.read().len()
    }

    pub fn all(&self) -> Vec<Arc<RemotePeer>> {
        self.peers.read().values().cloned().collect()
    }

    pub fn established(&self) -> Vec<Arc<RemotePeer>> {
        self.peers
            .read()
            .values()
            .filter(|p| p.is_established())
            .cloned()
            .collect()
    }

    pub fn established_count(&self) -> usize {
        self.peers.read().values().filter(|p| p.is_established()).count()
    }

    /// Heights reported by established peers.
    pub fn heights(&self) -> Vec<(u64, u64)> {
        self.peers
            .read()
            .values()
            .filter(|p| p.is_established())
            .map(|p| (p.id(), p.height()))
            .collect()
    }

    pub fn max_established_height(&self) -> Option<u64> {
        self.heights().into_iter().map(|(_, h)| h).max()
    }
}
