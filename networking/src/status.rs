use metrics::server::StatusProvider;
use serde::Serialize;

use crate::node::{NodeContext, PeerInfo};
use crate::sync::SyncState;
use crate::types::{Direction, PeerState};

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct NeighborStatus {
    pub id: String,
    pub addr: String,
    pub direction: Direction,
    pub state: PeerState,
    pub height: u64,
    pub relay: bool,
    pub flight_heights: Vec<u32>,
    /// Designated header-sync source.
    pub sync_source: bool,
    pub sync_failed: bool,
}

/// Read-only view of the node served on `/status`.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct NodeStatus {
    pub id: String,
    pub height: u32,
    pub header_height: u32,
    pub neighbor_count: usize,
    pub syncing: bool,
    pub header_first: bool,
    pub sync_state: SyncState,
    pub sync_peer: Option<String>,
    pub next_checkpoint: Option<u32>,
    pub neighbors: Vec<NeighborStatus>,
}

impl NodeContext {
    pub fn snapshot(&self) -> NodeStatus {
        let sync = self.sync_status();
        let mut neighbors: Vec<NeighborStatus> = self
            .neighbors
            .all()
            .iter()
            .map(|peer| {
                let mut flight_heights = peer.flight_heights();
                flight_heights.sort_unstable();
                NeighborStatus {
                    id: format!("{:#x}", peer.id()),
                    addr: peer.addr().to_string(),
                    direction: peer.direction(),
                    state: peer.state(),
                    height: peer.height(),
                    relay: peer.relay(),
                    flight_heights,
                    sync_source: peer.is_sync_headers(),
                    sync_failed: peer.is_sync_failed(),
                }
            })
            .collect();
        neighbors.sort_by(|a, b| b.height.cmp(&a.height).then_with(|| a.id.cmp(&b.id)));

        NodeStatus {
            id: format!("{:#x}", self.local.id()),
            height: self.ledger.current_height().0,
            header_height: self.ledger.header_height().0,
            neighbor_count: neighbors.len(),
            syncing: sync.state.is_syncing(),
            header_first: sync.state == SyncState::HeadersFirst,
            sync_state: sync.state,
            sync_peer: sync.sync_peer.map(|id| format!("{id:#x}")),
            next_checkpoint: self.checkpoints.next_checkpoint().map(|c| c.height.0),
            neighbors,
        }
    }
}

impl StatusProvider for NodeContext {
    fn status(&self) -> serde_json::Value {
        serde_json::to_value(self.snapshot()).unwrap_or_default()
    }
}
