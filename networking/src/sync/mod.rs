/// Block synchronization for the AuxPow full node.
///
/// This module keeps the local chain caught up with the best connected peer.
/// It includes:
///
/// - **Checkpoints**: Trusted `(height, hash)` pairs that bound headers-first sync
/// - **Flight Window**: Counting semaphores capping outstanding header and block requests
/// - **Remote Peer**: Per-session state, sync flags, caches and in-flight bookkeeping
/// - **Neighbor Set**: Registered sessions and the heights they report
/// - **Sync Coordinator**: Chooses the sync peer and mode, drives requests, detects stalls
///
/// ## Architecture
///
/// The coordinator runs on a periodic tick:
/// 1. Ping established peers so their reported heights stay fresh
/// 2. If any peer is ahead and no sync is running, pick the highest usable peer
/// 3. Below the next checkpoint, fetch headers up to it, then the blocks behind them
/// 4. Past the last checkpoint, request block inventories directly from the best block
/// 5. Requests that outlive the timeout are re-sent to another peer
///
/// ## State Machine
///
/// - **IDLE**: Caught up, or no usable peer
/// - **HEADERS_FIRST**: Headers-first sync towards a checkpoint; relay is suspended
///   (falls through to BLOCKS_FIRST when the peer ends below the checkpoint)
/// - **BLOCKS_FIRST**: Inventory-driven block sync from the sync peer
pub mod checkpoints;
pub mod config;
pub mod flight_heights;
pub mod flight_window;
pub mod hash_cache;
pub mod locator;
pub mod neighbors;
pub mod peer;
pub mod requested_blocks;
pub mod service;
pub mod states;

pub use checkpoints::CheckpointRegistry;
pub use config::*;
pub use flight_heights::{FlightEntry, FlightHeights};
pub use flight_window::FlightWindow;
pub use hash_cache::HashCache;
pub use neighbors::NeighborSet;
pub use peer::{RemotePeer, SYNC_FAILED, SYNC_HEADERS};
pub use requested_blocks::RequestedBlocks;
pub use service::{SyncCoordinator, SyncStats};
pub use states::SyncState;

#[cfg(test)]
pub(crate) mod tests;
