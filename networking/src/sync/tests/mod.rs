mod checkpoint_tests;
mod handler_tests;
mod peer_tests;
mod relay_tests;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use chain::NodeConfig;
use containers::{Block, BlockHeader, Transaction};
use metrics::Metrics;
use tokio::sync::mpsc;

use crate::ledger::{Ledger, MemoryLedger};
use crate::message::Message;
use crate::node::{LocalNode, NodeContext};
use crate::sync::RemotePeer;
use crate::types::{Direction, Frame, PeerState};

pub(crate) const MAGIC: u32 = chain::config::DEFAULT_MAGIC;

pub(crate) fn context_with(config: NodeConfig) -> (Arc<NodeContext>, Arc<MemoryLedger>) {
    let ledger = Arc::new(MemoryLedger::new(Block::genesis()));
    let shared: Arc<dyn Ledger> = ledger.clone();
    let local = LocalNode::generate(&config, shared.clone());
    let ctx = NodeContext::new(local, config, shared, Arc::new(Metrics::new())).unwrap();
    (Arc::new(ctx), ledger)
}

pub(crate) fn context() -> (Arc<NodeContext>, Arc<MemoryLedger>) {
    context_with(NodeConfig::default())
}

fn addr_for(id: u64) -> SocketAddr {
    SocketAddr::from(([10, 0, (id >> 8) as u8, id as u8], 20338))
}

/// Session that has not exchanged anything yet.
pub(crate) fn fresh_peer(id: u64) -> (Arc<RemotePeer>, mpsc::UnboundedReceiver<Frame>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let peer = Arc::new(RemotePeer::new(addr_for(id), Direction::Outbound, MAGIC, tx));
    (peer, rx)
}

/// Registered, handshaken session reporting `height`.
pub(crate) fn established_peer(
    ctx: &NodeContext,
    id: u64,
    height: u64,
) -> (Arc<RemotePeer>, mpsc::UnboundedReceiver<Frame>) {
    let (peer, rx) = fresh_peer(id);
    peer.update_info(Instant::now(), 0, 1, 20338, id, true, height);
    assert!(peer.compare_and_set_state(PeerState::Init, PeerState::Handshake));
    assert!(peer.compare_and_set_state(PeerState::Handshake, PeerState::Establish));
    assert!(ctx.neighbors.add(peer.clone()));
    (peer, rx)
}

/// Everything queued for a peer so far, decoded.
pub(crate) fn drain(rx: &mut mpsc::UnboundedReceiver<Frame>) -> Vec<Message> {
    let mut messages = Vec::new();
    while let Ok(frame) = rx.try_recv() {
        messages.push(Message::from_frame(MAGIC, &frame).unwrap());
    }
    messages
}

pub(crate) fn child_of(parent: &BlockHeader, nonce: u32) -> Block {
    let height = parent.height.next();
    let mut block = Block {
        header: BlockHeader {
            prev_block_hash: parent.hash(),
            timestamp: parent.timestamp + 15,
            bits: parent.bits,
            nonce,
            height,
            ..Default::default()
        },
        transactions: vec![Transaction::coinbase(height.0, nonce as u64, Vec::new())],
    };
    block.rebuild_merkle_root().unwrap();
    block
}

/// `len` blocks on top of genesis.
pub(crate) fn build_chain(len: usize) -> Vec<Block> {
    let genesis = Block::genesis();
    let mut blocks: Vec<Block> = Vec::new();
    for i in 0..len {
        let parent = blocks.last().map(|b| &b.header).unwrap_or(&genesis.header);
        let child = child_of(parent, i as u32);
        blocks.push(child);
    }
    blocks
}

/// Let spawned sync tasks run to their next await point.
pub(crate) async fn settle() {
    for _ in 0..8 {
        tokio::task::yield_now().await;
    }
}
