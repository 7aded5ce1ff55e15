use std::sync::Arc;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result, bail};
use containers::{ConsensusPayload, Transaction};
use tracing::{debug, info, warn};

use crate::actor::NodeHandle;
use crate::message::{InvPayload, LocatorPayload, MAX_HEADERS_PER_MSG, Message, VersionPayload};
use crate::node::{NodeContext, PeerInfo};
use crate::relay::{RelayMessage, relay};
use crate::sync::config::MAX_BLOCKS_PER_INV;
use crate::sync::{RemotePeer, SyncCoordinator};
use crate::types::{InventoryType, PeerState};

/// Dispatches decoded messages from one session.
///
/// An `Err` means the session must be dropped; recoverable problems are
/// logged and swallowed here.
#[derive(Debug, Clone)]
pub struct MessageHandler {
    ctx: Arc<NodeContext>,
    node: NodeHandle,
    sync: SyncCoordinator,
}

pub fn unix_timestamp() -> u32 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as u32)
        .unwrap_or_default()
}

impl MessageHandler {
    pub fn new(ctx: Arc<NodeContext>, node: NodeHandle, sync: SyncCoordinator) -> Self {
        Self { ctx, node, sync }
    }

    pub fn node(&self) -> &NodeHandle {
        &self.node
    }

    pub async fn handle(&self, peer: &Arc<RemotePeer>, message: Message) -> Result<()> {
        peer.update_rx_time(Instant::now());

        let message = match message {
            Message::Version(version) => return self.on_version(peer, version).await,
            Message::Verack => return self.on_verack(peer).await,
            message if !peer.is_established() => {
                debug!(
                    addr = %peer.addr(),
                    command = %message.command(),
                    state = %peer.state(),
                    "dropping message before handshake"
                );
                return Ok(());
            }
            message => message,
        };

        match message {
            Message::Ping(height) => {
                peer.set_height(height);
                peer.send(&Message::Pong(self.ctx.local_height()))?;
            }
            Message::Pong(height) => peer.set_height(height),
            Message::GetHeaders(request) => self.serve_headers(peer, request)?,
            Message::GetBlocks(request) => self.serve_block_inventory(peer, request)?,
            Message::GetData(request) => self.serve_data(peer, request)?,
            Message::NotFound(hash) => self.sync.on_not_found(peer, hash),
            Message::Headers(headers) => {
                if let Err(err) = self.sync.on_headers(peer, headers) {
                    warn!(peer = format_args!("{:#x}", peer.id()), %err, "rejected headers");
                }
            }
            Message::Block(block) => {
                if let Err(err) = self.sync.on_block(peer, *block) {
                    warn!(peer = format_args!("{:#x}", peer.id()), %err, "rejected block");
                }
            }
            Message::Inv(inv) => self.sync.on_inv(peer, inv)?,
            Message::Tx(tx) => self.on_transaction(peer, *tx),
            Message::Consensus(payload) => self.on_consensus(peer, *payload),
            Message::Version(_) | Message::Verack => {}
        }
        Ok(())
    }

    async fn on_version(&self, peer: &Arc<RemotePeer>, version: VersionPayload) -> Result<()> {
        if version.nonce == self.ctx.local.id() {
            bail!("connected to self");
        }

        let state = peer.state();
        if !matches!(state, PeerState::Init | PeerState::Hand) {
            warn!(addr = %peer.addr(), %state, "unexpected version message");
            return Ok(());
        }

        peer.update_info(
            Instant::now(),
            version.version,
            version.services,
            version.port,
            version.nonce,
            version.relay,
            version.start_height,
        );
        self.node
            .register(peer.clone())
            .await
            .with_context(|| format!("rejecting peer {}", peer.addr()))?;

        // Inbound sessions answer with our own version before acknowledging.
        if state == PeerState::Init {
            peer.send(&Message::Version(self.ctx.version_payload(unix_timestamp())))?;
        }
        if !self.node.transition(peer, state, PeerState::Handshake).await {
            bail!("handshake from {state} rejected");
        }
        peer.send(&Message::Verack)?;
        debug!(
            peer = format_args!("{:#x}", version.nonce),
            addr = %peer.addr(),
            height = version.start_height,
            "version received"
        );
        Ok(())
    }

    async fn on_verack(&self, peer: &Arc<RemotePeer>) -> Result<()> {
        if !self
            .node
            .transition(peer, PeerState::Handshake, PeerState::Establish)
            .await
        {
            warn!(addr = %peer.addr(), state = %peer.state(), "unexpected verack");
        }
        Ok(())
    }

    fn serve_headers(&self, peer: &RemotePeer, request: LocatorPayload) -> Result<()> {
        let headers = self
            .ctx
            .ledger
            .headers_after(&request.locator, request.hash_stop, MAX_HEADERS_PER_MSG);
        debug!(peer = format_args!("{:#x}", peer.id()), count = headers.len(), "serving headers");
        peer.send(&Message::Headers(headers))?;
        Ok(())
    }

    fn serve_block_inventory(&self, peer: &RemotePeer, request: LocatorPayload) -> Result<()> {
        let hashes = self
            .ctx
            .ledger
            .block_hashes_after(&request.locator, request.hash_stop, MAX_BLOCKS_PER_INV);
        if hashes.is_empty() {
            return Ok(());
        }
        debug!(peer = format_args!("{:#x}", peer.id()), count = hashes.len(), "serving block inventory");
        peer.send(&Message::Inv(InvPayload::new(InventoryType::Block, hashes)))?;
        Ok(())
    }

    fn serve_data(&self, peer: &RemotePeer, request: InvPayload) -> Result<()> {
        for hash in request.hashes {
            let reply = match request.inv_type {
                InventoryType::Block => match self.ctx.ledger.get_block(&hash) {
                    Some(block) => Message::Block(Box::new(block)),
                    None => Message::NotFound(hash),
                },
                // No mempool or consensus store is kept here.
                InventoryType::Transaction | InventoryType::Consensus => Message::NotFound(hash),
            };
            peer.send(&reply)?;
        }
        Ok(())
    }

    fn on_transaction(&self, peer: &RemotePeer, tx: Transaction) {
        let hash = tx.hash();
        peer.cache_hash(hash);
        if !self.ctx.mark_processed(hash) {
            return;
        }
        let sent = relay(&self.ctx, Some(peer.id()), &RelayMessage::Transaction(tx));
        debug!(%hash, peers = sent, "transaction relayed");
    }

    fn on_consensus(&self, peer: &RemotePeer, payload: ConsensusPayload) {
        let hash = payload.hash();
        peer.cache_hash(hash);
        if !self.ctx.mark_processed(hash) {
            return;
        }
        let height = payload.height;
        let sent = relay(&self.ctx, Some(peer.id()), &RelayMessage::Consensus(payload));
        if sent > 0 {
            info!(height = height.0, peers = sent, "consensus payload relayed");
        }
    }
}
