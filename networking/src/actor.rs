use std::sync::Arc;

use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::node::{NodeContext, PeerInfo};
use crate::sync::RemotePeer;
use crate::types::PeerState;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegisterError {
    #[error("peer {0:#x} is the local node")]
    SelfConnection(u64),
    #[error("peer {0:#x} is already registered")]
    Duplicate(u64),
    #[error("peer limit of {0} reached")]
    TooManyPeers(usize),
    #[error("node actor stopped")]
    Stopped,
}

#[derive(Debug)]
pub enum NodeCommand {
    Register {
        peer: Arc<RemotePeer>,
        reply: oneshot::Sender<Result<(), RegisterError>>,
    },
    Transition {
        peer: Arc<RemotePeer>,
        from: PeerState,
        to: PeerState,
        reply: oneshot::Sender<bool>,
    },
    Disconnect {
        peer: Arc<RemotePeer>,
        reason: &'static str,
    },
}

/// Serializes membership changes of the neighbor set.
///
/// Session tasks never add or remove neighbors themselves; they send a
/// [`NodeCommand`] and the actor applies them one at a time.
pub struct NodeActor {
    ctx: Arc<NodeContext>,
    commands: mpsc::UnboundedReceiver<NodeCommand>,
}

#[derive(Debug, Clone)]
pub struct NodeHandle {
    commands: mpsc::UnboundedSender<NodeCommand>,
}

impl NodeActor {
    pub fn new(ctx: Arc<NodeContext>) -> (Self, NodeHandle) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { ctx, commands: rx }, NodeHandle { commands: tx })
    }

    pub async fn run(mut self) {
        while let Some(command) = self.commands.recv().await {
            self.handle(command);
        }
        debug!("node actor stopped");
    }

    fn handle(&self, command: NodeCommand) {
        match command {
            NodeCommand::Register { peer, reply } => {
                let _ = reply.send(self.register(peer));
            }
            NodeCommand::Transition {
                peer,
                from,
                to,
                reply,
            } => {
                let _ = reply.send(self.transition(&peer, from, to));
            }
            NodeCommand::Disconnect { peer, reason } => self.disconnect(&peer, reason),
        }
    }

    fn register(&self, peer: Arc<RemotePeer>) -> Result<(), RegisterError> {
        let id = peer.id();
        if id == self.ctx.local.id() {
            return Err(RegisterError::SelfConnection(id));
        }
        let max_peers = self.ctx.local.limits().max_peers;
        if self.ctx.neighbors.count() >= max_peers {
            return Err(RegisterError::TooManyPeers(max_peers));
        }
        let addr = peer.addr();
        if !self.ctx.neighbors.add(peer) {
            return Err(RegisterError::Duplicate(id));
        }
        self.ctx.addresses.add_known(addr);
        self.ctx.metrics.set_peers_connected(self.ctx.neighbors.count() as i64);
        debug!(peer = format_args!("{id:#x}"), %addr, "peer registered");
        Ok(())
    }

    fn transition(&self, peer: &RemotePeer, from: PeerState, to: PeerState) -> bool {
        if !peer.compare_and_set_state(from, to) {
            debug!(?peer, %from, %to, "rejected peer state transition");
            return false;
        }
        if to == PeerState::Establish {
            let established = self.ctx.neighbors.established_count();
            self.ctx.metrics.set_peers_established(established as i64);
            self.ctx
                .metrics
                .inc_peer_connection(peer.direction().as_str(), "established");
            info!(
                peer = format_args!("{:#x}", peer.id()),
                addr = %peer.addr(),
                height = peer.height(),
                established,
                "peer established"
            );
        }
        true
    }

    fn disconnect(&self, peer: &Arc<RemotePeer>, reason: &'static str) {
        let registered = self.ctx.neighbors.remove(peer);
        peer.close();

        let addr = peer.addr();
        self.ctx.addresses.finish_connecting(&addr);
        if registered {
            self.ctx.addresses.remove_known(&addr);
        }

        let status = self.ctx.sync_status();
        if registered && status.sync_peer == Some(peer.id()) {
            self.ctx.end_sync();
            self.ctx.metrics.set_header_first_mode(false);
            warn!(
                peer = format_args!("{:#x}", peer.id()),
                state = status.state.as_str(),
                "sync peer disconnected, sync reset"
            );
        }

        self.ctx.metrics.set_peers_connected(self.ctx.neighbors.count() as i64);
        self.ctx
            .metrics
            .set_peers_established(self.ctx.neighbors.established_count() as i64);
        self.ctx
            .metrics
            .inc_peer_disconnection(peer.direction().as_str(), reason);
        info!(
            peer = format_args!("{:#x}", peer.id()),
            %addr,
            reason,
            "peer disconnected"
        );
    }
}

impl NodeHandle {
    pub async fn register(&self, peer: Arc<RemotePeer>) -> Result<(), RegisterError> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(NodeCommand::Register { peer, reply })
            .map_err(|_| RegisterError::Stopped)?;
        rx.await.unwrap_or(Err(RegisterError::Stopped))
    }

    pub async fn transition(&self, peer: &Arc<RemotePeer>, from: PeerState, to: PeerState) -> bool {
        let (reply, rx) = oneshot::channel();
        let command = NodeCommand::Transition {
            peer: peer.clone(),
            from,
            to,
            reply,
        };
        if self.commands.send(command).is_err() {
            return false;
        }
        rx.await.unwrap_or(false)
    }

    /// Queue a disconnect. The session is closed once the actor handles it.
    pub fn disconnect(&self, peer: &Arc<RemotePeer>, reason: &'static str) {
        let command = NodeCommand::Disconnect {
            peer: peer.clone(),
            reason,
        };
        if self.commands.send(command).is_err() {
            // Actor is gone; still release the session's resources.
            peer.close();
        }
    }
}
