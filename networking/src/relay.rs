use containers::{Block, Bytes32, ConsensusPayload, Transaction};
use tracing::{debug, trace};

use crate::error::RelayError;
use crate::message::{InvPayload, Message};
use crate::node::{NodeContext, PeerInfo};
use crate::types::{Frame, InventoryType};

/// Objects that may be forwarded to neighbors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayMessage {
    Transaction(Transaction),
    Consensus(ConsensusPayload),
    /// Announced as a single-entry block `inv`.
    BlockHash(Bytes32),
    Block(Block),
}

impl RelayMessage {
    pub fn kind(&self) -> &'static str {
        match self {
            RelayMessage::Transaction(_) => "tx",
            RelayMessage::Consensus(_) => "consensus",
            RelayMessage::BlockHash(_) => "inv",
            RelayMessage::Block(_) => "block",
        }
    }

    pub fn to_message(&self) -> Message {
        match self {
            RelayMessage::Transaction(tx) => Message::Tx(Box::new(tx.clone())),
            RelayMessage::Consensus(payload) => Message::Consensus(Box::new(payload.clone())),
            RelayMessage::BlockHash(hash) => Message::Inv(InvPayload::single(InventoryType::Block, *hash)),
            RelayMessage::Block(block) => Message::Block(Box::new(block.clone())),
        }
    }

    /// Hash that peers are checked against before an announcement is sent.
    fn announced_hash(&self) -> Option<Bytes32> {
        match self {
            RelayMessage::BlockHash(hash) => Some(*hash),
            _ => None,
        }
    }
}

impl TryFrom<Message> for RelayMessage {
    type Error = RelayError;

    fn try_from(message: Message) -> Result<Self, Self::Error> {
        match message {
            Message::Tx(tx) => Ok(RelayMessage::Transaction(*tx)),
            Message::Consensus(payload) => Ok(RelayMessage::Consensus(*payload)),
            Message::Block(block) => Ok(RelayMessage::Block(*block)),
            Message::Inv(inv) if inv.inv_type == InventoryType::Block && inv.hashes.len() == 1 => {
                Ok(RelayMessage::BlockHash(inv.hashes[0]))
            }
            other => Err(RelayError::UnknownMessageType(other.command().as_str())),
        }
    }
}

/// Forward `message` to every established relaying neighbor except `from`.
///
/// Suspended while headers-first sync runs. Block announcements skip peers
/// that already hold the hash. Returns the number of peers sent to.
pub fn relay(ctx: &NodeContext, from: Option<u64>, message: &RelayMessage) -> usize {
    if ctx.is_header_syncing() {
        trace!(kind = message.kind(), "relay suspended during header sync");
        return 0;
    }

    let frame: Frame = message.to_message().to_frame(ctx.magic()).into();
    let announced = message.announced_hash();
    let mut sent = 0;

    for peer in ctx.neighbors.established() {
        if !peer.relay() || Some(peer.id()) == from {
            continue;
        }
        if let Some(hash) = announced {
            if peer.exist_hash(&hash) {
                continue;
            }
        }
        if peer.send_frame(frame.clone()).is_ok() {
            if let Some(hash) = announced {
                peer.cache_hash(hash);
            }
            sent += 1;
        }
    }

    if sent > 0 {
        ctx.metrics.inc_relayed(message.kind());
    }
    debug!(kind = message.kind(), peers = sent, "relayed message");
    sent
}

/// Relay a decoded wire message. Only relayable kinds are accepted.
pub fn relay_message(ctx: &NodeContext, from: Option<u64>, message: Message) -> Result<usize, RelayError> {
    let message = RelayMessage::try_from(message)?;
    Ok(relay(ctx, from, &message))
}

/// Send `message` to every established neighbor with no filtering.
pub fn xmit(ctx: &NodeContext, message: &RelayMessage) -> usize {
    let frame: Frame = message.to_message().to_frame(ctx.magic()).into();
    let sent = ctx
        .neighbors
        .established()
        .iter()
        .filter(|peer| peer.send_frame(frame.clone()).is_ok())
        .count();
    debug!(kind = message.kind(), peers = sent, "broadcast message");
    sent
}

/// Broadcast a decoded wire message. Only relayable kinds are accepted.
pub fn xmit_message(ctx: &NodeContext, message: Message) -> Result<usize, RelayError> {
    let message = RelayMessage::try_from(message)?;
    Ok(xmit(ctx, &message))
}
