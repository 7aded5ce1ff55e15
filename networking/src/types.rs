use std::fmt::Display;
use std::sync::Arc;

use containers::DecodeError;
use serde::Serialize;

/// Fully framed wire message, encoded once and shared between peer queues.
pub type Frame = Arc<[u8]>;

/// Peer session state machine.
///
/// Tracks the lifecycle of a connection to a remote node:
/// INIT -> HAND -> HANDSHAKE -> ESTABLISH, with INACTIVITY reachable from
/// any state and terminal. Inbound sessions skip HAND because the first
/// thing they see is the remote version.
#[derive(Debug, Serialize, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum PeerState {
    /// Connection accepted or dialed, nothing exchanged yet.
    Init = 0,
    /// Local version sent, waiting for the remote version.
    Hand = 1,
    /// Versions exchanged, waiting for verack.
    Handshake = 2,
    /// Handshake complete; the session takes part in sync and relay.
    Establish = 3,
    /// Session closed.
    Inactivity = 4,
}

impl PeerState {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(PeerState::Init),
            1 => Some(PeerState::Hand),
            2 => Some(PeerState::Handshake),
            3 => Some(PeerState::Establish),
            4 => Some(PeerState::Inactivity),
            _ => None,
        }
    }

    pub fn can_transition_to(&self, target: PeerState) -> bool {
        match self {
            PeerState::Init => matches!(
                target,
                PeerState::Hand | PeerState::Handshake | PeerState::Inactivity
            ),
            PeerState::Hand => matches!(target, PeerState::Handshake | PeerState::Inactivity),
            PeerState::Handshake => matches!(target, PeerState::Establish | PeerState::Inactivity),
            PeerState::Establish => matches!(target, PeerState::Inactivity),
            PeerState::Inactivity => false,
        }
    }
}

impl Display for PeerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            PeerState::Init => "INIT",
            PeerState::Hand => "HAND",
            PeerState::Handshake => "HANDSHAKE",
            PeerState::Establish => "ESTABLISH",
            PeerState::Inactivity => "INACTIVITY",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Inbound,
    Outbound,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Inbound => "inbound",
            Direction::Outbound => "outbound",
        }
    }
}

/// Object kind carried by `inv`, `getdata` and relay announcements.
#[derive(Debug, Serialize, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum InventoryType {
    Transaction = 0x01,
    Block = 0x02,
    Consensus = 0xe0,
}

impl InventoryType {
    pub fn as_str(&self) -> &'static str {
        match self {
            InventoryType::Transaction => "tx",
            InventoryType::Block => "block",
            InventoryType::Consensus => "consensus",
        }
    }
}

impl TryFrom<u8> for InventoryType {
    type Error = DecodeError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x01 => Ok(InventoryType::Transaction),
            0x02 => Ok(InventoryType::Block),
            0xe0 => Ok(InventoryType::Consensus),
            other => Err(DecodeError::InvalidValue {
                field: "inventory type",
                value: other as u64,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inactivity_is_terminal() {
        for target in [
            PeerState::Init,
            PeerState::Hand,
            PeerState::Handshake,
            PeerState::Establish,
            PeerState::Inactivity,
        ] {
            assert!(!PeerState::Inactivity.can_transition_to(target));
        }
    }

    #[test]
    fn test_every_live_state_can_close() {
        for state in [
            PeerState::Init,
            PeerState::Hand,
            PeerState::Handshake,
            PeerState::Establish,
        ] {
            assert!(state.can_transition_to(PeerState::Inactivity));
        }
    }

    #[test]
    fn test_establish_requires_handshake() {
        assert!(!PeerState::Init.can_transition_to(PeerState::Establish));
        assert!(!PeerState::Hand.can_transition_to(PeerState::Establish));
        assert!(PeerState::Handshake.can_transition_to(PeerState::Establish));
    }

    #[test]
    fn test_state_byte_round_trip() {
        assert_eq!(PeerState::from_u8(PeerState::Establish as u8), Some(PeerState::Establish));
        assert_eq!(PeerState::from_u8(9), None);
    }
}
