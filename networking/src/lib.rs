//! Peer networking and block synchronization for an AuxPow full node.
//!
//! Sessions are plain TCP connections carrying framed messages
//! ([`message`]). The [`actor`] owns neighbor membership, [`handler`]
//! dispatches messages per session, [`sync`] keeps the local chain caught
//! up, and [`relay`] forwards transactions, consensus payloads and block
//! announcements.
pub mod actor;
pub mod error;
pub mod handler;
pub mod ledger;
pub mod message;
pub mod node;
pub mod relay;
pub mod status;
pub mod sync;
pub mod transport;
pub mod types;

pub use actor::{NodeActor, NodeHandle, RegisterError};
pub use error::{RelayError, SyncError};
pub use handler::MessageHandler;
pub use ledger::{BlockOutcome, Ledger, LedgerError, MemoryLedger};
pub use message::{Command, Message, MessageError};
pub use node::{AddressBook, LocalNode, NodeContext, PeerInfo, SyncStatus};
pub use relay::{RelayMessage, relay, relay_message, xmit, xmit_message};
pub use status::{NeighborStatus, NodeStatus};
pub use sync::{RemotePeer, SyncCoordinator, SyncState};
pub use transport::{Dialer, TcpDialer, Transport};
pub use types::{Direction, Frame, InventoryType, PeerState};
