use containers::{Bytes32, Height};
use thiserror::Error;

use crate::ledger::LedgerError;

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("peer {0:#x} connection is closed")]
    PeerClosed(u64),
    #[error("flight window closed")]
    WindowClosed,
    #[error("header at height {height} is {got}, checkpoint requires {expected}")]
    CheckpointMismatch {
        height: Height,
        expected: Bytes32,
        got: Bytes32,
    },
    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RelayError {
    #[error("unknown relay message type: {0}")]
    UnknownMessageType(&'static str),
}
