pub mod auxpow;
pub mod block;
pub mod checkpoint;
pub mod consensus;
pub mod merkle;
pub mod serialization;
pub mod transaction;
pub mod types;

pub use auxpow::{AuxPow, BtcHeader, BtcOutPoint, BtcTx, BtcTxIn, BtcTxOut};
pub use block::{Block, BlockHeader, TrimmedBlock};
pub use checkpoint::{Checkpoint, CheckpointError, parse_checkpoints};
pub use consensus::ConsensusPayload;
pub use serialization::{DecodeError, WireDecode, WireEncode};
pub use transaction::{Program, Transaction, TransactionType, TxAttribute, TxOutput, UtxoInput};
pub use types::{Bytes32, Height, sha256d};
