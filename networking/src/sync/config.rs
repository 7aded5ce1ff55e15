//! Sync engine operating limits.
//!
//! Protocol-level limits that operators may tune live in `chain::config`;
//! these are internal bounds of the engine.

/// Transaction and consensus payload ids remembered node-wide to stop
/// relay loops.
pub const MAX_PROCESSED_IDS: usize = 1024;

/// Maximum block hashes announced in reply to one `getblocks`.
pub const MAX_BLOCKS_PER_INV: usize = 500;

/// Dial attempts per seed address before it is dropped from the retry list.
pub const MAX_RETRY_COUNT: u32 = 3;
