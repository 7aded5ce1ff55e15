use std::collections::{BTreeMap, HashMap, btree_map::Entry};

use containers::{Block, BlockHeader, Bytes32, Height};
use parking_lot::RwLock;
use thiserror::Error;
use tracing::{debug, warn};

use crate::sync::locator::build_locator;

/// Future blocks kept while their parents are still missing.
pub const MAX_PENDING_BLOCKS: usize = 1024;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum LedgerError {
    #[error("block {0} already stored")]
    Duplicate(Bytes32),
    #[error("height {height} does not connect to tip {tip}")]
    Disconnected { height: Height, tip: Bytes32 },
    #[error("a different object is already stored at height {0}")]
    Conflict(Height),
    #[error("block at height {0} does not match the stored header chain")]
    NotOnHeaderChain(Height),
    #[error("pending block buffer is full ({0} blocks)")]
    PendingFull(usize),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockOutcome {
    /// Block extended the chain; `height` is the new best height.
    Connected { height: Height },
    /// Block is ahead of the tip and waits for its ancestors.
    Buffered,
}

/// Storage seam used by the sync engine.
///
/// The header chain runs ahead of the block chain during headers-first sync;
/// blocks may only connect on top of the stored headers.
pub trait Ledger: Send + Sync {
    fn current_block_hash(&self) -> Bytes32;
    fn current_height(&self) -> Height;
    fn current_header_hash(&self) -> Bytes32;
    fn header_height(&self) -> Height;
    fn header_hash_at(&self, height: Height) -> Option<Bytes32>;
    fn get_header(&self, hash: &Bytes32) -> Option<BlockHeader>;
    fn contains_block(&self, hash: &Bytes32) -> bool;
    fn get_block(&self, hash: &Bytes32) -> Option<Block>;

    /// Append headers that extend the header tip. Headers already on the
    /// chain are skipped. Returns how many were appended.
    fn add_headers(&self, headers: &[BlockHeader]) -> Result<usize, LedgerError>;

    /// Store a block. Duplicates are rejected with [`LedgerError::Duplicate`];
    /// blocks above the next height are buffered and connected in order.
    fn add_block(&self, block: Block) -> Result<BlockOutcome, LedgerError>;

    fn contains_header(&self, hash: &Bytes32) -> bool {
        self.get_header(hash).is_some()
    }

    fn block_locator_from_hash(&self, hash: &Bytes32) -> Vec<Bytes32> {
        match self.get_header(hash) {
            Some(header) => build_locator(header.height, |height| self.header_hash_at(height)),
            None => Vec::new(),
        }
    }

    /// Highest locator entry that is on the local header chain.
    fn fork_point(&self, locator: &[Bytes32]) -> Option<Height> {
        locator.iter().find_map(|hash| {
            let header = self.get_header(hash)?;
            (self.header_hash_at(header.height) == Some(*hash)).then_some(header.height)
        })
    }

    fn headers_after(&self, locator: &[Bytes32], hash_stop: Bytes32, max: usize) -> Vec<BlockHeader> {
        let start = self.fork_point(locator).unwrap_or_default();
        let tip = self.header_height();
        let mut headers = Vec::new();
        let mut height = start.next();
        while height <= tip && headers.len() < max {
            let Some(header) = self
                .header_hash_at(height)
                .and_then(|hash| self.get_header(&hash))
            else {
                break;
            };
            let done = header.hash() == hash_stop;
            headers.push(header);
            if done {
                break;
            }
            height = height.next();
        }
        headers
    }

    fn block_hashes_after(&self, locator: &[Bytes32], hash_stop: Bytes32, max: usize) -> Vec<Bytes32> {
        let start = self.fork_point(locator).unwrap_or_default();
        let tip = self.current_height();
        let mut hashes = Vec::new();
        let mut height = start.next();
        while height <= tip && hashes.len() < max {
            let Some(hash) = self.header_hash_at(height) else {
                break;
            };
            hashes.push(hash);
            if hash == hash_stop {
                break;
            }
            height = height.next();
        }
        hashes
    }
}

struct Inner {
    headers: HashMap<Bytes32, BlockHeader>,
    header_chain: Vec<Bytes32>,
    blocks: HashMap<Bytes32, Block>,
    block_chain: Vec<Bytes32>,
    pending: BTreeMap<u32, Block>,
}

impl Inner {
    fn connect(&mut self, block: Block) -> Result<Height, LedgerError> {
        let hash = block.hash();
        let height = block.height();
        let tip = self.block_chain.last().copied().unwrap_or_default();

        if height.0 as usize != self.block_chain.len() || block.header.prev_block_hash != tip {
            return Err(LedgerError::Disconnected { height, tip });
        }

        match self.header_chain.get(height.0 as usize) {
            Some(known) if *known != hash => return Err(LedgerError::NotOnHeaderChain(height)),
            Some(_) => {}
            None => {
                self.header_chain.push(hash);
                self.headers.insert(hash, block.header.clone());
            }
        }

        self.block_chain.push(hash);
        self.blocks.insert(hash, block);
        Ok(height)
    }
}

/// In-process ledger backing the node binary and tests.
pub struct MemoryLedger {
    inner: RwLock<Inner>,
}

impl MemoryLedger {
    pub fn new(genesis: Block) -> Self {
        let hash = genesis.hash();
        let mut headers = HashMap::new();
        headers.insert(hash, genesis.header.clone());
        let mut blocks = HashMap::new();
        blocks.insert(hash, genesis);

        Self {
            inner: RwLock::new(Inner {
                headers,
                header_chain: vec![hash],
                blocks,
                block_chain: vec![hash],
                pending: BTreeMap::new(),
            }),
        }
    }

    pub fn pending_len(&self) -> usize {
        self.inner.read().pending.len()
    }
}

impl Ledger for MemoryLedger {
    fn current_block_hash(&self) -> Bytes32 {
        self.inner.read().block_chain.last().copied().unwrap_or_default()
    }

    fn current_height(&self) -> Height {
        Height(self.inner.read().block_chain.len().saturating_sub(1) as u32)
    }

    fn current_header_hash(&self) -> Bytes32 {
        self.inner.read().header_chain.last().copied().unwrap_or_default()
    }

    fn header_height(&self) -> Height {
        Height(self.inner.read().header_chain.len().saturating_sub(1) as u32)
    }

    fn header_hash_at(&self, height: Height) -> Option<Bytes32> {
        self.inner.read().header_chain.get(height.0 as usize).copied()
    }

    fn get_header(&self, hash: &Bytes32) -> Option<BlockHeader> {
        self.inner.read().headers.get(hash).cloned()
    }

    fn contains_block(&self, hash: &Bytes32) -> bool {
        self.inner.read().blocks.contains_key(hash)
    }

    fn get_block(&self, hash: &Bytes32) -> Option<Block> {
        self.inner.read().blocks.get(hash).cloned()
    }

    fn add_headers(&self, headers: &[BlockHeader]) -> Result<usize, LedgerError> {
        let mut inner = self.inner.write();
        let mut added = 0;

        for header in headers {
            let hash = header.hash();
            let index = header.height.0 as usize;

            if let Some(known) = inner.header_chain.get(index) {
                if *known == hash {
                    continue;
                }
                return Err(LedgerError::Conflict(header.height));
            }

            let tip = inner.header_chain.last().copied().unwrap_or_default();
            if index != inner.header_chain.len() || header.prev_block_hash != tip {
                return Err(LedgerError::Disconnected {
                    height: header.height,
                    tip,
                });
            }

            inner.header_chain.push(hash);
            inner.headers.insert(hash, header.clone());
            added += 1;
        }

        Ok(added)
    }

    fn add_block(&self, block: Block) -> Result<BlockOutcome, LedgerError> {
        let hash = block.hash();
        let height = block.height();
        let mut inner = self.inner.write();

        if inner.blocks.contains_key(&hash) {
            return Err(LedgerError::Duplicate(hash));
        }

        let next = inner.block_chain.len();
        if (height.0 as usize) < next {
            return Err(LedgerError::Conflict(height));
        }

        if height.0 as usize > next {
            if let Some(known) = inner.header_chain.get(height.0 as usize) {
                if *known != hash {
                    return Err(LedgerError::NotOnHeaderChain(height));
                }
            }
            if inner.pending.len() >= MAX_PENDING_BLOCKS {
                return Err(LedgerError::PendingFull(MAX_PENDING_BLOCKS));
            }
            return match inner.pending.entry(height.0) {
                Entry::Occupied(entry) if entry.get().hash() == hash => Err(LedgerError::Duplicate(hash)),
                Entry::Occupied(_) => Err(LedgerError::Conflict(height)),
                Entry::Vacant(entry) => {
                    entry.insert(block);
                    debug!(%height, "buffered block ahead of tip");
                    Ok(BlockOutcome::Buffered)
                }
            };
        }

        let mut best = inner.connect(block)?;
        while let Some(block) = inner.pending.remove(&(best.0 + 1)) {
            let pending_height = block.height();
            match inner.connect(block) {
                Ok(height) => best = height,
                Err(err) => {
                    warn!(height = %pending_height, %err, "dropping buffered block");
                    break;
                }
            }
        }

        Ok(BlockOutcome::Connected { height: best })
    }
}
