use std::io::{self, Read, Write};

use serde::{Deserialize, Serialize};

use crate::auxpow::AuxPow;
use crate::merkle::compute_root;
use crate::serialization::{
    DecodeError, WireDecode, WireEncode, encode_to_vec, read_u8, read_u32, write_u8, write_u32,
};
use crate::transaction::Transaction;
use crate::types::{Bytes32, Height, sha256d};

pub const BLOCK_VERSION: u32 = 0;
pub const GENESIS_NONCE: u32 = 2_083_236_893;
pub const GENESIS_BITS: u32 = 0x1d03_ffff;
/// 2017-10-01T00:00:00Z
pub const GENESIS_TIMESTAMP: u32 = 1_506_816_000;

/// Marker byte that closes every serialized header (program slot).
const PROGRAM_MARKER: u8 = 1;

/// Upper bound on transactions per block accepted from the wire.
pub const MAX_TXS_PER_BLOCK: u32 = 100_000;

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockHeader {
    pub version: u32,
    pub prev_block_hash: Bytes32,
    pub transactions_root: Bytes32,
    pub timestamp: u32,
    pub bits: u32,
    pub nonce: u32,
    pub height: Height,
    pub aux_pow: AuxPow,
}

impl BlockHeader {
    /// Block identity: double SHA-256 over the unsigned header fields.
    pub fn hash(&self) -> Bytes32 {
        sha256d(&encode_to_vec(|buf| self.encode_unsigned(buf)))
    }

    pub fn encode_unsigned<W: Write>(&self, w: &mut W) -> io::Result<()> {
        write_u32(w, self.version)?;
        self.prev_block_hash.encode(w)?;
        self.transactions_root.encode(w)?;
        write_u32(w, self.timestamp)?;
        write_u32(w, self.bits)?;
        write_u32(w, self.nonce)?;
        write_u32(w, self.height.0)
    }
}

impl WireEncode for BlockHeader {
    fn encode<W: Write>(&self, w: &mut W) -> io::Result<()> {
        self.encode_unsigned(w)?;
        self.aux_pow.encode(w)?;
        write_u8(w, PROGRAM_MARKER)
    }
}

impl WireDecode for BlockHeader {
    fn decode<R: Read>(r: &mut R) -> Result<Self, DecodeError> {
        let header = BlockHeader {
            version: read_u32(r)?,
            prev_block_hash: Bytes32::decode(r)?,
            transactions_root: Bytes32::decode(r)?,
            timestamp: read_u32(r)?,
            bits: read_u32(r)?,
            nonce: read_u32(r)?,
            height: Height(read_u32(r)?),
            aux_pow: AuxPow::decode(r)?,
        };

        let marker = read_u8(r)?;
        if marker != PROGRAM_MARKER {
            return Err(DecodeError::InvalidValue {
                field: "header program marker",
                value: marker as u64,
            });
        }

        Ok(header)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub header: BlockHeader,
    pub transactions: Vec<Transaction>,
}

impl Block {
    pub fn hash(&self) -> Bytes32 {
        self.header.hash()
    }

    pub fn height(&self) -> Height {
        self.header.height
    }

    pub fn tx_hashes(&self) -> Vec<Bytes32> {
        self.transactions.iter().map(Transaction::hash).collect()
    }

    /// Recompute the merkle root from the transactions and store it in the header.
    pub fn rebuild_merkle_root(&mut self) -> Result<(), DecodeError> {
        self.header.transactions_root = compute_root(&self.tx_hashes())?;
        Ok(())
    }

    /// Header plus transaction hashes, used while syncing headers first.
    pub fn trim(&self) -> TrimmedBlock {
        TrimmedBlock {
            header: self.header.clone(),
            tx_hashes: self.tx_hashes(),
        }
    }

    pub fn genesis() -> Self {
        let coinbase = Transaction::coinbase(0, GENESIS_NONCE as u64, Vec::new());
        let transactions_root = coinbase.hash();
        Block {
            header: BlockHeader {
                version: BLOCK_VERSION,
                prev_block_hash: Bytes32::zero(),
                transactions_root,
                timestamp: GENESIS_TIMESTAMP,
                bits: GENESIS_BITS,
                nonce: GENESIS_NONCE,
                height: Height(0),
                aux_pow: AuxPow::default(),
            },
            transactions: vec![coinbase],
        }
    }
}

fn check_root(header: &BlockHeader, tx_hashes: &[Bytes32]) -> Result<(), DecodeError> {
    let computed = compute_root(tx_hashes)?;
    if computed != header.transactions_root {
        return Err(DecodeError::MerkleMismatch {
            declared: header.transactions_root,
            computed,
        });
    }
    Ok(())
}

fn read_tx_count<R: Read>(r: &mut R) -> Result<u32, DecodeError> {
    let count = read_u32(r)?;
    if count > MAX_TXS_PER_BLOCK {
        return Err(DecodeError::TooLong(count as u64, MAX_TXS_PER_BLOCK as u64));
    }
    Ok(count)
}

impl WireEncode for Block {
    fn encode<W: Write>(&self, w: &mut W) -> io::Result<()> {
        self.header.encode(w)?;
        write_u32(w, self.transactions.len() as u32)?;
        for tx in &self.transactions {
            tx.encode(w)?;
        }
        Ok(())
    }
}

impl WireDecode for Block {
    fn decode<R: Read>(r: &mut R) -> Result<Self, DecodeError> {
        let header = BlockHeader::decode(r)?;
        let count = read_tx_count(r)?;
        let mut transactions = Vec::with_capacity(count.min(4096) as usize);
        for _ in 0..count {
            transactions.push(Transaction::decode(r)?);
        }

        let block = Block {
            header,
            transactions,
        };
        check_root(&block.header, &block.tx_hashes())?;
        Ok(block)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrimmedBlock {
    pub header: BlockHeader,
    pub tx_hashes: Vec<Bytes32>,
}

impl TrimmedBlock {
    pub fn hash(&self) -> Bytes32 {
        self.header.hash()
    }
}

impl WireEncode for TrimmedBlock {
    fn encode<W: Write>(&self, w: &mut W) -> io::Result<()> {
        self.header.encode(w)?;
        write_u32(w, self.tx_hashes.len() as u32)?;
        for hash in &self.tx_hashes {
            hash.encode(w)?;
        }
        Ok(())
    }
}

impl WireDecode for TrimmedBlock {
    fn decode<R: Read>(r: &mut R) -> Result<Self, DecodeError> {
        let header = BlockHeader::decode(r)?;
        let count = read_tx_count(r)?;
        let mut tx_hashes = Vec::with_capacity(count.min(4096) as usize);
        for _ in 0..count {
            tx_hashes.push(Bytes32::decode(r)?);
        }
        check_root(&header, &tx_hashes)?;
        Ok(TrimmedBlock { header, tx_hashes })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_genesis_root_matches_coinbase() {
        let genesis = Block::genesis();
        assert_eq!(genesis.header.transactions_root, genesis.transactions[0].hash());
        assert_eq!(genesis.height(), Height(0));
    }

    #[test]
    fn test_genesis_is_deterministic() {
        assert_eq!(Block::genesis().hash(), Block::genesis().hash());
    }

    #[test]
    fn test_header_hash_ignores_auxpow() {
        let mut header = Block::genesis().header;
        let before = header.hash();
        header.aux_pow.parent_block_hash = Bytes32([1; 32]);
        assert_eq!(header.hash(), before);
    }

    #[test]
    fn test_bad_program_marker_rejected() {
        let mut bytes = Block::genesis().header.to_bytes();
        let last = bytes.len() - 1;
        bytes[last] = 0;
        assert!(BlockHeader::from_bytes(&bytes).is_err());
    }

    #[test]
    fn test_merkle_mismatch_rejected() {
        let mut block = Block::genesis();
        block.header.transactions_root = Bytes32([0xee; 32]);
        let err = Block::from_bytes(&block.to_bytes()).unwrap_err();
        assert!(matches!(err, DecodeError::MerkleMismatch { .. }));
    }
}
