//! Merge-mining proof carried in every block header.
//!
//! The parent-chain (Bitcoin-style) coinbase transaction commits to this
//! chain's block hash; the merkle branches link that coinbase to the parent
//! block header whose work is being reused.
use std::io::{self, Read, Write};

use serde::{Deserialize, Serialize};

use crate::serialization::{
    DecodeError, WireDecode, WireEncode, read_hashes, read_len, read_u32, read_u64,
    read_var_bytes, write_hashes, write_u32, write_u64, write_var_bytes, write_var_uint,
};
use crate::types::{Bytes32, sha256d};

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BtcOutPoint {
    pub hash: Bytes32,
    pub index: u32,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BtcTxIn {
    pub previous_out_point: BtcOutPoint,
    pub signature_script: Vec<u8>,
    pub sequence: u32,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BtcTxOut {
    pub value: i64,
    pub pk_script: Vec<u8>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BtcTx {
    pub version: i32,
    pub tx_in: Vec<BtcTxIn>,
    pub tx_out: Vec<BtcTxOut>,
    pub lock_time: u32,
}

impl Default for BtcTx {
    fn default() -> Self {
        Self::new(Vec::new(), Vec::new())
    }
}

impl BtcTx {
    pub fn new(tx_in: Vec<BtcTxIn>, tx_out: Vec<BtcTxOut>) -> Self {
        Self {
            version: 1,
            tx_in,
            tx_out,
            lock_time: 0,
        }
    }

    pub fn hash(&self) -> Bytes32 {
        sha256d(&self.to_bytes())
    }
}

impl WireEncode for BtcOutPoint {
    fn encode<W: Write>(&self, w: &mut W) -> io::Result<()> {
        self.hash.encode(w)?;
        write_u32(w, self.index)
    }
}

impl WireDecode for BtcOutPoint {
    fn decode<R: Read>(r: &mut R) -> Result<Self, DecodeError> {
        Ok(Self {
            hash: Bytes32::decode(r)?,
            index: read_u32(r)?,
        })
    }
}

impl WireEncode for BtcTxIn {
    fn encode<W: Write>(&self, w: &mut W) -> io::Result<()> {
        self.previous_out_point.encode(w)?;
        write_var_bytes(w, &self.signature_script)?;
        write_u32(w, self.sequence)
    }
}

impl WireDecode for BtcTxIn {
    fn decode<R: Read>(r: &mut R) -> Result<Self, DecodeError> {
        Ok(Self {
            previous_out_point: BtcOutPoint::decode(r)?,
            signature_script: read_var_bytes(r)?,
            sequence: read_u32(r)?,
        })
    }
}

impl WireEncode for BtcTxOut {
    fn encode<W: Write>(&self, w: &mut W) -> io::Result<()> {
        write_u64(w, self.value as u64)?;
        write_var_bytes(w, &self.pk_script)
    }
}

impl WireDecode for BtcTxOut {
    fn decode<R: Read>(r: &mut R) -> Result<Self, DecodeError> {
        Ok(Self {
            value: read_u64(r)? as i64,
            pk_script: read_var_bytes(r)?,
        })
    }
}

impl WireEncode for BtcTx {
    fn encode<W: Write>(&self, w: &mut W) -> io::Result<()> {
        write_u32(w, self.version as u32)?;
        write_var_uint(w, self.tx_in.len() as u64)?;
        for tx_in in &self.tx_in {
            tx_in.encode(w)?;
        }
        write_var_uint(w, self.tx_out.len() as u64)?;
        for tx_out in &self.tx_out {
            tx_out.encode(w)?;
        }
        write_u32(w, self.lock_time)
    }
}

impl WireDecode for BtcTx {
    fn decode<R: Read>(r: &mut R) -> Result<Self, DecodeError> {
        let version = read_u32(r)? as i32;

        let count = read_len(r)?;
        let mut tx_in = Vec::with_capacity(count.min(1024));
        for _ in 0..count {
            tx_in.push(BtcTxIn::decode(r)?);
        }

        let count = read_len(r)?;
        let mut tx_out = Vec::with_capacity(count.min(1024));
        for _ in 0..count {
            tx_out.push(BtcTxOut::decode(r)?);
        }

        Ok(Self {
            version,
            tx_in,
            tx_out,
            lock_time: read_u32(r)?,
        })
    }
}

/// 80-byte parent-chain block header.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BtcHeader {
    pub version: i32,
    pub prev_block: Bytes32,
    pub merkle_root: Bytes32,
    pub timestamp: u32,
    pub bits: u32,
    pub nonce: u32,
}

impl BtcHeader {
    pub fn hash(&self) -> Bytes32 {
        sha256d(&self.to_bytes())
    }
}

impl WireEncode for BtcHeader {
    fn encode<W: Write>(&self, w: &mut W) -> io::Result<()> {
        write_u32(w, self.version as u32)?;
        self.prev_block.encode(w)?;
        self.merkle_root.encode(w)?;
        write_u32(w, self.timestamp)?;
        write_u32(w, self.bits)?;
        write_u32(w, self.nonce)
    }
}

impl WireDecode for BtcHeader {
    fn decode<R: Read>(r: &mut R) -> Result<Self, DecodeError> {
        Ok(Self {
            version: read_u32(r)? as i32,
            prev_block: Bytes32::decode(r)?,
            merkle_root: Bytes32::decode(r)?,
            timestamp: read_u32(r)?,
            bits: read_u32(r)?,
            nonce: read_u32(r)?,
        })
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuxPow {
    pub coinbase_tx: BtcTx,
    pub parent_block_hash: Bytes32,
    pub coinbase_branch: Vec<Bytes32>,
    pub coinbase_index: i32,
    pub chain_branch: Vec<Bytes32>,
    pub chain_index: i32,
    pub parent_header: BtcHeader,
}

impl WireEncode for AuxPow {
    fn encode<W: Write>(&self, w: &mut W) -> io::Result<()> {
        self.coinbase_tx.encode(w)?;
        self.parent_block_hash.encode(w)?;
        write_hashes(w, &self.coinbase_branch)?;
        write_u32(w, self.coinbase_index as u32)?;
        write_hashes(w, &self.chain_branch)?;
        write_u32(w, self.chain_index as u32)?;
        self.parent_header.encode(w)
    }
}

impl WireDecode for AuxPow {
    fn decode<R: Read>(r: &mut R) -> Result<Self, DecodeError> {
        Ok(Self {
            coinbase_tx: BtcTx::decode(r)?,
            parent_block_hash: Bytes32::decode(r)?,
            coinbase_branch: read_hashes(r)?,
            coinbase_index: read_u32(r)? as i32,
            chain_branch: read_hashes(r)?,
            chain_index: read_u32(r)? as i32,
            parent_header: BtcHeader::decode(r)?,
        })
    }
}
