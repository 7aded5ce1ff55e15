//! Binary field codecs shared by every wire type.
//!
//! Integers are little-endian. Variable-length counts use the Bitcoin
//! compact-size encoding (`0xfd`/`0xfe`/`0xff` prefixes).
use std::io::{self, Read, Write};

use thiserror::Error;

use crate::types::Bytes32;

/// Upper bound for any single var-bytes field or element count.
pub const MAX_VAR_LEN: u64 = 8 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
    #[error("length {0} exceeds limit {1}")]
    TooLong(u64, u64),
    #[error("non-canonical var-int encoding")]
    NonCanonicalVarInt,
    #[error("unexpected {field} value {value}")]
    InvalidValue { field: &'static str, value: u64 },
    #[error("merkle root mismatch: header declares {declared}, transactions give {computed}")]
    MerkleMismatch { declared: Bytes32, computed: Bytes32 },
    #[error("cannot compute merkle root of an empty transaction list")]
    EmptyMerkleTree,
}

pub trait WireEncode {
    fn encode<W: Write>(&self, w: &mut W) -> io::Result<()>;

    fn to_bytes(&self) -> Vec<u8> {
        encode_to_vec(|buf| self.encode(buf))
    }
}

/// Run an encoder against a fresh in-memory buffer.
///
/// `Write for Vec<u8>` never fails and encoders only propagate writer errors,
/// so an error here is a broken encoder rather than bad input.
pub fn encode_to_vec(encode: impl FnOnce(&mut Vec<u8>) -> io::Result<()>) -> Vec<u8> {
    let mut buf = Vec::new();
    match encode(&mut buf) {
        Ok(()) => buf,
        Err(err) => unreachable!("in-memory encoding failed: {err}"),
    }
}

pub trait WireDecode: Sized {
    fn decode<R: Read>(r: &mut R) -> Result<Self, DecodeError>;

    fn from_bytes(mut bytes: &[u8]) -> Result<Self, DecodeError> {
        Self::decode(&mut bytes)
    }
}

pub fn write_u8<W: Write>(w: &mut W, v: u8) -> io::Result<()> {
    w.write_all(&[v])
}

pub fn write_u16<W: Write>(w: &mut W, v: u16) -> io::Result<()> {
    w.write_all(&v.to_le_bytes())
}

pub fn write_u32<W: Write>(w: &mut W, v: u32) -> io::Result<()> {
    w.write_all(&v.to_le_bytes())
}

pub fn write_u64<W: Write>(w: &mut W, v: u64) -> io::Result<()> {
    w.write_all(&v.to_le_bytes())
}

pub fn read_u8<R: Read>(r: &mut R) -> Result<u8, DecodeError> {
    let mut buf = [0u8; 1];
    r.read_exact(&mut buf)?;
    Ok(buf[0])
}

pub fn read_u16<R: Read>(r: &mut R) -> Result<u16, DecodeError> {
    let mut buf = [0u8; 2];
    r.read_exact(&mut buf)?;
    Ok(u16::from_le_bytes(buf))
}

pub fn read_u32<R: Read>(r: &mut R) -> Result<u32, DecodeError> {
    let mut buf = [0u8; 4];
    r.read_exact(&mut buf)?;
    Ok(u32::from_le_bytes(buf))
}

pub fn read_u64<R: Read>(r: &mut R) -> Result<u64, DecodeError> {
    let mut buf = [0u8; 8];
    r.read_exact(&mut buf)?;
    Ok(u64::from_le_bytes(buf))
}

pub fn write_var_uint<W: Write>(w: &mut W, v: u64) -> io::Result<()> {
    match v {
        0..=0xfc => write_u8(w, v as u8),
        0xfd..=0xffff => {
            write_u8(w, 0xfd)?;
            write_u16(w, v as u16)
        }
        0x1_0000..=0xffff_ffff => {
            write_u8(w, 0xfe)?;
            write_u32(w, v as u32)
        }
        _ => {
            write_u8(w, 0xff)?;
            write_u64(w, v)
        }
    }
}

pub fn read_var_uint<R: Read>(r: &mut R) -> Result<u64, DecodeError> {
    let value = match read_u8(r)? {
        0xfd => {
            let v = read_u16(r)? as u64;
            if v < 0xfd {
                return Err(DecodeError::NonCanonicalVarInt);
            }
            v
        }
        0xfe => {
            let v = read_u32(r)? as u64;
            if v <= 0xffff {
                return Err(DecodeError::NonCanonicalVarInt);
            }
            v
        }
        0xff => {
            let v = read_u64(r)?;
            if v <= 0xffff_ffff {
                return Err(DecodeError::NonCanonicalVarInt);
            }
            v
        }
        small => small as u64,
    };
    Ok(value)
}

/// Read an element count and bound it before any allocation happens.
pub fn read_len<R: Read>(r: &mut R) -> Result<usize, DecodeError> {
    let len = read_var_uint(r)?;
    if len > MAX_VAR_LEN {
        return Err(DecodeError::TooLong(len, MAX_VAR_LEN));
    }
    Ok(len as usize)
}

pub fn write_var_bytes<W: Write>(w: &mut W, bytes: &[u8]) -> io::Result<()> {
    write_var_uint(w, bytes.len() as u64)?;
    w.write_all(bytes)
}

pub fn read_var_bytes<R: Read>(r: &mut R) -> Result<Vec<u8>, DecodeError> {
    let len = read_len(r)?;
    let mut buf = vec![0u8; len];
    r.read_exact(&mut buf)?;
    Ok(buf)
}

impl WireEncode for Bytes32 {
    fn encode<W: Write>(&self, w: &mut W) -> io::Result<()> {
        w.write_all(&self.0)
    }
}

impl WireDecode for Bytes32 {
    fn decode<R: Read>(r: &mut R) -> Result<Self, DecodeError> {
        let mut buf = [0u8; 32];
        r.read_exact(&mut buf)?;
        Ok(Bytes32(buf))
    }
}

pub fn write_hashes<W: Write>(w: &mut W, hashes: &[Bytes32]) -> io::Result<()> {
    write_var_uint(w, hashes.len() as u64)?;
    for hash in hashes {
        hash.encode(w)?;
    }
    Ok(())
}

pub fn read_hashes<R: Read>(r: &mut R) -> Result<Vec<Bytes32>, DecodeError> {
    let len = read_len(r)?;
    let mut hashes = Vec::with_capacity(len.min(4096));
    for _ in 0..len {
        hashes.push(Bytes32::decode(r)?);
    }
    Ok(hashes)
}
