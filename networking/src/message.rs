//! Wire messages and framing.
//!
//! Every message is a 24-byte header followed by the payload:
//!
//! | field    | size | notes                                  |
//! |----------|------|----------------------------------------|
//! | magic    | 4    | network identifier, little-endian      |
//! | command  | 12   | ASCII name, NUL padded                 |
//! | length   | 4    | payload length, little-endian          |
//! | checksum | 4    | first bytes of double SHA-256(payload) |
use std::io::{self, Read, Write};

use containers::serialization::{
    encode_to_vec, read_hashes, read_len, read_u8, read_u16, read_u32, read_u64, write_hashes,
    write_u8, write_u16, write_u32, write_u64, write_var_uint,
};
use containers::{
    Block, BlockHeader, Bytes32, ConsensusPayload, DecodeError, Transaction, WireDecode,
    WireEncode, sha256d,
};
use thiserror::Error;

use crate::types::InventoryType;

pub const HEADER_LEN: usize = 24;
pub const COMMAND_LEN: usize = 12;
pub const CHECKSUM_LEN: usize = 4;
pub const MAX_PAYLOAD_LEN: u32 = 32 * 1024 * 1024;

/// Upper bound on headers in one `headers` message.
pub const MAX_HEADERS_PER_MSG: usize = 2000;
/// Upper bound on hashes in one `inv`/`getdata` message.
pub const MAX_INV_PER_MSG: usize = 50_000;

#[derive(Debug, Error)]
pub enum MessageError {
    #[error(transparent)]
    Decode(#[from] DecodeError),
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
    #[error("bad magic: expected {expected:#010x}, got {got:#010x}")]
    BadMagic { expected: u32, got: u32 },
    #[error("unknown command {0:?}")]
    UnknownCommand(String),
    #[error("payload of {0} bytes exceeds limit")]
    PayloadTooLarge(u32),
    #[error("payload checksum mismatch for {0}")]
    Checksum(Command),
    #[error("{0} payload has {1} trailing bytes")]
    TrailingBytes(Command, usize),
}

impl MessageError {
    /// Errors after which the byte stream is no longer aligned on a frame.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            MessageError::Io(_)
                | MessageError::BadMagic { .. }
                | MessageError::UnknownCommand(_)
                | MessageError::PayloadTooLarge(_)
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    Version,
    Verack,
    Ping,
    Pong,
    GetHeaders,
    Headers,
    GetBlocks,
    Inv,
    GetData,
    NotFound,
    Block,
    Tx,
    Consensus,
}

impl Command {
    pub const ALL: [Command; 13] = [
        Command::Version,
        Command::Verack,
        Command::Ping,
        Command::Pong,
        Command::GetHeaders,
        Command::Headers,
        Command::GetBlocks,
        Command::Inv,
        Command::GetData,
        Command::NotFound,
        Command::Block,
        Command::Tx,
        Command::Consensus,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Command::Version => "version",
            Command::Verack => "verack",
            Command::Ping => "ping",
            Command::Pong => "pong",
            Command::GetHeaders => "getheaders",
            Command::Headers => "headers",
            Command::GetBlocks => "getblocks",
            Command::Inv => "inv",
            Command::GetData => "getdata",
            Command::NotFound => "notfound",
            Command::Block => "block",
            Command::Tx => "tx",
            Command::Consensus => "consensus",
        }
    }

    pub fn to_bytes(&self) -> [u8; COMMAND_LEN] {
        let mut out = [0u8; COMMAND_LEN];
        let name = self.as_str().as_bytes();
        out[..name.len()].copy_from_slice(name);
        out
    }

    pub fn from_bytes(bytes: &[u8; COMMAND_LEN]) -> Result<Self, MessageError> {
        let end = bytes.iter().position(|b| *b == 0).unwrap_or(COMMAND_LEN);
        let unknown = || MessageError::UnknownCommand(String::from_utf8_lossy(bytes).into_owned());

        if bytes[end..].iter().any(|b| *b != 0) {
            return Err(unknown());
        }

        let name = &bytes[..end];
        Command::ALL
            .into_iter()
            .find(|command| command.as_str().as_bytes() == name)
            .ok_or_else(unknown)
    }
}

impl std::fmt::Display for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageHeader {
    pub magic: u32,
    pub command: Command,
    pub length: u32,
    pub checksum: [u8; CHECKSUM_LEN],
}

impl MessageHeader {
    pub fn decode(bytes: &[u8; HEADER_LEN], expected_magic: u32) -> Result<Self, MessageError> {
        let magic = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
        if magic != expected_magic {
            return Err(MessageError::BadMagic {
                expected: expected_magic,
                got: magic,
            });
        }

        let mut command = [0u8; COMMAND_LEN];
        command.copy_from_slice(&bytes[4..16]);
        let command = Command::from_bytes(&command)?;

        let length = u32::from_le_bytes([bytes[16], bytes[17], bytes[18], bytes[19]]);
        if length > MAX_PAYLOAD_LEN {
            return Err(MessageError::PayloadTooLarge(length));
        }

        let mut checksum = [0u8; CHECKSUM_LEN];
        checksum.copy_from_slice(&bytes[20..24]);

        Ok(Self {
            magic,
            command,
            length,
            checksum,
        })
    }

    pub fn verify(&self, payload: &[u8]) -> Result<(), MessageError> {
        if checksum(payload) != self.checksum {
            return Err(MessageError::Checksum(self.command));
        }
        Ok(())
    }
}

fn checksum(payload: &[u8]) -> [u8; CHECKSUM_LEN] {
    let digest = sha256d(payload);
    let mut out = [0u8; CHECKSUM_LEN];
    out.copy_from_slice(&digest.0[..CHECKSUM_LEN]);
    out
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionPayload {
    pub version: u32,
    pub services: u64,
    pub timestamp: u32,
    pub port: u16,
    /// Sender node id; used to detect self and duplicate connections.
    pub nonce: u64,
    pub start_height: u64,
    pub relay: bool,
}

/// Locator request shared by `getheaders` and `getblocks`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocatorPayload {
    pub locator: Vec<Bytes32>,
    /// Last hash wanted; zero means "as many as allowed".
    pub hash_stop: Bytes32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvPayload {
    pub inv_type: InventoryType,
    pub hashes: Vec<Bytes32>,
}

impl InvPayload {
    pub fn new(inv_type: InventoryType, hashes: Vec<Bytes32>) -> Self {
        Self { inv_type, hashes }
    }

    pub fn single(inv_type: InventoryType, hash: Bytes32) -> Self {
        Self::new(inv_type, vec![hash])
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    Version(VersionPayload),
    Verack,
    /// Sender's current height.
    Ping(u64),
    Pong(u64),
    GetHeaders(LocatorPayload),
    Headers(Vec<BlockHeader>),
    GetBlocks(LocatorPayload),
    Inv(InvPayload),
    GetData(InvPayload),
    NotFound(Bytes32),
    Block(Box<Block>),
    Tx(Box<Transaction>),
    Consensus(Box<ConsensusPayload>),
}

impl Message {
    pub fn command(&self) -> Command {
        match self {
            Message::Version(_) => Command::Version,
            Message::Verack => Command::Verack,
            Message::Ping(_) => Command::Ping,
            Message::Pong(_) => Command::Pong,
            Message::GetHeaders(_) => Command::GetHeaders,
            Message::Headers(_) => Command::Headers,
            Message::GetBlocks(_) => Command::GetBlocks,
            Message::Inv(_) => Command::Inv,
            Message::GetData(_) => Command::GetData,
            Message::NotFound(_) => Command::NotFound,
            Message::Block(_) => Command::Block,
            Message::Tx(_) => Command::Tx,
            Message::Consensus(_) => Command::Consensus,
        }
    }

    fn encode_payload<W: Write>(&self, w: &mut W) -> io::Result<()> {
        match self {
            Message::Version(v) => {
                write_u32(w, v.version)?;
                write_u64(w, v.services)?;
                write_u32(w, v.timestamp)?;
                write_u16(w, v.port)?;
                write_u64(w, v.nonce)?;
                write_u64(w, v.start_height)?;
                write_u8(w, v.relay as u8)
            }
            Message::Verack => Ok(()),
            Message::Ping(height) | Message::Pong(height) => write_u64(w, *height),
            Message::GetHeaders(req) | Message::GetBlocks(req) => {
                write_hashes(w, &req.locator)?;
                req.hash_stop.encode(w)
            }
            Message::Headers(headers) => {
                write_var_uint(w, headers.len() as u64)?;
                for header in headers {
                    header.encode(w)?;
                }
                Ok(())
            }
            Message::Inv(inv) | Message::GetData(inv) => {
                write_u8(w, inv.inv_type as u8)?;
                write_u32(w, inv.hashes.len() as u32)?;
                for hash in &inv.hashes {
                    hash.encode(w)?;
                }
                Ok(())
            }
            Message::NotFound(hash) => hash.encode(w),
            Message::Block(block) => block.encode(w),
            Message::Tx(tx) => tx.encode(w),
            Message::Consensus(payload) => payload.encode(w),
        }
    }

    fn decode_payload<R: Read>(command: Command, r: &mut R) -> Result<Self, DecodeError> {
        let message = match command {
            Command::Version => Message::Version(VersionPayload {
                version: read_u32(r)?,
                services: read_u64(r)?,
                timestamp: read_u32(r)?,
                port: read_u16(r)?,
                nonce: read_u64(r)?,
                start_height: read_u64(r)?,
                relay: read_u8(r)? != 0,
            }),
            Command::Verack => Message::Verack,
            Command::Ping => Message::Ping(read_u64(r)?),
            Command::Pong => Message::Pong(read_u64(r)?),
            Command::GetHeaders => Message::GetHeaders(read_locator(r)?),
            Command::GetBlocks => Message::GetBlocks(read_locator(r)?),
            Command::Headers => {
                let count = read_len(r)?;
                if count > MAX_HEADERS_PER_MSG {
                    return Err(DecodeError::TooLong(count as u64, MAX_HEADERS_PER_MSG as u64));
                }
                let mut headers = Vec::with_capacity(count);
                for _ in 0..count {
                    headers.push(BlockHeader::decode(r)?);
                }
                Message::Headers(headers)
            }
            Command::Inv => Message::Inv(read_inv(r)?),
            Command::GetData => Message::GetData(read_inv(r)?),
            Command::NotFound => Message::NotFound(Bytes32::decode(r)?),
            Command::Block => Message::Block(Box::new(Block::decode(r)?)),
            Command::Tx => Message::Tx(Box::new(Transaction::decode(r)?)),
            Command::Consensus => Message::Consensus(Box::new(ConsensusPayload::decode(r)?)),
        };
        Ok(message)
    }

    pub fn payload_bytes(&self) -> Vec<u8> {
        encode_to_vec(|buf| self.encode_payload(buf))
    }

    /// Header plus payload, ready to be written to a socket.
    pub fn to_frame(&self, magic: u32) -> Vec<u8> {
        let payload = self.payload_bytes();
        let mut frame = Vec::with_capacity(HEADER_LEN + payload.len());
        frame.extend_from_slice(&magic.to_le_bytes());
        frame.extend_from_slice(&self.command().to_bytes());
        frame.extend_from_slice(&(payload.len() as u32).to_le_bytes());
        frame.extend_from_slice(&checksum(&payload));
        frame.extend_from_slice(&payload);
        frame
    }

    /// Decode a payload whose header has already been validated.
    pub fn from_payload(header: &MessageHeader, payload: &[u8]) -> Result<Self, MessageError> {
        header.verify(payload)?;
        let mut reader = payload;
        let message = Self::decode_payload(header.command, &mut reader)?;
        if !reader.is_empty() {
            return Err(MessageError::TrailingBytes(header.command, reader.len()));
        }
        Ok(message)
    }

    pub fn from_frame(magic: u32, frame: &[u8]) -> Result<Self, MessageError> {
        if frame.len() < HEADER_LEN {
            return Err(io::Error::from(io::ErrorKind::UnexpectedEof).into());
        }
        let mut raw = [0u8; HEADER_LEN];
        raw.copy_from_slice(&frame[..HEADER_LEN]);
        let header = MessageHeader::decode(&raw, magic)?;

        let payload = &frame[HEADER_LEN..];
        if payload.len() != header.length as usize {
            return Err(io::Error::from(io::ErrorKind::UnexpectedEof).into());
        }
        Self::from_payload(&header, payload)
    }
}

fn read_locator<R: Read>(r: &mut R) -> Result<LocatorPayload, DecodeError> {
    Ok(LocatorPayload {
        locator: read_hashes(r)?,
        hash_stop: Bytes32::decode(r)?,
    })
}

fn read_inv<R: Read>(r: &mut R) -> Result<InvPayload, DecodeError> {
    let inv_type = InventoryType::try_from(read_u8(r)?)?;
    let count = read_u32(r)? as usize;
    if count > MAX_INV_PER_MSG {
        return Err(DecodeError::TooLong(count as u64, MAX_INV_PER_MSG as u64));
    }
    let mut hashes = Vec::with_capacity(count);
    for _ in 0..count {
        hashes.push(Bytes32::decode(r)?);
    }
    Ok(InvPayload { inv_type, hashes })
}
