use std::io::{self, Read, Write};

use serde::{Deserialize, Serialize};

use crate::serialization::{
    DecodeError, WireDecode, WireEncode, encode_to_vec, read_u16, read_u32, read_var_bytes,
    write_u16, write_u32, write_var_bytes,
};
use crate::transaction::Program;
use crate::types::{Bytes32, Height, sha256d};

/// Bookkeeper message carried by the `consensus` command.
///
/// The sync engine only relays these; `data` is opaque to it.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsensusPayload {
    pub version: u32,
    pub prev_hash: Bytes32,
    pub height: Height,
    pub bookkeeper_index: u16,
    pub timestamp: u32,
    pub data: Vec<u8>,
    pub program: Program,
}

impl ConsensusPayload {
    pub fn hash(&self) -> Bytes32 {
        sha256d(&encode_to_vec(|buf| self.encode_unsigned(buf)))
    }

    pub fn encode_unsigned<W: Write>(&self, w: &mut W) -> io::Result<()> {
        write_u32(w, self.version)?;
        self.prev_hash.encode(w)?;
        write_u32(w, self.height.0)?;
        write_u16(w, self.bookkeeper_index)?;
        write_u32(w, self.timestamp)?;
        write_var_bytes(w, &self.data)
    }
}

impl WireEncode for ConsensusPayload {
    fn encode<W: Write>(&self, w: &mut W) -> io::Result<()> {
        self.encode_unsigned(w)?;
        write_var_bytes(w, &self.program.code)?;
        write_var_bytes(w, &self.program.parameter)
    }
}

impl WireDecode for ConsensusPayload {
    fn decode<R: Read>(r: &mut R) -> Result<Self, DecodeError> {
        Ok(Self {
            version: read_u32(r)?,
            prev_hash: Bytes32::decode(r)?,
            height: Height(read_u32(r)?),
            bookkeeper_index: read_u16(r)?,
            timestamp: read_u32(r)?,
            data: read_var_bytes(r)?,
            program: Program {
                code: read_var_bytes(r)?,
                parameter: read_var_bytes(r)?,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_excludes_program() {
        let mut payload = ConsensusPayload {
            height: Height(12),
            data: b"prepare".to_vec(),
            ..Default::default()
        };
        let before = payload.hash();
        payload.program.parameter = vec![1, 2, 3];
        assert_eq!(payload.hash(), before);
    }

    #[test]
    fn test_decode_restores_program() {
        let payload = ConsensusPayload {
            version: 1,
            bookkeeper_index: 3,
            program: Program {
                code: vec![0x51],
                parameter: vec![0x40; 8],
            },
            ..Default::default()
        };
        assert_eq!(ConsensusPayload::from_bytes(&payload.to_bytes()).unwrap(), payload);
    }
}
