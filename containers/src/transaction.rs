use std::io::{self, Read, Write};

use serde::{Deserialize, Serialize};

use crate::serialization::{
    DecodeError, WireDecode, WireEncode, encode_to_vec, read_len, read_u8, read_u16, read_u32,
    read_u64, read_var_bytes, write_u8, write_u16, write_u32, write_u64, write_var_bytes,
    write_var_uint,
};
use crate::types::{Bytes32, sha256d};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum TransactionType {
    CoinBase = 0x00,
    RegisterAsset = 0x01,
    TransferAsset = 0x02,
    Record = 0x03,
    Deploy = 0x04,
}

impl TryFrom<u8> for TransactionType {
    type Error = DecodeError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x00 => Ok(TransactionType::CoinBase),
            0x01 => Ok(TransactionType::RegisterAsset),
            0x02 => Ok(TransactionType::TransferAsset),
            0x03 => Ok(TransactionType::Record),
            0x04 => Ok(TransactionType::Deploy),
            other => Err(DecodeError::InvalidValue {
                field: "transaction type",
                value: other as u64,
            }),
        }
    }
}

/// Attribute usage tag for a random nonce; keeps otherwise identical
/// transactions (coinbases in particular) from colliding.
pub const ATTRIBUTE_NONCE: u8 = 0x00;

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxAttribute {
    pub usage: u8,
    pub data: Vec<u8>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UtxoInput {
    pub refer_txid: Bytes32,
    pub refer_index: u16,
    pub sequence: u32,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxOutput {
    pub asset_id: Bytes32,
    pub value: i64,
    pub output_lock: u32,
    pub program_hash: [u8; 21],
}

/// Verification script and its arguments.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Program {
    pub code: Vec<u8>,
    pub parameter: Vec<u8>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub tx_type: TransactionType,
    pub payload_version: u8,
    /// Type-specific payload, carried opaquely by the sync engine.
    pub payload: Vec<u8>,
    pub attributes: Vec<TxAttribute>,
    pub inputs: Vec<UtxoInput>,
    pub outputs: Vec<TxOutput>,
    pub programs: Vec<Program>,
}

impl Transaction {
    pub fn coinbase(height: u32, nonce: u64, outputs: Vec<TxOutput>) -> Self {
        Self {
            tx_type: TransactionType::CoinBase,
            payload_version: 0,
            payload: height.to_le_bytes().to_vec(),
            attributes: vec![TxAttribute {
                usage: ATTRIBUTE_NONCE,
                data: nonce.to_be_bytes().to_vec(),
            }],
            inputs: Vec::new(),
            outputs,
            programs: Vec::new(),
        }
    }

    /// Identity hash over the unsigned fields; programs are excluded so that
    /// signing does not change the id.
    pub fn hash(&self) -> Bytes32 {
        sha256d(&encode_to_vec(|buf| self.encode_unsigned(buf)))
    }

    pub fn encode_unsigned<W: Write>(&self, w: &mut W) -> io::Result<()> {
        write_u8(w, self.tx_type as u8)?;
        write_u8(w, self.payload_version)?;
        write_var_bytes(w, &self.payload)?;

        write_var_uint(w, self.attributes.len() as u64)?;
        for attribute in &self.attributes {
            write_u8(w, attribute.usage)?;
            write_var_bytes(w, &attribute.data)?;
        }

        write_var_uint(w, self.inputs.len() as u64)?;
        for input in &self.inputs {
            input.refer_txid.encode(w)?;
            write_u16(w, input.refer_index)?;
            write_u32(w, input.sequence)?;
        }

        write_var_uint(w, self.outputs.len() as u64)?;
        for output in &self.outputs {
            output.asset_id.encode(w)?;
            write_u64(w, output.value as u64)?;
            write_u32(w, output.output_lock)?;
            w.write_all(&output.program_hash)?;
        }
        Ok(())
    }
}

impl WireEncode for Transaction {
    fn encode<W: Write>(&self, w: &mut W) -> io::Result<()> {
        self.encode_unsigned(w)?;
        write_var_uint(w, self.programs.len() as u64)?;
        for program in &self.programs {
            write_var_bytes(w, &program.code)?;
            write_var_bytes(w, &program.parameter)?;
        }
        Ok(())
    }
}

impl WireDecode for Transaction {
    fn decode<R: Read>(r: &mut R) -> Result<Self, DecodeError> {
        let tx_type = TransactionType::try_from(read_u8(r)?)?;
        let payload_version = read_u8(r)?;
        let payload = read_var_bytes(r)?;

        let count = read_len(r)?;
        let mut attributes = Vec::with_capacity(count.min(256));
        for _ in 0..count {
            attributes.push(TxAttribute {
                usage: read_u8(r)?,
                data: read_var_bytes(r)?,
            });
        }

        let count = read_len(r)?;
        let mut inputs = Vec::with_capacity(count.min(1024));
        for _ in 0..count {
            inputs.push(UtxoInput {
                refer_txid: Bytes32::decode(r)?,
                refer_index: read_u16(r)?,
                sequence: read_u32(r)?,
            });
        }

        let count = read_len(r)?;
        let mut outputs = Vec::with_capacity(count.min(1024));
        for _ in 0..count {
            let asset_id = Bytes32::decode(r)?;
            let value = read_u64(r)? as i64;
            let output_lock = read_u32(r)?;
            let mut program_hash = [0u8; 21];
            r.read_exact(&mut program_hash)?;
            outputs.push(TxOutput {
                asset_id,
                value,
                output_lock,
                program_hash,
            });
        }

        let count = read_len(r)?;
        let mut programs = Vec::with_capacity(count.min(256));
        for _ in 0..count {
            programs.push(Program {
                code: read_var_bytes(r)?,
                parameter: read_var_bytes(r)?,
            });
        }

        Ok(Self {
            tx_type,
            payload_version,
            payload,
            attributes,
            inputs,
            outputs,
            programs,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn transfer() -> Transaction {
        Transaction {
            tx_type: TransactionType::TransferAsset,
            payload_version: 0,
            payload: Vec::new(),
            attributes: Vec::new(),
            inputs: vec![UtxoInput {
                refer_txid: Bytes32([4; 32]),
                refer_index: 1,
                sequence: 0,
            }],
            outputs: vec![TxOutput {
                asset_id: Bytes32([5; 32]),
                value: 1_000,
                output_lock: 0,
                program_hash: [0x21; 21],
            }],
            programs: vec![Program {
                code: vec![0xac],
                parameter: vec![0x40; 64],
            }],
        }
    }

    #[test]
    fn test_hash_ignores_programs() {
        let signed = transfer();
        let mut unsigned = signed.clone();
        unsigned.programs.clear();
        assert_eq!(signed.hash(), unsigned.hash());
    }

    #[test]
    fn test_coinbase_nonce_changes_hash() {
        let a = Transaction::coinbase(1, 1, Vec::new());
        let b = Transaction::coinbase(1, 2, Vec::new());
        assert_ne!(a.hash(), b.hash());
    }

    #[test]
    fn test_decode_keeps_programs() {
        let tx = transfer();
        let decoded = Transaction::from_bytes(&tx.to_bytes()).unwrap();
        assert_eq!(decoded.programs, tx.programs);
        assert_eq!(decoded.hash(), tx.hash());
    }

    #[test]
    fn test_unknown_type_rejected() {
        let mut bytes = transfer().to_bytes();
        bytes[0] = 0x7f;
        assert!(matches!(
            Transaction::from_bytes(&bytes),
            Err(DecodeError::InvalidValue { .. })
        ));
    }
}
