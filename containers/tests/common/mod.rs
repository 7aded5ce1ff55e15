#![allow(dead_code)]

use containers::{
    AuxPow, Block, BlockHeader, BtcHeader, BtcOutPoint, BtcTx, BtcTxIn, BtcTxOut, Bytes32, Height,
    Transaction, TransactionType, TxOutput, UtxoInput,
};

pub fn sample_aux_pow() -> AuxPow {
    AuxPow {
        coinbase_tx: BtcTx::new(
            vec![BtcTxIn {
                previous_out_point: BtcOutPoint {
                    hash: Bytes32::zero(),
                    index: u32::MAX,
                },
                signature_script: vec![0xfa, 0xbe, 0x6d, 0x6d, 0x01],
                sequence: u32::MAX,
            }],
            vec![BtcTxOut {
                value: 1_250_000_000,
                pk_script: vec![0x76, 0xa9],
            }],
        ),
        parent_block_hash: Bytes32([0x11; 32]),
        coinbase_branch: vec![Bytes32([0x22; 32])],
        coinbase_index: 0,
        chain_branch: Vec::new(),
        chain_index: 0,
        parent_header: BtcHeader {
            version: 0x2000_0000,
            timestamp: 1_510_000_000,
            bits: 0x1800_0000,
            nonce: 42,
            ..Default::default()
        },
    }
}

pub fn transfer(seed: u8) -> Transaction {
    Transaction {
        tx_type: TransactionType::TransferAsset,
        payload_version: 0,
        payload: Vec::new(),
        attributes: Vec::new(),
        inputs: vec![UtxoInput {
            refer_txid: Bytes32([seed; 32]),
            refer_index: seed as u16,
            sequence: 0,
        }],
        outputs: vec![TxOutput {
            asset_id: Bytes32([0xaa; 32]),
            value: 100 * seed as i64,
            output_lock: 0,
            program_hash: [seed; 21],
        }],
        programs: Vec::new(),
    }
}

/// Block at `height` on top of `prev` carrying a coinbase and `extra` transfers.
pub fn block_on(prev: &BlockHeader, extra: u8) -> Block {
    let height = prev.height.next();
    let mut transactions = vec![Transaction::coinbase(height.0, height.0 as u64, Vec::new())];
    transactions.extend((1..=extra).map(transfer));

    let mut block = Block {
        header: BlockHeader {
            version: 0,
            prev_block_hash: prev.hash(),
            transactions_root: Bytes32::zero(),
            timestamp: prev.timestamp + 15,
            bits: prev.bits,
            nonce: 0,
            height: Height(height.0),
            aux_pow: sample_aux_pow(),
        },
        transactions,
    };
    block.rebuild_merkle_root().unwrap();
    block
}
