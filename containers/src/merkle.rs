use crate::serialization::DecodeError;
use crate::types::{Bytes32, sha256d};

/// Compute the merkle root of an ordered hash list.
///
/// Levels are built pairwise with double SHA-256; an odd trailing hash is
/// paired with itself. A single hash is its own root.
pub fn compute_root(hashes: &[Bytes32]) -> Result<Bytes32, DecodeError> {
    if hashes.is_empty() {
        return Err(DecodeError::EmptyMerkleTree);
    }

    let mut level: Vec<Bytes32> = hashes.to_vec();
    while level.len() > 1 {
        level = level
            .chunks(2)
            .map(|pair| {
                let left = pair[0];
                let right = pair.get(1).copied().unwrap_or(left);
                let mut buf = [0u8; 64];
                buf[..32].copy_from_slice(&left.0);
                buf[32..].copy_from_slice(&right.0);
                sha256d(&buf)
            })
            .collect();
    }

    Ok(level[0])
}
