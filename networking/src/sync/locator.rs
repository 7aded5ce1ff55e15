use containers::{Bytes32, Height};

/// Number of most recent ancestors listed one by one before the step
/// between entries starts doubling.
pub const DENSE_LOCATOR_ENTRIES: usize = 10;

/// Sparse list of ancestor hashes from `tip` back to genesis.
///
/// The first entries are consecutive, then the gap doubles each step, and
/// genesis is always the last entry. `hash_at` resolves a height on the
/// local chain; heights it cannot resolve are skipped.
pub fn build_locator<F>(tip: Height, hash_at: F) -> Vec<Bytes32>
where
    F: Fn(Height) -> Option<Bytes32>,
{
    let mut locator = Vec::new();
    let mut height = tip.0 as i64;
    let mut step = 1i64;

    while height > 0 {
        if let Some(hash) = hash_at(Height(height as u32)) {
            locator.push(hash);
        }
        if locator.len() >= DENSE_LOCATOR_ENTRIES {
            step *= 2;
        }
        height -= step;
    }

    if let Some(genesis) = hash_at(Height(0)) {
        locator.push(genesis);
    }
    locator
}
