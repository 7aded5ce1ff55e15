use containers::Bytes32;
use tokio::sync::OwnedSemaphorePermit;

/// One requested-but-unsatisfied block.
///
/// The flight-window permit travels with the entry, so removing the entry is
/// what releases the slot.
#[derive(Debug)]
pub struct FlightEntry {
    pub height: u32,
    pub hash: Bytes32,
    permit: Option<OwnedSemaphorePermit>,
}

/// Per-peer list of heights requested in flight. No height appears twice.
#[derive(Debug, Default)]
pub struct FlightHeights {
    entries: Vec<FlightEntry>,
}

impl FlightHeights {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `height` if absent. A rejected entry drops its permit.
    pub fn store(&mut self, height: u32, hash: Bytes32, permit: Option<OwnedSemaphorePermit>) -> bool {
        if self.contains(height) {
            return false;
        }
        self.entries.push(FlightEntry { height, hash, permit });
        true
    }

    /// Delete the entry for `height`, releasing its permit.
    pub fn remove(&mut self, height: u32) -> Option<FlightEntry> {
        let index = self.entries.iter().position(|e| e.height == height)?;
        let mut entry = self.entries.swap_remove(index);
        entry.permit = None;
        Some(entry)
    }

    pub fn remove_hash(&mut self, hash: &Bytes32) -> Option<FlightEntry> {
        let height = self.entries.iter().find(|e| e.hash == *hash)?.height;
        self.remove(height)
    }

    /// Drop every entry below `threshold` by swapping it to the tail and
    /// truncating. Order of the survivors is not preserved.
    pub fn remove_less_than(&mut self, threshold: u32) -> usize {
        let mut i = 0;
        let mut end = self.entries.len();
        while i < end {
            if self.entries[i].height < threshold {
                end -= 1;
                self.entries.swap(i, end);
            } else {
                i += 1;
            }
        }
        let removed = self.entries.len() - end;
        self.entries.truncate(end);
        removed
    }

    pub fn contains(&self, height: u32) -> bool {
        self.entries.iter().any(|e| e.height == height)
    }

    pub fn heights(&self) -> Vec<u32> {
        self.entries.iter().map(|e| e.height).collect()
    }

    pub fn entries(&self) -> impl Iterator<Item = (u32, Bytes32)> + '_ {
        self.entries.iter().map(|e| (e.height, e.hash))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
