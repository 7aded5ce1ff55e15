use std::collections::VecDeque;

use containers::Bytes32;

/// Bounded FIFO of recently seen hashes. Inserting into a full cache evicts
/// the oldest entry.
#[derive(Debug, Clone)]
pub struct HashCache {
    capacity: usize,
    entries: VecDeque<Bytes32>,
}

impl HashCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            entries: VecDeque::with_capacity(capacity.max(1)),
        }
    }

    /// Returns false if the hash was already cached.
    pub fn insert(&mut self, hash: Bytes32) -> bool {
        if self.contains(&hash) {
            return false;
        }
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(hash);
        true
    }

    pub fn contains(&self, hash: &Bytes32) -> bool {
        self.entries.contains(hash)
    }

    pub fn remove(&mut self, hash: &Bytes32) -> bool {
        match self.entries.iter().position(|h| h == hash) {
            Some(index) => {
                self.entries.remove(index);
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
