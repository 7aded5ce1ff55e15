use containers::{Checkpoint, CheckpointError, Height, parse_checkpoints};
use parking_lot::Mutex;

/// Height-ordered checkpoint list plus the cached "next checkpoint".
///
/// The list is fixed at construction and read without locking; only the
/// cached lookup result is guarded.
#[derive(Debug, Default)]
pub struct CheckpointRegistry {
    checkpoints: Vec<Checkpoint>,
    next: Mutex<Option<Checkpoint>>,
}

impl CheckpointRegistry {
    /// `checkpoints` must be strictly increasing by height.
    pub fn new(checkpoints: Vec<Checkpoint>) -> Result<Self, CheckpointError> {
        for pair in checkpoints.windows(2) {
            if pair[1].height <= pair[0].height {
                return Err(CheckpointError::NotIncreasing {
                    previous: pair[0].height,
                    height: pair[1].height,
                });
            }
        }
        Ok(Self {
            checkpoints,
            next: Mutex::new(None),
        })
    }

    pub fn from_strings<S: AsRef<str>>(entries: &[S]) -> Result<Self, CheckpointError> {
        Self::new(parse_checkpoints(entries)?)
    }

    /// Checkpoint that bounds headers-first sync from `height`.
    ///
    /// None once `height` has reached the final checkpoint; otherwise the
    /// first checkpoint above `height`. The result replaces the cached value.
    pub fn find_next_header_checkpoint(&self, height: Height) -> Option<Checkpoint> {
        let last = self.checkpoints.last()?;
        let next = if height >= last.height {
            None
        } else {
            self.checkpoints[..self.checkpoints.len() - 1]
                .iter()
                .find(|c| height < c.height)
                .or(Some(last))
                .copied()
        };
        *self.next.lock() = next;
        next
    }

    /// Result of the last [`Self::find_next_header_checkpoint`] call.
    pub fn next_checkpoint(&self) -> Option<Checkpoint> {
        *self.next.lock()
    }

    pub fn at_height(&self, height: Height) -> Option<&Checkpoint> {
        self.checkpoints
            .binary_search_by_key(&height, |c| c.height)
            .ok()
            .map(|index| &self.checkpoints[index])
    }

    pub fn all(&self) -> &[Checkpoint] {
        &self.checkpoints
    }

    pub fn is_empty(&self) -> bool {
        self.checkpoints.is_empty()
    }
}
