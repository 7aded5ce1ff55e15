use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::{Bytes32, Height};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CheckpointError {
    #[error("unable to parse checkpoint {0:?}: use the syntax <height>:<hash>")]
    Syntax(String),
    #[error("unable to parse checkpoint {0:?}: malformed height")]
    Height(String),
    #[error("unable to parse checkpoint {0:?}: missing hash")]
    MissingHash(String),
    #[error("unable to parse checkpoint {0:?}: malformed hash")]
    Hash(String),
    #[error("checkpoint at height {height} does not follow height {previous}")]
    NotIncreasing { previous: Height, height: Height },
}

/// A trusted `(height, hash)` pair that bounds headers-first sync.
///
/// Checkpoints are immutable once parsed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Checkpoint {
    pub height: Height,
    pub hash: Bytes32,
}

impl FromStr for Checkpoint {
    type Err = CheckpointError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split(':').collect();
        let [height, hash] = parts.as_slice() else {
            return Err(CheckpointError::Syntax(s.to_string()));
        };

        let height = height
            .parse::<u32>()
            .map_err(|_| CheckpointError::Height(s.to_string()))?;

        if hash.is_empty() {
            return Err(CheckpointError::MissingHash(s.to_string()));
        }
        let hash = hash
            .parse::<Bytes32>()
            .map_err(|_| CheckpointError::Hash(s.to_string()))?;

        Ok(Checkpoint {
            height: Height(height),
            hash,
        })
    }
}

impl fmt::Display for Checkpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.height, self.hash)
    }
}

/// Parse a configured checkpoint list. One bad entry rejects the whole list,
/// and heights must be strictly increasing.
pub fn parse_checkpoints<S: AsRef<str>>(entries: &[S]) -> Result<Vec<Checkpoint>, CheckpointError> {
    let mut checkpoints: Vec<Checkpoint> = Vec::with_capacity(entries.len());
    for entry in entries {
        let checkpoint: Checkpoint = entry.as_ref().parse()?;
        if let Some(previous) = checkpoints.last() {
            if checkpoint.height <= previous.height {
                return Err(CheckpointError::NotIncreasing {
                    previous: previous.height,
                    height: checkpoint.height,
                });
            }
        }
        checkpoints.push(checkpoint);
    }
    Ok(checkpoints)
}
