use std::collections::HashMap;
use std::time::{Duration, Instant};

use containers::Bytes32;
use tokio::sync::OwnedSemaphorePermit;

#[derive(Debug)]
struct Request {
    at: Instant,
    permit: Option<OwnedSemaphorePermit>,
}

/// Block hash -> time the request went out.
///
/// Entries are added on dispatch and removed on response or reset; anything
/// left longer than the request timeout belongs to a peer that never answered.
/// An entry may carry the block-window slot it was sent under, released when
/// the entry goes away.
#[derive(Debug, Default)]
pub struct RequestedBlocks {
    requests: HashMap<Bytes32, Request>,
}

impl RequestedBlocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, hash: Bytes32, at: Instant) {
        self.requests.insert(hash, Request { at, permit: None });
    }

    /// Attach a window slot to a queued entry and restart its clock.
    /// Returns false, dropping the permit, if `hash` is no longer wanted.
    pub fn dispatch(&mut self, hash: &Bytes32, at: Instant, permit: OwnedSemaphorePermit) -> bool {
        match self.requests.get_mut(hash) {
            Some(request) => {
                request.at = at;
                request.permit = Some(permit);
                true
            }
            None => false,
        }
    }

    pub fn remove(&mut self, hash: &Bytes32) -> Option<Instant> {
        self.requests.remove(hash).map(|request| request.at)
    }

    pub fn contains(&self, hash: &Bytes32) -> bool {
        self.requests.contains_key(hash)
    }

    /// Hashes requested at least `timeout` before `now`.
    pub fn stale(&self, now: Instant, timeout: Duration) -> Vec<Bytes32> {
        self.requests
            .iter()
            .filter(|(_, request)| now.saturating_duration_since(request.at) >= timeout)
            .map(|(hash, _)| *hash)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.requests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }

    pub fn clear(&mut self) {
        self.requests.clear();
    }
}
