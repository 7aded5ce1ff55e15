use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::error::SyncError;

/// Admission control for outstanding header and block requests.
///
/// A slot is taken before a request is sent and given back when the permit
/// is dropped: on response, on timeout, or when the peer session closes.
#[derive(Debug, Clone)]
pub struct FlightWindow {
    capacity: usize,
    headers: Arc<Semaphore>,
    blocks: Arc<Semaphore>,
}

impl FlightWindow {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            headers: Arc::new(Semaphore::new(capacity)),
            blocks: Arc::new(Semaphore::new(capacity)),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Waits until a header slot is free.
    pub async fn acquire_header(&self) -> Result<OwnedSemaphorePermit, SyncError> {
        self.headers
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| SyncError::WindowClosed)
    }

    /// Waits until a block slot is free.
    pub async fn acquire_block(&self) -> Result<OwnedSemaphorePermit, SyncError> {
        self.blocks
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| SyncError::WindowClosed)
    }

    pub fn headers_in_flight(&self) -> usize {
        self.capacity - self.headers.available_permits()
    }

    pub fn blocks_in_flight(&self) -> usize {
        self.capacity - self.blocks.available_permits()
    }
}
