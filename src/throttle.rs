//! Worker throttle
//!
//! Bounds how many leaf jobs hold store handles at once. A slot is an owned
//! semaphore permit; dropping the permit releases the slot on every exit
//! path, including panics and early returns.

use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;

/// `acquire` failed because the operation was cancelled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cancelled;

/// A held worker slot; released on drop
#[derive(Debug)]
pub struct WorkerSlot {
    _permit: OwnedSemaphorePermit,
}

#[derive(Debug, Clone)]
pub struct WorkerThrottle {
    slots: Arc<Semaphore>,
    capacity: usize,
    cancel: CancellationToken,
}

impl WorkerThrottle {
    pub fn new(capacity: usize, cancel: CancellationToken) -> Self {
        debug_assert!(capacity > 0, "throttle needs at least one slot");
        WorkerThrottle {
            slots: Arc::new(Semaphore::new(capacity)),
            capacity,
            cancel,
        }
    }

    /// Wait for a free slot.
    ///
    /// Returns `Err(Cancelled)` as soon as the token is cancelled, whether or
    /// not a slot is free. Tokio's semaphore queues waiters in FIFO order, so
    /// no acquirer starves under steady load.
    pub async fn acquire(&self) -> Result<WorkerSlot, Cancelled> {
        if self.cancel.is_cancelled() {
            return Err(Cancelled);
        }
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(Cancelled),
            permit = Arc::clone(&self.slots).acquire_owned() => {
                // The semaphore is never closed while the throttle is alive
                permit.map(|p| WorkerSlot { _permit: p }).map_err(|_| Cancelled)
            }
        }
    }

    /// Take a slot without waiting, if one is free
    pub fn try_acquire(&self) -> Option<WorkerSlot> {
        if self.cancel.is_cancelled() {
            return None;
        }
        Arc::clone(&self.slots)
            .try_acquire_owned()
            .ok()
            .map(|p| WorkerSlot { _permit: p })
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn in_flight(&self) -> usize {
        self.capacity - self.slots.available_permits()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }
}
