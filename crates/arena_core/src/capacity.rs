//! Capacity ceilings shared by arenas and the resource registry.
//!
//! Both registries reject work that would exceed a ceiling; neither ever
//! evicts an existing entry to make room.

use crate::error::{RegistryError, RegistryResult};
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore, TryAcquireError};

/// Fails with [`RegistryError::CapacityExceeded`] if `current` has reached `capacity`.
pub fn ensure_room(current: usize, capacity: usize) -> RegistryResult<()> {
    if current >= capacity {
        Err(RegistryError::CapacityExceeded { capacity })
    } else {
        Ok(())
    }
}

/// Semaphore handing out at most `limit` instance slots.
pub fn slot_semaphore(limit: usize) -> Arc<Semaphore> {
    Arc::new(Semaphore::new(limit.min(Semaphore::MAX_PERMITS)))
}

/// Takes one slot without waiting, or fails with `CapacityExceeded`.
///
/// The slot is returned to `slots` when the permit is dropped.
pub fn try_acquire_slot(
    slots: &Arc<Semaphore>,
    limit: usize,
) -> RegistryResult<OwnedSemaphorePermit> {
    slots.clone().try_acquire_owned().map_err(|e| match e {
        TryAcquireError::NoPermits | TryAcquireError::Closed => {
            RegistryError::CapacityExceeded { capacity: limit }
        }
    })
}
