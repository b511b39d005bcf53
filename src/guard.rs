use std::fmt;
use std::sync::Arc;

use crate::pool::PoolShared;

/// Shared holder used to fan a guard out across consumers. Cloning bumps
/// the reference count; the underlying release runs exactly once when the
/// last clone drops.
pub type SharedBufferGuard = Arc<BufferGuard>;

/// Scoped owner of one pooled byte region
///
/// Constructed only by [`crate::pool::BufferPool::acquire`]. The guard is
/// move-only; dropping it returns the region to the pool. For fan-out,
/// wrap it in an `Arc` ([`SharedBufferGuard`]) at the publish boundary.
///
/// While checked out the guard owns the region storage, so its data
/// pointer stays valid for the guard's whole lifetime even if the pool is
/// cleared underneath it.
pub struct BufferGuard {
    shared: Arc<PoolShared>,
    id: u32,
    generation: u64,
    storage: Option<Box<[u8]>>,
}

impl BufferGuard {
    pub(crate) fn new(
        shared: Arc<PoolShared>,
        id: u32,
        generation: u64,
        storage: Box<[u8]>,
    ) -> Self {
        Self {
            shared,
            id,
            generation,
            storage: Some(storage),
        }
    }

    pub fn is_valid(&self) -> bool {
        self.storage.is_some()
    }

    /// Stable index of the owned entry in the pool.
    pub fn id(&self) -> u32 {
        self.id
    }

    /// Region size in bytes.
    pub fn size(&self) -> usize {
        self.storage.as_ref().map_or(0, |storage| storage.len())
    }

    /// Raw pointer into the region; stable for the guard's lifetime.
    pub fn as_ptr(&self) -> *const u8 {
        self.storage
            .as_ref()
            .map_or(std::ptr::null(), |storage| storage.as_ptr())
    }

    pub fn as_slice(&self) -> &[u8] {
        self.storage.as_deref().unwrap_or(&[])
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        self.storage.as_deref_mut().unwrap_or(&mut [])
    }

    /// Mark the owned entry InFlight. Safe to call any number of times;
    /// only the first call (from InUse) has an effect.
    pub fn mark_in_flight(&self) {
        if self.storage.is_some() {
            self.shared.mark_in_flight(self.id, self.generation);
        }
    }
}

impl Drop for BufferGuard {
    fn drop(&mut self) {
        if let Some(storage) = self.storage.take() {
            self.shared.release_slot(self.id, self.generation, storage);
        }
    }
}

impl fmt::Debug for BufferGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BufferGuard")
            .field("id", &self.id)
            .field("size", &self.size())
            .finish()
    }
}
