use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use crate::guard::BufferGuard;
use crate::types::BufferState;

/// Buffer pool statistics snapshot
#[derive(Debug, Clone, Copy, Default)]
pub struct BufferPoolStats {
    pub total: usize,
    pub available: usize,
    pub in_use: usize,
    pub in_flight: usize,
    pub max_in_use: usize,
    pub max_in_flight: usize,
    pub acquire_count: u64,
    pub release_count: u64,
    pub acquire_fail: u64,
}

struct BufferEntry {
    state: BufferState,
    /// The region storage. Present while the entry is Free; owned by the
    /// issued guard while the entry is InUse or InFlight.
    storage: Option<Box<[u8]>>,
}

struct PoolInner {
    entries: Vec<BufferEntry>,
    free_ids: VecDeque<u32>,
    buffer_size: usize,
    initialized: bool,
    /// Bumped by initialize/clear so releases from a previous pool
    /// incarnation cannot corrupt the free queue.
    generation: u64,
    stats: BufferPoolStats,
}

pub(crate) struct PoolShared {
    inner: Mutex<PoolInner>,
}

/// Fixed-capacity pool of equal-sized byte regions
///
/// Buffers move Free -> InUse -> InFlight -> Free. Acquired regions are
/// handed out as [`BufferGuard`]s that return their region on drop. The
/// free queue is FIFO: a released id resurfaces only after every id freed
/// before it has been re-acquired.
pub struct BufferPool {
    shared: Arc<PoolShared>,
}

impl BufferPool {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(PoolShared {
                inner: Mutex::new(PoolInner {
                    entries: Vec::new(),
                    free_ids: VecDeque::new(),
                    buffer_size: 0,
                    initialized: false,
                    generation: 0,
                    stats: BufferPoolStats::default(),
                }),
            }),
        }
    }

    /// Allocate `buffer_count` regions of `buffer_size` bytes, replacing
    /// any prior state. Rejects a zero count or size.
    pub fn initialize(&self, buffer_count: usize, buffer_size: usize) -> bool {
        if buffer_count == 0 || buffer_size == 0 {
            return false;
        }

        let mut inner = self.shared.inner.lock().unwrap();
        clear_locked(&mut inner);

        inner.entries = (0..buffer_count)
            .map(|_| BufferEntry {
                state: BufferState::Free,
                storage: Some(vec![0u8; buffer_size].into_boxed_slice()),
            })
            .collect();
        inner.free_ids = (0..buffer_count as u32).collect();
        inner.buffer_size = buffer_size;
        inner.initialized = true;

        inner.stats = BufferPoolStats {
            total: buffer_count,
            available: buffer_count,
            ..BufferPoolStats::default()
        };

        true
    }

    /// Take the head of the free queue as a guard, or `None` when the pool
    /// is exhausted or uninitialized.
    pub fn acquire(&self) -> Option<BufferGuard> {
        let mut inner = self.shared.inner.lock().unwrap();

        inner.stats.acquire_count += 1;
        if !inner.initialized || inner.free_ids.is_empty() {
            inner.stats.acquire_fail += 1;
            return None;
        }

        let id = self.shared.pop_free_locked(&mut inner)?;
        let generation = inner.generation;
        let storage = match inner.entries[id as usize].storage.take() {
            Some(storage) => storage,
            None => {
                inner.stats.acquire_fail += 1;
                return None;
            }
        };

        inner.entries[id as usize].state = BufferState::InUse;
        inner.stats.in_use += 1;
        inner.stats.max_in_use = inner.stats.max_in_use.max(inner.stats.in_use);

        Some(BufferGuard::new(
            Arc::clone(&self.shared),
            id,
            generation,
            storage,
        ))
    }

    pub fn stats(&self) -> BufferPoolStats {
        let inner = self.shared.inner.lock().unwrap();
        let mut stats = inner.stats;
        stats.available = inner.free_ids.len();
        stats
    }

    /// Ids of all entries not currently Free. Never mutates state.
    pub fn check_leaks(&self) -> Vec<u32> {
        let inner = self.shared.inner.lock().unwrap();
        collect_leaks_locked(&inner)
    }

    pub fn buffer_count(&self) -> usize {
        self.shared.inner.lock().unwrap().entries.len()
    }

    pub fn buffer_size(&self) -> usize {
        self.shared.inner.lock().unwrap().buffer_size
    }

    /// Drop all entries and return the pool to uninitialized. Outstanding
    /// guards are reported as leaks; their releases become no-ops.
    pub fn clear(&self) {
        let mut inner = self.shared.inner.lock().unwrap();
        clear_locked(&mut inner);
    }
}

impl Default for BufferPool {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for BufferPool {
    fn drop(&mut self) {
        self.clear();
    }
}

impl PoolShared {
    fn pop_free_locked(&self, inner: &mut PoolInner) -> Option<u32> {
        let id = inner.free_ids.pop_front()?;
        inner.stats.available = inner.free_ids.len();
        Some(id)
    }

    /// Release hook invoked by a guard drop. Inert when the pool has been
    /// cleared or re-initialized since the guard was issued.
    pub(crate) fn release_slot(&self, id: u32, generation: u64, storage: Box<[u8]>) {
        let mut inner = self.inner.lock().unwrap();

        if !inner.initialized
            || generation != inner.generation
            || id as usize >= inner.entries.len()
        {
            return;
        }

        match inner.entries[id as usize].state {
            BufferState::InUse => {
                inner.stats.in_use = inner.stats.in_use.saturating_sub(1);
            }
            BufferState::InFlight => {
                inner.stats.in_flight = inner.stats.in_flight.saturating_sub(1);
            }
            BufferState::Free => return,
        }

        inner.entries[id as usize].state = BufferState::Free;
        inner.entries[id as usize].storage = Some(storage);
        inner.free_ids.push_back(id);
        inner.stats.available = inner.free_ids.len();
        inner.stats.release_count += 1;
    }

    /// InUse -> InFlight transition hook. Any other source state is a no-op.
    pub(crate) fn mark_in_flight(&self, id: u32, generation: u64) {
        let mut inner = self.inner.lock().unwrap();

        if !inner.initialized
            || generation != inner.generation
            || id as usize >= inner.entries.len()
        {
            return;
        }

        if inner.entries[id as usize].state == BufferState::InUse {
            inner.entries[id as usize].state = BufferState::InFlight;
            inner.stats.in_use = inner.stats.in_use.saturating_sub(1);
            inner.stats.in_flight += 1;
            inner.stats.max_in_flight = inner.stats.max_in_flight.max(inner.stats.in_flight);
        }
    }
}

fn collect_leaks_locked(inner: &PoolInner) -> Vec<u32> {
    inner
        .entries
        .iter()
        .enumerate()
        .filter(|(_, entry)| entry.state != BufferState::Free)
        .map(|(id, _)| id as u32)
        .collect()
}

fn clear_locked(inner: &mut PoolInner) {
    let leaked = collect_leaks_locked(inner);
    if !leaked.is_empty() {
        tracing::error!(
            leaked_ids = ?leaked,
            "clearing buffer pool with unreleased buffers"
        );
    }

    inner.entries.clear();
    inner.free_ids.clear();
    inner.buffer_size = 0;
    inner.initialized = false;
    inner.generation += 1;
    inner.stats = BufferPoolStats::default();
}
