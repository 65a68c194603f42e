//! ## skarv-core::pool
//! **Fixed-capacity buffer pool and free list**
//!
//! A fixed set of equal-size byte slots, identified by integer index, plus
//! the recycling registry of currently-unused indices. Every index is
//! pushed free at startup and recycled for the life of the process.
//!
//! Invariant: each index is in exactly one of free or outstanding at any
//! time, so `free_count() + outstanding() == capacity()` holds at every
//! observation point. `acquire` on an empty list is backpressure, not an
//! error, and never blocks. Releasing an index that is already free is a
//! releasing bug and is reported, never absorbed.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::{Mutex, MutexGuard};
use thiserror::Error;

use crate::stats::PoolStats;

/// Buffer pool misuse and sizing errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PoolError {
    #[error("pool capacity must be greater than zero")]
    ZeroCapacity,
    #[error("slot size must be greater than zero")]
    ZeroSlotSize,
    #[error("slot index {0} is out of range")]
    IndexOutOfRange(u32),
    /// The index is already on the free list. Accepting it would later
    /// hand out two live views of the same slot.
    #[error("double release of slot index {0}")]
    DoubleRelease(u32),
}

/// Index of one slot within a pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SlotIndex(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SlotState {
    Free,
    Outstanding,
}

struct FreeList {
    free: VecDeque<u32>,
    state: Box<[SlotState]>,
}

/// Fixed set of equal-size slots plus the free-index queue over them.
pub struct BufferPool {
    slot_size: usize,
    slots: Box<[Mutex<Box<[u8]>>]>,
    list: Mutex<FreeList>,
    outstanding: AtomicUsize,
    stats: PoolStats,
}

impl BufferPool {
    /// Creates a pool of `capacity` slots of `slot_size` bytes each, all
    /// indices seeded onto the free list.
    pub fn new(capacity: usize, slot_size: usize) -> Result<Self, PoolError> {
        if capacity == 0 {
            return Err(PoolError::ZeroCapacity);
        }
        if slot_size == 0 {
            return Err(PoolError::ZeroSlotSize);
        }
        let slots = (0..capacity)
            .map(|_| Mutex::new(vec![0u8; slot_size].into_boxed_slice()))
            .collect::<Vec<_>>()
            .into_boxed_slice();
        let free = (0..capacity as u32).collect();
        let state = vec![SlotState::Free; capacity].into_boxed_slice();
        Ok(Self {
            slot_size,
            slots,
            list: Mutex::new(FreeList { free, state }),
            outstanding: AtomicUsize::new(0),
            stats: PoolStats::new(),
        })
    }

    /// Pops one free index, or `None` when the pool is exhausted. Callers
    /// treat `None` as backpressure and defer the requesting operation.
    pub fn acquire(&self) -> Option<SlotIndex> {
        let mut list = self.list.lock();
        match list.free.pop_front() {
            Some(index) => {
                list.state[index as usize] = SlotState::Outstanding;
                self.outstanding.fetch_add(1, Ordering::Relaxed);
                self.stats.record_acquire();
                Some(SlotIndex(index))
            }
            None => {
                self.stats.record_exhausted();
                None
            }
        }
    }

    /// Returns an index to the free list.
    pub fn release(&self, index: SlotIndex) -> Result<(), PoolError> {
        let mut list = self.list.lock();
        let slot = list
            .state
            .get(index.0 as usize)
            .copied()
            .ok_or(PoolError::IndexOutOfRange(index.0))?;
        if slot == SlotState::Free {
            self.stats.record_double_release();
            return Err(PoolError::DoubleRelease(index.0));
        }
        list.state[index.0 as usize] = SlotState::Free;
        list.free.push_back(index.0);
        self.outstanding.fetch_sub(1, Ordering::Relaxed);
        self.stats.record_release();
        Ok(())
    }

    /// Exclusive access to a slot's bytes. The index discipline (one owner
    /// per outstanding index) makes contention here a misuse.
    pub fn slot(&self, index: SlotIndex) -> Result<MutexGuard<'_, Box<[u8]>>, PoolError> {
        self.slots
            .get(index.0 as usize)
            .map(|slot| slot.lock())
            .ok_or(PoolError::IndexOutOfRange(index.0))
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn slot_size(&self) -> usize {
        self.slot_size
    }

    pub fn free_count(&self) -> usize {
        self.list.lock().free.len()
    }

    pub fn outstanding(&self) -> usize {
        self.outstanding.load(Ordering::Relaxed)
    }

    pub fn stats(&self) -> &PoolStats {
        &self.stats
    }
}
