//! ## skarv-core::stats
//! **Buffer pool statistics tracking**
//!
//! Thread-safe counters over the pool's acquire/release traffic, cheap
//! enough to update on the hot path.

use std::sync::atomic::{AtomicUsize, Ordering};

/// Counters over one pool's lifetime.
#[derive(Debug, Default)]
pub struct PoolStats {
    acquires: AtomicUsize,
    releases: AtomicUsize,
    exhausted: AtomicUsize,
    double_releases: AtomicUsize,
}

impl PoolStats {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn record_acquire(&self) {
        self.acquires.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_release(&self) {
        self.releases.fetch_add(1, Ordering::Relaxed);
    }

    /// An acquire found the free list empty.
    #[inline]
    pub fn record_exhausted(&self) {
        self.exhausted.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_double_release(&self) {
        self.double_releases.fetch_add(1, Ordering::Relaxed);
    }

    pub fn acquires(&self) -> usize {
        self.acquires.load(Ordering::Relaxed)
    }

    pub fn releases(&self) -> usize {
        self.releases.load(Ordering::Relaxed)
    }

    pub fn exhausted(&self) -> usize {
        self.exhausted.load(Ordering::Relaxed)
    }

    pub fn double_releases(&self) -> usize {
        self.double_releases.load(Ordering::Relaxed)
    }
}
