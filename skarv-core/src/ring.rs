//! ## skarv-core::ring
//! **SPSC handoff of completed events**
//!
//! Lock-free single-producer single-consumer ring between the assembly
//! path and the distribution path, using a circular buffer and atomic
//! counters with cache-line aware layout. The assembly path must never
//! stall on distribution, so a full ring is signalled, not waited on.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use thiserror::Error;

use crate::assembly::CompletedEvent;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RingError {
    #[error("invalid capacity (must be a power of two)")]
    InvalidCapacity,
}

/// Cache-line aligned atomic counter to prevent false sharing.
#[repr(align(64))]
struct AlignedCounter(AtomicU64);

impl AlignedCounter {
    #[inline]
    fn new(value: u64) -> Self {
        Self(AtomicU64::new(value))
    }
}

struct InnerRing {
    buffer: Box<[std::cell::UnsafeCell<Option<CompletedEvent>>]>,
    head: AlignedCounter,
    tail: AlignedCounter,
    mask: usize,
}

/// Completed-event handoff ring.
pub struct CompletionRing {
    inner: Arc<InnerRing>,
}

impl CompletionRing {
    /// Creates a ring with the given capacity, which must be a power of
    /// two for cheap index masking.
    pub fn with_capacity(capacity: usize) -> Result<Self, RingError> {
        if !capacity.is_power_of_two() {
            return Err(RingError::InvalidCapacity);
        }
        let buffer = (0..capacity)
            .map(|_| std::cell::UnsafeCell::new(None))
            .collect::<Vec<_>>()
            .into_boxed_slice();
        Ok(Self {
            inner: Arc::new(InnerRing {
                buffer,
                head: AlignedCounter::new(0),
                tail: AlignedCounter::new(0),
                mask: capacity - 1,
            }),
        })
    }

    /// Creates a new handle to the shared ring.
    #[inline]
    pub fn share(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }

    /// Attempts to hand off a completed event. On a full ring the event is
    /// handed back so the caller can retry on its next cycle.
    ///
    /// # Safety
    ///
    /// Interior mutability is guarded by the head/tail counters; only the
    /// single producer writes at `head`.
    #[inline]
    pub fn send(&self, event: CompletedEvent) -> Result<(), CompletedEvent> {
        let head = self.inner.head.0.load(Ordering::Relaxed);
        let tail = self.inner.tail.0.load(Ordering::Acquire);

        if head - tail >= self.inner.buffer.len() as u64 {
            return Err(event);
        }

        // SAFETY: Exclusive write access ensured by atomic counters.
        unsafe {
            let idx = (head as usize) & self.inner.mask;
            *self.inner.buffer[idx].get() = Some(event);
        }

        self.inner.head.0.store(head + 1, Ordering::Release);
        Ok(())
    }

    /// Attempts to take the next completed event, `None` when empty.
    #[inline]
    pub fn recv(&self) -> Option<CompletedEvent> {
        let tail = self.inner.tail.0.load(Ordering::Relaxed);
        let head = self.inner.head.0.load(Ordering::Acquire);

        if head == tail {
            return None;
        }

        // SAFETY: Exclusive read access ensured by atomic counters.
        let event = unsafe {
            let idx = (tail as usize) & self.inner.mask;
            (*self.inner.buffer[idx].get()).take()
        };

        self.inner.tail.0.store(tail + 1, Ordering::Release);
        event
    }

    /// Number of events currently queued.
    pub fn len(&self) -> usize {
        let head = self.inner.head.0.load(Ordering::Acquire);
        let tail = self.inner.tail.0.load(Ordering::Acquire);
        (head - tail) as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// SAFETY: Thread safety ensured by atomic counters and Arc.
unsafe impl Send for InnerRing {}
unsafe impl Sync for InnerRing {}
