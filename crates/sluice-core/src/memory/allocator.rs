//! Instrumented allocator and reservations.

use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

/// Snapshot of allocator counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AllocatorStats {
    /// Bytes currently reserved.
    pub allocated_bytes: usize,
    /// High watermark of reserved bytes.
    pub max_allocated_bytes: usize,
    /// Reservations currently alive.
    pub live_reservations: usize,
    /// Reservations ever created.
    pub total_reservations: u64,
}

#[derive(Default)]
struct Counters {
    allocated: AtomicUsize,
    max_allocated: AtomicUsize,
    live: AtomicUsize,
    total: AtomicU64,
}

/// Shared, cheaply clonable byte accountant.
///
/// All clones account into the same counters.
#[derive(Clone, Default)]
pub struct Allocator {
    counters: Arc<Counters>,
}

impl Allocator {
    /// Creates an allocator with zeroed counters.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserves `bytes` and returns the guard that gives them back on drop.
    #[must_use]
    pub fn reserve(&self, bytes: usize) -> Reservation {
        self.counters.live.fetch_add(1, Ordering::Relaxed);
        self.counters.total.fetch_add(1, Ordering::Relaxed);
        self.add(bytes);
        Reservation {
            allocator: self.clone(),
            bytes,
        }
    }

    /// Bytes currently reserved.
    #[must_use]
    pub fn allocated(&self) -> usize {
        self.counters.allocated.load(Ordering::Acquire)
    }

    /// Highest number of bytes that were reserved at once.
    #[must_use]
    pub fn max_allocated(&self) -> usize {
        self.counters.max_allocated.load(Ordering::Relaxed)
    }

    /// Number of reservations that have not been dropped yet.
    #[must_use]
    pub fn live_reservations(&self) -> usize {
        self.counters.live.load(Ordering::Acquire)
    }

    /// Returns a snapshot of all counters.
    #[must_use]
    pub fn stats(&self) -> AllocatorStats {
        AllocatorStats {
            allocated_bytes: self.allocated(),
            max_allocated_bytes: self.max_allocated(),
            live_reservations: self.live_reservations(),
            total_reservations: self.counters.total.load(Ordering::Relaxed),
        }
    }

    /// Returns true if both handles account into the same counters.
    #[must_use]
    pub fn same_as(&self, other: &Allocator) -> bool {
        Arc::ptr_eq(&self.counters, &other.counters)
    }

    fn add(&self, bytes: usize) {
        let now = self.counters.allocated.fetch_add(bytes, Ordering::AcqRel) + bytes;
        self.counters.max_allocated.fetch_max(now, Ordering::Relaxed);
    }

    fn sub(&self, bytes: usize) {
        let prev = self.counters.allocated.fetch_sub(bytes, Ordering::AcqRel);
        debug_assert!(prev >= bytes, "released {bytes} bytes but only {prev} were allocated");
    }
}

impl fmt::Debug for Allocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Allocator")
            .field("stats", &self.stats())
            .finish()
    }
}

/// Bytes held on behalf of one owner. Returned to the allocator on drop.
pub struct Reservation {
    allocator: Allocator,
    bytes: usize,
}

impl Reservation {
    /// Adds `bytes` to this reservation.
    pub fn grow(&mut self, bytes: usize) {
        self.allocator.add(bytes);
        self.bytes += bytes;
    }

    /// Bytes currently held.
    #[must_use]
    pub fn bytes(&self) -> usize {
        self.bytes
    }

    /// The allocator this reservation accounts into.
    #[must_use]
    pub fn allocator(&self) -> &Allocator {
        &self.allocator
    }
}

impl Drop for Reservation {
    fn drop(&mut self) {
        self.allocator.sub(self.bytes);
        self.allocator.counters.live.fetch_sub(1, Ordering::AcqRel);
    }
}

impl fmt::Debug for Reservation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Reservation")
            .field("bytes", &self.bytes)
            .finish_non_exhaustive()
    }
}
