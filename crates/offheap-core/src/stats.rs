//! Statistics sink for allocator events.
//!
//! The manager reports every allocation, release, batch carve, quarantine
//! and failure to an injected [`StatsSink`]. Hooks default to no-ops so sinks
//! only implement what they care about. Counters in [`AllocatorMetrics`] use
//! relaxed ordering; they are diagnostic, not synchronization.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Observer of allocator events.
pub trait StatsSink: Send + Sync {
    /// A chunk of `total_size` bytes was handed out.
    fn chunk_allocated(&self, total_size: usize) {
        let _ = total_size;
    }

    /// A chunk of `total_size` bytes went back to its free list.
    fn chunk_released(&self, total_size: usize) {
        let _ = total_size;
    }

    /// `count` chunks of `chunk_size` bytes were carved from a slab.
    fn batch_carved(&self, chunk_size: usize, count: usize) {
        let _ = (chunk_size, count);
    }

    /// No slab could fit a chunk of `total_size` bytes.
    fn allocation_failed(&self, total_size: usize) {
        let _ = total_size;
    }

    /// A release or re-acquire named an address that was not allocated.
    fn release_rejected(&self) {}

    /// A free chunk of `total_size` bytes failed fill validation and was
    /// withdrawn for good.
    fn chunk_quarantined(&self, total_size: usize) {
        let _ = total_size;
    }
}

/// Sink that ignores everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopStats;

impl StatsSink for NoopStats {}

/// Atomic allocator counters.
#[derive(Debug)]
pub struct AllocatorMetrics {
    /// Chunks handed out.
    pub allocations: AtomicU64,
    /// Bytes handed out (chunk totals).
    pub bytes_allocated: AtomicU64,
    /// Chunks returned.
    pub releases: AtomicU64,
    /// Bytes returned (chunk totals).
    pub bytes_released: AtomicU64,
    /// Cursor advances on a slab.
    pub batches_carved: AtomicU64,
    /// Chunks created by those advances.
    pub chunks_carved: AtomicU64,
    /// Out-of-memory results.
    pub allocation_failures: AtomicU64,
    /// Rejected releases (double release, foreign address, corruption).
    pub releases_rejected: AtomicU64,
    /// Free chunks withdrawn after failing fill validation.
    pub chunks_quarantined: AtomicU64,
    /// Bytes of those chunks.
    pub bytes_quarantined: AtomicU64,
}

impl AllocatorMetrics {
    /// Create a new zeroed metrics instance.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            allocations: AtomicU64::new(0),
            bytes_allocated: AtomicU64::new(0),
            releases: AtomicU64::new(0),
            bytes_released: AtomicU64::new(0),
            batches_carved: AtomicU64::new(0),
            chunks_carved: AtomicU64::new(0),
            allocation_failures: AtomicU64::new(0),
            releases_rejected: AtomicU64::new(0),
            chunks_quarantined: AtomicU64::new(0),
            bytes_quarantined: AtomicU64::new(0),
        }
    }

    /// Add `n` to a counter.
    pub fn add(counter: &AtomicU64, n: u64) {
        counter.fetch_add(n, Ordering::Relaxed);
    }

    /// Increment a counter by 1.
    pub fn inc(counter: &AtomicU64) {
        Self::add(counter, 1);
    }

    /// Read a counter value.
    pub fn get(counter: &AtomicU64) -> u64 {
        counter.load(Ordering::Relaxed)
    }

    /// Snapshot all counters.
    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            allocations: Self::get(&self.allocations),
            bytes_allocated: Self::get(&self.bytes_allocated),
            releases: Self::get(&self.releases),
            bytes_released: Self::get(&self.bytes_released),
            batches_carved: Self::get(&self.batches_carved),
            chunks_carved: Self::get(&self.chunks_carved),
            allocation_failures: Self::get(&self.allocation_failures),
            releases_rejected: Self::get(&self.releases_rejected),
            chunks_quarantined: Self::get(&self.chunks_quarantined),
            bytes_quarantined: Self::get(&self.bytes_quarantined),
        }
    }
}

impl Default for AllocatorMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl StatsSink for AllocatorMetrics {
    fn chunk_allocated(&self, total_size: usize) {
        Self::inc(&self.allocations);
        Self::add(&self.bytes_allocated, total_size as u64);
    }

    fn chunk_released(&self, total_size: usize) {
        Self::inc(&self.releases);
        Self::add(&self.bytes_released, total_size as u64);
    }

    fn batch_carved(&self, _chunk_size: usize, count: usize) {
        Self::inc(&self.batches_carved);
        Self::add(&self.chunks_carved, count as u64);
    }

    fn allocation_failed(&self, _total_size: usize) {
        Self::inc(&self.allocation_failures);
    }

    fn release_rejected(&self) {
        Self::inc(&self.releases_rejected);
    }

    fn chunk_quarantined(&self, total_size: usize) {
        Self::inc(&self.chunks_quarantined);
        Self::add(&self.bytes_quarantined, total_size as u64);
    }
}

/// Point-in-time snapshot of all allocator counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub allocations: u64,
    pub bytes_allocated: u64,
    pub releases: u64,
    pub bytes_released: u64,
    pub batches_carved: u64,
    pub chunks_carved: u64,
    pub allocation_failures: u64,
    pub releases_rejected: u64,
    pub chunks_quarantined: u64,
    pub bytes_quarantined: u64,
}

impl MetricsSnapshot {
    /// Bytes allocated and not yet released.
    #[must_use]
    pub fn net_bytes(&self) -> u64 {
        self.bytes_allocated.saturating_sub(self.bytes_released)
    }
}
