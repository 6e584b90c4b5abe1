//! Backing storage capability for slabs.

use std::sync::atomic::AtomicU64;

/// A contiguous block of word-addressable memory.
///
/// Implementations must return the same slice, with the same length, for the
/// whole lifetime of the region, and the words must start out zeroed.
pub trait RawRegion: Send + Sync {
    /// The region's memory as atomic words.
    fn words(&self) -> &[AtomicU64];

    /// Short label for diagnostics (`heap`, `mmap`, ...).
    fn backing(&self) -> &'static str;
}

/// Region backed by the global allocator.
pub struct HeapRegion {
    words: Box<[AtomicU64]>,
}

impl HeapRegion {
    /// Allocates `word_count` zeroed words.
    #[must_use]
    pub fn new(word_count: usize) -> Self {
        let words: Vec<AtomicU64> = (0..word_count).map(|_| AtomicU64::new(0)).collect();
        Self {
            words: words.into_boxed_slice(),
        }
    }
}

impl RawRegion for HeapRegion {
    fn words(&self) -> &[AtomicU64] {
        &self.words
    }

    fn backing(&self) -> &'static str {
        "heap"
    }
}
