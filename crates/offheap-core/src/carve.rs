//! Bump-pointer carving of fresh chunks from a slab's unused tail.
//!
//! Chunks never split or merge, so a chunk's start offset is fixed the
//! moment it is carved. Each cursor keeps one bit per alignment unit
//! marking those starts; an offset without its bit is never a chunk.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

/// Per-slab bump cursor: offset of the first uncarved byte, plus the map of
/// chunk starts below it.
#[derive(Debug)]
pub struct SlabCursor {
    carved: AtomicUsize,
    len: usize,
    unit: usize,
    starts: Box<[AtomicU64]>,
}

/// A run of consecutive same-size chunks claimed by one cursor advance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Carve {
    pub start: usize,
    pub count: usize,
    pub chunk_size: usize,
}

impl Carve {
    /// Offsets of every chunk in the run.
    pub fn offsets(&self) -> impl Iterator<Item = usize> + use<> {
        let Self {
            start,
            count,
            chunk_size,
        } = *self;
        (0..count).map(move |i| start + i * chunk_size)
    }
}

impl SlabCursor {
    /// Cursor over a slab of `len` bytes whose chunks start on multiples of
    /// `alignment`.
    #[must_use]
    pub fn new(len: usize, alignment: usize) -> Self {
        debug_assert!(alignment > 0);
        let units = len / alignment;
        let starts: Vec<AtomicU64> = (0..units.div_ceil(64)).map(|_| AtomicU64::new(0)).collect();
        Self {
            carved: AtomicUsize::new(0),
            len,
            unit: alignment,
            starts: starts.into_boxed_slice(),
        }
    }

    /// Records that a chunk begins at `offset`. Must happen before the
    /// chunk is handed out or free-listed.
    pub fn mark_start(&self, offset: usize) {
        debug_assert!(offset % self.unit == 0);
        let bit = offset / self.unit;
        if let Some(word) = self.starts.get(bit / 64) {
            word.fetch_or(1 << (bit % 64), Ordering::Release);
        }
    }

    /// Whether a carved chunk begins at `offset`.
    #[must_use]
    pub fn is_start(&self, offset: usize) -> bool {
        if offset % self.unit != 0 {
            return false;
        }
        let bit = offset / self.unit;
        self.starts
            .get(bit / 64)
            .is_some_and(|word| word.load(Ordering::Acquire) & (1 << (bit % 64)) != 0)
    }

    /// Bytes carved so far.
    #[must_use]
    pub fn carved(&self) -> usize {
        self.carved.load(Ordering::Acquire)
    }

    /// Bytes not yet carved.
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.len - self.carved()
    }

    /// Claims up to `max_count` chunks of `chunk_size` bytes with one CAS.
    ///
    /// Returns `None` when not even one chunk fits.
    pub fn carve(&self, chunk_size: usize, max_count: usize) -> Option<Carve> {
        debug_assert!(chunk_size > 0 && max_count > 0);
        let mut current = self.carved.load(Ordering::Acquire);
        loop {
            let fit = (self.len - current) / chunk_size;
            if fit == 0 {
                return None;
            }
            let count = fit.min(max_count);
            let next = current + count * chunk_size;
            match self.carved.compare_exchange_weak(
                current,
                next,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => {
                    return Some(Carve {
                        start: current,
                        count,
                        chunk_size,
                    });
                }
                Err(actual) => current = actual,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn carves_whole_batches_then_partial() {
        let cursor = SlabCursor::new(100, 8);
        let first = cursor.carve(24, 3).unwrap();
        assert_eq!(first.start, 0);
        assert_eq!(first.count, 3);
        assert_eq!(first.offsets().collect::<Vec<_>>(), vec![0, 24, 48]);

        let second = cursor.carve(24, 3).unwrap();
        assert_eq!(second.start, 72);
        assert_eq!(second.count, 1);
        assert_eq!(cursor.remaining(), 4);
        assert_eq!(cursor.carve(24, 3), None);
    }

    #[test]
    fn smaller_chunks_still_fit_after_large_miss() {
        let cursor = SlabCursor::new(64, 8);
        assert!(cursor.carve(48, 1).is_some());
        assert_eq!(cursor.carve(24, 1), None);
        assert!(cursor.carve(16, 1).is_some());
        assert_eq!(cursor.carved(), 64);
    }

    #[test]
    fn concurrent_carves_never_overlap() {
        let cursor = SlabCursor::new(16 * 1000, 16);
        let mut runs: Vec<Carve> = std::thread::scope(|s| {
            let handles: Vec<_> = (0..4)
                .map(|_| {
                    s.spawn(|| {
                        let mut mine = Vec::new();
                        while let Some(run) = cursor.carve(16, 7) {
                            mine.push(run);
                        }
                        mine
                    })
                })
                .collect();
            handles
                .into_iter()
                .flat_map(|h| h.join().unwrap())
                .collect()
        });
        runs.sort_by_key(|r| r.start);
        let mut expected = 0;
        for run in &runs {
            assert_eq!(run.start, expected);
            expected += run.count * 16;
        }
        assert_eq!(expected, 16 * 1000);
    }

    #[test]
    fn only_marked_offsets_are_starts() {
        let cursor = SlabCursor::new(4096, 8);
        let run = cursor.carve(24, 4).unwrap();
        assert!(run.offsets().all(|offset| !cursor.is_start(offset)));
        for offset in run.offsets() {
            cursor.mark_start(offset);
        }
        assert!(cursor.is_start(0));
        assert!(cursor.is_start(72));
        assert!(!cursor.is_start(8));
        assert!(!cursor.is_start(16));
        assert!(!cursor.is_start(12));
        assert!(!cursor.is_start(96));
        assert!(!cursor.is_start(1 << 20));
    }

    #[test]
    fn start_map_covers_the_last_unit() {
        let cursor = SlabCursor::new(64 * 64 + 256, 64);
        let last = 64 * 64 + 192;
        cursor.mark_start(last);
        assert!(cursor.is_start(last));
        assert!(!cursor.is_start(last - 64));
    }
}
