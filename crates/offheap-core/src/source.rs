//! Slab supply for the free list manager.
//!
//! The manager never creates slabs itself. A [`SlabSource`] hands over an
//! ordered set of slabs once, at construction, together with the total size
//! it believes they add up to.

use offheap_slab::{Slab, SlabError};

/// Supplies the slabs a manager carves chunks from.
pub trait SlabSource {
    /// Total bytes across all slabs, as reported by the source.
    fn total_memory(&self) -> usize;

    /// Hands over every slab. Called once, after [`SlabSource::total_memory`].
    fn take_slabs(&mut self) -> Vec<Slab>;
}

impl SlabSource for Vec<Slab> {
    fn total_memory(&self) -> usize {
        self.iter().map(Slab::len).sum()
    }

    fn take_slabs(&mut self) -> Vec<Slab> {
        std::mem::take(self)
    }
}

/// Backing used by [`allocate_slabs`].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum SlabBacking {
    #[default]
    Heap,
    #[cfg(unix)]
    Mmap,
}

/// Creates `count` slabs of `len` bytes each.
pub fn allocate_slabs(count: usize, len: usize, backing: SlabBacking) -> Result<Vec<Slab>, SlabError> {
    (0..count)
        .map(|_| match backing {
            SlabBacking::Heap => Slab::heap(len),
            #[cfg(unix)]
            SlabBacking::Mmap => Slab::mmap(len),
        })
        .collect()
}
