//! # offheap-slab
//!
//! Raw memory for the off-heap chunk allocator.
//!
//! A [`Slab`] is one contiguous, fixed-size region reserved up front and
//! handed to the free list manager, which carves chunks out of it. Slabs are
//! never resized; their memory is returned when the slab is dropped.
//!
//! Storage is exposed as a slice of `AtomicU64` words, so every read and write
//! is safe Rust and well-defined under concurrent access. Two backings exist:
//! - [`HeapRegion`]: zeroed words from the global allocator.
//! - [`MmapRegion`] (unix): an anonymous private mapping, outside the
//!   process heap entirely.
//!
//! No `unsafe` code is permitted at the crate level; only the mmap backing
//! opts in.

#![deny(unsafe_code)]

pub mod error;
#[cfg(unix)]
#[allow(unsafe_code)]
pub mod mmap;
pub mod region;
pub mod slab;

pub use error::SlabError;
#[cfg(unix)]
pub use mmap::MmapRegion;
pub use region::{HeapRegion, RawRegion};
pub use slab::{MAX_SLAB_LEN, Slab, WORD_SIZE};
