//! # offheap-core
//!
//! Size-classed free list allocator that carves chunks out of pre-reserved
//! off-heap slabs.
//!
//! - [`FreeListManager`] owns the slabs and the per-class free lists. It
//!   hands out [`Chunk`] handles and accounts used/free memory exactly.
//! - Small requests get exact-fit tiny classes; large ones share rounded
//!   huge classes and are served best-fit.
//! - Free lists are striped behind `parking_lot` mutexes; misses refill a
//!   whole batch from a slab with a single bump-cursor CAS.
//! - Chunk headers live in-band and are only written by the manager. A CAS
//!   on the header state detects double release, and a reuse generation
//!   shared by header and address turns stale addresses into errors.
//!
//! Slab supply, statistics and chunk variant selection are injected through
//! [`SlabSource`], [`StatsSink`] and [`ChunkFactory`].

#![deny(unsafe_code)]

pub mod carve;
pub mod chunk;
pub mod config;
pub mod error;
pub mod free_list;
pub mod lifecycle;
pub mod manager;
pub mod size_class;
pub mod source;
pub mod stats;

pub use chunk::{
    BytesView, Chunk, ChunkAddress, ChunkFactory, ChunkKind, ChunkView, HEADER_SIZE,
    MAX_DATA_SIZE, MAX_SLABS, RestrictedChunkFactory, SerializedView, StandardChunkFactory,
    total_size,
};
pub use config::{
    FILL_BYTE, OffHeapConfig, TINY_FREE_LIST_COUNT, verify_alignment,
    verify_batch_allocation_size, verify_free_list_count, verify_huge_multiple,
};
pub use error::{AccessError, AllocError, ConfigError, OffHeapError, ReleaseError};
pub use lifecycle::{AllocatorLogLevel, AllocatorLogRecord, LIFECYCLE_LOG_CAPACITY};
pub use manager::{ChunkInfo, ClassReport, FreeListManager, FreeListReport, SlabReport};
pub use size_class::{SizeClass, SizeClasses};
pub use source::{SlabBacking, SlabSource, allocate_slabs};
pub use stats::{AllocatorMetrics, MetricsSnapshot, NoopStats, StatsSink};

pub use offheap_slab::{Slab, SlabError};
