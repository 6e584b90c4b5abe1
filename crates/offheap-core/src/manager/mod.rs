//! Free list manager.
//!
//! Owns the slabs and every size-class free list. Allocation pops a free
//! chunk of the request's class; on a miss it carves a batch of fresh chunks
//! from the current slab's unused tail with one cursor CAS, keeps one and
//! seeds the class list with the rest. Release flips the header from
//! allocated to free with a CAS, so a second release of the same address is
//! detected instead of corrupting the list.
//!
//! Every allocation bumps the chunk's generation in its header and in the
//! address it hands out. An address from an earlier allocation of the same
//! chunk is stale and is rejected by release, re-acquire and handle access.
//! Only offsets the cursor recorded as chunk starts are ever accepted.
//!
//! `used_memory` is a single atomic; `free_memory` is derived from it, so
//! `used + free == total` holds at every instant.

mod inspect;

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};

use offheap_slab::{Slab, SlabError};
use parking_lot::RwLock;

use crate::carve::{Carve, SlabCursor};
use crate::chunk::{
    Chunk, ChunkAddress, ChunkFactory, ChunkHeader, ChunkKind, HEADER_SIZE, MAX_DATA_SIZE,
    MAX_SLABS, StandardChunkFactory, next_generation,
};
use crate::config::{FILL_BYTE, OffHeapConfig};
use crate::error::{AccessError, AllocError, OffHeapError, ReleaseError};
use crate::free_list::{FreeChunk, FreeList, home_stripe};
use crate::lifecycle::{AllocatorLogLevel, AllocatorLogRecord, LifecycleEvent, LifecycleLog};
use crate::size_class::{SizeClass, SizeClasses};
use crate::source::SlabSource;
use crate::stats::{NoopStats, StatsSink};

pub use inspect::{ChunkInfo, ClassReport, FreeListReport, SlabReport};

/// Size-classed chunk allocator over a fixed set of slabs.
pub struct FreeListManager {
    config: OffHeapConfig,
    classes: SizeClasses,
    slabs: Box<[Slab]>,
    cursors: Box<[SlabCursor]>,
    /// Slab that refills try first.
    current_slab: AtomicUsize,
    tiny_lists: Box<[OnceLock<FreeList>]>,
    huge_lists: RwLock<BTreeMap<usize, Arc<FreeList>>>,
    used: AtomicUsize,
    total: usize,
    quarantined: AtomicUsize,
    stats: Arc<dyn StatsSink>,
    factory: Arc<dyn ChunkFactory>,
    lifecycle: LifecycleLog,
}

impl FreeListManager {
    /// Creates a manager with no-op statistics and the standard chunk factory.
    pub fn new<S>(config: OffHeapConfig, source: &mut S) -> Result<Self, OffHeapError>
    where
        S: SlabSource + ?Sized,
    {
        Self::with_collaborators(
            config,
            source,
            Arc::new(NoopStats),
            Arc::new(StandardChunkFactory),
        )
    }

    /// Creates a manager with explicit collaborators.
    ///
    /// Fails if the configuration is invalid, the source supplies no slabs or
    /// more than [`MAX_SLABS`], or the source's reported total differs from
    /// the sum of slab lengths.
    pub fn with_collaborators<S>(
        config: OffHeapConfig,
        source: &mut S,
        stats: Arc<dyn StatsSink>,
        factory: Arc<dyn ChunkFactory>,
    ) -> Result<Self, OffHeapError>
    where
        S: SlabSource + ?Sized,
    {
        config.validate()?;
        let reported = source.total_memory();
        let slabs = source.take_slabs();
        if slabs.is_empty() {
            return Err(OffHeapError::NoSlabs);
        }
        if slabs.len() > MAX_SLABS {
            return Err(OffHeapError::TooManySlabs {
                count: slabs.len(),
                max: MAX_SLABS,
            });
        }
        let actual: usize = slabs.iter().map(Slab::len).sum();
        if reported != actual {
            return Err(OffHeapError::SlabAccounting { reported, actual });
        }

        let classes = SizeClasses::new(&config);
        let cursors: Vec<SlabCursor> = slabs
            .iter()
            .map(|s| SlabCursor::new(s.len(), config.alignment))
            .collect();
        let tiny_lists: Vec<OnceLock<FreeList>> =
            (0..classes.tiny_count()).map(|_| OnceLock::new()).collect();

        let manager = Self {
            config,
            classes,
            slabs: slabs.into_boxed_slice(),
            cursors: cursors.into_boxed_slice(),
            current_slab: AtomicUsize::new(0),
            tiny_lists: tiny_lists.into_boxed_slice(),
            huge_lists: RwLock::new(BTreeMap::new()),
            used: AtomicUsize::new(0),
            total: actual,
            quarantined: AtomicUsize::new(0),
            stats,
            factory,
            lifecycle: LifecycleLog::default(),
        };
        manager.record(
            AllocatorLogLevel::Info,
            "new",
            "manager_ready",
            None,
            Some(actual),
            "ok",
            format!(
                "{} slab(s), alignment={}, huge_multiple={}, free_list_count={}, batch={}, fill={}",
                manager.slabs.len(),
                config.alignment,
                config.huge_multiple,
                config.free_list_count,
                config.batch_allocation_size,
                config.validate_with_fill
            ),
        );
        Ok(manager)
    }

    #[must_use]
    pub fn config(&self) -> &OffHeapConfig {
        &self.config
    }

    #[must_use]
    pub fn size_classes(&self) -> &SizeClasses {
        &self.classes
    }

    #[must_use]
    pub fn slab_count(&self) -> usize {
        self.slabs.len()
    }

    /// Allocates a chunk holding `data_size` bytes.
    ///
    /// `kind` is resolved by the chunk factory; `None` picks its baseline.
    ///
    /// # Panics
    ///
    /// If `data_size` is zero or larger than [`MAX_DATA_SIZE`]. A negative
    /// size cast to `usize` lands in the second case.
    pub fn allocate(
        &self,
        data_size: usize,
        kind: Option<ChunkKind>,
    ) -> Result<Chunk<'_>, AllocError> {
        assert!(data_size > 0, "off-heap allocation size must be > 0");
        assert!(
            data_size <= MAX_DATA_SIZE,
            "off-heap allocation size {data_size} exceeds the maximum of {MAX_DATA_SIZE}"
        );
        let kind = self.factory.resolve(kind)?;
        let (class, total) = self.classes.classify(data_size);
        let seed = home_stripe();

        let free = match self.pop_free(class, total, seed) {
            Some(free) => {
                self.check_fill(free)?;
                free
            }
            None => self.refill(class, total, seed, data_size)?,
        };

        let generation = next_generation(free.address.generation());
        let address = free.address.with_generation(generation);
        let header = ChunkHeader::allocated(free.total_size, data_size, kind, generation);
        self.slab_of(address)
            .store_word(address.offset(), header.encode())
            .map_err(|err| AllocError::Corrupted {
                address,
                detail: err.to_string(),
            })?;
        self.used.fetch_add(free.total_size, Ordering::AcqRel);
        self.stats.chunk_allocated(free.total_size);
        Ok(Chunk::new(self, address, header))
    }

    /// Returns an allocated chunk to its free list.
    ///
    /// # Panics
    ///
    /// If `address` is not currently allocated by this manager (double
    /// release, stale, foreign or corrupted address). Use
    /// [`FreeListManager::try_release`] to get an error instead.
    pub fn release(&self, address: ChunkAddress) {
        if let Err(err) = self.try_release(address) {
            panic!("off-heap release of {address} rejected: {err}");
        }
    }

    /// Returns an allocated chunk to its free list, yielding its total size.
    pub fn try_release(&self, address: ChunkAddress) -> Result<usize, ReleaseError> {
        let result = self.release_inner(address);
        if let Err(err) = &result {
            self.stats.release_rejected();
            self.record(
                AllocatorLogLevel::Warn,
                "release",
                "release_rejected",
                Some(address),
                None,
                "rejected",
                err.to_string(),
            );
        }
        result
    }

    /// Re-acquires a handle for an allocated chunk whose handle was given
    /// up with [`Chunk::into_address`].
    pub fn chunk(&self, address: ChunkAddress) -> Result<Chunk<'_>, ReleaseError> {
        let result = self.locate(address).and_then(|header| {
            if header.is_free() {
                Err(ReleaseError::DoubleRelease(address))
            } else {
                Ok(header)
            }
        });
        match result {
            Ok(header) => Ok(Chunk::new(self, address, header)),
            Err(err) => {
                self.stats.release_rejected();
                self.record(
                    AllocatorLogLevel::Warn,
                    "chunk",
                    "reacquire_rejected",
                    Some(address),
                    None,
                    "rejected",
                    err.to_string(),
                );
                Err(err)
            }
        }
    }

    /// Bytes held by allocated chunks.
    #[must_use]
    pub fn used_memory(&self) -> usize {
        self.used.load(Ordering::Acquire)
    }

    /// Bytes not held by allocated chunks: free-listed, quarantined or
    /// not yet carved.
    #[must_use]
    pub fn free_memory(&self) -> usize {
        self.total - self.used_memory()
    }

    /// Sum of all slab lengths.
    #[must_use]
    pub fn total_memory(&self) -> usize {
        self.total
    }

    /// Bytes of free chunks withdrawn after failing fill validation.
    #[must_use]
    pub fn quarantined_memory(&self) -> usize {
        self.quarantined.load(Ordering::Acquire)
    }

    /// Chunks currently sitting in free lists.
    #[must_use]
    pub fn free_chunk_count(&self) -> usize {
        let tiny: usize = self
            .tiny_lists
            .iter()
            .filter_map(OnceLock::get)
            .map(FreeList::len)
            .sum();
        let huge: usize = self.huge_lists.read().values().map(|l| l.len()).sum();
        tiny + huge
    }

    /// Largest run of uncarved bytes at the end of any slab.
    #[must_use]
    pub fn largest_unused_tail(&self) -> usize {
        self.cursors
            .iter()
            .map(SlabCursor::remaining)
            .max()
            .unwrap_or(0)
    }

    /// Removes and returns buffered lifecycle records, oldest first.
    pub fn drain_lifecycle_logs(&self) -> Vec<AllocatorLogRecord> {
        self.lifecycle.drain()
    }

    pub(crate) fn slab_of(&self, address: ChunkAddress) -> &Slab {
        &self.slabs[address.slab_index()]
    }

    /// Fails unless the header at `address` is allocated with the address's
    /// generation.
    pub(crate) fn check_live(&self, address: ChunkAddress) -> Result<(), AccessError> {
        let word = self.slab_of(address).load_word(address.offset())?;
        match ChunkHeader::decode(word) {
            Some(header) if !header.is_free() && header.generation == address.generation() => {
                Ok(())
            }
            _ => Err(AccessError::Stale { address }),
        }
    }

    fn pop_free(&self, class: SizeClass, total: usize, seed: usize) -> Option<FreeChunk> {
        match class {
            SizeClass::Tiny(index) => self.tiny_lists[index].get()?.pop(seed),
            SizeClass::Huge(bucket) => {
                let list = self.huge_lists.read().get(&bucket).cloned()?;
                list.pop_fit(seed, total)
            }
        }
    }

    fn with_list<R>(&self, class: SizeClass, f: impl FnOnce(&FreeList) -> R) -> R {
        let stripes = self.config.free_list_count;
        match class {
            SizeClass::Tiny(index) => {
                f(self.tiny_lists[index].get_or_init(|| FreeList::new(stripes)))
            }
            SizeClass::Huge(bucket) => {
                let existing = self.huge_lists.read().get(&bucket).cloned();
                let list = match existing {
                    Some(list) => list,
                    None => Arc::clone(
                        self.huge_lists
                            .write()
                            .entry(bucket)
                            .or_insert_with(|| Arc::new(FreeList::new(stripes))),
                    ),
                };
                f(&list)
            }
        }
    }

    /// Carves fresh chunks for `class`, sweeping slabs from the current one.
    fn refill(
        &self,
        class: SizeClass,
        total: usize,
        seed: usize,
        data_size: usize,
    ) -> Result<FreeChunk, AllocError> {
        let batch = if class.is_tiny() {
            self.config.batch_allocation_size
        } else {
            1
        };
        let slab_count = self.slabs.len();
        let start = self.current_slab.load(Ordering::Acquire);
        for step in 0..slab_count {
            let index = (start + step) % slab_count;
            if let Some(run) = self.cursors[index].carve(total, batch) {
                if step > 0 {
                    let _ = self.current_slab.compare_exchange(
                        start,
                        index,
                        Ordering::AcqRel,
                        Ordering::Acquire,
                    );
                }
                return self.seed_batch(index, run, class, seed);
            }
        }

        // A racing release may have refilled the class while we swept.
        if let Some(free) = self.pop_free(class, total, seed) {
            self.check_fill(free)?;
            return Ok(free);
        }

        self.stats.allocation_failed(total);
        self.record(
            AllocatorLogLevel::Warn,
            "allocate",
            "out_of_memory",
            None,
            Some(total),
            "denied",
            format!(
                "no slab fits a {total}-byte chunk for {data_size} data bytes; largest tail is {} bytes",
                self.largest_unused_tail()
            ),
        );
        Err(AllocError::OutOfMemory {
            data_size,
            total_size: total,
        })
    }

    /// Keeps the first chunk of `run` and pushes the rest as free chunks.
    fn seed_batch(
        &self,
        slab_index: usize,
        run: Carve,
        class: SizeClass,
        seed: usize,
    ) -> Result<FreeChunk, AllocError> {
        let cursor = &self.cursors[slab_index];
        let first = FreeChunk {
            address: ChunkAddress::new(slab_index, run.start),
            total_size: run.chunk_size,
        };
        cursor.mark_start(run.start);
        let mut extras = Vec::with_capacity(run.count - 1);
        for offset in run.offsets().skip(1) {
            let address = ChunkAddress::new(slab_index, offset);
            if let Err(err) = self.prepare_free(address, run.chunk_size) {
                return Err(self.abandon_batch(first, extras, class, seed, address, &err));
            }
            cursor.mark_start(offset);
            extras.push(FreeChunk {
                address,
                total_size: run.chunk_size,
            });
        }
        if !extras.is_empty() {
            self.with_list(class, |list| list.push_batch(seed, extras));
        }
        self.stats.batch_carved(run.chunk_size, run.count);

        self.record(
            AllocatorLogLevel::Debug,
            "allocate",
            "batch_refill",
            Some(first.address),
            Some(run.chunk_size),
            "carved",
            format!(
                "{} chunk(s) of {} bytes from slab {slab_index} at offset {}",
                run.count, run.chunk_size, run.start
            ),
        );
        Ok(first)
    }

    /// Writes a free header at `address` and, when validating, the fill
    /// pattern over its data.
    fn prepare_free(&self, address: ChunkAddress, total_size: usize) -> Result<(), SlabError> {
        let slab = self.slab_of(address);
        let offset = address.offset();
        slab.store_word(offset, ChunkHeader::free(total_size).encode())?;
        if self.config.validate_with_fill {
            slab.fill_bytes(offset + HEADER_SIZE, total_size - HEADER_SIZE, FILL_BYTE)?;
        }
        Ok(())
    }

    /// Salvages a batch whose chunk at `failed` could not be prepared: the
    /// first chunk and every extra prepared so far go to the free list, and
    /// the rest of the run is abandoned.
    fn abandon_batch(
        &self,
        first: FreeChunk,
        mut prepared: Vec<FreeChunk>,
        class: SizeClass,
        seed: usize,
        failed: ChunkAddress,
        err: &SlabError,
    ) -> AllocError {
        if self.prepare_free(first.address, first.total_size).is_ok() {
            prepared.push(first);
        }
        let kept = prepared.len();
        if kept > 0 {
            self.with_list(class, |list| list.push_batch(seed, prepared));
            self.stats.batch_carved(first.total_size, kept);
        }
        self.record(
            AllocatorLogLevel::Error,
            "allocate",
            "batch_prepare_failed",
            Some(failed),
            Some(first.total_size),
            "salvaged",
            format!("{kept} chunk(s) free-listed before the failure: {err}"),
        );
        AllocError::Corrupted {
            address: failed,
            detail: err.to_string(),
        }
    }

    /// Verifies a reused chunk still carries the fill pattern; quarantines
    /// it otherwise.
    fn check_fill(&self, free: FreeChunk) -> Result<(), AllocError> {
        if !self.config.validate_with_fill {
            return Ok(());
        }
        let intact = self
            .slab_of(free.address)
            .bytes_equal(
                free.address.offset() + HEADER_SIZE,
                free.total_size - HEADER_SIZE,
                FILL_BYTE,
            )
            .unwrap_or(false);
        if intact {
            return Ok(());
        }
        self.quarantined.fetch_add(free.total_size, Ordering::AcqRel);
        self.stats.chunk_quarantined(free.total_size);
        self.record(
            AllocatorLogLevel::Error,
            "allocate",
            "fill_pattern_violated",
            Some(free.address),
            Some(free.total_size),
            "quarantined",
            format!(
                "free chunk lost its {FILL_BYTE:#04x} fill pattern; it was written after release"
            ),
        );
        Err(AllocError::FillPatternViolated {
            address: free.address,
        })
    }

    fn release_inner(&self, address: ChunkAddress) -> Result<usize, ReleaseError> {
        let header = self.locate(address)?;
        if header.is_free() {
            return Err(ReleaseError::DoubleRelease(address));
        }
        let slab = self.slab_of(address);
        let offset = address.offset();
        match slab.compare_exchange_word(offset, header.encode(), header.into_free().encode()) {
            Ok(Ok(_)) => {}
            Ok(Err(actual)) => {
                return Err(match ChunkHeader::decode(actual) {
                    Some(now) if now.generation != address.generation() => {
                        ReleaseError::Stale(address)
                    }
                    Some(now) if now.is_free() => ReleaseError::DoubleRelease(address),
                    _ => ReleaseError::Corrupted {
                        address,
                        header: actual,
                    },
                });
            }
            Err(_) => return Err(ReleaseError::InvalidAddress(address)),
        }

        let total = header.total_size;
        if self.config.validate_with_fill {
            slab.fill_bytes(offset + HEADER_SIZE, total - HEADER_SIZE, FILL_BYTE)
                .map_err(|_| ReleaseError::InvalidAddress(address))?;
        }
        // Uncount before the chunk becomes visible to other allocators.
        self.used.fetch_sub(total, Ordering::AcqRel);
        self.stats.chunk_released(total);
        let class = self.classes.classify_total(total);
        self.with_list(class, |list| {
            list.push(
                home_stripe(),
                FreeChunk {
                    address,
                    total_size: total,
                },
            );
        });
        Ok(total)
    }

    /// Validates `address` and decodes the header it points at.
    ///
    /// The offset must be a recorded chunk start and the header's generation
    /// must match the address's.
    fn locate(&self, address: ChunkAddress) -> Result<ChunkHeader, ReleaseError> {
        let index = address.slab_index();
        let (Some(slab), Some(cursor)) = (self.slabs.get(index), self.cursors.get(index)) else {
            return Err(ReleaseError::InvalidAddress(address));
        };
        let offset = address.offset();
        let carved = cursor.carved();
        if offset + HEADER_SIZE > carved || !cursor.is_start(offset) {
            return Err(ReleaseError::InvalidAddress(address));
        }
        let word = slab
            .load_word(offset)
            .map_err(|_| ReleaseError::InvalidAddress(address))?;
        match ChunkHeader::decode(word) {
            Some(header) if offset + header.total_size > carved => Err(ReleaseError::Corrupted {
                address,
                header: word,
            }),
            Some(header) if header.generation != address.generation() => {
                Err(ReleaseError::Stale(address))
            }
            Some(header) => Ok(header),
            None => Err(ReleaseError::Corrupted {
                address,
                header: word,
            }),
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn record(
        &self,
        level: AllocatorLogLevel,
        symbol: &'static str,
        event: &'static str,
        address: Option<ChunkAddress>,
        size: Option<usize>,
        outcome: &'static str,
        details: impl Into<String>,
    ) {
        self.lifecycle.record(
            LifecycleEvent {
                level,
                symbol,
                event,
                address,
                size,
                outcome,
                details: details.into(),
            },
            self.used_memory(),
        );
    }
}

impl std::fmt::Debug for FreeListManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FreeListManager")
            .field("config", &self.config)
            .field("slabs", &self.slabs.len())
            .field("total", &self.total)
            .field("used", &self.used_memory())
            .finish()
    }
}
