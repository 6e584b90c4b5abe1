//! Multi-threaded allocate/write/verify/release stress runs.
//!
//! Every worker keeps a small FIFO of live chunks, each filled with a byte
//! pattern unique to its (thread, iteration). A chunk is verified right after
//! it is written, again when it is released, and once more after all workers
//! joined. Live chunks must never overlap, and the manager's used memory must
//! equal the live chunk count times the chunk size.

use std::collections::VecDeque;
use std::sync::Arc;
use std::thread;
use std::time::Instant;

use offheap_core::{
    AllocError, AllocatorMetrics, Chunk, ChunkAddress, FreeListManager, MAX_DATA_SIZE,
    MAX_SLABS, MetricsSnapshot, OffHeapConfig, SizeClass, SlabBacking, StandardChunkFactory,
    allocate_slabs,
};
use offheap_slab::MAX_SLAB_LEN;
use serde::{Deserialize, Serialize};

use crate::error::HarnessError;
use crate::structured_log::{LogEmitter, LogEntry, LogLevel, Outcome};

/// Shape of a stress run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StressConfig {
    pub threads: usize,
    pub iterations: usize,
    pub data_size: usize,
    pub slab_size: usize,
    pub slabs: usize,
    /// Live chunks each worker holds before releasing its oldest.
    pub live_set: usize,
    /// Back slabs with anonymous mappings instead of the heap.
    pub mmap: bool,
}

impl Default for StressConfig {
    fn default() -> Self {
        Self {
            threads: 4,
            iterations: 10_000,
            data_size: 64,
            slab_size: 1024 * 1024,
            slabs: 4,
            live_set: 16,
            mmap: false,
        }
    }
}

impl StressConfig {
    pub fn validate(&self) -> Result<(), HarnessError> {
        let invalid = |msg: String| -> Result<(), HarnessError> {
            Err(HarnessError::InvalidArgument(msg))
        };
        if self.threads == 0 {
            return invalid("threads must be > 0".into());
        }
        if self.slabs == 0 || self.slabs > MAX_SLABS {
            return invalid(format!(
                "slabs must be in 1..={MAX_SLABS} but it was {}",
                self.slabs
            ));
        }
        if self.data_size == 0 || self.data_size > MAX_DATA_SIZE {
            return invalid(format!(
                "data size must be in 1..={MAX_DATA_SIZE} but it was {}",
                self.data_size
            ));
        }
        if self.slab_size > MAX_SLAB_LEN {
            return invalid(format!(
                "slab size must be <= {MAX_SLAB_LEN} but it was {}",
                self.slab_size
            ));
        }
        if self.mmap && !cfg!(unix) {
            return invalid("mmap-backed slabs need a unix target".into());
        }
        Ok(())
    }

    fn backing(&self) -> SlabBacking {
        match self.mmap {
            #[cfg(unix)]
            true => SlabBacking::Mmap,
            _ => SlabBacking::Heap,
        }
    }
}

/// Outcome of a stress run.
#[derive(Debug, Clone, Serialize)]
pub struct StressReport {
    pub stress: StressConfig,
    pub allocator: OffHeapConfig,
    pub class: SizeClass,
    /// Total size of every chunk the run allocates.
    pub chunk_size: usize,
    pub allocations: u64,
    pub releases: u64,
    pub out_of_memory: u64,
    pub pattern_failures: u64,
    pub overlap_violations: usize,
    pub live_chunks: usize,
    pub final_used: usize,
    pub expected_used: usize,
    pub used_after_release: usize,
    pub total_memory: usize,
    pub metrics: MetricsSnapshot,
    pub elapsed_ms: u64,
    pub passed: bool,
}

#[derive(Debug, Default, Clone, Copy, Serialize)]
struct ThreadTally {
    allocations: u64,
    releases: u64,
    out_of_memory: u64,
    pattern_failures: u64,
}

impl ThreadTally {
    fn merge(&mut self, other: &Self) {
        self.allocations += other.allocations;
        self.releases += other.releases;
        self.out_of_memory += other.out_of_memory;
        self.pattern_failures += other.pattern_failures;
    }
}

struct LiveChunk<'m> {
    chunk: Chunk<'m>,
    pattern: u8,
}

type WorkerResult<'m> = Result<(Vec<LiveChunk<'m>>, ThreadTally), HarnessError>;

fn pattern_byte(thread: usize, iteration: usize) -> u8 {
    (thread.wrapping_mul(131).wrapping_add(iteration) % 251) as u8
}

fn holds_pattern(chunk: &Chunk<'_>, pattern: u8) -> Result<bool, HarnessError> {
    Ok(chunk.to_vec()?.iter().all(|&b| b == pattern))
}

fn worker<'m>(
    manager: &'m FreeListManager,
    thread: usize,
    config: &StressConfig,
) -> WorkerResult<'m> {
    let mut live: VecDeque<LiveChunk<'m>> = VecDeque::with_capacity(config.live_set + 1);
    let mut tally = ThreadTally::default();

    for iteration in 0..config.iterations {
        let pattern = pattern_byte(thread, iteration);
        let exhausted = match manager.allocate(config.data_size, None) {
            Ok(mut chunk) => {
                tally.allocations += 1;
                chunk.fill(pattern)?;
                if !holds_pattern(&chunk, pattern)? {
                    log::warn!("thread {thread}: chunk {} lost its pattern", chunk.address());
                    tally.pattern_failures += 1;
                }
                live.push_back(LiveChunk { chunk, pattern });
                false
            }
            Err(AllocError::OutOfMemory { .. }) => {
                tally.out_of_memory += 1;
                true
            }
            Err(other) => return Err(other.into()),
        };

        if live.len() > config.live_set || (exhausted && !live.is_empty()) {
            if let Some(oldest) = live.pop_front() {
                if !holds_pattern(&oldest.chunk, oldest.pattern)? {
                    log::warn!(
                        "thread {thread}: chunk {} was overwritten while live",
                        oldest.chunk.address()
                    );
                    tally.pattern_failures += 1;
                }
                oldest.chunk.release();
                tally.releases += 1;
            }
        }
    }
    Ok((live.into(), tally))
}

/// Counts adjacent pairs of live chunks whose byte ranges overlap.
fn count_overlaps(chunks: &mut [(ChunkAddress, usize)]) -> usize {
    chunks.sort_by_key(|(a, _)| (a.slab_index(), a.offset()));
    chunks
        .windows(2)
        .filter(|pair| {
            let (a, a_size) = pair[0];
            let (b, _) = pair[1];
            a.slab_index() == b.slab_index() && a.offset() + a_size > b.offset()
        })
        .count()
}

/// Runs a stress pass over a fresh manager.
///
/// When an emitter is supplied, start/finish entries, one entry per worker
/// and the manager's lifecycle records are written to it.
pub fn run_stress(
    stress: &StressConfig,
    allocator: &OffHeapConfig,
    mut emitter: Option<&mut LogEmitter>,
) -> Result<StressReport, HarnessError> {
    stress.validate()?;
    let mut slabs = allocate_slabs(stress.slabs, stress.slab_size, stress.backing())?;
    let metrics = Arc::new(AllocatorMetrics::new());
    let manager = FreeListManager::with_collaborators(
        *allocator,
        &mut slabs,
        metrics.clone(),
        Arc::new(StandardChunkFactory),
    )?;
    let (class, chunk_size) = manager.size_classes().classify(stress.data_size);

    if let Some(log) = emitter.as_deref_mut() {
        log.emit_entry(
            LogEntry::new("", LogLevel::Info, "stress_start")
                .with_symbol("stress")
                .with_details(serde_json::json!({
                    "stress": stress,
                    "allocator": allocator,
                    "chunk_size": chunk_size,
                })),
        )?;
    }

    let started = Instant::now();
    let results: Vec<WorkerResult<'_>> = thread::scope(|s| {
        let handles: Vec<_> = (0..stress.threads)
            .map(|t| {
                let manager = &manager;
                s.spawn(move || worker(manager, t, stress))
            })
            .collect();
        handles
            .into_iter()
            .map(|h| {
                h.join()
                    .unwrap_or_else(|_| Err(HarnessError::InvalidArgument("worker panicked".into())))
            })
            .collect()
    });
    let elapsed_ms = started.elapsed().as_millis() as u64;

    let mut totals = ThreadTally::default();
    let mut live = Vec::new();
    for (t, result) in results.into_iter().enumerate() {
        let (chunks, tally) = result?;
        totals.merge(&tally);
        if let Some(log) = emitter.as_deref_mut() {
            let outcome = if tally.pattern_failures == 0 {
                Outcome::Pass
            } else {
                Outcome::Fail
            };
            log.emit_entry(
                LogEntry::new("", LogLevel::Debug, "worker_done")
                    .with_outcome(outcome)
                    .with_details(serde_json::json!({ "thread": t, "tally": tally })),
            )?;
        }
        live.extend(chunks);
    }

    for entry in &live {
        if !holds_pattern(&entry.chunk, entry.pattern)? {
            totals.pattern_failures += 1;
        }
    }
    let mut ranges: Vec<(ChunkAddress, usize)> = live
        .iter()
        .map(|l| (l.chunk.address(), l.chunk.size()))
        .collect();
    let overlap_violations = count_overlaps(&mut ranges);
    let live_chunks = live.len();
    let final_used = manager.used_memory();
    let expected_used = live_chunks * chunk_size;
    let accounting_holds = final_used + manager.free_memory() == manager.total_memory();

    drop(live);
    let used_after_release = manager.used_memory();

    let passed = overlap_violations == 0
        && totals.pattern_failures == 0
        && final_used == expected_used
        && used_after_release == 0
        && accounting_holds;

    let report = StressReport {
        stress: *stress,
        allocator: *allocator,
        class,
        chunk_size,
        allocations: totals.allocations,
        releases: totals.releases,
        out_of_memory: totals.out_of_memory,
        pattern_failures: totals.pattern_failures,
        overlap_violations,
        live_chunks,
        final_used,
        expected_used,
        used_after_release,
        total_memory: manager.total_memory(),
        metrics: metrics.snapshot(),
        elapsed_ms,
        passed,
    };

    if let Some(log) = emitter {
        log.emit_lifecycle(&manager.drain_lifecycle_logs())?;
        log.emit_entry(
            LogEntry::new("", LogLevel::Info, "stress_done")
                .with_symbol("stress")
                .with_outcome(if passed { Outcome::Pass } else { Outcome::Fail })
                .with_used_memory(used_after_release)
                .with_duration_ms(elapsed_ms)
                .with_details(serde_json::to_value(&report)?),
        )?;
        log.flush()?;
    }
    Ok(report)
}
