use offheap_core::{
    AccessError, AllocError, ChunkAddress, ChunkKind, ChunkView, FreeListManager, HEADER_SIZE, OffHeapConfig,
    OffHeapError, ReleaseError, RestrictedChunkFactory, Slab, SlabBacking, SlabSource,
    StandardChunkFactory, StatsSink, allocate_slabs, verify_alignment,
    verify_batch_allocation_size, verify_free_list_count, verify_huge_multiple,
};
use parking_lot::Mutex;
use std::sync::Arc;

const SLAB_LEN: usize = 1024 * 1024;

fn expected_size(data_size: usize, alignment: usize) -> usize {
    (data_size + HEADER_SIZE).div_ceil(alignment) * alignment
}

fn manager_with(config: OffHeapConfig, slabs: usize, len: usize) -> FreeListManager {
    let mut slabs = allocate_slabs(slabs, len, SlabBacking::Heap).expect("slabs");
    FreeListManager::new(config, &mut slabs).expect("manager")
}

fn default_manager() -> FreeListManager {
    manager_with(OffHeapConfig::default(), 1, SLAB_LEN)
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum StatsEvent {
    Allocated(usize),
    Released(usize),
    Carved(usize, usize),
    Failed(usize),
    Rejected,
}

#[derive(Default)]
struct RecordingStats {
    events: Mutex<Vec<StatsEvent>>,
}

impl RecordingStats {
    fn take(&self) -> Vec<StatsEvent> {
        std::mem::take(&mut *self.events.lock())
    }
}

impl StatsSink for RecordingStats {
    fn chunk_allocated(&self, total_size: usize) {
        self.events.lock().push(StatsEvent::Allocated(total_size));
    }
    fn chunk_released(&self, total_size: usize) {
        self.events.lock().push(StatsEvent::Released(total_size));
    }
    fn batch_carved(&self, chunk_size: usize, count: usize) {
        self.events
            .lock()
            .push(StatsEvent::Carved(chunk_size, count));
    }
    fn allocation_failed(&self, total_size: usize) {
        self.events.lock().push(StatsEvent::Failed(total_size));
    }
    fn release_rejected(&self) {
        self.events.lock().push(StatsEvent::Rejected);
    }
}

/// Source whose reported total does not match its slabs.
struct MisreportingSource {
    slabs: Vec<Slab>,
}

impl SlabSource for MisreportingSource {
    fn total_memory(&self) -> usize {
        self.slabs.iter().map(Slab::len).sum::<usize>() + 8
    }
    fn take_slabs(&mut self) -> Vec<Slab> {
        std::mem::take(&mut self.slabs)
    }
}

#[test]
fn used_memory_is_zero_after_construction_with_one_slab() {
    let m = default_manager();
    assert_eq!(m.used_memory(), 0);
    assert_eq!(m.free_memory(), SLAB_LEN);
}

#[test]
fn free_memory_is_sum_of_slabs_after_construction() {
    let m = manager_with(OffHeapConfig::default(), 3, 4096);
    assert_eq!(m.used_memory(), 0);
    assert_eq!(m.free_memory(), 3 * 4096);
    assert_eq!(m.total_memory(), 3 * 4096);
}

#[test]
fn allocate_tiny_chunk_has_exact_data_size_and_aligned_total() {
    let m = default_manager();
    let chunk = m.allocate(10, None).unwrap();
    assert_eq!(chunk.data_size(), 10);
    assert_eq!(chunk.size(), 24);
    assert_eq!(chunk.size(), expected_size(10, 8));
    assert_eq!(chunk.kind(), ChunkKind::Bytes);
}

#[test]
fn allocate_tiny_chunk_with_kind() {
    let m = default_manager();
    let chunk = m.allocate(10, Some(ChunkKind::Serialized)).unwrap();
    assert_eq!(chunk.data_size(), 10);
    assert_eq!(chunk.size(), expected_size(10, 8));
    assert_eq!(chunk.kind(), ChunkKind::Serialized);
}

#[test]
fn allocate_largest_tiny_chunk() {
    let m = default_manager();
    let max_tiny = OffHeapConfig::default().max_tiny();
    let chunk = m.allocate(max_tiny, None).unwrap();
    assert_eq!(chunk.data_size(), max_tiny);
    assert_eq!(chunk.size(), expected_size(max_tiny, 8));
}

#[test]
fn allocate_huge_chunk_has_formula_size() {
    let m = default_manager();
    let data_size = OffHeapConfig::default().max_tiny() + 1;
    let chunk = m.allocate(data_size, None).unwrap();
    assert_eq!(chunk.data_size(), data_size);
    assert_eq!(chunk.size(), expected_size(data_size, 8));
}

#[test]
fn allocate_huge_chunk_with_kind() {
    let m = default_manager();
    let data_size = OffHeapConfig::default().max_tiny() + 1;
    let chunk = m.allocate(data_size, Some(ChunkKind::Serialized)).unwrap();
    assert_eq!(chunk.data_size(), data_size);
    assert_eq!(chunk.size(), expected_size(data_size, 8));
    assert_eq!(chunk.kind(), ChunkKind::Serialized);
}

#[test]
fn sizes_follow_formula_for_other_alignments() {
    for alignment in [16, 64, 256] {
        let m = manager_with(
            OffHeapConfig::default().with_alignment(alignment),
            1,
            SLAB_LEN,
        );
        for data_size in [1, 7, 8, 9, 100, 255, 4000] {
            let chunk = m.allocate(data_size, None).unwrap();
            assert_eq!(
                chunk.size(),
                expected_size(data_size, alignment),
                "alignment={alignment} data_size={data_size}"
            );
            assert_eq!(chunk.size() % alignment, 0);
            assert_eq!(chunk.address().offset() % alignment, 0);
        }
    }
}

#[test]
#[should_panic(expected = "must be > 0")]
fn allocate_zero_panics() {
    let m = default_manager();
    let _ = m.allocate(0, None);
}

#[test]
#[should_panic(expected = "exceeds the maximum")]
fn allocate_negative_panics() {
    let m = default_manager();
    let negative: i64 = -123;
    let _ = m.allocate(negative as usize, None);
}

#[test]
fn released_tiny_chunk_is_reused_by_same_class() {
    let m = default_manager();
    let chunk = m.allocate(10, None).unwrap();
    let size = chunk.size();
    let address = chunk.into_address();
    m.release(address);
    assert_eq!(m.used_memory(), 0);

    let again = m.allocate(10, None).unwrap();
    assert_eq!(again.data_size(), 10);
    assert_eq!(again.size(), size);
    assert!(again.address().same_slot(address));
    assert_ne!(again.address(), address);
}

#[test]
fn released_huge_chunk_is_reused_best_fit_within_its_class() {
    let config = OffHeapConfig::default();
    let m = manager_with(config, 1, SLAB_LEN);
    let base = config.max_tiny() + 1;

    let big = m.allocate(base + 1000, None).unwrap();
    let big_size = big.size();
    let big_address = big.into_address();
    m.release(big_address);

    // Smaller request in the same huge class takes the larger free chunk.
    let small = m.allocate(base + 900, None).unwrap();
    assert!(small.address().same_slot(big_address));
    assert_eq!(small.size(), big_size);
    assert_eq!(small.data_size(), base + 900);
    assert_eq!(m.used_memory(), big_size);
}

#[test]
fn huge_request_too_large_for_free_chunk_carves_fresh() {
    let config = OffHeapConfig::default().with_huge_multiple(1);
    let m = manager_with(config, 1, SLAB_LEN);
    let base = config.max_tiny() + 1;

    let first = m.allocate(base, None).unwrap().into_address();
    m.release(first);
    let larger = m.allocate(base + 64, None).unwrap();
    assert!(!larger.address().same_slot(first));
    assert_eq!(larger.size(), expected_size(base + 64, 8));
}

#[test]
fn double_release_is_detected() {
    let m = default_manager();
    let address = m.allocate(32, None).unwrap().into_address();
    assert_eq!(m.try_release(address), Ok(40));
    assert_eq!(
        m.try_release(address),
        Err(ReleaseError::DoubleRelease(address))
    );
    assert_eq!(m.used_memory(), 0);
    assert_eq!(m.free_chunk_count(), 1);
}

#[test]
#[should_panic(expected = "already free")]
fn panicking_release_reports_double_release() {
    let m = default_manager();
    let address = m.allocate(32, None).unwrap().into_address();
    m.release(address);
    m.release(address);
}

#[test]
fn release_through_handle_then_raw_address_is_rejected() {
    let m = default_manager();
    let chunk = m.allocate(32, None).unwrap();
    let address = chunk.address();
    chunk.release();
    assert!(matches!(
        m.try_release(address),
        Err(ReleaseError::DoubleRelease(_))
    ));
}

#[test]
fn address_inside_chunk_data_is_not_a_chunk() {
    let m = default_manager();
    let mut chunk = m.allocate(64, None).unwrap();
    chunk.fill(0).unwrap();
    let inner = ChunkAddress::from_u64(chunk.address().as_u64() + 16).unwrap();
    assert_eq!(m.try_release(inner), Err(ReleaseError::InvalidAddress(inner)));
    assert_eq!(m.used_memory(), chunk.size());
}

#[test]
fn raw_addresses_with_spare_bits_do_not_parse() {
    let m = default_manager();
    let chunk = m.allocate(8, None).unwrap();
    assert_eq!(ChunkAddress::from_u64(chunk.address().as_u64() | 1 << 63), None);
    assert_eq!(ChunkAddress::from_u64(chunk.address().offset() as u64), None);
}

#[test]
fn stale_handle_after_raw_release_and_reuse() {
    let m = default_manager();
    let a = m.allocate(10, None).unwrap();
    m.release(a.address());
    let mut b = m.allocate(10, None).unwrap();
    b.write(0, b"BBBBBBBBBB").unwrap();

    // The old handle can neither see nor free the new owner's chunk.
    assert!(matches!(a.to_vec(), Err(AccessError::Stale { .. })));
    drop(a);
    assert_eq!(m.used_memory(), b.size());

    let mut c = m.allocate(10, None).unwrap();
    c.write(0, b"CCCCCCCCCC").unwrap();
    assert!(!c.address().same_slot(b.address()));
    assert_eq!(b.to_vec().unwrap(), b"BBBBBBBBBB");
    assert_eq!(m.used_memory(), b.size() + c.size());
}

#[test]
fn reacquire_with_stale_address_is_rejected() {
    let m = default_manager();
    let first = m.allocate(40, None).unwrap().into_address();
    m.release(first);
    let second = m.allocate(40, None).unwrap().into_address();
    assert_eq!(m.chunk(first).unwrap_err(), ReleaseError::Stale(first));
    assert_eq!(m.chunk(second).unwrap().data_size(), 40);
}

#[test]
fn stats_sink_sees_every_event() {
    let stats = Arc::new(RecordingStats::default());
    let mut slabs = allocate_slabs(1, 64, SlabBacking::Heap).unwrap();
    let m = FreeListManager::with_collaborators(
        OffHeapConfig::default().with_batch_allocation_size(2),
        &mut slabs,
        stats.clone(),
        Arc::new(StandardChunkFactory),
    )
    .unwrap();

    let a = m.allocate(10, None).unwrap().into_address();
    assert_eq!(
        stats.take(),
        vec![StatsEvent::Carved(24, 2), StatsEvent::Allocated(24)]
    );

    m.release(a);
    assert_eq!(stats.take(), vec![StatsEvent::Released(24)]);
    assert!(m.try_release(a).is_err());
    assert_eq!(stats.take(), vec![StatsEvent::Rejected]);

    let big = m.allocate(100, None);
    assert!(matches!(big, Err(AllocError::OutOfMemory { .. })));
    assert_eq!(stats.take(), vec![StatsEvent::Failed(112)]);
}

#[test]
fn restricted_factory_rejects_unsupported_kinds() {
    let mut slabs = allocate_slabs(1, 4096, SlabBacking::Heap).unwrap();
    let m = FreeListManager::with_collaborators(
        OffHeapConfig::default(),
        &mut slabs,
        Arc::new(offheap_core::NoopStats),
        Arc::new(RestrictedChunkFactory::new(ChunkKind::Bytes, [])),
    )
    .unwrap();
    assert_eq!(
        m.allocate(10, Some(ChunkKind::Serialized)).unwrap_err(),
        AllocError::UnsupportedKind(ChunkKind::Serialized)
    );
    assert_eq!(m.used_memory(), 0);
    assert_eq!(m.allocate(10, None).unwrap().kind(), ChunkKind::Bytes);
}

#[test]
fn construction_rejects_bad_inputs() {
    let mut none: Vec<Slab> = Vec::new();
    assert!(matches!(
        FreeListManager::new(OffHeapConfig::default(), &mut none),
        Err(OffHeapError::NoSlabs)
    ));

    let mut source = MisreportingSource {
        slabs: allocate_slabs(2, 1024, SlabBacking::Heap).unwrap(),
    };
    assert!(matches!(
        FreeListManager::new(OffHeapConfig::default(), &mut source),
        Err(OffHeapError::SlabAccounting {
            reported: 2056,
            actual: 2048
        })
    ));

    let mut slabs = allocate_slabs(1, 1024, SlabBacking::Heap).unwrap();
    let err = FreeListManager::new(OffHeapConfig::default().with_alignment(12), &mut slabs)
        .unwrap_err();
    assert_eq!(
        err.to_string(),
        "OFF_HEAP_ALIGNMENT must be a multiple of 8 but it was 12"
    );
}

#[test]
fn bytes_view_reads_and_writes_at_offsets() {
    let m = default_manager();
    let mut chunk = m.allocate(20, None).unwrap();
    match chunk.view() {
        ChunkView::Bytes(mut view) => {
            assert_eq!(view.len(), 20);
            view.write(5, b"hello").unwrap();
            let mut out = [0u8; 5];
            view.read(5, &mut out).unwrap();
            assert_eq!(&out, b"hello");
        }
        ChunkView::Serialized(_) => panic!("expected a bytes view"),
    }
    assert!(matches!(
        chunk.write(18, b"abc"),
        Err(AccessError::OutOfBounds {
            offset: 18,
            len: 3,
            data_size: 20
        })
    ));
}

#[test]
fn serialized_view_stores_whole_records() {
    let m = default_manager();
    let mut chunk = m.allocate(6, Some(ChunkKind::Serialized)).unwrap();
    let mut view = chunk.view();
    assert!(view.is_serialized());
    let ChunkView::Serialized(record) = &mut view else {
        panic!("expected a serialized view");
    };
    assert!(matches!(
        record.store(b"short"),
        Err(AccessError::RecordSizeMismatch {
            expected: 6,
            actual: 5
        })
    ));
    record.store(b"record").unwrap();
    assert_eq!(record.record().unwrap(), b"record");
}

#[test]
fn chunk_data_does_not_clobber_neighbours() {
    let m = default_manager();
    let mut a = m.allocate(13, None).unwrap();
    let mut b = m.allocate(13, None).unwrap();
    a.fill(0xAA).unwrap();
    b.fill(0xBB).unwrap();
    assert!(a.to_vec().unwrap().iter().all(|&x| x == 0xAA));
    assert!(b.to_vec().unwrap().iter().all(|&x| x == 0xBB));
    // Headers survived the fills.
    let address = a.into_address();
    assert_eq!(m.chunk(address).unwrap().data_size(), 13);
}

#[cfg(unix)]
#[test]
fn mmap_backed_slabs_serve_chunks() {
    let mut slabs = allocate_slabs(2, 64 * 1024, SlabBacking::Mmap).unwrap();
    let m = FreeListManager::new(OffHeapConfig::default(), &mut slabs).unwrap();
    let mut chunk = m.allocate(1000, None).unwrap();
    chunk.write(0, &[7u8; 1000]).unwrap();
    assert_eq!(chunk.to_vec().unwrap(), vec![7u8; 1000]);
    assert_eq!(m.report().slabs[0].backing, "mmap");
}

#[test]
fn verify_huge_multiple_range() {
    assert!(verify_huge_multiple(256).is_ok());
    assert!(verify_huge_multiple(0).is_ok());
    assert_eq!(
        verify_huge_multiple(-1).unwrap_err().to_string(),
        "HUGE_MULTIPLE must be >= 0 and <= 256 but it was -1"
    );
    assert_eq!(
        verify_huge_multiple(257).unwrap_err().to_string(),
        "HUGE_MULTIPLE must be >= 0 and <= 256 but it was 257"
    );
}

#[test]
fn verify_free_list_count_range() {
    assert!(verify_free_list_count(1).is_ok());
    assert!(
        verify_free_list_count(0)
            .unwrap_err()
            .to_string()
            .starts_with("OFF_HEAP_FREE_LIST_COUNT must be >= 1")
    );
    assert!(verify_free_list_count(-1).is_err());
}

#[test]
fn verify_alignment_range() {
    assert!(verify_alignment(256).is_ok());
    assert!(
        verify_alignment(-1)
            .unwrap_err()
            .to_string()
            .starts_with("OFF_HEAP_ALIGNMENT must be a multiple of 8")
    );
    assert!(
        verify_alignment(9)
            .unwrap_err()
            .to_string()
            .starts_with("OFF_HEAP_ALIGNMENT must be a multiple of 8")
    );
    assert!(
        verify_alignment(264)
            .unwrap_err()
            .to_string()
            .starts_with("OFF_HEAP_ALIGNMENT must be <= 256")
    );
}

#[test]
fn verify_batch_allocation_size_range() {
    assert!(verify_batch_allocation_size(1).is_ok());
    assert!(
        verify_batch_allocation_size(0)
            .unwrap_err()
            .to_string()
            .starts_with("OFF_HEAP_BATCH_ALLOCATION_SIZE must be >= 1")
    );
}

#[test]
fn lifecycle_log_records_slow_paths() {
    let m = manager_with(OffHeapConfig::default(), 1, 32);
    let _ = m.drain_lifecycle_logs();
    let kept = m.allocate(10, None).unwrap();
    assert!(m.allocate(10, None).is_err());
    let address = kept.into_address();
    m.release(address);
    let _ = m.try_release(address);

    let records = m.drain_lifecycle_logs();
    let events: Vec<&str> = records.iter().map(|r| r.event).collect();
    assert_eq!(
        events,
        vec!["batch_refill", "out_of_memory", "release_rejected"]
    );
    assert!(records[1].trace_id.starts_with("offheap::allocate::"));
    assert_eq!(records[1].used_memory, 24);
    assert!(records.windows(2).all(|w| w[0].decision_id < w[1].decision_id));
}
