use offheap_core::{
    AllocError, ChunkAddress, ChunkKind, FreeListManager, OffHeapConfig, ReleaseError,
    SlabBacking, allocate_slabs,
};
use std::collections::BTreeMap;

#[derive(Clone, Copy, Debug)]
struct XorShift64 {
    state: u64,
}

impl XorShift64 {
    fn new(seed: u64) -> Self {
        Self { state: seed }
    }

    fn next_u64(&mut self) -> u64 {
        // xorshift64*
        let mut x = self.state;
        x ^= x >> 12;
        x ^= x << 25;
        x ^= x >> 27;
        self.state = x;
        x.wrapping_mul(0x2545_F491_4F6C_DD1D)
    }

    fn gen_range(&mut self, low: usize, high_inclusive: usize) -> usize {
        assert!(low <= high_inclusive);
        let span = high_inclusive - low + 1;
        low + (self.next_u64() as usize % span)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum SlotState {
    Empty,
    Live,
    Released,
}

#[derive(Clone, Copy, Debug)]
struct Slot {
    state: SlotState,
    address: Option<ChunkAddress>,
    data_size: usize,
    size: usize,
    fill: u8,
}

const EMPTY: Slot = Slot {
    state: SlotState::Empty,
    address: None,
    data_size: 0,
    size: 0,
    fill: 0,
};

fn expected_size(data_size: usize, alignment: usize) -> usize {
    (data_size + 8).div_ceil(alignment) * alignment
}

fn run_sequence(seed: u64, config: OffHeapConfig) {
    const STEPS: usize = 3_000;
    const SLOTS: usize = 48;

    let mut slabs = allocate_slabs(2, 256 * 1024, SlabBacking::Heap).expect("slabs");
    let m = FreeListManager::new(config, &mut slabs).expect("manager");
    let mut rng = XorShift64::new(seed);
    let mut slots = [EMPTY; SLOTS];

    for step in 0..STEPS {
        let op = rng.gen_range(0, 99);
        let idx = rng.gen_range(0, SLOTS - 1);
        let slot = slots[idx];

        match op {
            // allocate
            0..=44 => {
                if slot.state == SlotState::Live {
                    continue;
                }
                let data_size = match rng.gen_range(0, 9) {
                    0 => rng.gen_range(1, 16),
                    1..=7 => rng.gen_range(17, 2048),
                    _ => rng.gen_range(2049, 20_000),
                };
                let kind = if rng.gen_range(0, 3) == 0 {
                    Some(ChunkKind::Serialized)
                } else {
                    None
                };
                match m.allocate(data_size, kind) {
                    Ok(mut chunk) => {
                        assert_eq!(chunk.data_size(), data_size, "seed={seed} step={step}");
                        assert!(
                            chunk.size() >= expected_size(data_size, config.alignment),
                            "seed={seed} step={step}: size below formula"
                        );
                        assert_eq!(chunk.size() % config.alignment, 0);
                        let fill = (step % 251) as u8;
                        chunk.fill(fill).expect("fill");
                        slots[idx] = Slot {
                            state: SlotState::Live,
                            address: Some(chunk.address()),
                            data_size,
                            size: chunk.size(),
                            fill,
                        };
                        let _ = chunk.into_address();
                    }
                    Err(AllocError::OutOfMemory { .. }) => {}
                    Err(other) => panic!("seed={seed} step={step}: unexpected {other}"),
                }
            }
            // verify contents
            45..=74 => {
                if slot.state != SlotState::Live {
                    continue;
                }
                let address = slot.address.expect("live slot has address");
                let chunk = m.chunk(address).expect("reacquire");
                assert_eq!(chunk.data_size(), slot.data_size);
                assert_eq!(chunk.size(), slot.size);
                assert!(
                    chunk.to_vec().expect("read").iter().all(|&b| b == slot.fill),
                    "seed={seed} step={step}: chunk {address} lost its contents"
                );
                let _ = chunk.into_address();
            }
            // release
            75..=94 => {
                if slot.state != SlotState::Live {
                    continue;
                }
                let address = slot.address.expect("live slot has address");
                assert_eq!(m.try_release(address), Ok(slot.size));
                slots[idx].state = SlotState::Released;
            }
            // stale release
            _ => {
                if slot.state != SlotState::Released {
                    continue;
                }
                let address = slot.address.expect("released slot has address");
                let reused = slots.iter().any(|s| {
                    s.state == SlotState::Live && s.address.is_some_and(|a| a.same_slot(address))
                });
                let result = m.try_release(address);
                if reused {
                    assert_eq!(
                        result,
                        Err(ReleaseError::Stale(address)),
                        "seed={seed} step={step}"
                    );
                } else {
                    assert!(
                        matches!(
                            result,
                            Err(ReleaseError::DoubleRelease(a) | ReleaseError::Stale(a)) if a == address
                        ),
                        "seed={seed} step={step}: {result:?}"
                    );
                }
            }
        }

        let used: usize = slots
            .iter()
            .filter(|s| s.state == SlotState::Live)
            .map(|s| s.size)
            .sum();
        assert_eq!(m.used_memory(), used, "seed={seed} step={step}");
        assert_eq!(m.used_memory() + m.free_memory(), m.total_memory());
    }

    // Every live chunk shows up exactly once in a walk, with matching sizes.
    let mut walked = BTreeMap::new();
    m.walk_chunks(|info| {
        if !info.free {
            walked.insert(info.address, info.total_size);
        }
    });
    let live: BTreeMap<ChunkAddress, usize> = slots
        .iter()
        .filter(|s| s.state == SlotState::Live)
        .filter_map(|s| Some((s.address?, s.size)))
        .collect();
    assert_eq!(walked, live, "seed={seed}");

    for slot in slots.iter().filter(|s| s.state == SlotState::Live) {
        m.release(slot.address.expect("live slot has address"));
    }
    assert_eq!(m.used_memory(), 0);
}

#[test]
fn deterministic_sequences_hold_accounting_invariants() {
    for seed in [1, 2, 3, 4] {
        run_sequence(seed, OffHeapConfig::default());
    }
}

#[test]
fn deterministic_sequences_with_striping_and_batches() {
    let config = OffHeapConfig::default()
        .with_free_list_count(3)
        .with_batch_allocation_size(6)
        .with_huge_multiple(2);
    for seed in [11, 12] {
        run_sequence(seed, config);
    }
}

#[test]
fn deterministic_sequences_with_fill_validation_and_wide_alignment() {
    let config = OffHeapConfig::default()
        .with_alignment(64)
        .with_validate_with_fill(true)
        .with_batch_allocation_size(4);
    for seed in [21, 22] {
        run_sequence(seed, config);
    }
}
