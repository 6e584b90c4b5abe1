//! In-band chunk header codec.
//!
//! Every chunk starts with one 8-byte header word:
//!
//! | bits   | field                                          |
//! |--------|------------------------------------------------|
//! | 0..29  | total chunk size in 8-byte units               |
//! | 29..46 | slack: `total - HEADER_SIZE - data_size`       |
//! | 46..58 | generation, bumped each time the chunk is reused |
//! | 58..60 | kind tag                                       |
//! | 60..64 | state marker (`0xA` allocated, `0x5` free)     |
//!
//! Any other state nibble means the word is not a chunk header. Only the
//! free list manager writes headers.

use super::ChunkKind;

/// Bytes reserved at the start of every chunk.
pub const HEADER_SIZE: usize = 8;

/// Largest data size a single chunk can hold.
pub const MAX_DATA_SIZE: usize = i32::MAX as usize;

/// Reuse counters wrap at this mask.
pub(crate) const GENERATION_MASK: u16 = 0x0FFF;

const UNITS_MASK: u64 = (1 << 29) - 1;
const SLACK_SHIFT: u32 = 29;
const SLACK_MASK: u64 = (1 << 17) - 1;
const GENERATION_SHIFT: u32 = 46;
const KIND_SHIFT: u32 = 58;
const KIND_MASK: u64 = 0x3;
const STATE_SHIFT: u32 = 60;

const STATE_ALLOCATED: u64 = 0xA;
const STATE_FREE: u64 = 0x5;

/// Total chunk size for `data_size` bytes: data plus header, rounded up to
/// `alignment`.
#[must_use]
pub fn total_size(data_size: usize, alignment: usize) -> usize {
    (data_size + HEADER_SIZE).div_ceil(alignment) * alignment
}

/// Allocation state recorded in the header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum ChunkState {
    Allocated,
    Free,
}

/// Decoded header word.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ChunkHeader {
    pub total_size: usize,
    pub data_size: usize,
    pub kind: ChunkKind,
    pub state: ChunkState,
    pub generation: u16,
}

impl ChunkHeader {
    #[must_use]
    pub fn allocated(total_size: usize, data_size: usize, kind: ChunkKind, generation: u16) -> Self {
        Self {
            total_size,
            data_size,
            kind,
            state: ChunkState::Allocated,
            generation: generation & GENERATION_MASK,
        }
    }

    /// Header of a freshly carved chunk; its data size is the whole usable
    /// area.
    #[must_use]
    pub fn free(total_size: usize) -> Self {
        Self {
            total_size,
            data_size: total_size - HEADER_SIZE,
            kind: ChunkKind::Bytes,
            state: ChunkState::Free,
            generation: 0,
        }
    }

    #[must_use]
    pub fn is_free(&self) -> bool {
        self.state == ChunkState::Free
    }

    /// Same chunk and generation, flipped to free.
    #[must_use]
    pub fn into_free(self) -> Self {
        Self {
            state: ChunkState::Free,
            ..self
        }
    }

    /// Packs the header into its word form.
    ///
    /// Callers keep `total_size` a multiple of 8 below 2^32 and the slack
    /// below 2^17; slabs are capped at 4 GiB and the slack never exceeds one
    /// huge class step plus one alignment unit.
    #[must_use]
    pub fn encode(&self) -> u64 {
        debug_assert!(self.total_size % HEADER_SIZE == 0);
        debug_assert!((self.total_size / HEADER_SIZE) as u64 <= UNITS_MASK);
        debug_assert!(self.total_size >= self.data_size + HEADER_SIZE);
        let slack = (self.total_size - HEADER_SIZE - self.data_size) as u64;
        debug_assert!(slack <= SLACK_MASK);
        let state = match self.state {
            ChunkState::Allocated => STATE_ALLOCATED,
            ChunkState::Free => STATE_FREE,
        };
        ((self.total_size / HEADER_SIZE) as u64 & UNITS_MASK)
            | ((slack & SLACK_MASK) << SLACK_SHIFT)
            | (u64::from(self.generation & GENERATION_MASK) << GENERATION_SHIFT)
            | ((u64::from(self.kind.tag()) & KIND_MASK) << KIND_SHIFT)
            | (state << STATE_SHIFT)
    }

    /// Unpacks a header word, or `None` if the word is not a valid header.
    #[must_use]
    pub fn decode(word: u64) -> Option<Self> {
        let state = match word >> STATE_SHIFT {
            STATE_ALLOCATED => ChunkState::Allocated,
            STATE_FREE => ChunkState::Free,
            _ => return None,
        };
        let kind = ChunkKind::from_tag(((word >> KIND_SHIFT) & KIND_MASK) as u8)?;
        let total_size = (word & UNITS_MASK) as usize * HEADER_SIZE;
        if total_size == 0 {
            return None;
        }
        let slack = ((word >> SLACK_SHIFT) & SLACK_MASK) as usize;
        let data_size = total_size.checked_sub(HEADER_SIZE + slack)?;
        let generation = (word >> GENERATION_SHIFT) as u16 & GENERATION_MASK;
        Some(Self {
            total_size,
            data_size,
            kind,
            state,
            generation,
        })
    }
}

/// Generation stamped on the next allocation of a chunk last seen at
/// `generation`.
#[must_use]
pub(crate) fn next_generation(generation: u16) -> u16 {
    generation.wrapping_add(1) & GENERATION_MASK
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn total_size_rounds_up_to_alignment() {
        assert_eq!(total_size(1, 8), 16);
        assert_eq!(total_size(8, 8), 16);
        assert_eq!(total_size(9, 8), 24);
        assert_eq!(total_size(10, 8), 24);
        assert_eq!(total_size(10, 64), 64);
        assert_eq!(total_size(57, 64), 128);
    }

    #[test]
    fn allocated_header_roundtrip() {
        let header = ChunkHeader::allocated(24, 10, ChunkKind::Serialized, 7);
        let decoded = ChunkHeader::decode(header.encode()).unwrap();
        assert_eq!(decoded, header);
        assert!(!decoded.is_free());
    }

    #[test]
    fn free_header_keeps_total_and_generation() {
        let header = ChunkHeader::allocated(4096, 100, ChunkKind::Bytes, 3).into_free();
        let decoded = ChunkHeader::decode(header.encode()).unwrap();
        assert!(decoded.is_free());
        assert_eq!(decoded.total_size, 4096);
        assert_eq!(decoded.data_size, 100);
        assert_eq!(decoded.generation, 3);
    }

    #[test]
    fn states_and_generations_differ_in_encoding() {
        let allocated = ChunkHeader::allocated(32, 20, ChunkKind::Bytes, 1);
        assert_ne!(allocated.encode(), allocated.into_free().encode());
        let reused = ChunkHeader::allocated(32, 20, ChunkKind::Bytes, 2);
        assert_ne!(allocated.encode(), reused.encode());
    }

    #[test]
    fn generation_wraps_within_its_field() {
        assert_eq!(next_generation(0), 1);
        assert_eq!(next_generation(GENERATION_MASK), 0);
        let header = ChunkHeader::allocated(16, 8, ChunkKind::Bytes, GENERATION_MASK);
        assert_eq!(
            ChunkHeader::decode(header.encode()).unwrap().generation,
            GENERATION_MASK
        );
    }

    #[test]
    fn garbage_words_do_not_decode() {
        assert_eq!(ChunkHeader::decode(0), None);
        assert_eq!(ChunkHeader::decode(u64::MAX), None);
        assert_eq!(ChunkHeader::decode(0x3C3C_3C3C_3C3C_3C3C), None);
        // Valid state nibble but a zero total.
        assert_eq!(ChunkHeader::decode(STATE_FREE << STATE_SHIFT), None);
        // Kind tag 3 is unassigned.
        assert_eq!(
            ChunkHeader::decode((STATE_FREE << STATE_SHIFT) | (KIND_MASK << KIND_SHIFT) | 2),
            None
        );
    }

    #[test]
    fn largest_huge_slack_fits() {
        // One full huge step at the widest alignment, plus the alignment tail.
        let slack = 256 * 256 + 255;
        let header =
            ChunkHeader::allocated(200_000, 200_000 - HEADER_SIZE - slack, ChunkKind::Bytes, 9);
        assert_eq!(ChunkHeader::decode(header.encode()), Some(header));
    }

    #[test]
    fn largest_slab_total_fits() {
        let total = offheap_slab::MAX_SLAB_LEN;
        let header = ChunkHeader::allocated(total, total - HEADER_SIZE, ChunkKind::Bytes, 0);
        assert_eq!(ChunkHeader::decode(header.encode()).unwrap().total_size, total);
    }
}
