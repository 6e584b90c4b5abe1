//! A single fixed-size slab with bounds-checked word and byte access.
//!
//! Multi-byte values are stored little-endian inside each word. Byte writes
//! that cover only part of a word do a load-modify-store of that word, so two
//! threads writing disjoint bytes of the *same* word may lose one update. The
//! allocator never lets that happen: chunks are word aligned and each chunk
//! has a single writer.

use std::sync::atomic::Ordering;

use crate::error::SlabError;
use crate::region::{HeapRegion, RawRegion};

/// Width of one storage word in bytes.
pub const WORD_SIZE: usize = 8;

/// Largest slab length; offsets inside a slab must fit in 32 bits.
pub const MAX_SLAB_LEN: usize = (u32::MAX as usize) & !(WORD_SIZE - 1);

/// Piece of a byte range that falls inside one word.
#[derive(Debug, Clone, Copy)]
struct Span {
    word: usize,
    shift: usize,
    take: usize,
    done: usize,
}

fn spans(offset: usize, len: usize) -> impl Iterator<Item = Span> {
    let end = offset + len;
    let mut pos = offset;
    std::iter::from_fn(move || {
        if pos >= end {
            return None;
        }
        let shift = pos % WORD_SIZE;
        let take = (WORD_SIZE - shift).min(end - pos);
        let span = Span {
            word: pos / WORD_SIZE,
            shift,
            take,
            done: pos - offset,
        };
        pos += take;
        Some(span)
    })
}

/// One contiguous off-heap region.
pub struct Slab {
    region: Box<dyn RawRegion>,
    len: usize,
}

impl Slab {
    /// Creates a heap-backed slab of `len` bytes.
    pub fn heap(len: usize) -> Result<Self, SlabError> {
        check_len(len)?;
        Self::from_region(Box::new(HeapRegion::new(len / WORD_SIZE)))
    }

    /// Creates an `mmap`-backed slab of `len` bytes.
    #[cfg(unix)]
    pub fn mmap(len: usize) -> Result<Self, SlabError> {
        check_len(len)?;
        Self::from_region(Box::new(crate::mmap::MmapRegion::map(len)?))
    }

    /// Wraps an existing region.
    pub fn from_region(region: Box<dyn RawRegion>) -> Result<Self, SlabError> {
        let len = region.words().len() * WORD_SIZE;
        check_len(len)?;
        Ok(Self { region, len })
    }

    /// Slab length in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Always false: zero-length slabs cannot be constructed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Label of the backing region.
    #[must_use]
    pub fn backing(&self) -> &'static str {
        self.region.backing()
    }

    /// Loads the word at byte `offset` with acquire ordering.
    pub fn load_word(&self, offset: usize) -> Result<u64, SlabError> {
        let idx = self.word_index(offset)?;
        Ok(self.region.words()[idx].load(Ordering::Acquire))
    }

    /// Stores the word at byte `offset` with release ordering.
    pub fn store_word(&self, offset: usize, value: u64) -> Result<(), SlabError> {
        let idx = self.word_index(offset)?;
        self.region.words()[idx].store(value, Ordering::Release);
        Ok(())
    }

    /// Compare-and-swap on the word at byte `offset`.
    ///
    /// The inner result mirrors `AtomicU64::compare_exchange`: `Ok(previous)`
    /// on success, `Err(actual)` when the word did not hold `current`.
    pub fn compare_exchange_word(
        &self,
        offset: usize,
        current: u64,
        new: u64,
    ) -> Result<Result<u64, u64>, SlabError> {
        let idx = self.word_index(offset)?;
        Ok(self.region.words()[idx].compare_exchange(
            current,
            new,
            Ordering::AcqRel,
            Ordering::Acquire,
        ))
    }

    /// Copies `buf.len()` bytes starting at `offset` into `buf`.
    pub fn read_bytes(&self, offset: usize, buf: &mut [u8]) -> Result<(), SlabError> {
        self.check_range(offset, buf.len())?;
        let words = self.region.words();
        for span in spans(offset, buf.len()) {
            let bytes = words[span.word].load(Ordering::Relaxed).to_le_bytes();
            buf[span.done..span.done + span.take]
                .copy_from_slice(&bytes[span.shift..span.shift + span.take]);
        }
        Ok(())
    }

    /// Copies `bytes` into the slab starting at `offset`.
    pub fn write_bytes(&self, offset: usize, bytes: &[u8]) -> Result<(), SlabError> {
        self.check_range(offset, bytes.len())?;
        let words = self.region.words();
        for span in spans(offset, bytes.len()) {
            let src = &bytes[span.done..span.done + span.take];
            let word = &words[span.word];
            if span.take == WORD_SIZE {
                let mut full = [0u8; WORD_SIZE];
                full.copy_from_slice(src);
                word.store(u64::from_le_bytes(full), Ordering::Relaxed);
            } else {
                let mut current = word.load(Ordering::Relaxed).to_le_bytes();
                current[span.shift..span.shift + span.take].copy_from_slice(src);
                word.store(u64::from_le_bytes(current), Ordering::Relaxed);
            }
        }
        Ok(())
    }

    /// Sets `len` bytes starting at `offset` to `byte`.
    pub fn fill_bytes(&self, offset: usize, len: usize, byte: u8) -> Result<(), SlabError> {
        self.check_range(offset, len)?;
        let words = self.region.words();
        let pattern = u64::from_le_bytes([byte; WORD_SIZE]);
        for span in spans(offset, len) {
            let word = &words[span.word];
            if span.take == WORD_SIZE {
                word.store(pattern, Ordering::Relaxed);
            } else {
                let mut current = word.load(Ordering::Relaxed).to_le_bytes();
                current[span.shift..span.shift + span.take].fill(byte);
                word.store(u64::from_le_bytes(current), Ordering::Relaxed);
            }
        }
        Ok(())
    }

    /// Returns true if every byte of `offset..offset+len` equals `byte`.
    pub fn bytes_equal(&self, offset: usize, len: usize, byte: u8) -> Result<bool, SlabError> {
        self.check_range(offset, len)?;
        let words = self.region.words();
        for span in spans(offset, len) {
            let bytes = words[span.word].load(Ordering::Relaxed).to_le_bytes();
            if bytes[span.shift..span.shift + span.take]
                .iter()
                .any(|&b| b != byte)
            {
                return Ok(false);
            }
        }
        Ok(true)
    }

    fn word_index(&self, offset: usize) -> Result<usize, SlabError> {
        if offset % WORD_SIZE != 0 {
            return Err(SlabError::UnalignedWord { offset });
        }
        self.check_range(offset, WORD_SIZE)?;
        Ok(offset / WORD_SIZE)
    }

    fn check_range(&self, offset: usize, len: usize) -> Result<(), SlabError> {
        match offset.checked_add(len) {
            Some(end) if end <= self.len => Ok(()),
            _ => Err(SlabError::OutOfBounds {
                offset,
                len,
                slab_len: self.len,
            }),
        }
    }
}

impl std::fmt::Debug for Slab {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Slab")
            .field("len", &self.len)
            .field("backing", &self.backing())
            .finish()
    }
}

fn check_len(len: usize) -> Result<(), SlabError> {
    if len == 0 {
        return Err(SlabError::ZeroLength);
    }
    if len % WORD_SIZE != 0 {
        return Err(SlabError::Misaligned {
            len,
            word: WORD_SIZE,
        });
    }
    if len > MAX_SLAB_LEN {
        return Err(SlabError::TooLarge {
            len,
            max: MAX_SLAB_LEN,
        });
    }
    Ok(())
}
