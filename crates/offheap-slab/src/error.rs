//! Slab construction and access errors.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SlabError {
    #[error("slab length must be positive")]
    ZeroLength,
    #[error("slab length {len} is not a multiple of {word}")]
    Misaligned { len: usize, word: usize },
    #[error("slab length {len} exceeds the maximum of {max}")]
    TooLarge { len: usize, max: usize },
    #[error("range {offset}..+{len} is outside the {slab_len}-byte slab")]
    OutOfBounds {
        offset: usize,
        len: usize,
        slab_len: usize,
    },
    #[error("word access at offset {offset} is not 8-byte aligned")]
    UnalignedWord { offset: usize },
    #[error("mmap of {len} bytes failed: {source}")]
    MapFailed {
        len: usize,
        #[source]
        source: std::io::Error,
    },
}
