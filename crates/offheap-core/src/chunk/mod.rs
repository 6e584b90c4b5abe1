//! Chunks: identity, header codec, handles and typed views.
//!
//! A [`ChunkAddress`] only identifies a chunk. All data access goes through a
//! [`Chunk`] handle that borrows the manager, checks every range against the
//! chunk's data size and the chunk's generation against its header, and
//! returns the chunk to its free list when dropped.

pub mod factory;
mod header;
pub mod view;

use std::fmt;
use std::mem::ManuallyDrop;

use serde::{Deserialize, Serialize};

use crate::error::AccessError;
use crate::manager::FreeListManager;

pub use factory::{ChunkFactory, RestrictedChunkFactory, StandardChunkFactory};
pub(crate) use header::{ChunkHeader, GENERATION_MASK, next_generation};
pub use header::{HEADER_SIZE, MAX_DATA_SIZE, total_size};
pub use view::{BytesView, ChunkView, SerializedView};

/// Largest number of slabs an address can name.
pub const MAX_SLABS: usize = 0xFFFF;

const OFFSET_MASK: u64 = 0xFFFF_FFFF;
const SLAB_SHIFT: u32 = 32;
const SLAB_MASK: u64 = 0xFFFF;
const GENERATION_SHIFT: u32 = 48;

/// Opaque, non-zero chunk identity.
///
/// Packs `offset` in bits 0..32, `slab_index + 1` in bits 32..48 and the
/// chunk's reuse generation in bits 48..60. An address outlives its chunk's
/// allocation only as a stale value: once the chunk is released and handed
/// out again, the manager rejects the old address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChunkAddress(u64);

impl ChunkAddress {
    /// Generation-zero address of the chunk at `offset` within slab
    /// `slab_index`.
    #[must_use]
    pub(crate) fn new(slab_index: usize, offset: usize) -> Self {
        debug_assert!(slab_index < MAX_SLABS);
        debug_assert!(offset <= u32::MAX as usize);
        Self(((slab_index as u64 + 1) << SLAB_SHIFT) | (offset as u64 & OFFSET_MASK))
    }

    /// Same slab and offset, stamped with `generation`.
    #[must_use]
    pub(crate) fn with_generation(self, generation: u16) -> Self {
        let base = self.0 & ((SLAB_MASK << SLAB_SHIFT) | OFFSET_MASK);
        Self(base | (u64::from(generation & GENERATION_MASK) << GENERATION_SHIFT))
    }

    /// Rebuilds an address from its raw form; rejects values no chunk can
    /// have. Whether the address still names a live chunk is only decided
    /// by the manager.
    #[must_use]
    pub fn from_u64(raw: u64) -> Option<Self> {
        let slab = (raw >> SLAB_SHIFT) & SLAB_MASK;
        let spare = raw >> (GENERATION_SHIFT + 12);
        if slab == 0 || spare != 0 {
            return None;
        }
        Some(Self(raw))
    }

    #[must_use]
    pub fn as_u64(self) -> u64 {
        self.0
    }

    #[must_use]
    pub fn slab_index(self) -> usize {
        (((self.0 >> SLAB_SHIFT) & SLAB_MASK) - 1) as usize
    }

    /// Byte offset of the chunk header within its slab.
    #[must_use]
    pub fn offset(self) -> usize {
        (self.0 & OFFSET_MASK) as usize
    }

    /// Reuse count of the chunk when this address was issued.
    #[must_use]
    pub fn generation(self) -> u16 {
        (self.0 >> GENERATION_SHIFT) as u16 & GENERATION_MASK
    }

    /// Whether both addresses name the same slab position, whatever their
    /// generations.
    #[must_use]
    pub fn same_slot(self, other: Self) -> bool {
        self.slab_index() == other.slab_index() && self.offset() == other.offset()
    }
}

impl fmt::Display for ChunkAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#018x}", self.0)
    }
}

/// Variant tag stamped into a chunk header.
///
/// Variants share one header and size contract; they differ only in the
/// accessors [`Chunk::view`] exposes.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChunkKind {
    /// Raw bytes, freely addressable.
    #[default]
    Bytes,
    /// A single pre-serialized record filling the whole data area.
    Serialized,
}

impl ChunkKind {
    pub const ALL: [Self; 2] = [Self::Bytes, Self::Serialized];

    #[must_use]
    pub const fn tag(self) -> u8 {
        match self {
            Self::Bytes => 0,
            Self::Serialized => 1,
        }
    }

    #[must_use]
    pub const fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            0 => Some(Self::Bytes),
            1 => Some(Self::Serialized),
            _ => None,
        }
    }

    /// Parse from string (case-insensitive).
    #[must_use]
    pub fn from_str_loose(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "bytes" | "raw" => Some(Self::Bytes),
            "serialized" | "record" => Some(Self::Serialized),
            _ => None,
        }
    }
}

/// Live handle to an allocated chunk.
///
/// Dropping the handle releases the chunk. Use [`Chunk::into_address`] to
/// keep the chunk allocated past the handle's lifetime.
pub struct Chunk<'m> {
    manager: &'m FreeListManager,
    address: ChunkAddress,
    data_size: usize,
    total_size: usize,
    kind: ChunkKind,
}

impl<'m> Chunk<'m> {
    pub(crate) fn new(manager: &'m FreeListManager, address: ChunkAddress, header: ChunkHeader) -> Self {
        Self {
            manager,
            address,
            data_size: header.data_size,
            total_size: header.total_size,
            kind: header.kind,
        }
    }

    #[must_use]
    pub fn address(&self) -> ChunkAddress {
        self.address
    }

    /// Bytes requested at allocation time.
    #[must_use]
    pub fn data_size(&self) -> usize {
        self.data_size
    }

    /// Total bytes the chunk occupies, header included.
    #[must_use]
    pub fn size(&self) -> usize {
        self.total_size
    }

    #[must_use]
    pub fn kind(&self) -> ChunkKind {
        self.kind
    }

    /// Copies data bytes starting at `offset` into `buf`.
    ///
    /// Every accessor fails with [`AccessError::Stale`] once the chunk was
    /// released behind the handle's back.
    pub fn read(&self, offset: usize, buf: &mut [u8]) -> Result<(), AccessError> {
        let at = self.data_offset(offset, buf.len())?;
        self.manager.slab_of(self.address).read_bytes(at, buf)?;
        Ok(())
    }

    /// Copies `bytes` into the data area starting at `offset`.
    pub fn write(&mut self, offset: usize, bytes: &[u8]) -> Result<(), AccessError> {
        let at = self.data_offset(offset, bytes.len())?;
        self.manager.slab_of(self.address).write_bytes(at, bytes)?;
        Ok(())
    }

    /// Sets the whole data area to `byte`.
    pub fn fill(&mut self, byte: u8) -> Result<(), AccessError> {
        let at = self.data_offset(0, self.data_size)?;
        self.manager
            .slab_of(self.address)
            .fill_bytes(at, self.data_size, byte)?;
        Ok(())
    }

    /// Copies the whole data area out.
    pub fn to_vec(&self) -> Result<Vec<u8>, AccessError> {
        let mut out = vec![0u8; self.data_size];
        self.read(0, &mut out)?;
        Ok(out)
    }

    /// Accessor for this chunk's variant.
    pub fn view(&mut self) -> ChunkView<'_, 'm> {
        match self.kind {
            ChunkKind::Bytes => ChunkView::Bytes(BytesView::new(self)),
            ChunkKind::Serialized => ChunkView::Serialized(SerializedView::new(self)),
        }
    }

    /// Returns the chunk to its free list.
    ///
    /// # Panics
    ///
    /// If the chunk was already released through its raw address, whether
    /// or not it has been handed out again since.
    pub fn release(self) {
        let this = ManuallyDrop::new(self);
        this.manager.release(this.address);
    }

    /// Gives up the handle without releasing. The caller must later call
    /// [`FreeListManager::release`] (or re-acquire via
    /// [`FreeListManager::chunk`]) exactly once.
    #[must_use = "the chunk stays allocated until the address is released"]
    pub fn into_address(self) -> ChunkAddress {
        let this = ManuallyDrop::new(self);
        this.address
    }

    fn data_offset(&self, offset: usize, len: usize) -> Result<usize, AccessError> {
        self.manager.check_live(self.address)?;
        match offset.checked_add(len) {
            Some(end) if end <= self.data_size => {
                Ok(self.address.offset() + HEADER_SIZE + offset)
            }
            _ => Err(AccessError::OutOfBounds {
                offset,
                len,
                data_size: self.data_size,
            }),
        }
    }
}

impl Drop for Chunk<'_> {
    fn drop(&mut self) {
        if let Err(err) = self.manager.try_release(self.address) {
            log::error!("dropping chunk handle {} failed to release: {err}", self.address);
        }
    }
}

impl fmt::Debug for Chunk<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Chunk")
            .field("address", &self.address)
            .field("data_size", &self.data_size)
            .field("size", &self.total_size)
            .field("kind", &self.kind)
            .finish()
    }
}
