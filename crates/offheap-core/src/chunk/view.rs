//! Variant accessors over a chunk's data area.

use super::Chunk;
use crate::error::AccessError;

/// Kind-specific accessor returned by [`Chunk::view`].
#[derive(Debug)]
pub enum ChunkView<'c, 'm> {
    Bytes(BytesView<'c, 'm>),
    Serialized(SerializedView<'c, 'm>),
}

impl ChunkView<'_, '_> {
    #[must_use]
    pub fn is_serialized(&self) -> bool {
        matches!(self, Self::Serialized(_))
    }
}

/// Free offset access to raw bytes.
#[derive(Debug)]
pub struct BytesView<'c, 'm> {
    chunk: &'c mut Chunk<'m>,
}

impl<'c, 'm> BytesView<'c, 'm> {
    pub(super) fn new(chunk: &'c mut Chunk<'m>) -> Self {
        Self { chunk }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.chunk.data_size()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn read(&self, offset: usize, buf: &mut [u8]) -> Result<(), AccessError> {
        self.chunk.read(offset, buf)
    }

    pub fn write(&mut self, offset: usize, bytes: &[u8]) -> Result<(), AccessError> {
        self.chunk.write(offset, bytes)
    }
}

/// Whole-record access: the record always spans the full data area.
#[derive(Debug)]
pub struct SerializedView<'c, 'm> {
    chunk: &'c mut Chunk<'m>,
}

impl<'c, 'm> SerializedView<'c, 'm> {
    pub(super) fn new(chunk: &'c mut Chunk<'m>) -> Self {
        Self { chunk }
    }

    #[must_use]
    pub fn is_serialized(&self) -> bool {
        true
    }

    /// Record length, equal to the chunk's data size.
    #[must_use]
    pub fn record_len(&self) -> usize {
        self.chunk.data_size()
    }

    /// Stores a record that must exactly fill the data area.
    pub fn store(&mut self, record: &[u8]) -> Result<(), AccessError> {
        let expected = self.chunk.data_size();
        if record.len() != expected {
            return Err(AccessError::RecordSizeMismatch {
                expected,
                actual: record.len(),
            });
        }
        self.chunk.write(0, record)
    }

    /// Copies the stored record out.
    pub fn record(&self) -> Result<Vec<u8>, AccessError> {
        self.chunk.to_vec()
    }
}
