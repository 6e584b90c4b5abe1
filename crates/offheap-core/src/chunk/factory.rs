//! Chunk variant selection.
//!
//! A factory decides which [`ChunkKind`] an allocation request produces. It
//! never touches memory or free lists; the manager stamps the resolved kind
//! into the chunk header.

use super::ChunkKind;
use crate::error::AllocError;

/// Capability selector consulted on every allocation.
pub trait ChunkFactory: Send + Sync {
    /// Resolves the requested kind. `None` selects the baseline variant.
    fn resolve(&self, requested: Option<ChunkKind>) -> Result<ChunkKind, AllocError>;
}

/// Supports every kind; [`ChunkKind::Bytes`] is the baseline.
#[derive(Debug, Default, Clone, Copy)]
pub struct StandardChunkFactory;

impl ChunkFactory for StandardChunkFactory {
    fn resolve(&self, requested: Option<ChunkKind>) -> Result<ChunkKind, AllocError> {
        Ok(requested.unwrap_or_default())
    }
}

/// Only hands out an allow-listed set of kinds.
#[derive(Debug, Clone)]
pub struct RestrictedChunkFactory {
    baseline: ChunkKind,
    allowed: Vec<ChunkKind>,
}

impl RestrictedChunkFactory {
    /// `baseline` is always allowed.
    #[must_use]
    pub fn new(baseline: ChunkKind, allowed: impl IntoIterator<Item = ChunkKind>) -> Self {
        let mut allowed: Vec<ChunkKind> = allowed.into_iter().collect();
        if !allowed.contains(&baseline) {
            allowed.push(baseline);
        }
        Self { baseline, allowed }
    }

    #[must_use]
    pub fn baseline(&self) -> ChunkKind {
        self.baseline
    }
}

impl ChunkFactory for RestrictedChunkFactory {
    fn resolve(&self, requested: Option<ChunkKind>) -> Result<ChunkKind, AllocError> {
        let kind = requested.unwrap_or(self.baseline);
        if self.allowed.contains(&kind) {
            Ok(kind)
        } else {
            Err(AllocError::UnsupportedKind(kind))
        }
    }
}
