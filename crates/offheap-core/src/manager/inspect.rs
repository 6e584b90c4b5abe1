//! Read-only views of allocator state: free list report and chunk walk.

use serde::Serialize;

use super::FreeListManager;
use crate::chunk::{ChunkAddress, ChunkHeader, ChunkKind};
use crate::size_class::SizeClass;

/// One carved chunk as seen by [`FreeListManager::walk_chunks`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ChunkInfo {
    pub address: ChunkAddress,
    pub total_size: usize,
    pub data_size: usize,
    pub kind: ChunkKind,
    pub free: bool,
}

/// Free chunks held by one size class.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClassReport {
    pub class: SizeClass,
    pub class_size: usize,
    pub chunks: usize,
    pub bytes: usize,
}

/// Carving progress of one slab.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SlabReport {
    pub index: usize,
    pub len: usize,
    pub carved: usize,
    pub unused: usize,
    pub backing: &'static str,
}

/// Snapshot of memory accounting and free list contents.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FreeListReport {
    pub total_memory: usize,
    pub used_memory: usize,
    pub free_memory: usize,
    pub quarantined_memory: usize,
    pub free_chunks: usize,
    pub classes: Vec<ClassReport>,
    pub slabs: Vec<SlabReport>,
}

impl FreeListManager {
    /// Per-class free list contents and per-slab carving state.
    ///
    /// Each list is locked stripe by stripe, so under concurrent traffic the
    /// report is a close approximation rather than an atomic snapshot.
    #[must_use]
    pub fn report(&self) -> FreeListReport {
        let mut classes: Vec<ClassReport> = self
            .tiny_lists
            .iter()
            .enumerate()
            .filter_map(|(index, list)| Some((SizeClass::Tiny(index), list.get()?.totals())))
            .chain(
                self.huge_lists
                    .read()
                    .iter()
                    .map(|(&bucket, list)| (SizeClass::Huge(bucket), list.totals())),
            )
            .filter(|(_, (chunks, _))| *chunks > 0)
            .map(|(class, (chunks, bytes))| ClassReport {
                class,
                class_size: self.classes.class_size(class),
                chunks,
                bytes,
            })
            .collect();
        classes.sort_by_key(|c| c.class);

        let slabs = self
            .slabs
            .iter()
            .zip(self.cursors.iter())
            .enumerate()
            .map(|(index, (slab, cursor))| {
                let carved = cursor.carved();
                SlabReport {
                    index,
                    len: slab.len(),
                    carved,
                    unused: slab.len() - carved,
                    backing: slab.backing(),
                }
            })
            .collect();

        FreeListReport {
            total_memory: self.total_memory(),
            used_memory: self.used_memory(),
            free_memory: self.free_memory(),
            quarantined_memory: self.quarantined_memory(),
            free_chunks: classes.iter().map(|c| c.chunks).sum(),
            classes,
            slabs,
        }
    }

    /// Visits every carved chunk of every slab in address order.
    ///
    /// Exact when no allocation is in flight. A chunk whose header has not
    /// been written yet ends the walk of its slab early.
    pub fn walk_chunks<F>(&self, mut visit: F)
    where
        F: FnMut(ChunkInfo),
    {
        for (index, (slab, cursor)) in self.slabs.iter().zip(self.cursors.iter()).enumerate() {
            let carved = cursor.carved();
            let mut offset = 0;
            while offset < carved {
                let Some(header) = slab.load_word(offset).ok().and_then(ChunkHeader::decode)
                else {
                    log::debug!("chunk walk of slab {index} stopped at undecodable offset {offset}");
                    break;
                };
                visit(ChunkInfo {
                    address: ChunkAddress::new(index, offset).with_generation(header.generation),
                    total_size: header.total_size,
                    data_size: header.data_size,
                    kind: header.kind,
                    free: header.is_free(),
                });
                offset += header.total_size;
            }
        }
    }
}
