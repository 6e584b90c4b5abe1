//! Size classes for chunk allocation.
//!
//! Chunks up to the tiny ceiling get one exact-fit class per alignment step;
//! class index is `total / alignment - 1`. Larger chunks fall into huge
//! classes `k` covering totals in `((k-1) * step, k * step]`, where
//! `step = huge_multiple * alignment`. Huge classes trade some internal
//! fragmentation for far fewer free lists.

use serde::Serialize;

use crate::chunk::total_size;
use crate::config::OffHeapConfig;

/// Size class of a chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(tag = "tier", content = "index", rename_all = "lowercase")]
pub enum SizeClass {
    /// Exact-fit class, index `total / alignment - 1`.
    Tiny(usize),
    /// Rounded class `k`, smallest multiple of the huge step covering the total.
    Huge(usize),
}

impl SizeClass {
    #[must_use]
    pub fn is_tiny(self) -> bool {
        matches!(self, Self::Tiny(_))
    }
}

/// Size class table derived from a configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SizeClasses {
    alignment: usize,
    max_tiny_total: usize,
    huge_step: usize,
}

impl SizeClasses {
    #[must_use]
    pub fn new(config: &OffHeapConfig) -> Self {
        Self {
            alignment: config.alignment,
            max_tiny_total: config.max_tiny_total(),
            huge_step: config.huge_step(),
        }
    }

    #[must_use]
    pub fn alignment(&self) -> usize {
        self.alignment
    }

    #[must_use]
    pub fn huge_step(&self) -> usize {
        self.huge_step
    }

    /// Number of tiny classes.
    #[must_use]
    pub fn tiny_count(&self) -> usize {
        self.max_tiny_total / self.alignment
    }

    /// Total chunk size for `data_size` bytes of data.
    #[must_use]
    pub fn total_size(&self, data_size: usize) -> usize {
        total_size(data_size, self.alignment)
    }

    /// Class of a chunk with the given total size.
    #[must_use]
    pub fn classify_total(&self, total: usize) -> SizeClass {
        if total <= self.max_tiny_total {
            SizeClass::Tiny(total / self.alignment - 1)
        } else {
            SizeClass::Huge(total.div_ceil(self.huge_step))
        }
    }

    /// Class and total size for a request of `data_size` bytes.
    #[must_use]
    pub fn classify(&self, data_size: usize) -> (SizeClass, usize) {
        let total = self.total_size(data_size);
        (self.classify_total(total), total)
    }

    /// Largest chunk total a class can hold.
    #[must_use]
    pub fn class_size(&self, class: SizeClass) -> usize {
        match class {
            SizeClass::Tiny(index) => (index + 1) * self.alignment,
            SizeClass::Huge(bucket) => bucket * self.huge_step,
        }
    }
}
