//! Harness error type.

use offheap_core::{AccessError, AllocError, ConfigError, OffHeapError, SlabError};
use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum HarnessError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("failed to read config {path}: {source}")]
    ConfigFile {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    OffHeap(#[from] OffHeapError),
    #[error(transparent)]
    Slab(#[from] SlabError),
    #[error(transparent)]
    Alloc(#[from] AllocError),
    #[error(transparent)]
    Access(#[from] AccessError),
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}
