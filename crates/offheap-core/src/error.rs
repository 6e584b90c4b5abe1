//! Error types for the off-heap allocator.

use offheap_slab::SlabError;
use thiserror::Error;

use crate::chunk::{ChunkAddress, ChunkKind};

/// An allocator tunable is out of range or unparsable.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("{name} must be {constraint} but it was {value}")]
    Invalid {
        name: &'static str,
        constraint: &'static str,
        value: i64,
    },
    #[error("{name} must be {expected} but it was {value:?}")]
    Parse {
        name: &'static str,
        expected: &'static str,
        value: String,
    },
}

impl ConfigError {
    pub(crate) fn invalid(name: &'static str, constraint: &'static str, value: i64) -> Self {
        Self::Invalid {
            name,
            constraint,
            value,
        }
    }
}

/// An allocation request could not be served.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AllocError {
    #[error("out of off-heap memory: no slab can fit a {total_size}-byte chunk for {data_size} data bytes")]
    OutOfMemory { data_size: usize, total_size: usize },
    #[error("chunk kind {0:?} is not supported by this chunk factory")]
    UnsupportedKind(ChunkKind),
    #[error("free chunk {address} was modified after release; it has been quarantined")]
    FillPatternViolated { address: ChunkAddress },
    #[error("chunk {address} could not be prepared: {detail}")]
    Corrupted { address: ChunkAddress, detail: String },
}

/// A chunk address could not be released or re-acquired.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReleaseError {
    #[error("chunk {0} is already free")]
    DoubleRelease(ChunkAddress),
    #[error("{0} is stale: its chunk was released and has been reused since")]
    Stale(ChunkAddress),
    #[error("{0} does not address a chunk of this manager")]
    InvalidAddress(ChunkAddress),
    #[error("chunk {address} has a corrupted header {header:#018x}")]
    Corrupted { address: ChunkAddress, header: u64 },
}

/// Out-of-range access through a chunk handle.
#[derive(Debug, Error)]
pub enum AccessError {
    #[error("access {offset}..+{len} is outside the chunk's {data_size} data bytes")]
    OutOfBounds {
        offset: usize,
        len: usize,
        data_size: usize,
    },
    #[error("chunk {address} was released behind this handle")]
    Stale { address: ChunkAddress },
    #[error("serialized record is {actual} bytes but the chunk holds {expected}")]
    RecordSizeMismatch { expected: usize, actual: usize },
    #[error(transparent)]
    Slab(#[from] SlabError),
}

/// Construction of a free list manager failed.
#[derive(Debug, Error)]
pub enum OffHeapError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Slab(#[from] SlabError),
    #[error("slab source reported {reported} bytes but its slabs add up to {actual}")]
    SlabAccounting { reported: usize, actual: usize },
    #[error("slab source supplied no slabs")]
    NoSlabs,
    #[error("slab source supplied {count} slabs but at most {max} are addressable")]
    TooManySlabs { count: usize, max: usize },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_messages_name_constraint_and_value() {
        let err = ConfigError::invalid("OFF_HEAP_ALIGNMENT", "<= 256", 264);
        assert_eq!(
            err.to_string(),
            "OFF_HEAP_ALIGNMENT must be <= 256 but it was 264"
        );
        let err = ConfigError::Parse {
            name: "OFF_HEAP_ALIGNMENT",
            expected: "an integer",
            value: "x".into(),
        };
        assert_eq!(
            err.to_string(),
            "OFF_HEAP_ALIGNMENT must be an integer but it was \"x\""
        );
    }

    #[test]
    fn construction_errors_wrap_sources() {
        let err: OffHeapError = ConfigError::invalid("HUGE_MULTIPLE", ">= 0 and <= 256", -1).into();
        assert!(matches!(err, OffHeapError::Config(_)));
        let err: OffHeapError = SlabError::ZeroLength.into();
        assert_eq!(err.to_string(), "slab length must be positive");
    }

    #[test]
    fn release_errors_show_address() {
        let address = ChunkAddress::new(0, 64);
        let msg = ReleaseError::DoubleRelease(address).to_string();
        assert!(msg.contains(&address.to_string()), "{msg}");
        let reused = address.with_generation(2);
        let msg = ReleaseError::Stale(reused).to_string();
        assert!(msg.contains("0x0002000100000040"), "{msg}");
    }
}
