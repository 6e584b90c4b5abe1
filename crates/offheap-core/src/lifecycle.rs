//! Structured allocator lifecycle log.
//!
//! Slow-path decisions (construction, batch refill, out-of-memory, rejected
//! releases, fill-pattern violations) are forwarded to the `log` facade and
//! also kept as [`AllocatorLogRecord`]s in a bounded ring that callers drain.
//! Pop and push hits on the fast path record nothing.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use serde::Serialize;

use crate::chunk::ChunkAddress;

/// Records kept before the oldest are dropped.
pub const LIFECYCLE_LOG_CAPACITY: usize = 4096;

/// Allocator lifecycle log level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AllocatorLogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl From<AllocatorLogLevel> for log::Level {
    fn from(level: AllocatorLogLevel) -> Self {
        match level {
            AllocatorLogLevel::Trace => log::Level::Trace,
            AllocatorLogLevel::Debug => log::Level::Debug,
            AllocatorLogLevel::Info => log::Level::Info,
            AllocatorLogLevel::Warn => log::Level::Warn,
            AllocatorLogLevel::Error => log::Level::Error,
        }
    }
}

/// Structured allocator lifecycle record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AllocatorLogRecord {
    /// Monotonic decision/event id.
    pub decision_id: u64,
    /// Correlation id for this lifecycle record.
    pub trace_id: String,
    /// Severity level.
    pub level: AllocatorLogLevel,
    /// Manager operation (`new`, `allocate`, `release`, `chunk`).
    pub symbol: &'static str,
    /// Event kind (`batch_refill`, `out_of_memory`, ...).
    pub event: &'static str,
    /// Chunk involved in the event.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub address: Option<ChunkAddress>,
    /// Size value involved in the event.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<usize>,
    /// Machine-readable outcome label.
    pub outcome: &'static str,
    /// Free-form details for debugging.
    pub details: String,
    /// Snapshot: used memory when the record was taken.
    pub used_memory: usize,
}

/// One lifecycle event, before it gets an id.
#[derive(Debug, Clone)]
pub(crate) struct LifecycleEvent {
    pub level: AllocatorLogLevel,
    pub symbol: &'static str,
    pub event: &'static str,
    pub address: Option<ChunkAddress>,
    pub size: Option<usize>,
    pub outcome: &'static str,
    pub details: String,
}

/// Bounded, thread-safe ring of lifecycle records.
#[derive(Debug)]
pub struct LifecycleLog {
    next_decision_id: AtomicU64,
    records: Mutex<VecDeque<AllocatorLogRecord>>,
    capacity: usize,
}

impl LifecycleLog {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            next_decision_id: AtomicU64::new(1),
            records: Mutex::new(VecDeque::new()),
            capacity: capacity.max(1),
        }
    }

    pub(crate) fn record(&self, event: LifecycleEvent, used_memory: usize) {
        let decision_id = self.next_decision_id.fetch_add(1, Ordering::Relaxed);
        let trace_id = format!("offheap::{}::{:016x}", event.symbol, decision_id);
        let level: log::Level = event.level.into();
        log::log!(
            level,
            "[{trace_id}] {}/{} -> {}: {}",
            event.symbol,
            event.event,
            event.outcome,
            event.details
        );
        let record = AllocatorLogRecord {
            decision_id,
            trace_id,
            level: event.level,
            symbol: event.symbol,
            event: event.event,
            address: event.address,
            size: event.size,
            outcome: event.outcome,
            details: event.details,
            used_memory,
        };
        let mut records = self.records.lock();
        if records.len() == self.capacity {
            records.pop_front();
        }
        records.push_back(record);
    }

    /// Removes and returns all buffered records, oldest first.
    pub fn drain(&self) -> Vec<AllocatorLogRecord> {
        self.records.lock().drain(..).collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for LifecycleLog {
    fn default() -> Self {
        Self::new(LIFECYCLE_LOG_CAPACITY)
    }
}
