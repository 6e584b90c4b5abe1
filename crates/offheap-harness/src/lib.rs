//! Stress and configuration harness for the off-heap free list allocator.
//!
//! This crate provides:
//! - Stress runs: many threads allocating, writing, verifying and releasing
//!   chunks while the harness checks for overlap and lost bytes
//! - Configuration loading and validation from JSON files or the environment
//! - Structured JSONL logging of harness and allocator lifecycle events

#![forbid(unsafe_code)]

pub mod config;
pub mod error;
pub mod stress;
pub mod structured_log;

pub use config::{ClassReport, classify_request, load_config};
pub use error::HarnessError;
pub use stress::{StressConfig, StressReport, run_stress};
pub use structured_log::{LogEmitter, LogEntry, LogLevel, Outcome};
