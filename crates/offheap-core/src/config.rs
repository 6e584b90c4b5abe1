//! Allocator tunables.
//!
//! Four numeric knobs shape the allocator, each validated at startup:
//! - `alignment`: chunk size granularity, a positive multiple of 8, at most 256.
//! - `huge_multiple`: huge size classes step by `huge_multiple * alignment`; `[0, 256]`.
//! - `free_list_count`: independent stripes per size class; `>= 1`.
//! - `batch_allocation_size`: chunks carved per refill; `>= 1`.
//!
//! `validate_with_fill` additionally fills released chunks with [`FILL_BYTE`]
//! and checks the pattern when they are handed out again.
//!
//! Values can be read from the environment (`OFF_HEAP_*` variables) or from
//! any key lookup via [`OffHeapConfig::from_lookup`].

use serde::{Deserialize, Serialize};

use crate::chunk::total_size;
use crate::error::ConfigError;

/// Number of tiny size classes.
pub const TINY_FREE_LIST_COUNT: usize = 16_384;

/// Largest accepted `huge_multiple`.
pub const MAX_HUGE_MULTIPLE: i64 = 256;

/// Largest accepted alignment.
pub const MAX_ALIGNMENT: i64 = 256;

/// Byte written over released chunk data when fill validation is on.
pub const FILL_BYTE: u8 = 0x3C;

pub const HUGE_MULTIPLE_NAME: &str = "HUGE_MULTIPLE";
pub const FREE_LIST_COUNT_NAME: &str = "OFF_HEAP_FREE_LIST_COUNT";
pub const ALIGNMENT_NAME: &str = "OFF_HEAP_ALIGNMENT";
pub const BATCH_ALLOCATION_SIZE_NAME: &str = "OFF_HEAP_BATCH_ALLOCATION_SIZE";

pub const ENV_ALIGNMENT: &str = "OFF_HEAP_ALIGNMENT";
pub const ENV_HUGE_MULTIPLE: &str = "OFF_HEAP_HUGE_MULTIPLE";
pub const ENV_FREE_LIST_COUNT: &str = "OFF_HEAP_FREE_LIST_COUNT";
pub const ENV_BATCH_ALLOCATION_SIZE: &str = "OFF_HEAP_BATCH_ALLOCATION_SIZE";
pub const ENV_VALIDATE_WITH_FILL: &str = "OFF_HEAP_VALIDATE_WITH_FILL";

/// Allocator configuration value object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OffHeapConfig {
    pub alignment: usize,
    pub huge_multiple: usize,
    pub free_list_count: usize,
    pub batch_allocation_size: usize,
    pub validate_with_fill: bool,
}

impl Default for OffHeapConfig {
    fn default() -> Self {
        Self {
            alignment: 8,
            huge_multiple: 256,
            free_list_count: 1,
            batch_allocation_size: 1,
            validate_with_fill: false,
        }
    }
}

impl OffHeapConfig {
    #[must_use]
    pub fn with_alignment(mut self, alignment: usize) -> Self {
        self.alignment = alignment;
        self
    }

    #[must_use]
    pub fn with_huge_multiple(mut self, huge_multiple: usize) -> Self {
        self.huge_multiple = huge_multiple;
        self
    }

    #[must_use]
    pub fn with_free_list_count(mut self, free_list_count: usize) -> Self {
        self.free_list_count = free_list_count;
        self
    }

    #[must_use]
    pub fn with_batch_allocation_size(mut self, batch_allocation_size: usize) -> Self {
        self.batch_allocation_size = batch_allocation_size;
        self
    }

    #[must_use]
    pub fn with_validate_with_fill(mut self, validate_with_fill: bool) -> Self {
        self.validate_with_fill = validate_with_fill;
        self
    }

    /// Runs every validator, reporting the first violation.
    pub fn validate(&self) -> Result<(), ConfigError> {
        verify_huge_multiple(to_i64(self.huge_multiple))?;
        verify_free_list_count(to_i64(self.free_list_count))?;
        verify_alignment(to_i64(self.alignment))?;
        verify_batch_allocation_size(to_i64(self.batch_allocation_size))?;
        Ok(())
    }

    /// Largest data size served by a tiny (exact-fit) class.
    #[must_use]
    pub fn max_tiny(&self) -> usize {
        self.alignment * TINY_FREE_LIST_COUNT
    }

    /// Largest chunk total size in a tiny class.
    #[must_use]
    pub fn max_tiny_total(&self) -> usize {
        total_size(self.max_tiny(), self.alignment)
    }

    /// Width of one huge size class in bytes. A zero multiple acts as one.
    #[must_use]
    pub fn huge_step(&self) -> usize {
        self.huge_multiple.max(1) * self.alignment
    }

    /// Smallest chunk the allocator can carve.
    #[must_use]
    pub fn min_chunk_size(&self) -> usize {
        total_size(1, self.alignment)
    }

    /// Reads `OFF_HEAP_*` environment variables over the defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds a config from a key lookup. Missing keys keep their defaults;
    /// present keys must parse and pass validation.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        if let Some(v) = lookup(ENV_ALIGNMENT) {
            let v = parse_i64(ENV_ALIGNMENT, &v)?;
            verify_alignment(v)?;
            config.alignment = v as usize;
        }
        if let Some(v) = lookup(ENV_HUGE_MULTIPLE) {
            let v = parse_i64(ENV_HUGE_MULTIPLE, &v)?;
            verify_huge_multiple(v)?;
            config.huge_multiple = v as usize;
        }
        if let Some(v) = lookup(ENV_FREE_LIST_COUNT) {
            let v = parse_i64(ENV_FREE_LIST_COUNT, &v)?;
            verify_free_list_count(v)?;
            config.free_list_count = v as usize;
        }
        if let Some(v) = lookup(ENV_BATCH_ALLOCATION_SIZE) {
            let v = parse_i64(ENV_BATCH_ALLOCATION_SIZE, &v)?;
            verify_batch_allocation_size(v)?;
            config.batch_allocation_size = v as usize;
        }
        if let Some(v) = lookup(ENV_VALIDATE_WITH_FILL) {
            config.validate_with_fill = parse_flag(ENV_VALIDATE_WITH_FILL, &v)?;
        }
        config.validate()?;
        Ok(config)
    }
}

/// Huge multiple must lie in `[0, 256]`.
pub fn verify_huge_multiple(value: i64) -> Result<(), ConfigError> {
    if !(0..=MAX_HUGE_MULTIPLE).contains(&value) {
        return Err(ConfigError::invalid(
            HUGE_MULTIPLE_NAME,
            ">= 0 and <= 256",
            value,
        ));
    }
    Ok(())
}

/// Free list count must be at least one.
pub fn verify_free_list_count(value: i64) -> Result<(), ConfigError> {
    if value < 1 {
        return Err(ConfigError::invalid(FREE_LIST_COUNT_NAME, ">= 1", value));
    }
    Ok(())
}

/// Alignment must be a positive multiple of 8 and at most 256.
pub fn verify_alignment(value: i64) -> Result<(), ConfigError> {
    if value % 8 != 0 {
        return Err(ConfigError::invalid(ALIGNMENT_NAME, "a multiple of 8", value));
    }
    if value <= 0 {
        return Err(ConfigError::invalid(ALIGNMENT_NAME, "> 0", value));
    }
    if value > MAX_ALIGNMENT {
        return Err(ConfigError::invalid(ALIGNMENT_NAME, "<= 256", value));
    }
    Ok(())
}

/// Batch allocation size must be at least one.
pub fn verify_batch_allocation_size(value: i64) -> Result<(), ConfigError> {
    if value < 1 {
        return Err(ConfigError::invalid(
            BATCH_ALLOCATION_SIZE_NAME,
            ">= 1",
            value,
        ));
    }
    Ok(())
}

fn to_i64(value: usize) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

fn parse_i64(name: &'static str, raw: &str) -> Result<i64, ConfigError> {
    raw.trim().parse().map_err(|_| ConfigError::Parse {
        name,
        expected: "an integer",
        value: raw.to_string(),
    })
}

/// Loose boolean parsing, case-insensitive.
fn parse_flag(name: &'static str, raw: &str) -> Result<bool, ConfigError> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" | "" => Ok(false),
        _ => Err(ConfigError::Parse {
            name,
            expected: "a boolean",
            value: raw.to_string(),
        }),
    }
}
