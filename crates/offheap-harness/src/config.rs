//! Allocator configuration loading and request classification.

use offheap_core::{MAX_DATA_SIZE, OffHeapConfig, SizeClass, SizeClasses};
use serde::Serialize;
use std::path::Path;

use crate::error::HarnessError;

/// Loads an allocator configuration.
///
/// With a path, the file is read as JSON; fields it omits take their
/// defaults. Without one, the `OFF_HEAP_*` environment variables are used.
/// Either way the result has passed [`OffHeapConfig::validate`].
pub fn load_config(path: Option<&Path>) -> Result<OffHeapConfig, HarnessError> {
    let config = match path {
        Some(path) => {
            let content = std::fs::read_to_string(path)?;
            serde_json::from_str::<OffHeapConfig>(&content).map_err(|source| {
                HarnessError::ConfigFile {
                    path: path.to_path_buf(),
                    source,
                }
            })?
        }
        None => OffHeapConfig::from_env()?,
    };
    config.validate()?;
    Ok(config)
}

/// Where a request of a given data size lands.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClassReport {
    pub data_size: usize,
    pub total_size: usize,
    pub class: SizeClass,
    pub class_size: usize,
    pub alignment: usize,
    pub max_tiny: usize,
    pub huge_step: usize,
}

/// Maps `data_size` to its size class under `config`.
pub fn classify_request(
    config: &OffHeapConfig,
    data_size: usize,
) -> Result<ClassReport, HarnessError> {
    if data_size == 0 || data_size > MAX_DATA_SIZE {
        return Err(HarnessError::InvalidArgument(format!(
            "data size must be in 1..={MAX_DATA_SIZE} but it was {data_size}"
        )));
    }
    let classes = SizeClasses::new(config);
    let (class, total_size) = classes.classify(data_size);
    Ok(ClassReport {
        data_size,
        total_size,
        class,
        class_size: classes.class_size(class),
        alignment: config.alignment,
        max_tiny: config.max_tiny(),
        huge_step: classes.huge_step(),
    })
}
