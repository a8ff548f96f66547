use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{RegionError, RegionResult};

/// Largest payload accepted by default: 4 MiB.
pub const DEFAULT_MAX_CHUNK_SIZE: usize = 4 * 1024 * 1024;

/// Waste ratio above which a flush compacts the whole file.
pub const DEFAULT_DEFRAG_THRESHOLD: f64 = 0.5;

/// Region files kept open by a manager before the least recently used one is closed.
pub const DEFAULT_MAX_OPEN_REGIONS: usize = 32;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Writes larger than this are logged and dropped.
    pub max_chunk_size: usize,
    pub defrag_threshold: f64,
    pub max_open_regions: usize,
    /// fsync data and header on every flush. Off by default; a flush then
    /// only hands bytes to the OS page cache.
    pub sync_on_flush: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            max_chunk_size: DEFAULT_MAX_CHUNK_SIZE,
            defrag_threshold: DEFAULT_DEFRAG_THRESHOLD,
            max_open_regions: DEFAULT_MAX_OPEN_REGIONS,
            sync_on_flush: false,
        }
    }
}

impl StorageConfig {
    /// Read a JSON config file. Missing fields fall back to their defaults.
    pub fn load(path: impl AsRef<Path>) -> RegionResult<Self> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        Self::from_json(&raw)
    }

    pub fn from_json(raw: &str) -> RegionResult<Self> {
        let config: Self = serde_json::from_str(raw).map_err(|e| RegionError::InvalidConfig {
            field: "json",
            reason: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> RegionResult<()> {
        if self.max_open_regions == 0 {
            return Err(RegionError::InvalidConfig {
                field: "max_open_regions",
                reason: "must be at least 1".into(),
            });
        }
        if !(self.defrag_threshold > 0.0 && self.defrag_threshold <= 1.0) {
            return Err(RegionError::InvalidConfig {
                field: "defrag_threshold",
                reason: format!("{} is outside (0, 1]", self.defrag_threshold),
            });
        }
        if self.max_chunk_size > i32::MAX as usize {
            return Err(RegionError::InvalidConfig {
                field: "max_chunk_size",
                reason: format!("{} does not fit a 32-bit slot length", self.max_chunk_size),
            });
        }
        Ok(())
    }
}
