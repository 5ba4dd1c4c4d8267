// Runtime configuration for the storage core.
//
// Mirrors the teacher's `Config`/`DatabaseConfig` defaulting pattern, but
// scoped to what the storage core actually needs: page size, buffer pool
// capacity, and the directory that holds `pico.db`/`picodb.lock`/`picodb.binlog`.

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Minimum pool capacity; below this `H = floor(N/4)` would be zero.
pub const MIN_POOL_CAPACITY: usize = 4;

/// Minimum page size granularity, in bytes.
pub const PAGE_SIZE_GRANULARITY: u32 = 1024;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PicoConfig {
    /// Page size in bytes. Must be a positive multiple of 1024.
    pub page_size: u32,
    /// Buffer pool capacity `N`. Must be >= 4.
    pub pool_capacity: usize,
    /// Directory holding `pico.db`, `picodb.lock`, `picodb.binlog`.
    pub data_dir: PathBuf,
}

impl Default for PicoConfig {
    fn default() -> Self {
        Self {
            page_size: 64 * 1024,
            pool_capacity: 64,
            data_dir: default_data_dir(),
        }
    }
}

impl PicoConfig {
    /// Load overrides from a JSON config file, falling back to defaults for
    /// any field the file omits. A missing file is not an error.
    pub fn load(path: &std::path::Path) -> crate::error::Result<Self> {
        let mut config = Self::default();
        if let Ok(contents) = std::fs::read_to_string(path) {
            #[derive(Deserialize, Default)]
            struct Overrides {
                page_size: Option<u32>,
                pool_capacity: Option<usize>,
                data_dir: Option<PathBuf>,
            }
            let overrides: Overrides = serde_json::from_str(&contents)?;
            if let Some(page_size) = overrides.page_size {
                config.page_size = page_size;
            }
            if let Some(pool_capacity) = overrides.pool_capacity {
                config.pool_capacity = pool_capacity;
            }
            if let Some(data_dir) = overrides.data_dir {
                config.data_dir = data_dir;
            }
        }
        Ok(config)
    }
}

/// Resolve the platform's per-user application-data directory for "picodb".
/// Runtime-resolved, not a compile-time constant, per the source's design note.
fn default_data_dir() -> PathBuf {
    ProjectDirs::from("", "", "picodb")
        .map(|dirs| dirs.data_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from("./picodb-data"))
}

impl From<serde_json::Error> for crate::error::DbError {
    fn from(e: serde_json::Error) -> Self {
        crate::error::DbError::Storage(format!("config parse error: {e}"))
    }
}
