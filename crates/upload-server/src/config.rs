//! Server storage configuration.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default ceiling for a single chunk body (16 MiB).
pub const DEFAULT_MAX_CHUNK_SIZE: u64 = 16 * 1024 * 1024;

/// Default fan-out cap for the usage walk.
pub const DEFAULT_MAX_PARALLEL_STATS: usize = 20;

/// Default age after which orphaned parts are swept (24 h).
pub const DEFAULT_STALE_PART_TTL_SECS: u64 = 24 * 60 * 60;

/// Storage settings, as stored in the `storage` section of the config file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StorageConfig {
    /// Final files live under `storage_root/{callerId}/`.
    pub storage_root: PathBuf,
    pub max_chunk_size: u64,
    /// Concurrent chunk writes allowed before rejecting with `rate_limited`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_inflight_chunks: Option<usize>,
    pub max_parallel_stats: usize,
    pub stale_part_ttl_secs: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            storage_root: default_storage_root(),
            max_chunk_size: DEFAULT_MAX_CHUNK_SIZE,
            max_inflight_chunks: None,
            max_parallel_stats: DEFAULT_MAX_PARALLEL_STATS,
            stale_part_ttl_secs: DEFAULT_STALE_PART_TTL_SECS,
        }
    }
}

impl StorageConfig {
    /// Defaults with a specific storage root.
    pub fn with_root(storage_root: impl Into<PathBuf>) -> Self {
        Self {
            storage_root: storage_root.into(),
            ..Default::default()
        }
    }

    pub fn stale_part_ttl(&self) -> Duration {
        Duration::from_secs(self.stale_part_ttl_secs)
    }
}

/// `$HOME/chunkdrop`, or `/tmp/chunkdrop` without a home directory.
fn default_storage_root() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
        .join("chunkdrop")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = StorageConfig::with_root("/srv/chunkdrop");
        assert_eq!(config.storage_root, PathBuf::from("/srv/chunkdrop"));
        assert_eq!(config.max_chunk_size, 16 * 1024 * 1024);
        assert_eq!(config.max_inflight_chunks, None);
        assert_eq!(config.max_parallel_stats, 20);
        assert_eq!(config.stale_part_ttl(), Duration::from_secs(86_400));
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let config: StorageConfig =
            serde_json::from_str(r#"{"storageRoot":"/data","maxInflightChunks":8}"#).unwrap();
        assert_eq!(config.storage_root, PathBuf::from("/data"));
        assert_eq!(config.max_inflight_chunks, Some(8));
        assert_eq!(config.max_parallel_stats, DEFAULT_MAX_PARALLEL_STATS);
    }
}
