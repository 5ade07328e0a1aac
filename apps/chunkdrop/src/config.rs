//! Application configuration.
//!
//! One JSON file holds both sections:
//!
//! ```json
//! { "storage": { "storageRoot": "/srv/chunkdrop" }, "upload": { "maxRetries": 5 } }
//! ```
//!
//! Default location: `~/.config/chunkdrop/chunkdrop.json`. A missing file
//! yields defaults; an unparsable one is reported and ignored.

use std::path::{Path, PathBuf};

use chunkdrop_client::{UploadSettings, UploadSource, plan_batch};
use chunkdrop_protocol::NetworkClass;
use chunkdrop_server::StorageConfig;
use chunkdrop_transfer::UploadLimits;
use serde::{Deserialize, Serialize};

pub const CONFIG_FILE_NAME: &str = "chunkdrop.json";

pub const ENV_STORAGE_ROOT: &str = "CHUNKDROP_STORAGE_ROOT";
pub const ENV_CHUNK_SIZE: &str = "CHUNKDROP_CHUNK_SIZE";
pub const ENV_MAX_RETRIES: &str = "CHUNKDROP_MAX_RETRIES";
pub const ENV_INITIAL_BACKOFF_MS: &str = "CHUNKDROP_INITIAL_BACKOFF_MS";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub storage: StorageConfig,
    pub upload: UploadSettings,
}

impl AppConfig {
    /// Loads `path` (or the default location) and applies environment
    /// overrides.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let path = match path {
            Some(p) => p.to_path_buf(),
            None => default_config_path(),
        };
        let mut config = Self::from_file(&path)?;
        config.apply_overrides(|name| std::env::var(name).ok());
        Ok(config)
    }

    fn from_file(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            tracing::debug!(path = %path.display(), "no config file, using defaults");
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        match serde_json::from_str::<Self>(&content) {
            Ok(config) => {
                tracing::debug!(path = %path.display(), "configuration loaded");
                Ok(config)
            }
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "failed to parse config, using defaults"
                );
                Ok(Self::default())
            }
        }
    }

    /// Limits for one batch. The chunk size never exceeds the storage
    /// ceiling, which would reject every chunk.
    pub fn batch_limits(
        &self,
        network: Option<NetworkClass>,
        sources: &[UploadSource],
    ) -> UploadLimits {
        let network = network.unwrap_or(self.upload.network_class);
        let mut limits = plan_batch(&self.upload.sizing_policy(), network, sources);
        let ceiling = self.storage.max_chunk_size.max(1);
        if limits.chunk_size > ceiling {
            tracing::warn!(
                chunk_size = limits.chunk_size,
                max_chunk_size = ceiling,
                "chunk size capped at the storage limit"
            );
            limits.chunk_size = ceiling;
        }
        limits
    }

    /// Applies `CHUNKDROP_*` overrides read through `lookup`.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(root) = lookup(ENV_STORAGE_ROOT).filter(|v| !v.is_empty()) {
            self.storage.storage_root = PathBuf::from(root);
        }
        if let Some(size) = parse_override::<u64>(&lookup, ENV_CHUNK_SIZE).filter(|v| *v > 0) {
            self.upload.default_chunk_size = size;
        }
        if let Some(retries) = parse_override(&lookup, ENV_MAX_RETRIES) {
            self.upload.max_retries = retries;
        }
        if let Some(backoff) = parse_override(&lookup, ENV_INITIAL_BACKOFF_MS) {
            self.upload.initial_backoff_ms = backoff;
        }
    }
}

fn parse_override<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &str,
) -> Option<T> {
    let raw = lookup(name)?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!(var = name, value = %raw, "ignoring invalid override");
            None
        }
    }
}

fn default_config_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".into());
    PathBuf::from(home)
        .join(".config")
        .join("chunkdrop")
        .join(CONFIG_FILE_NAME)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::TempDir;

    #[test]
    fn missing_file_gives_defaults() {
        let dir = TempDir::new().unwrap();
        let config = AppConfig::from_file(&dir.path().join(CONFIG_FILE_NAME)).unwrap();
        assert_eq!(config, AppConfig::default());
    }

    #[test]
    fn reads_both_sections() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);
        std::fs::write(
            &path,
            r#"{"storage":{"storageRoot":"/data","maxChunkSize":1024},"upload":{"networkClass":"4g"}}"#,
        )
        .unwrap();

        let config = AppConfig::from_file(&path).unwrap();
        assert_eq!(config.storage.storage_root, PathBuf::from("/data"));
        assert_eq!(config.storage.max_chunk_size, 1024);
        assert_eq!(config.upload.network_class, NetworkClass::FourG);
        assert_eq!(config.upload.max_retries, 3);
    }

    #[test]
    fn garbage_file_falls_back_to_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);
        std::fs::write(&path, "{ not json").unwrap();
        assert_eq!(AppConfig::from_file(&path).unwrap(), AppConfig::default());
    }

    #[test]
    fn environment_overrides() {
        let vars: HashMap<&str, &str> = HashMap::from([
            (ENV_STORAGE_ROOT, "/mnt/uploads"),
            (ENV_CHUNK_SIZE, "1048576"),
            (ENV_MAX_RETRIES, "not-a-number"),
            (ENV_INITIAL_BACKOFF_MS, "250"),
        ]);
        let mut config = AppConfig::default();
        config.apply_overrides(|name| vars.get(name).map(|v| v.to_string()));

        assert_eq!(config.storage.storage_root, PathBuf::from("/mnt/uploads"));
        assert_eq!(config.upload.default_chunk_size, 1_048_576);
        assert_eq!(config.upload.max_retries, 3);
        assert_eq!(config.upload.initial_backoff_ms, 250);
    }

    #[test]
    fn batch_chunk_size_is_capped_by_storage_limit() {
        let mut config = AppConfig::default();
        config.apply_overrides(|name| (name == ENV_CHUNK_SIZE).then(|| "16777216".to_string()));
        let sources = [UploadSource::new("/a", "a", 64 * 1024 * 1024)];

        let limits = config.batch_limits(Some(NetworkClass::Wifi), &sources);
        assert_eq!(limits.chunk_size, config.storage.max_chunk_size);

        let limits = config.batch_limits(Some(NetworkClass::ThreeG), &sources);
        assert_eq!(limits.chunk_size, 8 * 1024 * 1024);
    }
}
