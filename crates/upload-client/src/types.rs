//! Events and settings for the upload scheduler.

use std::time::Duration;

use chunkdrop_protocol::{JobStatus, NetworkClass};
use chunkdrop_transfer::{DEFAULT_CHUNK_SIZE, DefaultSizingPolicy};
use serde::{Deserialize, Serialize};

use crate::job::JobId;
use crate::retry::RetryPolicy;

/// Notification emitted by the scheduler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum UploadEvent {
    /// A job moved to a new lifecycle state.
    StatusChanged { job_id: JobId, status: JobStatus },
    /// One chunk was acknowledged.
    ChunkUploaded {
        job_id: JobId,
        index: u32,
        bytes_done: u64,
        total_bytes: u64,
    },
    /// Every chunk of a job was acknowledged.
    Completed { job_id: JobId, destination: String },
    /// A job stopped on a fatal error or exhausted retries.
    Failed {
        job_id: JobId,
        reason: String,
        message: String,
    },
    /// Contents of a destination folder changed.
    DirectoryChanged { folder: String },
    /// Fresh aggregate storage usage after a completion.
    TotalSize { bytes: u64 },
}

/// Client-side tuning, as stored in the `upload` section of the config file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct UploadSettings {
    /// Base chunk size before the network adjustment.
    pub default_chunk_size: u64,
    /// Maximum total attempts per chunk.
    pub max_retries: u32,
    pub initial_backoff_ms: u64,
    pub network_class: NetworkClass,
}

impl Default for UploadSettings {
    fn default() -> Self {
        Self {
            default_chunk_size: DEFAULT_CHUNK_SIZE,
            max_retries: 3,
            initial_backoff_ms: 500,
            network_class: NetworkClass::Unknown,
        }
    }
}

impl UploadSettings {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_retries, Duration::from_millis(self.initial_backoff_ms))
    }

    pub fn sizing_policy(&self) -> DefaultSizingPolicy {
        DefaultSizingPolicy::new(self.default_chunk_size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn settings_defaults() {
        let settings = UploadSettings::default();
        assert_eq!(settings.default_chunk_size, 4 * 1024 * 1024);
        assert_eq!(settings.retry_policy(), RetryPolicy::default());
    }

    #[test]
    fn settings_partial_json() {
        let settings: UploadSettings =
            serde_json::from_str(r#"{"maxRetries":5,"networkClass":"3g"}"#).unwrap();
        assert_eq!(settings.max_retries, 5);
        assert_eq!(settings.network_class, NetworkClass::ThreeG);
        assert_eq!(settings.initial_backoff_ms, 500);
    }

    #[test]
    fn event_is_tagged() {
        let event = UploadEvent::TotalSize { bytes: 42 };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "totalSize");
        assert_eq!(json["bytes"], 42);
    }
}
