use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Lifecycle state of a client-side upload job.
///
/// `Canceled`, `Error` and `Done` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Uploading,
    Paused,
    Canceled,
    Error,
    Done,
}

impl JobStatus {
    /// Returns `true` for states no transition can leave.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Canceled | Self::Error | Self::Done)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Uploading => "uploading",
            Self::Paused => "paused",
            Self::Canceled => "canceled",
            Self::Error => "error",
            Self::Done => "done",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Machine-readable reason attached to a rejected chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    /// Destination path is empty or escapes the caller's root.
    InvalidPath,
    /// A required metadata field is absent or empty.
    MissingField,
    /// `chunkIndex >= totalChunks` or `totalChunks == 0`.
    InvalidChunk,
    /// Chunk body exceeds the configured ceiling.
    ChunkTooLarge,
    /// Chunk body does not match its declared SHA-256 digest.
    ChecksumMismatch,
    /// Server is saturated; the chunk may be resent after a delay.
    RateLimited,
    /// The server failed to persist the chunk.
    StorageFailure,
}

impl RejectReason {
    /// Only rate limiting is worth resending the same bytes for.
    pub fn is_retryable(self) -> bool {
        matches!(self, Self::RateLimited)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::InvalidPath => "invalid_path",
            Self::MissingField => "missing_field",
            Self::InvalidChunk => "invalid_chunk",
            Self::ChunkTooLarge => "chunk_too_large",
            Self::ChecksumMismatch => "checksum_mismatch",
            Self::RateLimited => "rate_limited",
            Self::StorageFailure => "storage_failure",
        }
    }
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Coarse estimate of the link quality, used to pick a chunk size.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NetworkClass {
    #[serde(rename = "slow-2g")]
    Slow2g,
    #[serde(rename = "2g")]
    TwoG,
    #[serde(rename = "3g")]
    ThreeG,
    #[serde(rename = "4g")]
    FourG,
    Wifi,
    Ethernet,
    #[default]
    Unknown,
}

/// Error returned when a network class name is not recognised.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown network class: {0}")]
pub struct ParseNetworkClassError(pub String);

impl FromStr for NetworkClass {
    type Err = ParseNetworkClassError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "slow-2g" | "slow2g" => Ok(Self::Slow2g),
            "2g" => Ok(Self::TwoG),
            "3g" => Ok(Self::ThreeG),
            "4g" => Ok(Self::FourG),
            "wifi" => Ok(Self::Wifi),
            "ethernet" => Ok(Self::Ethernet),
            "" | "unknown" => Ok(Self::Unknown),
            other => Err(ParseNetworkClassError(other.to_string())),
        }
    }
}

/// Per-status job counts reported by the client registry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadSnapshot {
    pub pending: usize,
    pub uploading: usize,
    pub paused: usize,
    pub canceled: usize,
    pub error: usize,
    pub done: usize,
    pub total: usize,
}

impl UploadSnapshot {
    /// Adds one job in `status` to the counts.
    pub fn count(&mut self, status: JobStatus) {
        match status {
            JobStatus::Pending => self.pending += 1,
            JobStatus::Uploading => self.uploading += 1,
            JobStatus::Paused => self.paused += 1,
            JobStatus::Canceled => self.canceled += 1,
            JobStatus::Error => self.error += 1,
            JobStatus::Done => self.done += 1,
        }
        self.total += 1;
    }
}
