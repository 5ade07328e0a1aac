//! Error types for the receiving side.

use chunkdrop_protocol::{ErrorResponse, RejectReason};
use chunkdrop_transfer::TransferError;

/// Why a chunk was not accepted.
#[derive(Debug, thiserror::Error)]
pub enum ReceiveError {
    #[error("missing field: {0}")]
    MissingField(&'static str),

    #[error("invalid path: {0}")]
    InvalidPath(String),

    #[error("invalid chunk: {0}")]
    InvalidChunk(String),

    #[error("chunk of {size} bytes exceeds limit of {limit}")]
    ChunkTooLarge { size: u64, limit: u64 },

    #[error("checksum mismatch for chunk {index}")]
    ChecksumMismatch { index: u32 },

    #[error("too many chunks in flight")]
    RateLimited,

    #[error("storage failure: {0}")]
    Storage(#[from] std::io::Error),

    #[error(transparent)]
    Assemble(#[from] AssembleError),
}

impl ReceiveError {
    /// Machine-readable reason sent back to the client.
    pub fn reason(&self) -> RejectReason {
        match self {
            Self::MissingField(_) => RejectReason::MissingField,
            Self::InvalidPath(_) => RejectReason::InvalidPath,
            Self::InvalidChunk(_) => RejectReason::InvalidChunk,
            Self::ChunkTooLarge { .. } => RejectReason::ChunkTooLarge,
            Self::ChecksumMismatch { .. } => RejectReason::ChecksumMismatch,
            Self::RateLimited => RejectReason::RateLimited,
            Self::Storage(_) => RejectReason::StorageFailure,
            Self::Assemble(e) => e.reason(),
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.reason().is_retryable()
    }

    pub fn to_response(&self) -> ErrorResponse {
        ErrorResponse::new(self.reason(), self.to_string())
    }
}

impl From<TransferError> for ReceiveError {
    fn from(err: TransferError) -> Self {
        match err {
            TransferError::Io(e) => Self::Storage(e),
            TransferError::InvalidPath(msg) => Self::InvalidPath(msg),
            other => Self::InvalidChunk(other.to_string()),
        }
    }
}

/// Failure while merging parts into the final file.
#[derive(Debug, thiserror::Error)]
pub enum AssembleError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid destination: {0}")]
    InvalidPath(String),

    #[error("assembly task failed: {0}")]
    Task(String),
}

impl AssembleError {
    pub fn reason(&self) -> RejectReason {
        match self {
            Self::InvalidPath(_) => RejectReason::InvalidPath,
            Self::Io(_) | Self::Task(_) => RejectReason::StorageFailure,
        }
    }
}

impl From<TransferError> for AssembleError {
    fn from(err: TransferError) -> Self {
        match err {
            TransferError::Io(e) => Self::Io(e),
            other => Self::InvalidPath(other.to_string()),
        }
    }
}

/// Failure of a storage usage query.
#[derive(Debug, thiserror::Error)]
pub enum UsageError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid path: {0}")]
    InvalidPath(String),

    #[error("usage walk failed: {0}")]
    Task(String),
}

impl From<TransferError> for UsageError {
    fn from(err: TransferError) -> Self {
        match err {
            TransferError::Io(e) => Self::Io(e),
            other => Self::InvalidPath(other.to_string()),
        }
    }
}
