//! Chunk planning, sizing policy and path safety for chunked uploads.
//!
//! Everything in this crate is synchronous and free of shared state so it
//! can be unit-tested without a runtime. The client uses the codec and the
//! sizing policy to split files; the server uses the codec to validate
//! incoming metadata and the path guard to confine every write.

mod codec;
mod path_guard;
mod sizing;

pub use codec::{
    ChunkPlan, ChunkReader, checksum_bytes, plan, range_of,
    validate_chunk_meta,
};
pub use path_guard::{resolve, resolve_file, validate_component, validate_upload_path};
pub use sizing::{
    DefaultSizingPolicy, MAX_PARALLEL_CHUNKS_PER_FILE, MAX_PARALLEL_FILES, SizingPolicy,
    UploadLimits,
};

/// Default chunk size: 4 MiB.
pub const DEFAULT_CHUNK_SIZE: u64 = 4 * 1024 * 1024;

/// Errors produced by the transfer crate.
#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("file is empty")]
    EmptyFile,

    #[error("chunk size must be greater than zero")]
    ZeroChunkSize,

    #[error("{file_size} bytes in chunks of {chunk_size} exceeds the chunk index range")]
    TooManyChunks { file_size: u64, chunk_size: u64 },

    #[error("invalid chunk: {0}")]
    InvalidChunk(String),

    #[error("invalid path: {0}")]
    InvalidPath(String),
}
