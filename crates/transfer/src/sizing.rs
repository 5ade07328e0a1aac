//! Chunk size and parallelism selection.
//!
//! A [`SizingPolicy`] is evaluated once per batch and its [`UploadLimits`]
//! are handed to the scheduler; nothing here is mutated afterwards.

use chunkdrop_protocol::NetworkClass;
use serde::{Deserialize, Serialize};

use crate::DEFAULT_CHUNK_SIZE;

/// Hard ceiling on files uploading at the same time.
pub const MAX_PARALLEL_FILES: usize = 8;

/// Hard ceiling on in-flight chunks of a single file.
pub const MAX_PARALLEL_CHUNKS_PER_FILE: usize = 4;

const MIB: u64 = 1024 * 1024;

/// Batches up to this size get the minimal pool.
const SMALL_BATCH: u64 = 16 * MIB;

/// Batches above this size get the maximal pool.
const LARGE_BATCH: u64 = 500 * MIB;

/// Chunking and concurrency bounds for one batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadLimits {
    pub chunk_size: u64,
    pub max_parallel_files: usize,
    pub max_parallel_chunks_per_file: usize,
}

impl UploadLimits {
    /// Total worker count: `max_parallel_files × max_parallel_chunks_per_file`.
    pub fn worker_count(&self) -> usize {
        self.max_parallel_files.max(1) * self.max_parallel_chunks_per_file.max(1)
    }
}

impl Default for UploadLimits {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            max_parallel_files: 5,
            max_parallel_chunks_per_file: MAX_PARALLEL_CHUNKS_PER_FILE,
        }
    }
}

/// Strategy mapping environment signals to upload limits.
pub trait SizingPolicy: Send + Sync {
    /// Chunk size for the given link quality.
    fn chunk_size(&self, network: NetworkClass) -> u64;

    /// `(max_parallel_files, max_parallel_chunks_per_file)` for a batch.
    fn parallelism(&self, batch_bytes: u64) -> (usize, usize);

    /// Combines both decisions.
    fn limits(&self, network: NetworkClass, batch_bytes: u64) -> UploadLimits {
        let (max_parallel_files, max_parallel_chunks_per_file) = self.parallelism(batch_bytes);
        UploadLimits {
            chunk_size: self.chunk_size(network),
            max_parallel_files,
            max_parallel_chunks_per_file,
        }
    }
}

/// Table-driven policy around a base chunk size.
///
/// | network            | chunk size |
/// |--------------------|------------|
/// | slow-2g, 2g        | base / 4   |
/// | 3g                 | base / 2   |
/// | 4g, wifi, ethernet | base × 2   |
/// | unknown            | base       |
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DefaultSizingPolicy {
    base_chunk_size: u64,
}

impl DefaultSizingPolicy {
    pub fn new(base_chunk_size: u64) -> Self {
        Self {
            base_chunk_size: base_chunk_size.max(1),
        }
    }
}

impl Default for DefaultSizingPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_CHUNK_SIZE)
    }
}

impl SizingPolicy for DefaultSizingPolicy {
    fn chunk_size(&self, network: NetworkClass) -> u64 {
        let base = self.base_chunk_size;
        let size = match network {
            NetworkClass::Slow2g | NetworkClass::TwoG => base / 4,
            NetworkClass::ThreeG => base / 2,
            NetworkClass::FourG | NetworkClass::Wifi | NetworkClass::Ethernet => {
                base.saturating_mul(2)
            }
            NetworkClass::Unknown => base,
        };
        size.max(1)
    }

    fn parallelism(&self, batch_bytes: u64) -> (usize, usize) {
        let (files, chunks) = if batch_bytes <= SMALL_BATCH {
            (2, 2)
        } else if batch_bytes <= LARGE_BATCH {
            (5, MAX_PARALLEL_CHUNKS_PER_FILE)
        } else {
            (MAX_PARALLEL_FILES, MAX_PARALLEL_CHUNKS_PER_FILE)
        };
        (
            files.min(MAX_PARALLEL_FILES),
            chunks.min(MAX_PARALLEL_CHUNKS_PER_FILE),
        )
    }
}
