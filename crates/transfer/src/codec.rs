use std::io::{Read, Seek, SeekFrom};
use std::ops::Range;
use std::path::Path;

use sha2::{Digest, Sha256};

use crate::TransferError;

// ---------------------------------------------------------------------------
// Planning
// ---------------------------------------------------------------------------

/// Returns the number of chunks needed to cover `file_size` bytes.
///
/// Empty files and zero chunk sizes are rejected.
pub fn plan(file_size: u64, chunk_size: u64) -> Result<u32, TransferError> {
    if chunk_size == 0 {
        return Err(TransferError::ZeroChunkSize);
    }
    if file_size == 0 {
        return Err(TransferError::EmptyFile);
    }
    u32::try_from(file_size.div_ceil(chunk_size)).map_err(|_| TransferError::TooManyChunks {
        file_size,
        chunk_size,
    })
}

/// Byte range `[start, end)` of chunk `index`.
///
/// `end` is clamped to `file_size`; an index past the end yields an empty
/// range at `file_size`.
pub fn range_of(index: u32, file_size: u64, chunk_size: u64) -> Range<u64> {
    let start = (index as u64).saturating_mul(chunk_size).min(file_size);
    let end = start.saturating_add(chunk_size).min(file_size);
    start..end
}

/// Checks that a received chunk's index/count pair is self-consistent.
pub fn validate_chunk_meta(chunk_index: u32, total_chunks: u32) -> Result<(), TransferError> {
    if total_chunks == 0 {
        return Err(TransferError::InvalidChunk(
            "totalChunks must be positive".into(),
        ));
    }
    if chunk_index >= total_chunks {
        return Err(TransferError::InvalidChunk(format!(
            "chunkIndex {chunk_index} out of range for {total_chunks} chunk(s)"
        )));
    }
    Ok(())
}

/// The full, eagerly computed chunk layout of one file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkPlan {
    file_size: u64,
    chunk_size: u64,
    total_chunks: u32,
}

impl ChunkPlan {
    pub fn new(file_size: u64, chunk_size: u64) -> Result<Self, TransferError> {
        let total_chunks = plan(file_size, chunk_size)?;
        Ok(Self {
            file_size,
            chunk_size,
            total_chunks,
        })
    }

    pub fn file_size(&self) -> u64 {
        self.file_size
    }

    pub fn chunk_size(&self) -> u64 {
        self.chunk_size
    }

    pub fn total_chunks(&self) -> u32 {
        self.total_chunks
    }

    /// Byte range of chunk `index`, or `None` past the last chunk.
    pub fn range(&self, index: u32) -> Option<Range<u64>> {
        (index < self.total_chunks).then(|| range_of(index, self.file_size, self.chunk_size))
    }

    /// All `(index, range)` pairs in ascending index order.
    pub fn ranges(&self) -> impl Iterator<Item = (u32, Range<u64>)> + '_ {
        (0..self.total_chunks).map(|i| (i, range_of(i, self.file_size, self.chunk_size)))
    }
}

// ---------------------------------------------------------------------------
// Checksums
// ---------------------------------------------------------------------------

/// Lowercase hex SHA-256 of one chunk body, as carried in
/// `ChunkUploadRequest::checksum`.
pub fn checksum_bytes(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

// ---------------------------------------------------------------------------
// ChunkReader
// ---------------------------------------------------------------------------

/// Reads arbitrary chunk ranges from a source file.
///
/// Chunks are dispatched out of order by the scheduler, so every read seeks.
pub struct ChunkReader {
    file: std::fs::File,
    file_size: u64,
}

impl ChunkReader {
    pub fn open(path: &Path) -> Result<Self, TransferError> {
        let file = std::fs::File::open(path)?;
        let file_size = file.metadata()?.len();
        Ok(Self { file, file_size })
    }

    /// Reads exactly the bytes in `range`.
    ///
    /// Fails if the range extends past the current end of the file (the
    /// source was truncated after planning).
    pub fn read(&mut self, range: Range<u64>) -> Result<Vec<u8>, TransferError> {
        if range.end > self.file_size || range.start > range.end {
            return Err(TransferError::InvalidChunk(format!(
                "range {}..{} outside file of {} bytes",
                range.start, range.end, self.file_size
            )));
        }
        self.file.seek(SeekFrom::Start(range.start))?;
        let mut buf = vec![0u8; (range.end - range.start) as usize];
        self.file.read_exact(&mut buf)?;
        Ok(buf)
    }

    /// Total file size in bytes at open time.
    pub fn file_size(&self) -> u64 {
        self.file_size
    }
}
