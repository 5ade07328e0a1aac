//! Server-side entry point for chunk uploads.

use std::path::PathBuf;
use std::sync::Arc;

use chunkdrop_protocol::{ChunkUploadRequest, ErrorResponse, UploadAck};
use chunkdrop_transfer::{
    checksum_bytes, resolve_file, validate_chunk_meta, validate_component, validate_upload_path,
};
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use crate::assembler::{Assembly, Reassembler};
use crate::config::StorageConfig;
use crate::error::{ReceiveError, UsageError};
use crate::staging::{PartKey, StagingArea};
use crate::usage::UsageWalker;

/// Validates, stages and, once complete, assembles incoming chunks.
pub struct ChunkReceiver {
    config: StorageConfig,
    staging: StagingArea,
    assembler: Reassembler,
    usage: UsageWalker,
    admission: Option<Arc<Semaphore>>,
}

impl ChunkReceiver {
    pub fn new(config: StorageConfig) -> Self {
        let staging = StagingArea::new(&config.storage_root);
        let assembler = Reassembler::new(&config.storage_root, staging.clone());
        let usage = UsageWalker::new(&config.storage_root, config.max_parallel_stats);
        let admission = config
            .max_inflight_chunks
            .map(|limit| Arc::new(Semaphore::new(limit)));
        Self {
            config,
            staging,
            assembler,
            usage,
            admission,
        }
    }

    pub fn config(&self) -> &StorageConfig {
        &self.config
    }

    pub fn staging(&self) -> &StagingArea {
        &self.staging
    }

    /// Root directory of `caller_id`'s files.
    pub fn caller_root(&self, caller_id: &str) -> Result<PathBuf, ReceiveError> {
        validate_caller(caller_id)?;
        Ok(self.config.storage_root.join(caller_id))
    }

    /// Accepts one chunk.
    ///
    /// Every check runs before any byte touches the disk. The chunk is
    /// staged, then assembly is attempted if this is the final index or the
    /// final part is already staged (out-of-order delivery).
    pub async fn receive(
        &self,
        caller_id: &str,
        request: &ChunkUploadRequest,
        data: Vec<u8>,
    ) -> Result<UploadAck, ReceiveError> {
        let caller_root = self.caller_root(caller_id)?;

        if request.upload_id.trim().is_empty() {
            return Err(ReceiveError::MissingField("uploadId"));
        }
        if request.relative_path.trim().is_empty() {
            return Err(ReceiveError::MissingField("relativePath"));
        }
        if request.original_name.is_empty() {
            return Err(ReceiveError::MissingField("originalName"));
        }
        validate_component(&request.original_name)?;
        validate_chunk_meta(request.chunk_index, request.total_chunks)?;
        resolve_file(&caller_root, &request.relative_path)?;
        let destination = normalized(&request.relative_path)?;

        let size = data.len() as u64;
        if size == 0 {
            return Err(ReceiveError::InvalidChunk("empty chunk body".into()));
        }
        if size > self.config.max_chunk_size {
            return Err(ReceiveError::ChunkTooLarge {
                size,
                limit: self.config.max_chunk_size,
            });
        }
        if let Some(expected) = &request.checksum
            && !checksum_bytes(&data).eq_ignore_ascii_case(expected)
        {
            return Err(ReceiveError::ChecksumMismatch {
                index: request.chunk_index,
            });
        }

        let key = PartKey::new(
            caller_id,
            request.upload_id.clone(),
            destination,
            request.original_name.clone(),
        );
        let index = request.chunk_index;
        let total = request.total_chunks;

        if self.staging.is_assembled(&key) {
            debug!(
                caller = %caller_id,
                upload = %key.upload_id,
                index,
                "chunk of assembled upload ignored"
            );
            return Ok(UploadAck::assembled(&key.destination));
        }

        {
            let _permit = match &self.admission {
                Some(semaphore) => Some(
                    Arc::clone(semaphore)
                        .try_acquire_owned()
                        .map_err(|_| ReceiveError::RateLimited)?,
                ),
                None => None,
            };

            let staging = self.staging.clone();
            let part_key = key.clone();
            tokio::task::spawn_blocking(move || staging.write_part(&part_key, index, &data))
                .await
                .map_err(|e| ReceiveError::Storage(std::io::Error::other(e)))??;
        }

        let last = total - 1;
        if !request.is_final() && !self.staging.part_exists(&key, last) {
            debug!(caller = %caller_id, destination = %key.destination, index, total, "chunk stored");
            return Ok(UploadAck::stored(index, total));
        }

        match self.assembler.assemble(&key, total).await? {
            Assembly::Assembled { .. } | Assembly::AlreadyAssembled { .. } => {
                Ok(UploadAck::assembled(&key.destination))
            }
            Assembly::MissingParts(missing) if request.is_final() => Ok(UploadAck::pending(missing)),
            Assembly::MissingParts(_) => Ok(UploadAck::stored(index, total)),
        }
    }

    /// Like [`receive`](Self::receive) but folds failures into the wire
    /// error shape.
    pub async fn handle(
        &self,
        caller_id: &str,
        request: &ChunkUploadRequest,
        data: Vec<u8>,
    ) -> Result<UploadAck, ErrorResponse> {
        match self.receive(caller_id, request, data).await {
            Ok(ack) => Ok(ack),
            Err(e) => {
                if e.is_retryable() {
                    debug!(caller = %caller_id, index = request.chunk_index, "chunk deferred: {e}");
                } else {
                    warn!(
                        caller = %caller_id,
                        path = %request.relative_path,
                        index = request.chunk_index,
                        reason = %e.reason(),
                        "chunk rejected: {e}"
                    );
                }
                Err(e.to_response())
            }
        }
    }

    /// Total bytes stored for `caller_id`.
    pub async fn total_size(&self, caller_id: &str) -> Result<u64, UsageError> {
        validate_caller(caller_id).map_err(|e| UsageError::InvalidPath(e.to_string()))?;
        self.usage.total_size(caller_id).await
    }

    /// Bytes stored under one folder of `caller_id`.
    pub async fn folder_size(&self, caller_id: &str, relative: &str) -> Result<u64, UsageError> {
        validate_caller(caller_id).map_err(|e| UsageError::InvalidPath(e.to_string()))?;
        self.usage.folder_size(caller_id, relative).await
    }

    /// Removes orphaned parts older than the configured TTL.
    pub async fn sweep_stale_parts(&self) -> Result<usize, ReceiveError> {
        let staging = self.staging.clone();
        let ttl = self.config.stale_part_ttl();
        let removed = tokio::task::spawn_blocking(move || staging.sweep_stale(ttl))
            .await
            .map_err(|e| ReceiveError::Storage(std::io::Error::other(e)))??;
        if removed > 0 {
            info!(removed, "stale part sweep finished");
        }
        Ok(removed)
    }
}

/// Caller ids are single path segments and may not start with `.` (that
/// namespace holds the staging area).
fn validate_caller(caller_id: &str) -> Result<(), ReceiveError> {
    validate_component(caller_id)?;
    if caller_id.starts_with('.') {
        return Err(ReceiveError::InvalidPath(format!(
            "caller id may not start with '.': {caller_id}"
        )));
    }
    Ok(())
}

/// `/`-joined normalized form of a relative path, used as the staging key.
fn normalized(relative: &str) -> Result<String, ReceiveError> {
    let path = validate_upload_path(relative)?;
    let segments: Vec<String> = path
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    Ok(segments.join("/"))
}
