//! Merges staged parts into the final file.
//!
//! Assembly is serialized per [`PartKey`]: concurrent triggers for the same
//! upload session queue on one async mutex, and whoever runs second
//! re-verifies what is left on disk instead of trusting the trigger.

use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use chunkdrop_transfer::resolve_file;
use tracing::{debug, info};

use crate::error::AssembleError;
use crate::staging::{PartKey, StagingArea};

/// Result of an assembly attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Assembly {
    /// All parts were merged into `path`.
    Assembled { path: PathBuf, bytes: u64 },
    /// These indices are not staged yet; nothing was written.
    MissingParts(Vec<u32>),
    /// An earlier trigger of the same session already produced the file.
    AlreadyAssembled { path: PathBuf },
}

/// Single-flight part merger.
pub struct Reassembler {
    storage_root: PathBuf,
    staging: StagingArea,
    locks: Mutex<HashMap<PartKey, Arc<tokio::sync::Mutex<()>>>>,
}

impl Reassembler {
    pub fn new(storage_root: &Path, staging: StagingArea) -> Self {
        Self {
            storage_root: storage_root.to_path_buf(),
            staging,
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// Verifies that parts `0..total_chunks` are staged and, if so, writes
    /// them in index order to the destination named by `key`.
    pub async fn assemble(&self, key: &PartKey, total_chunks: u32) -> Result<Assembly, AssembleError> {
        let caller_root = self.storage_root.join(&key.caller_id);
        let destination = resolve_file(&caller_root, &key.destination)?;

        let lock = self.lock_for(key);
        let result = {
            let _guard = lock.lock().await;
            self.assemble_locked(key, total_chunks, destination).await
        };
        self.release_lock(key, &lock);
        result
    }

    async fn assemble_locked(
        &self,
        key: &PartKey,
        total_chunks: u32,
        destination: PathBuf,
    ) -> Result<Assembly, AssembleError> {
        if self.staging.is_assembled(key) {
            // Parts re-staged by a late duplicate are never merged again.
            self.staging.remove_parts(key, total_chunks)?;
            debug!(
                destination = %destination.display(),
                upload = %key.upload_id,
                "already assembled"
            );
            return Ok(Assembly::AlreadyAssembled { path: destination });
        }

        let missing = self.staging.missing_parts(key, total_chunks);
        if !missing.is_empty() {
            debug!(
                destination = %destination.display(),
                missing = missing.len(),
                "parts outstanding"
            );
            return Ok(Assembly::MissingParts(missing));
        }

        let staging = self.staging.clone();
        let key = key.clone();
        let target = destination.clone();
        let bytes = tokio::task::spawn_blocking(move || merge_parts(&staging, &key, total_chunks, &target))
            .await
            .map_err(|e| AssembleError::Task(e.to_string()))??;

        info!(
            destination = %destination.display(),
            chunks = total_chunks,
            bytes,
            "file assembled"
        );
        Ok(Assembly::Assembled {
            path: destination,
            bytes,
        })
    }

    fn lock_for(&self, key: &PartKey) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(locks.entry(key.clone()).or_default())
    }

    /// Drops the map entry once nobody else holds or waits on it.
    fn release_lock(&self, key: &PartKey, lock: &Arc<tokio::sync::Mutex<()>>) {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        if Arc::strong_count(lock) == 2 {
            locks.remove(key);
        }
    }
}

/// Concatenates the parts into a temporary sibling of `destination`, renames
/// it into place and deletes the parts. Returns the number of bytes written.
fn merge_parts(
    staging: &StagingArea,
    key: &PartKey,
    total_chunks: u32,
    destination: &Path,
) -> Result<u64, AssembleError> {
    let parent = destination
        .parent()
        .ok_or_else(|| AssembleError::InvalidPath(destination.display().to_string()))?;
    fs::create_dir_all(parent)?;

    let temp_path = parent.join(format!(
        ".{}.{}.assembling",
        key.original_name,
        uuid::Uuid::new_v4().simple()
    ));

    let result = (|| -> Result<u64, AssembleError> {
        let mut out = fs::File::create(&temp_path)?;
        let mut bytes = 0;
        for index in 0..total_chunks {
            let mut part = fs::File::open(staging.part_path(key, index))?;
            bytes += std::io::copy(&mut part, &mut out)?;
        }
        out.flush()?;
        out.sync_all()?;
        fs::rename(&temp_path, destination)?;
        Ok(bytes)
    })();

    match result {
        Ok(bytes) => {
            staging.mark_assembled(key)?;
            staging.remove_parts(key, total_chunks)?;
            Ok(bytes)
        }
        Err(e) => {
            let _ = fs::remove_file(&temp_path);
            Err(e)
        }
    }
}
