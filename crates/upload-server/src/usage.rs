//! Aggregate storage usage.
//!
//! Sizes are recomputed by walking the tree on every query. The walk fans out
//! one task per subdirectory; a semaphore caps how many directories are being
//! listed and stat'ed at the same time.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;

use chunkdrop_transfer::resolve;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::debug;

use crate::error::UsageError;

type WalkFuture = Pin<Box<dyn Future<Output = Result<u64, UsageError>> + Send>>;

/// Bounded-concurrency size walker over the storage root.
#[derive(Debug, Clone)]
pub struct UsageWalker {
    storage_root: PathBuf,
    permits: Arc<Semaphore>,
}

impl UsageWalker {
    pub fn new(storage_root: &Path, max_parallel_stats: usize) -> Self {
        Self {
            storage_root: storage_root.to_path_buf(),
            permits: Arc::new(Semaphore::new(max_parallel_stats.max(1))),
        }
    }

    /// Total bytes under `storage_root/{caller_id}`; zero if it does not exist.
    pub async fn total_size(&self, caller_id: &str) -> Result<u64, UsageError> {
        self.measure(self.storage_root.join(caller_id)).await
    }

    /// Bytes under a guarded sub-path of the caller's root.
    pub async fn folder_size(&self, caller_id: &str, relative: &str) -> Result<u64, UsageError> {
        let target = resolve(&self.storage_root.join(caller_id), relative)?;
        self.measure(target).await
    }

    async fn measure(&self, path: PathBuf) -> Result<u64, UsageError> {
        let meta = match tokio::fs::symlink_metadata(&path).await {
            Ok(meta) => meta,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e.into()),
        };
        let bytes = if meta.is_dir() {
            walk(path.clone(), Arc::clone(&self.permits)).await?
        } else if meta.is_file() {
            meta.len()
        } else {
            0
        };
        debug!(path = %path.display(), bytes, "usage measured");
        Ok(bytes)
    }
}

/// Sums regular files under `dir`. Symlinks are not followed.
fn walk(dir: PathBuf, permits: Arc<Semaphore>) -> WalkFuture {
    Box::pin(async move {
        let mut bytes = 0u64;
        let mut subdirs = Vec::new();
        {
            let _permit = permits
                .acquire()
                .await
                .map_err(|e| UsageError::Task(e.to_string()))?;
            let mut entries = match tokio::fs::read_dir(&dir).await {
                Ok(entries) => entries,
                // Removed between listing the parent and descending.
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
                Err(e) => return Err(e.into()),
            };
            while let Some(entry) = entries.next_entry().await? {
                let file_type = entry.file_type().await?;
                if file_type.is_dir() {
                    subdirs.push(entry.path());
                } else if file_type.is_file() {
                    match entry.metadata().await {
                        Ok(meta) => bytes += meta.len(),
                        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                        Err(e) => return Err(e.into()),
                    }
                }
            }
        }

        let mut tasks = JoinSet::new();
        for subdir in subdirs {
            tasks.spawn(walk(subdir, Arc::clone(&permits)));
        }
        while let Some(joined) = tasks.join_next().await {
            bytes += joined.map_err(|e| UsageError::Task(e.to_string()))??;
        }
        Ok(bytes)
    })
}
