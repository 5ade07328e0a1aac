//! Upload jobs and their chunk tasks.

use std::ops::Range;
use std::path::{Path, PathBuf};

use chunkdrop_protocol::{ChunkUploadRequest, JobStatus};
use chunkdrop_transfer::{ChunkPlan, validate_upload_path};
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::error::{JobFailure, UploadError};

/// Identifier of an upload job (UUID v4).
pub type JobId = String;

/// A local file selected for upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadSource {
    pub path: PathBuf,
    /// File name used for the destination and the staged parts.
    pub name: String,
    pub size: u64,
}

impl UploadSource {
    pub fn new(path: impl Into<PathBuf>, name: impl Into<String>, size: u64) -> Self {
        Self {
            path: path.into(),
            name: name.into(),
            size,
        }
    }

    /// Stats `path` and takes the name from its last component.
    pub fn from_path(path: &Path) -> Result<Self, UploadError> {
        let meta = std::fs::metadata(path)?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| {
                UploadError::Transfer(chunkdrop_transfer::TransferError::InvalidPath(format!(
                    "no file name: {}",
                    path.display()
                )))
            })?;
        Ok(Self::new(path, name, meta.len()))
    }
}

/// Dispatch state of a single chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkState {
    Pending,
    InFlight,
    Done,
    Failed,
}

/// One chunk of one job.
#[derive(Debug, Clone)]
pub struct ChunkTask {
    pub index: u32,
    pub byte_range: Range<u64>,
    /// Attempts spent so far, kept across pause/resume.
    pub attempts: u32,
    pub last_error: Option<String>,
    pub state: ChunkState,
}

impl ChunkTask {
    pub fn len(&self) -> u64 {
        self.byte_range.end - self.byte_range.start
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// One file moving through the registry.
#[derive(Debug)]
pub struct UploadJob {
    pub(crate) id: JobId,
    pub(crate) source: UploadSource,
    pub(crate) destination: String,
    pub(crate) plan: ChunkPlan,
    pub(crate) status: JobStatus,
    pub(crate) chunks: Vec<ChunkTask>,
    pub(crate) cancel: CancellationToken,
    pub(crate) failure: Option<JobFailure>,
    pub(crate) bytes_done: u64,
}

impl UploadJob {
    /// Plans `source` into chunks bound for `destination_folder/name`.
    pub fn new(
        source: UploadSource,
        destination_folder: &str,
        chunk_size: u64,
    ) -> Result<Self, UploadError> {
        let destination = destination_path(destination_folder, &source.name)?;
        let plan = ChunkPlan::new(source.size, chunk_size)?;
        let chunks = plan
            .ranges()
            .map(|(index, byte_range)| ChunkTask {
                index,
                byte_range,
                attempts: 0,
                last_error: None,
                state: ChunkState::Pending,
            })
            .collect();

        Ok(Self {
            id: uuid::Uuid::new_v4().to_string(),
            source,
            destination,
            plan,
            status: JobStatus::Pending,
            chunks,
            cancel: CancellationToken::new(),
            failure: None,
            bytes_done: 0,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn status(&self) -> JobStatus {
        self.status
    }

    /// Destination path relative to the caller's root.
    pub fn destination(&self) -> &str {
        &self.destination
    }

    /// Folder part of the destination (empty for the root).
    pub fn destination_folder(&self) -> &str {
        self.destination
            .rsplit_once('/')
            .map(|(folder, _)| folder)
            .unwrap_or("")
    }

    pub fn chunks(&self) -> &[ChunkTask] {
        &self.chunks
    }

    pub fn total_chunks(&self) -> u32 {
        self.plan.total_chunks()
    }

    pub(crate) fn in_flight(&self) -> usize {
        self.count(ChunkState::InFlight)
    }

    pub(crate) fn count(&self, state: ChunkState) -> usize {
        self.chunks.iter().filter(|c| c.state == state).count()
    }

    pub(crate) fn next_pending(&self) -> Option<usize> {
        self.chunks.iter().position(|c| c.state == ChunkState::Pending)
    }

    /// Eligible for dispatch: not paused and not terminal.
    pub(crate) fn is_dispatchable(&self) -> bool {
        matches!(self.status, JobStatus::Pending | JobStatus::Uploading)
    }

    pub(crate) fn is_complete(&self) -> bool {
        self.chunks.iter().all(|c| c.state == ChunkState::Done)
    }

    pub(crate) fn request_for(&self, index: u32) -> ChunkUploadRequest {
        ChunkUploadRequest {
            upload_id: self.id.clone(),
            relative_path: self.destination.clone(),
            chunk_index: index,
            total_chunks: self.plan.total_chunks(),
            original_name: self.source.name.clone(),
            checksum: None,
        }
    }

    /// Moves the job to `to` if the lifecycle allows it.
    ///
    /// ```text
    /// pending   -> uploading | paused | canceled
    /// uploading -> done | error | paused | canceled
    /// paused    -> pending | canceled
    /// ```
    pub(crate) fn transition(
        &mut self,
        to: JobStatus,
        action: &'static str,
    ) -> Result<(), UploadError> {
        use JobStatus::*;
        let allowed = matches!(
            (self.status, to),
            (Pending, Uploading | Paused | Canceled)
                | (Uploading, Done | Error | Paused | Canceled)
                | (Paused, Pending | Canceled)
        );
        if !allowed {
            return Err(UploadError::InvalidTransition {
                job_id: self.id.clone(),
                status: self.status,
                action,
            });
        }
        self.status = to;
        Ok(())
    }

    pub fn report(&self) -> JobReport {
        JobReport {
            id: self.id.clone(),
            destination: self.destination.clone(),
            status: self.status,
            total_bytes: self.plan.file_size(),
            bytes_done: self.bytes_done,
            total_chunks: self.plan.total_chunks(),
            chunks_done: self.count(ChunkState::Done) as u32,
            failure: self.failure.clone(),
        }
    }
}

/// Read-only view of a job for status displays.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobReport {
    pub id: JobId,
    pub destination: String,
    pub status: JobStatus,
    pub total_bytes: u64,
    pub bytes_done: u64,
    pub total_chunks: u32,
    pub chunks_done: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<JobFailure>,
}

/// Joins a destination folder and a file name into a normalized relative
/// path with `/` separators.
pub fn destination_path(folder: &str, name: &str) -> Result<String, UploadError> {
    chunkdrop_transfer::validate_component(name)?;
    let joined = if folder.trim().is_empty() {
        name.to_string()
    } else {
        format!("{folder}/{name}")
    };
    let normalized = validate_upload_path(&joined)?;
    let segments: Vec<String> = normalized
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    Ok(segments.join("/"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job(size: u64, chunk: u64) -> UploadJob {
        UploadJob::new(UploadSource::new("/tmp/a.bin", "a.bin", size), "/docs/", chunk).unwrap()
    }

    #[test]
    fn destination_is_normalized() {
        assert_eq!(destination_path("/docs/", "a.bin").unwrap(), "docs/a.bin");
        assert_eq!(destination_path("", "a.bin").unwrap(), "a.bin");
        assert_eq!(destination_path("//x//y", "a.bin").unwrap(), "x/y/a.bin");
        assert!(destination_path("../up", "a.bin").is_err());
        assert!(destination_path("docs", "../a.bin").is_err());
    }

    #[test]
    fn new_job_plans_chunks() {
        let job = job(10, 4);
        assert_eq!(job.status(), JobStatus::Pending);
        assert_eq!(job.total_chunks(), 3);
        assert_eq!(job.destination(), "docs/a.bin");
        assert_eq!(job.destination_folder(), "docs");
        let lens: Vec<u64> = job.chunks().iter().map(ChunkTask::len).collect();
        assert_eq!(lens, vec![4, 4, 2]);
        assert!(job.chunks().iter().all(|c| c.state == ChunkState::Pending));
    }

    #[test]
    fn empty_source_is_rejected() {
        let result = UploadJob::new(UploadSource::new("/tmp/e", "e", 0), "", 4);
        assert!(matches!(result, Err(UploadError::Transfer(_))));
    }

    #[test]
    fn lifecycle_transitions() {
        let mut job = job(10, 4);
        job.transition(JobStatus::Paused, "pause").unwrap();
        assert!(job.transition(JobStatus::Uploading, "start").is_err());
        job.transition(JobStatus::Pending, "resume").unwrap();
        job.transition(JobStatus::Uploading, "start").unwrap();
        job.transition(JobStatus::Done, "complete").unwrap();
        for to in [JobStatus::Pending, JobStatus::Paused, JobStatus::Canceled] {
            assert!(matches!(
                job.transition(to, "any"),
                Err(UploadError::InvalidTransition { .. })
            ));
        }
    }

    #[test]
    fn request_carries_destination() {
        let job = job(10, 4);
        let req = job.request_for(2);
        assert_eq!(req.upload_id, job.id());
        assert_eq!(req.relative_path, "docs/a.bin");
        assert_eq!(req.original_name, "a.bin");
        assert_eq!(req.total_chunks, 3);
        assert!(req.is_final());
    }

    #[test]
    fn source_from_path() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("clip.mp4");
        std::fs::write(&path, b"12345").unwrap();
        let source = UploadSource::from_path(&path).unwrap();
        assert_eq!(source.name, "clip.mp4");
        assert_eq!(source.size, 5);
    }
}
