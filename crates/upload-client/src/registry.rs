//! Job registry: the single source of truth for job and chunk state.
//!
//! The registry is plain data behind the scheduler's lock. Every mutation
//! that should be observable queues an [`UploadEvent`]; the scheduler drains
//! them after releasing the lock.

use std::ops::Range;
use std::path::PathBuf;

use chunkdrop_protocol::{ChunkUploadRequest, JobStatus, UploadSnapshot};
use chunkdrop_transfer::UploadLimits;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{JobFailure, UploadError};
use crate::job::{ChunkState, JobId, JobReport, UploadJob, UploadSource};
use crate::types::UploadEvent;

/// A chunk handed to a worker.
#[derive(Debug, Clone)]
pub struct ClaimedChunk {
    pub job_id: JobId,
    pub index: u32,
    pub byte_range: Range<u64>,
    pub source_path: PathBuf,
    pub request: ChunkUploadRequest,
    pub cancel: CancellationToken,
    /// Attempts already spent on this chunk.
    pub attempts: u32,
}

/// What a delivered chunk meant for its job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Completion {
    /// More chunks remain (or the job is no longer active).
    Partial,
    /// Every chunk is done; carries the destination folder to refresh.
    JobDone { folder: String },
}

/// Ordered collection of upload jobs plus the worker accounting.
#[derive(Debug)]
pub struct JobRegistry {
    jobs: Vec<UploadJob>,
    cursor: usize,
    limits: UploadLimits,
    active_workers: usize,
    events: Vec<UploadEvent>,
}

impl JobRegistry {
    pub fn new(limits: UploadLimits) -> Self {
        Self {
            jobs: Vec::new(),
            cursor: 0,
            limits,
            active_workers: 0,
            events: Vec::new(),
        }
    }

    pub fn limits(&self) -> UploadLimits {
        self.limits
    }

    /// Adds a job for `source`; empty files are skipped with a warning.
    pub fn enqueue(
        &mut self,
        source: UploadSource,
        destination_folder: &str,
    ) -> Result<Option<JobId>, UploadError> {
        if source.size == 0 {
            warn!(path = %source.path.display(), "skipping empty file");
            return Ok(None);
        }
        let job = UploadJob::new(source, destination_folder, self.limits.chunk_size)?;
        let id = job.id.clone();
        info!(
            job = %id,
            destination = %job.destination,
            bytes = job.plan.file_size(),
            chunks = job.total_chunks(),
            "upload queued"
        );
        self.push_status(&id, JobStatus::Pending);
        self.jobs.push(job);
        Ok(Some(id))
    }

    /// Pauses a pending or uploading job and aborts its in-flight chunks.
    ///
    /// Aborted chunks return to the pool when their worker reports back.
    pub fn pause(&mut self, job_id: &str) -> Result<(), UploadError> {
        let job = self.job_mut(job_id)?;
        job.transition(JobStatus::Paused, "pause")?;
        job.cancel.cancel();
        debug!(job = %job_id, in_flight = job.in_flight(), "upload paused");
        self.push_status(job_id, JobStatus::Paused);
        Ok(())
    }

    /// Returns a paused job to the pool with a fresh cancellation token.
    pub fn resume(&mut self, job_id: &str) -> Result<(), UploadError> {
        let job = self.job_mut(job_id)?;
        job.transition(JobStatus::Pending, "resume")?;
        job.cancel = CancellationToken::new();
        debug!(job = %job_id, "upload resumed");
        self.push_status(job_id, JobStatus::Pending);
        Ok(())
    }

    /// Cancels a non-terminal job; its chunks are never dispatched again.
    pub fn cancel(&mut self, job_id: &str) -> Result<(), UploadError> {
        let job = self.job_mut(job_id)?;
        job.transition(JobStatus::Canceled, "cancel")?;
        job.cancel.cancel();
        info!(job = %job_id, "upload canceled");
        self.push_status(job_id, JobStatus::Canceled);
        Ok(())
    }

    /// Drops a terminal job from the registry.
    pub fn evict(&mut self, job_id: &str) -> Result<(), UploadError> {
        let pos = self.position(job_id)?;
        let status = self.jobs[pos].status;
        if !status.is_terminal() {
            return Err(UploadError::InvalidTransition {
                job_id: job_id.to_string(),
                status,
                action: "evict",
            });
        }
        self.jobs.remove(pos);
        self.fix_cursor(pos);
        Ok(())
    }

    /// Counts jobs by status, then purges done and canceled jobs.
    ///
    /// Failed jobs stay visible until [`evict`](Self::evict).
    pub fn snapshot(&mut self) -> UploadSnapshot {
        let mut snapshot = UploadSnapshot::default();
        for job in &self.jobs {
            snapshot.count(job.status);
        }

        let mut index = 0;
        while index < self.jobs.len() {
            if matches!(self.jobs[index].status, JobStatus::Done | JobStatus::Canceled) {
                self.jobs.remove(index);
                self.fix_cursor(index);
            } else {
                index += 1;
            }
        }
        snapshot
    }

    pub fn report(&self, job_id: &str) -> Option<JobReport> {
        self.jobs.iter().find(|j| j.id == job_id).map(UploadJob::report)
    }

    pub fn reports(&self) -> Vec<JobReport> {
        self.jobs.iter().map(UploadJob::report).collect()
    }

    // -----------------------------------------------------------------------
    // Dispatch
    // -----------------------------------------------------------------------

    /// Picks the next chunk, round-robin across dispatchable jobs.
    ///
    /// A job may hold at most `max_parallel_chunks_per_file` in-flight chunks
    /// and at most `max_parallel_files` jobs may hold any.
    pub fn claim_next(&mut self) -> Option<ClaimedChunk> {
        let len = self.jobs.len();
        if len == 0 {
            return None;
        }
        let per_file = self.limits.max_parallel_chunks_per_file.max(1);
        let max_files = self.limits.max_parallel_files.max(1);
        let busy_files = self.jobs.iter().filter(|j| j.in_flight() > 0).count();

        for offset in 0..len {
            let pos = (self.cursor + offset) % len;
            let job = &self.jobs[pos];
            if !job.is_dispatchable() {
                continue;
            }
            let in_flight = job.in_flight();
            if in_flight >= per_file || (in_flight == 0 && busy_files >= max_files) {
                continue;
            }
            let Some(slot) = job.next_pending() else {
                continue;
            };

            self.cursor = (pos + 1) % len;
            let job = &mut self.jobs[pos];
            let started = job.status == JobStatus::Pending;
            if started {
                job.status = JobStatus::Uploading;
            }
            let request = job.request_for(job.chunks[slot].index);
            let job_id = job.id.clone();
            let source_path = job.source.path.clone();
            let cancel = job.cancel.clone();
            let chunk = &mut job.chunks[slot];
            chunk.state = ChunkState::InFlight;
            let claimed = ClaimedChunk {
                job_id,
                index: chunk.index,
                byte_range: chunk.byte_range.clone(),
                source_path,
                request,
                cancel,
                attempts: chunk.attempts,
            };
            if started {
                self.push_status(&claimed.job_id, JobStatus::Uploading);
            }
            return Some(claimed);
        }
        None
    }

    /// Chunks that a worker could pick up right now.
    pub fn dispatchable_chunks(&self) -> usize {
        self.jobs
            .iter()
            .filter(|j| j.is_dispatchable())
            .map(|j| j.count(ChunkState::Pending))
            .sum()
    }

    /// Marks a chunk delivered; the last one finishes the job.
    pub fn complete_chunk(&mut self, job_id: &str, index: u32, attempts: u32) -> Completion {
        let Some(job) = self.jobs.iter_mut().find(|j| j.id == job_id) else {
            return Completion::Partial;
        };
        if job.status.is_terminal() {
            return Completion::Partial;
        }
        let Some(chunk) = job.chunks.get_mut(index as usize) else {
            return Completion::Partial;
        };
        if chunk.state == ChunkState::Done {
            return Completion::Partial;
        }
        chunk.state = ChunkState::Done;
        chunk.attempts = attempts;
        chunk.last_error = None;
        let len = chunk.len();
        job.bytes_done += len;

        let (bytes_done, total_bytes) = (job.bytes_done, job.plan.file_size());
        let job_id = job.id.clone();
        self.events.push(UploadEvent::ChunkUploaded {
            job_id: job_id.clone(),
            index,
            bytes_done,
            total_bytes,
        });

        let Some(job) = self.jobs.iter_mut().find(|j| j.id == job_id) else {
            return Completion::Partial;
        };
        // A chunk that landed just before a pause can still finish the job.
        if !job.is_complete() {
            return Completion::Partial;
        }
        job.status = JobStatus::Done;
        let destination = job.destination.clone();
        let folder = job.destination_folder().to_string();
        info!(job = %job_id, destination = %destination, bytes = total_bytes, "upload complete");
        self.push_status(&job_id, JobStatus::Done);
        self.events.push(UploadEvent::Completed {
            job_id,
            destination,
        });
        Completion::JobDone { folder }
    }

    /// Returns an aborted chunk to the pool.
    pub fn release_chunk(&mut self, job_id: &str, index: u32, attempts: u32) {
        if let Some(chunk) = self.chunk_mut(job_id, index)
            && chunk.state == ChunkState::InFlight
        {
            chunk.state = ChunkState::Pending;
            chunk.attempts = attempts;
        }
    }

    /// Records a chunk that failed fatally or ran out of attempts.
    ///
    /// An uploading job moves to `error` and its remaining in-flight chunks
    /// are aborted. If the job was paused meanwhile, the chunk simply returns
    /// to the pool with the error noted; a resumed job meets the same error
    /// again on its next attempt.
    pub fn fail_chunk(&mut self, job_id: &str, index: u32, attempts: u32, failure: JobFailure) {
        let Some(job) = self.jobs.iter_mut().find(|j| j.id == job_id) else {
            return;
        };
        let status = job.status;
        let Some(chunk) = job.chunks.get_mut(index as usize) else {
            return;
        };
        chunk.attempts = attempts;
        chunk.last_error = Some(failure.message.clone());

        match status {
            JobStatus::Uploading => {
                chunk.state = ChunkState::Failed;
                job.status = JobStatus::Error;
                job.cancel.cancel();
                job.failure = Some(failure.clone());
                warn!(
                    job = %job_id,
                    chunk = index,
                    attempts,
                    reason = %failure.reason,
                    error = %failure.message,
                    "upload failed"
                );
                self.push_status(job_id, JobStatus::Error);
                self.events.push(UploadEvent::Failed {
                    job_id: job_id.to_string(),
                    reason: failure.reason,
                    message: failure.message,
                });
            }
            JobStatus::Paused | JobStatus::Pending => {
                if chunk.state == ChunkState::InFlight {
                    chunk.state = ChunkState::Pending;
                }
            }
            _ => {}
        }
    }

    // -----------------------------------------------------------------------
    // Worker accounting
    // -----------------------------------------------------------------------

    /// Reserves up to as many new workers as there is work and free slots.
    pub fn reserve_workers(&mut self) -> usize {
        let free = self.limits.worker_count().saturating_sub(self.active_workers);
        let wanted = free.min(self.dispatchable_chunks());
        self.active_workers += wanted;
        wanted
    }

    pub fn worker_exited(&mut self) {
        self.active_workers = self.active_workers.saturating_sub(1);
    }

    pub fn active_workers(&self) -> usize {
        self.active_workers
    }

    pub fn drain_events(&mut self) -> Vec<UploadEvent> {
        std::mem::take(&mut self.events)
    }

    // -----------------------------------------------------------------------
    // Helpers
    // -----------------------------------------------------------------------

    fn position(&self, job_id: &str) -> Result<usize, UploadError> {
        self.jobs
            .iter()
            .position(|j| j.id == job_id)
            .ok_or_else(|| UploadError::JobNotFound(job_id.to_string()))
    }

    fn job_mut(&mut self, job_id: &str) -> Result<&mut UploadJob, UploadError> {
        let pos = self.position(job_id)?;
        Ok(&mut self.jobs[pos])
    }

    fn chunk_mut(&mut self, job_id: &str, index: u32) -> Option<&mut crate::job::ChunkTask> {
        self.jobs
            .iter_mut()
            .find(|j| j.id == job_id)
            .and_then(|j| j.chunks.get_mut(index as usize))
    }

    fn fix_cursor(&mut self, removed: usize) {
        if removed < self.cursor {
            self.cursor -= 1;
        }
        if self.cursor >= self.jobs.len() {
            self.cursor = 0;
        }
    }

    fn push_status(&mut self, job_id: &str, status: JobStatus) {
        self.events.push(UploadEvent::StatusChanged {
            job_id: job_id.to_string(),
            status,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chunkdrop_protocol::RejectReason;

    use crate::error::TransportError;

    fn limits(files: usize, chunks: usize) -> UploadLimits {
        UploadLimits {
            chunk_size: 4,
            max_parallel_files: files,
            max_parallel_chunks_per_file: chunks,
        }
    }

    fn source(name: &str, size: u64) -> UploadSource {
        UploadSource::new(format!("/tmp/{name}"), name, size)
    }

    #[test]
    fn empty_file_is_skipped() {
        let mut reg = JobRegistry::new(limits(1, 1));
        assert_eq!(reg.enqueue(source("e.bin", 0), "docs").unwrap(), None);
        assert_eq!(reg.snapshot().total, 0);
    }

    #[test]
    fn first_claim_starts_job() {
        let mut reg = JobRegistry::new(limits(1, 1));
        let id = reg.enqueue(source("a.bin", 10), "").unwrap().unwrap();
        reg.drain_events();

        let claim = reg.claim_next().unwrap();
        assert_eq!(claim.job_id, id);
        assert_eq!(claim.index, 0);
        assert_eq!(claim.byte_range, 0..4);
        assert_eq!(reg.report(&id).unwrap().status, JobStatus::Uploading);
        assert_eq!(
            reg.drain_events(),
            vec![UploadEvent::StatusChanged {
                job_id: id,
                status: JobStatus::Uploading
            }]
        );
    }

    #[test]
    fn claim_carries_request_for_its_chunk() {
        let mut reg = JobRegistry::new(limits(1, 2));
        let id = reg.enqueue(source("a.bin", 10), "docs").unwrap().unwrap();

        let first = reg.claim_next().unwrap();
        let second = reg.claim_next().unwrap();
        assert_eq!(second.index, 1);
        assert_eq!(second.request.chunk_index, 1);
        assert_eq!(second.request.total_chunks, 3);
        assert_eq!(second.request.upload_id, id);
        assert_eq!(first.request.relative_path, "docs/a.bin");
        assert_eq!(second.source_path, std::path::PathBuf::from("/tmp/a.bin"));
    }

    #[test]
    fn per_file_limit_is_respected() {
        let mut reg = JobRegistry::new(limits(1, 2));
        reg.enqueue(source("a.bin", 40), "").unwrap();
        assert!(reg.claim_next().is_some());
        assert!(reg.claim_next().is_some());
        assert!(reg.claim_next().is_none());
    }

    #[test]
    fn file_limit_is_respected() {
        let mut reg = JobRegistry::new(limits(2, 1));
        for name in ["a", "b", "c"] {
            reg.enqueue(source(name, 8), "").unwrap();
        }
        let first = reg.claim_next().unwrap();
        let second = reg.claim_next().unwrap();
        assert_ne!(first.job_id, second.job_id);
        assert!(reg.claim_next().is_none());

        reg.complete_chunk(&first.job_id, first.index, 1);
        let third = reg.claim_next().unwrap();
        assert_ne!(third.job_id, first.job_id);
        assert_ne!(third.job_id, second.job_id);
        assert!(reg.claim_next().is_none());
    }

    #[test]
    fn claims_rotate_between_jobs() {
        let mut reg = JobRegistry::new(limits(2, 2));
        let a = reg.enqueue(source("a", 16), "").unwrap().unwrap();
        let b = reg.enqueue(source("b", 16), "").unwrap().unwrap();
        let order: Vec<String> = (0..4).map(|_| reg.claim_next().unwrap().job_id).collect();
        assert_eq!(order, vec![a.clone(), b.clone(), a, b]);
    }

    #[test]
    fn completing_all_chunks_finishes_job() {
        let mut reg = JobRegistry::new(limits(1, 4));
        let id = reg.enqueue(source("a.bin", 10), "docs").unwrap().unwrap();
        let claims: Vec<_> = std::iter::from_fn(|| reg.claim_next()).collect();
        assert_eq!(claims.len(), 3);

        assert_eq!(reg.complete_chunk(&id, 2, 1), Completion::Partial);
        assert_eq!(reg.complete_chunk(&id, 0, 1), Completion::Partial);
        assert_eq!(
            reg.complete_chunk(&id, 1, 1),
            Completion::JobDone {
                folder: "docs".into()
            }
        );
        let report = reg.report(&id).unwrap();
        assert_eq!(report.status, JobStatus::Done);
        assert_eq!(report.bytes_done, 10);
        assert!(reg.drain_events().iter().any(|e| matches!(e, UploadEvent::Completed { .. })));
    }

    #[test]
    fn pause_cancels_token_and_blocks_dispatch() {
        let mut reg = JobRegistry::new(limits(1, 1));
        let id = reg.enqueue(source("a.bin", 10), "").unwrap().unwrap();
        let claim = reg.claim_next().unwrap();

        reg.pause(&id).unwrap();
        assert!(claim.cancel.is_cancelled());
        reg.release_chunk(&id, claim.index, 0);
        assert!(reg.claim_next().is_none());
        assert_eq!(reg.dispatchable_chunks(), 0);

        reg.resume(&id).unwrap();
        let again = reg.claim_next().unwrap();
        assert_eq!(again.index, 0);
        assert!(!again.cancel.is_cancelled());
    }

    #[test]
    fn resume_requires_paused() {
        let mut reg = JobRegistry::new(limits(1, 1));
        let id = reg.enqueue(source("a.bin", 10), "").unwrap().unwrap();
        assert!(matches!(
            reg.resume(&id),
            Err(UploadError::InvalidTransition { .. })
        ));
    }

    #[test]
    fn unknown_job_is_reported() {
        let mut reg = JobRegistry::new(limits(1, 1));
        assert!(matches!(reg.pause("nope"), Err(UploadError::JobNotFound(_))));
    }

    #[test]
    fn fatal_failure_moves_job_to_error() {
        let mut reg = JobRegistry::new(limits(1, 2));
        let id = reg.enqueue(source("a.bin", 10), "").unwrap().unwrap();
        let first = reg.claim_next().unwrap();
        let second = reg.claim_next().unwrap();

        let err = TransportError::Rejected {
            reason: RejectReason::ChecksumMismatch,
            message: "digest differs".into(),
        };
        reg.fail_chunk(&id, first.index, 1, JobFailure::from(&err));

        assert!(second.cancel.is_cancelled());
        let report = reg.report(&id).unwrap();
        assert_eq!(report.status, JobStatus::Error);
        assert_eq!(report.failure.unwrap().reason, "checksum_mismatch");
        assert!(reg.claim_next().is_none());
    }

    #[test]
    fn failure_while_paused_returns_chunk() {
        let mut reg = JobRegistry::new(limits(1, 1));
        let id = reg.enqueue(source("a.bin", 10), "").unwrap().unwrap();
        let claim = reg.claim_next().unwrap();
        reg.pause(&id).unwrap();
        reg.fail_chunk(&id, claim.index, 1, JobFailure::new("connection_failed", "reset"));

        assert_eq!(reg.report(&id).unwrap().status, JobStatus::Paused);
        reg.resume(&id).unwrap();
        let again = reg.claim_next().unwrap();
        assert_eq!(again.index, claim.index);
        assert_eq!(again.attempts, 1);
    }

    #[test]
    fn snapshot_purges_done_and_canceled_but_keeps_errors() {
        let mut reg = JobRegistry::new(limits(4, 1));
        let done = reg.enqueue(source("done", 4), "").unwrap().unwrap();
        let canceled = reg.enqueue(source("canceled", 4), "").unwrap().unwrap();
        let failed = reg.enqueue(source("failed", 4), "").unwrap().unwrap();
        let waiting = reg.enqueue(source("waiting", 4), "").unwrap().unwrap();

        let c = reg.claim_next().unwrap();
        assert_eq!(c.job_id, done);
        reg.complete_chunk(&done, 0, 1);
        reg.cancel(&canceled).unwrap();
        let c = reg.claim_next().unwrap();
        assert_eq!(c.job_id, failed);
        reg.fail_chunk(&failed, 0, 3, JobFailure::new("rate_limited", "429"));

        let snap = reg.snapshot();
        assert_eq!(snap.done, 1);
        assert_eq!(snap.canceled, 1);
        assert_eq!(snap.error, 1);
        assert_eq!(snap.total, 4);

        let snap = reg.snapshot();
        assert_eq!(snap.total, 2);
        assert_eq!(snap.error, 1);
        assert!(reg.report(&waiting).is_some());

        reg.evict(&failed).unwrap();
        assert_eq!(reg.snapshot().total, 1);
        assert!(reg.evict(&waiting).is_err());
    }

    #[test]
    fn reserve_workers_is_bounded_by_work_and_slots() {
        let mut reg = JobRegistry::new(limits(2, 2));
        reg.enqueue(source("a", 8), "").unwrap();
        assert_eq!(reg.reserve_workers(), 2);
        reg.enqueue(source("b", 40), "").unwrap();
        assert_eq!(reg.reserve_workers(), 2);
        assert_eq!(reg.reserve_workers(), 0);
        reg.worker_exited();
        assert_eq!(reg.active_workers(), 3);
    }
}
