//! Bounded worker pool driving the job registry.
//!
//! Workers are spawned on demand up to
//! `max_parallel_files × max_parallel_chunks_per_file` and exit as soon as
//! the registry has nothing dispatchable for them.

use std::ops::Range;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chunkdrop_protocol::{NetworkClass, UploadSnapshot};
use chunkdrop_transfer::{ChunkReader, SizingPolicy, UploadLimits, checksum_bytes};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, trace, warn};

use crate::error::{JobFailure, UploadError};
use crate::job::{JobId, JobReport, UploadSource};
use crate::registry::{ClaimedChunk, Completion, JobRegistry};
use crate::retry::{self, ChunkOutcome, RetryPolicy};
use crate::transport::ChunkTransport;
use crate::types::UploadEvent;

/// Picks limits for a batch from its total size and the link quality.
pub fn plan_batch(
    policy: &dyn SizingPolicy,
    network: NetworkClass,
    sources: &[UploadSource],
) -> UploadLimits {
    let batch_bytes: u64 = sources.iter().map(|s| s.size).sum();
    let limits = policy.limits(network, batch_bytes);
    info!(
        files = sources.len(),
        batch_bytes,
        network = ?network,
        chunk_size = limits.chunk_size,
        workers = limits.worker_count(),
        "batch planned"
    );
    limits
}

struct Shared {
    registry: Mutex<JobRegistry>,
    transport: Arc<dyn ChunkTransport>,
    retry: RetryPolicy,
    events_tx: mpsc::UnboundedSender<UploadEvent>,
    workers_tx: watch::Sender<usize>,
}

/// Client-side upload front end.
///
/// Must be used from within a Tokio runtime; workers are spawned with
/// [`tokio::spawn`].
pub struct Uploader {
    shared: Arc<Shared>,
    events_rx: Option<mpsc::UnboundedReceiver<UploadEvent>>,
}

impl Uploader {
    pub fn new(transport: Arc<dyn ChunkTransport>, limits: UploadLimits, retry: RetryPolicy) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (workers_tx, _) = watch::channel(0);
        Self {
            shared: Arc::new(Shared {
                registry: Mutex::new(JobRegistry::new(limits)),
                transport,
                retry,
                events_tx,
                workers_tx,
            }),
            events_rx: Some(events_rx),
        }
    }

    /// Takes the event receiver. Can only be called once.
    ///
    /// Nothing is dropped while the receiver lives; the queue is bounded by
    /// the chunks and jobs of the batch.
    pub fn take_events(&mut self) -> Option<mpsc::UnboundedReceiver<UploadEvent>> {
        self.events_rx.take()
    }

    pub fn limits(&self) -> UploadLimits {
        self.shared.registry().limits()
    }

    /// Queues one file under `destination_folder` and starts workers.
    ///
    /// Returns `None` for empty files, which are skipped.
    pub fn enqueue(
        &self,
        source: UploadSource,
        destination_folder: &str,
    ) -> Result<Option<JobId>, UploadError> {
        let id = self
            .shared
            .with_registry(|reg| reg.enqueue(source, destination_folder))?;
        if id.is_some() {
            spawn_workers(&self.shared);
        }
        Ok(id)
    }

    /// Queues several files; stops at the first file that cannot be planned.
    pub fn enqueue_all(
        &self,
        sources: Vec<UploadSource>,
        destination_folder: &str,
    ) -> Result<Vec<JobId>, UploadError> {
        let mut ids = Vec::with_capacity(sources.len());
        for source in sources {
            if let Some(id) = self.enqueue(source, destination_folder)? {
                ids.push(id);
            }
        }
        Ok(ids)
    }

    pub fn pause(&self, job_id: &str) -> Result<(), UploadError> {
        self.shared.with_registry(|reg| reg.pause(job_id))
    }

    pub fn resume(&self, job_id: &str) -> Result<(), UploadError> {
        self.shared.with_registry(|reg| reg.resume(job_id))?;
        spawn_workers(&self.shared);
        Ok(())
    }

    pub fn cancel(&self, job_id: &str) -> Result<(), UploadError> {
        self.shared.with_registry(|reg| reg.cancel(job_id))
    }

    /// Drops a terminal job (typically one in `error`).
    pub fn evict(&self, job_id: &str) -> Result<(), UploadError> {
        self.shared.with_registry(|reg| reg.evict(job_id))
    }

    /// Per-status counts; done and canceled jobs are purged afterwards.
    pub fn snapshot(&self) -> UploadSnapshot {
        self.shared.with_registry(JobRegistry::snapshot)
    }

    pub fn report(&self, job_id: &str) -> Option<JobReport> {
        self.shared.registry().report(job_id)
    }

    pub fn reports(&self) -> Vec<JobReport> {
        self.shared.registry().reports()
    }

    /// Resolves once no worker is running.
    pub async fn wait_idle(&self) {
        let mut rx = self.shared.workers_tx.subscribe();
        let _ = rx.wait_for(|active| *active == 0).await;
    }
}

impl Shared {
    fn registry(&self) -> MutexGuard<'_, JobRegistry> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Runs `f` under the lock, then publishes worker count and events.
    fn with_registry<R>(&self, f: impl FnOnce(&mut JobRegistry) -> R) -> R {
        let (result, events) = {
            let mut reg = self.registry();
            let result = f(&mut reg);
            self.workers_tx.send_replace(reg.active_workers());
            (result, reg.drain_events())
        };
        self.emit(events);
        result
    }

    fn emit(&self, events: Vec<UploadEvent>) {
        for event in events {
            if self.events_tx.send(event).is_err() {
                // Receiver gone; nobody is listening.
                return;
            }
        }
    }

    async fn process(&self, claim: ClaimedChunk) -> Completion {
        let ClaimedChunk {
            job_id,
            index,
            byte_range,
            source_path,
            mut request,
            cancel,
            mut attempts,
        } = claim;

        let data = match read_chunk(source_path, byte_range).await {
            Ok(data) => data,
            Err(e) => {
                let failure = JobFailure::new("source_unreadable", e.to_string());
                self.with_registry(|reg| reg.fail_chunk(&job_id, index, attempts, failure));
                return Completion::Partial;
            }
        };
        request.checksum = Some(checksum_bytes(&data));

        let transport = &self.transport;
        let outcome = retry::execute(&self.retry, &cancel, &mut attempts, || {
            transport.send_chunk(&request, &data, &cancel)
        })
        .await;

        match outcome {
            ChunkOutcome::Delivered(ack) => {
                trace!(job = %job_id, chunk = index, status = ?ack.status, "chunk acknowledged");
                self.with_registry(|reg| reg.complete_chunk(&job_id, index, attempts))
            }
            ChunkOutcome::Aborted => {
                debug!(job = %job_id, chunk = index, "chunk aborted");
                self.with_registry(|reg| reg.release_chunk(&job_id, index, attempts));
                Completion::Partial
            }
            ChunkOutcome::Failed(err) => {
                let failure = JobFailure::from(&err);
                self.with_registry(|reg| reg.fail_chunk(&job_id, index, attempts, failure));
                Completion::Partial
            }
        }
    }

    async fn refresh(&self, folder: String) {
        self.emit(vec![UploadEvent::DirectoryChanged { folder }]);
        match self.transport.total_size().await {
            Ok(bytes) => self.emit(vec![UploadEvent::TotalSize { bytes }]),
            Err(e) => warn!(error = %e, "total size refresh failed"),
        }
    }
}

fn spawn_workers(shared: &Arc<Shared>) {
    let count = shared.with_registry(JobRegistry::reserve_workers);
    if count > 0 {
        trace!(count, "spawning upload workers");
    }
    for _ in 0..count {
        tokio::spawn(worker_loop(Arc::clone(shared)));
    }
}

async fn worker_loop(shared: Arc<Shared>) {
    loop {
        let claim = shared.with_registry(|reg| {
            let claim = reg.claim_next();
            if claim.is_none() {
                reg.worker_exited();
            }
            claim
        });
        let Some(claim) = claim else {
            return;
        };

        if let Completion::JobDone { folder } = shared.process(claim).await {
            shared.refresh(folder).await;
        }
    }
}

async fn read_chunk(path: PathBuf, range: Range<u64>) -> Result<Vec<u8>, UploadError> {
    tokio::task::spawn_blocking(move || -> Result<Vec<u8>, UploadError> {
        let mut reader = ChunkReader::open(&path)?;
        Ok(reader.read(range)?)
    })
    .await
    .map_err(|e| UploadError::Io(std::io::Error::other(e)))?
}
