//! Client side of chunked uploads.
//!
//! An [`Uploader`] owns a [`JobRegistry`](registry::JobRegistry), spawns a
//! bounded pool of workers and pushes chunks through a [`ChunkTransport`]
//! with per-chunk retry. Progress is reported as [`UploadEvent`]s.

pub mod error;
pub mod job;
pub mod registry;
pub mod retry;
pub mod scheduler;
pub mod transport;
pub mod types;

pub use error::{JobFailure, TransportError, UploadError};
pub use job::{ChunkState, ChunkTask, JobId, JobReport, UploadJob, UploadSource};
pub use retry::{ChunkOutcome, RetryPolicy};
pub use scheduler::{Uploader, plan_batch};
pub use transport::ChunkTransport;
pub use types::{UploadEvent, UploadSettings};
