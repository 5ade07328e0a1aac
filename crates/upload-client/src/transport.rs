//! Chunk transport trait.
//!
//! The scheduler never talks to a socket directly. Whatever carries a chunk
//! to the receiving side (HTTP multipart, a binary frame, or the in-process
//! receiver used by the CLI and tests) implements [`ChunkTransport`].

use std::future::Future;
use std::pin::Pin;

use chunkdrop_protocol::{ChunkUploadRequest, UploadAck};
use tokio_util::sync::CancellationToken;

use crate::error::TransportError;

/// Abstract connection to an upload receiver.
pub trait ChunkTransport: Send + Sync {
    /// Delivers one chunk body with its metadata.
    ///
    /// Implementations should stop early and return
    /// [`TransportError::Aborted`] once `cancel` fires.
    fn send_chunk<'a>(
        &'a self,
        request: &'a ChunkUploadRequest,
        data: &'a [u8],
        cancel: &'a CancellationToken,
    ) -> Pin<Box<dyn Future<Output = Result<UploadAck, TransportError>> + Send + 'a>>;

    /// Queries the aggregate size of the caller's storage.
    fn total_size(&self) -> Pin<Box<dyn Future<Output = Result<u64, TransportError>> + Send + '_>>;
}
