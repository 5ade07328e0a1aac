//! In-process transport: hands chunks straight to a [`ChunkReceiver`].

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use chunkdrop_client::{ChunkTransport, TransportError};
use chunkdrop_protocol::{ChunkUploadRequest, UploadAck};
use chunkdrop_server::ChunkReceiver;
use tokio_util::sync::CancellationToken;

/// Binds an uploader to a receiver living in the same process, acting as
/// one caller.
pub struct LocalTransport {
    receiver: Arc<ChunkReceiver>,
    caller_id: String,
}

impl LocalTransport {
    pub fn new(receiver: Arc<ChunkReceiver>, caller_id: impl Into<String>) -> Self {
        Self {
            receiver,
            caller_id: caller_id.into(),
        }
    }
}

impl ChunkTransport for LocalTransport {
    fn send_chunk<'a>(
        &'a self,
        request: &'a ChunkUploadRequest,
        data: &'a [u8],
        cancel: &'a CancellationToken,
    ) -> Pin<Box<dyn Future<Output = Result<UploadAck, TransportError>> + Send + 'a>> {
        Box::pin(async move {
            if cancel.is_cancelled() {
                return Err(TransportError::Aborted);
            }
            tokio::select! {
                _ = cancel.cancelled() => Err(TransportError::Aborted),
                result = self.receiver.handle(&self.caller_id, request, data.to_vec()) => {
                    result.map_err(TransportError::from)
                }
            }
        })
    }

    fn total_size(&self) -> Pin<Box<dyn Future<Output = Result<u64, TransportError>> + Send + '_>> {
        Box::pin(async move {
            self.receiver
                .total_size(&self.caller_id)
                .await
                .map_err(|e| TransportError::Connection(e.to_string()))
        })
    }
}
