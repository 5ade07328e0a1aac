//! Upload error types.

use chunkdrop_protocol::{ErrorResponse, JobStatus, RejectReason};
use serde::{Deserialize, Serialize};

/// Failure of a single chunk delivery attempt.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// The server refused the chunk with a machine-readable reason.
    #[error("rejected ({reason}): {message}")]
    Rejected {
        reason: RejectReason,
        message: String,
    },

    /// The request never produced a response (reset, timeout, refused).
    #[error("connection error: {0}")]
    Connection(String),

    /// The attempt was cut short by the job's cancellation token.
    #[error("aborted")]
    Aborted,
}

impl TransportError {
    /// Rate limiting and transport failures are worth another attempt.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Rejected { reason, .. } => reason.is_retryable(),
            Self::Connection(_) => true,
            Self::Aborted => false,
        }
    }

    /// Machine-readable code surfaced on the failed job.
    pub fn reason_code(&self) -> &'static str {
        match self {
            Self::Rejected { reason, .. } => reason.as_str(),
            Self::Connection(_) => "connection_failed",
            Self::Aborted => "aborted",
        }
    }
}

impl From<ErrorResponse> for TransportError {
    fn from(resp: ErrorResponse) -> Self {
        Self::Rejected {
            reason: resp.reason,
            message: resp.message,
        }
    }
}

/// Terminal failure recorded on a job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobFailure {
    /// Machine-readable reason (`rate_limited`, `invalid_path`, ...).
    pub reason: String,
    /// Human-readable description.
    pub message: String,
}

impl JobFailure {
    pub fn new(reason: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
            message: message.into(),
        }
    }
}

impl From<&TransportError> for JobFailure {
    fn from(err: &TransportError) -> Self {
        let message = match err {
            TransportError::Rejected { message, .. } => message.clone(),
            other => other.to_string(),
        };
        Self::new(err.reason_code(), message)
    }
}

/// Errors returned by the upload API.
#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("transfer error: {0}")]
    Transfer(#[from] chunkdrop_transfer::TransferError),

    #[error("job not found: {0}")]
    JobNotFound(String),

    #[error("cannot {action} job {job_id} while {status}")]
    InvalidTransition {
        job_id: String,
        status: JobStatus,
        action: &'static str,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_classes() {
        assert!(TransportError::Connection("reset".into()).is_retryable());
        assert!(
            TransportError::Rejected {
                reason: RejectReason::RateLimited,
                message: "slow down".into(),
            }
            .is_retryable()
        );
        assert!(
            !TransportError::Rejected {
                reason: RejectReason::InvalidPath,
                message: "escapes root".into(),
            }
            .is_retryable()
        );
        assert!(!TransportError::Aborted.is_retryable());
    }

    #[test]
    fn failure_from_rejection_keeps_server_message() {
        let err = TransportError::from(ErrorResponse::new(
            RejectReason::ChunkTooLarge,
            "chunk of 20 bytes exceeds 10",
        ));
        let failure = JobFailure::from(&err);
        assert_eq!(failure.reason, "chunk_too_large");
        assert_eq!(failure.message, "chunk of 20 bytes exceeds 10");
    }

    #[test]
    fn failure_from_connection_error() {
        let failure = JobFailure::from(&TransportError::Connection("reset by peer".into()));
        assert_eq!(failure.reason, "connection_failed");
        assert!(failure.message.contains("reset by peer"));
    }
}
