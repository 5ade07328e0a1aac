use serde::{Deserialize, Serialize};

use crate::types::RejectReason;

// ---------------------------------------------------------------------------
// Requests
// ---------------------------------------------------------------------------

/// Metadata accompanying one chunk body.
///
/// The raw bytes travel beside this header (multipart field, binary frame);
/// they are never embedded in the JSON.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkUploadRequest {
    /// Identifies one upload session of one file. Parts from different
    /// sessions are never merged together.
    pub upload_id: String,
    /// Destination (folder + filename) relative to the caller's root.
    pub relative_path: String,
    pub chunk_index: u32,
    pub total_chunks: u32,
    /// Source file name, used to name the staged parts.
    pub original_name: String,
    /// SHA-256 hex digest of the chunk body (absent means no verification).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,
}

impl ChunkUploadRequest {
    /// Returns `true` if this chunk carries the highest index of its file.
    pub fn is_final(&self) -> bool {
        self.chunk_index.checked_add(1) == Some(self.total_chunks)
    }
}

// ---------------------------------------------------------------------------
// Responses
// ---------------------------------------------------------------------------

/// What the server did with an accepted chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AckStatus {
    /// The part was staged; more chunks are expected.
    Stored,
    /// All parts were present and the final file has been written.
    Assembled,
    /// The final chunk arrived but earlier parts are still outstanding.
    Pending,
}

/// Positive acknowledgement for a chunk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadAck {
    pub success: bool,
    pub message: String,
    pub status: AckStatus,
    /// Indices not yet staged (only reported with [`AckStatus::Pending`]).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub missing: Vec<u32>,
}

impl UploadAck {
    pub fn stored(index: u32, total: u32) -> Self {
        Self {
            success: true,
            message: format!("chunk {}/{} stored", index + 1, total),
            status: AckStatus::Stored,
            missing: Vec::new(),
        }
    }

    pub fn assembled(relative_path: &str) -> Self {
        Self {
            success: true,
            message: format!("{relative_path} assembled"),
            status: AckStatus::Assembled,
            missing: Vec::new(),
        }
    }

    pub fn pending(missing: Vec<u32>) -> Self {
        Self {
            success: true,
            message: format!("waiting for {} more chunk(s)", missing.len()),
            status: AckStatus::Pending,
            missing,
        }
    }
}

/// Structured rejection for a chunk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorResponse {
    pub success: bool,
    pub reason: RejectReason,
    pub message: String,
}

impl ErrorResponse {
    pub fn new(reason: RejectReason, message: impl Into<String>) -> Self {
        Self {
            success: false,
            reason,
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunk_request_field_names() {
        let req = ChunkUploadRequest {
            upload_id: "9f1c".into(),
            relative_path: "photos/cat.jpg".into(),
            chunk_index: 2,
            total_chunks: 3,
            original_name: "cat.jpg".into(),
            checksum: None,
        };
        let json = serde_json::to_string(&req).unwrap();
        assert!(json.contains("\"uploadId\":\"9f1c\""));
        assert!(json.contains("\"relativePath\":\"photos/cat.jpg\""));
        assert!(json.contains("\"chunkIndex\":2"));
        assert!(json.contains("\"totalChunks\":3"));
        assert!(json.contains("\"originalName\":\"cat.jpg\""));
        assert!(!json.contains("checksum"));
    }

    #[test]
    fn chunk_request_checksum_defaults_to_none() {
        let json = r#"{"uploadId":"u","relativePath":"a.bin","chunkIndex":0,"totalChunks":1,"originalName":"a.bin"}"#;
        let req: ChunkUploadRequest = serde_json::from_str(json).unwrap();
        assert_eq!(req.checksum, None);
        assert!(req.is_final());
    }

    #[test]
    fn is_final_only_for_last_index() {
        let mut req = ChunkUploadRequest {
            upload_id: "9f1c".into(),
            relative_path: "a.bin".into(),
            chunk_index: 0,
            total_chunks: 3,
            original_name: "a.bin".into(),
            checksum: None,
        };
        assert!(!req.is_final());
        req.chunk_index = 2;
        assert!(req.is_final());
        req.chunk_index = 5;
        assert!(!req.is_final());
    }

    #[test]
    fn ack_pending_lists_missing() {
        let ack = UploadAck::pending(vec![0, 1]);
        let json = serde_json::to_string(&ack).unwrap();
        assert!(json.contains("\"status\":\"pending\""));
        assert!(json.contains("\"missing\":[0,1]"));
        assert!(ack.success);
    }

    #[test]
    fn ack_stored_omits_missing() {
        let ack = UploadAck::stored(0, 3);
        assert_eq!(ack.message, "chunk 1/3 stored");
        let json = serde_json::to_string(&ack).unwrap();
        assert!(!json.contains("missing"));
    }

    #[test]
    fn error_response_shape() {
        let err = ErrorResponse::new(RejectReason::InvalidPath, "path escapes root");
        let json = serde_json::to_value(&err).unwrap();
        assert_eq!(json["success"], false);
        assert_eq!(json["reason"], "invalid_path");
        assert_eq!(json["message"], "path escapes root");
    }
}
