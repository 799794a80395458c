use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

/// Everything the upload protocol handlers can answer with besides success.
#[derive(Debug, Error)]
pub enum UploadError {
    #[error("{0}")]
    InvalidRequest(String),

    #[error("Invalid or unknown fileId")]
    UnknownSession(String),

    #[error("Invalid chunk index")]
    InvalidIndex { index: String, total_chunks: usize },

    #[error("Invalid chunk size")]
    InvalidChunkSize,

    #[error("Missing SHA-1 hash for chunk")]
    MissingHash,

    /// recoverable: the caller re-uploads the chunk
    #[error("Chunk hash mismatch")]
    HashMismatch {
        file_id: String,
        chunk_index: usize,
        expected: String,
        got: String,
    },

    #[error("File not found")]
    FileNotFound(String),

    #[error("File incomplete")]
    IncompleteUpload {
        uploaded_chunks: Vec<usize>,
        total_chunks: usize,
    },

    #[error("File exceeds the maximum size of {max} bytes")]
    FileTooLarge { size: u64, max: u64 },

    #[error("Chunk body exceeds {max} bytes")]
    ChunkTooLarge { max: usize },

    #[error("Internal write error")]
    Io(#[from] std::io::Error),
}

pub type UploadResult<T> = Result<T, UploadError>;

impl UploadError {
    pub fn status(&self) -> StatusCode {
        match self {
            UploadError::InvalidRequest(_)
            | UploadError::UnknownSession(_)
            | UploadError::InvalidIndex { .. }
            | UploadError::InvalidChunkSize
            | UploadError::MissingHash
            | UploadError::HashMismatch { .. }
            | UploadError::IncompleteUpload { .. } => StatusCode::BAD_REQUEST,
            UploadError::FileNotFound(_) => StatusCode::NOT_FOUND,
            UploadError::FileTooLarge { .. } | UploadError::ChunkTooLarge { .. } => {
                StatusCode::PAYLOAD_TOO_LARGE
            }
            UploadError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for UploadError {
    fn into_response(self) -> Response {
        let status = self.status();
        let msg = self.to_string();
        let body = match self {
            UploadError::HashMismatch {
                file_id,
                chunk_index,
                expected,
                got,
            } => json!({
                "msg": msg,
                "fileId": file_id,
                "chunkIndex": chunk_index,
                "hashMatches": false,
                "expected": expected,
                "got": got,
            }),
            UploadError::IncompleteUpload {
                uploaded_chunks,
                total_chunks,
            } => json!({
                "msg": msg,
                "uploadedChunks": uploaded_chunks,
                "totalChunks": total_chunks,
            }),
            UploadError::UnknownSession(file_id) => json!({ "msg": msg, "fileId": file_id }),
            UploadError::InvalidIndex { index, total_chunks } => json!({
                "msg": msg,
                "chunkIndex": index,
                "totalChunks": total_chunks,
            }),
            UploadError::FileNotFound(path) => json!({ "msg": msg, "path": path }),
            UploadError::FileTooLarge { size, max } => json!({
                "msg": msg,
                "fileSize": size,
                "maxFileSize": max,
            }),
            UploadError::Io(err) => {
                tracing::error!("Upload I/O failure: {}", err);
                json!({ "msg": msg, "error": err.to_string() })
            }
            _ => json!({ "msg": msg }),
        };
        (status, Json(body)).into_response()
    }
}
