use serde::{Deserialize, Serialize};

use crate::chunks::ChunkSet;
use crate::progress::TransferSample;
use crate::session::{UploadMode, UploadSession, UploadState};

// init body; fileSize may arrive as a number or a numeric string
#[derive(Deserialize, Debug, Default)]
#[serde(rename_all = "camelCase")]
pub struct InitRequest {
    pub file_name: Option<String>,
    pub file_size: Option<serde_json::Value>,
}

// init query-string fallback
#[derive(Deserialize, Debug, Default)]
#[serde(rename_all = "camelCase")]
pub struct InitQuery {
    pub file_name: Option<String>,
    pub file_size: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct InitResponse {
    pub file_id: String,
    pub chunk_size: u64,
    pub total_chunks: usize,
    pub max_parallel: usize,
    pub bytes_received: u64,
}

// query parameters are kept as strings so bad values map onto our own errors
#[derive(Deserialize, Debug, Default)]
#[serde(rename_all = "camelCase")]
pub struct ChunkQuery {
    pub file_id: Option<String>,
    pub chunk_index: Option<String>,
    pub hash: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ChunkResponse {
    pub msg: String,
    pub file_id: String,
    pub chunk_index: usize,
    pub hash_matches: bool,
    pub bytes_received: u64,
    pub bytes_expected: u64,
    pub uploaded_chunks: Vec<usize>,
}

#[derive(Deserialize, Debug, Default)]
#[serde(rename_all = "camelCase")]
pub struct StatusQuery {
    pub file_id: Option<String>,
    pub chunk_index: Option<String>,
    pub chunk_size: Option<String>,
    pub hash: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct StatusResponse {
    pub file_id: String,
    pub chunk_index: usize,
    pub hash_matches: bool,
    pub bytes_received: u64,
    pub bytes_expected: u64,
}

#[derive(Deserialize, Debug, Default)]
#[serde(rename_all = "camelCase")]
pub struct CompleteQuery {
    pub file_id: Option<String>,
    pub mark_upload_failed: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CompleteResponse {
    pub msg: String,
    pub file_name: String,
    pub saved_location: String,
    pub bytes_received: u64,
    pub total_chunks: usize,
    pub chunk_size: u64,
}

// body of a 400 from complete while chunks are missing
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct IncompleteResponse {
    pub msg: String,
    pub uploaded_chunks: Vec<usize>,
    pub total_chunks: usize,
}

// response for the multipart fallback
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct UploadResponse {
    pub msg: String,
}

/// read-only view of the server configuration served at `/config`
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ServerConfigView {
    pub upload_chunk_size: u64,
    pub max_parallel_chunk_uploads: usize,
    pub max_parallel_file_uploads: usize,
    pub chunked_upload: bool,
    pub enable_compression: bool,
    pub max_file_size: u64,
    pub server_port: u16,
    pub version: String,
}

/// What observers see of a session.
///
/// Chunk sets go out as index lists and samples are cut to the rate window.
#[derive(Serialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub uuid: String,
    pub file_name: String,
    pub bytes_expected: u64,
    pub bytes_received: u64,
    pub chunk_size: u64,
    pub total_chunks: usize,
    pub uploaded_chunks: ChunkSet,
    pub uploading_chunks: ChunkSet,
    pub chunk_verification_count: u64,
    pub transfer_samples: Vec<TransferSample>,
    pub transfer_rate: f64,
    pub last_state: UploadState,
    pub mode: UploadMode,
    pub saved_location: String,
    pub timestamp: u64,
    pub completed: Option<u64>,
}

impl From<&UploadSession> for SessionSnapshot {
    fn from(session: &UploadSession) -> Self {
        Self {
            uuid: session.id.clone(),
            file_name: session.file_name.clone(),
            bytes_expected: session.expected_bytes(),
            bytes_received: session.bytes_received(),
            chunk_size: session.chunk_size(),
            total_chunks: session.total_chunks(),
            uploaded_chunks: session.uploaded_chunks().clone(),
            uploading_chunks: session.uploading_chunks().clone(),
            chunk_verification_count: session.verification_count(),
            transfer_samples: session.windowed_samples(),
            transfer_rate: session.transfer_rate(),
            last_state: session.state(),
            mode: session.mode,
            saved_location: session.saved_location.to_string_lossy().to_string(),
            timestamp: session.created_at,
            completed: session.completed_at,
        }
    }
}
