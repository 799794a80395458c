//! Server-side record of one file upload.

use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::chunks::{ChunkGeometry, ChunkSet};
use crate::progress::{ProgressTracker, TransferSample};

/// upload lifecycle; `Complete` and `Failed` are terminal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UploadState {
    Initiated,
    Uploading,
    Finishing,
    Complete,
    Failed,
}

impl UploadState {
    pub fn is_terminal(self) -> bool {
        matches!(self, UploadState::Complete | UploadState::Failed)
    }
}

/// how the bytes reach the server
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UploadMode {
    Chunked,
    /// single multipart request, no chunk verification
    Streamed,
}

#[derive(Debug, Clone)]
pub struct UploadSession {
    pub id: String,
    pub file_name: String,
    geometry: ChunkGeometry,
    uploaded_chunks: ChunkSet,
    uploading_chunks: ChunkSet,
    verification_count: u64,
    /// on-disk length seen when the session was rehydrated; only reported
    /// while no chunk has been verified
    resumed_bytes: Option<u64>,
    /// bytes seen so far on a streamed upload
    streamed_bytes: u64,
    progress: ProgressTracker,
    state: UploadState,
    pub mode: UploadMode,
    pub saved_location: PathBuf,
    pub created_at: u64,
    pub completed_at: Option<u64>,
    /// serializes creation and resizing of the destination file
    file_guard: Arc<Mutex<()>>,
}

impl UploadSession {
    pub fn new(
        id: String,
        file_name: String,
        expected_bytes: u64,
        chunk_size: u64,
        saved_location: PathBuf,
        now_ms: u64,
    ) -> Self {
        let geometry = ChunkGeometry::new(expected_bytes, chunk_size);
        let total = geometry.total_chunks();
        Self {
            id,
            file_name,
            geometry,
            uploaded_chunks: ChunkSet::with_capacity(total),
            uploading_chunks: ChunkSet::with_capacity(total),
            verification_count: 0,
            resumed_bytes: None,
            streamed_bytes: 0,
            progress: ProgressTracker::default(),
            state: UploadState::Initiated,
            mode: UploadMode::Chunked,
            saved_location,
            created_at: now_ms,
            completed_at: None,
            file_guard: Arc::new(Mutex::new(())),
        }
    }

    /// Session for a file found on disk with no live record. Only its length
    /// is known; the chunk bitmap starts empty and is rebuilt by status checks.
    pub fn rehydrated(
        id: String,
        file_name: String,
        expected_bytes: u64,
        chunk_size: u64,
        saved_location: PathBuf,
        on_disk_bytes: u64,
        now_ms: u64,
    ) -> Self {
        let mut session = Self::new(id, file_name, expected_bytes, chunk_size, saved_location, now_ms);
        session.resumed_bytes = Some(on_disk_bytes.min(expected_bytes));
        session
    }

    /// Session for a multipart upload whose final size is unknown up front.
    pub fn streamed(id: String, file_name: String, estimated_bytes: u64, saved_location: PathBuf, now_ms: u64) -> Self {
        let mut session = Self::new(id, file_name, estimated_bytes, estimated_bytes, saved_location, now_ms);
        session.mode = UploadMode::Streamed;
        session.state = UploadState::Uploading;
        session
    }

    pub fn geometry(&self) -> ChunkGeometry {
        self.geometry
    }

    pub fn expected_bytes(&self) -> u64 {
        self.geometry.expected_bytes()
    }

    pub fn chunk_size(&self) -> u64 {
        self.geometry.chunk_size()
    }

    pub fn total_chunks(&self) -> usize {
        self.geometry.total_chunks()
    }

    pub fn uploaded_chunks(&self) -> &ChunkSet {
        &self.uploaded_chunks
    }

    pub fn uploading_chunks(&self) -> &ChunkSet {
        &self.uploading_chunks
    }

    pub fn verification_count(&self) -> u64 {
        self.verification_count
    }

    pub fn state(&self) -> UploadState {
        self.state
    }

    pub fn file_guard(&self) -> Arc<Mutex<()>> {
        self.file_guard.clone()
    }

    pub fn progress(&self) -> &ProgressTracker {
        &self.progress
    }

    /// Derived from the verified chunk set; never stored.
    pub fn bytes_received(&self) -> u64 {
        if self.mode == UploadMode::Streamed {
            return self.streamed_bytes;
        }
        match self.resumed_bytes {
            Some(hint) if self.uploaded_chunks.is_empty() => hint,
            _ => self.geometry.bytes_covered(&self.uploaded_chunks),
        }
    }

    /// a streamed session only counts once its body has settled
    pub fn all_chunks_uploaded(&self) -> bool {
        self.total_chunks() > 0 && self.uploaded_chunks.is_full()
    }

    pub fn is_streaming(&self) -> bool {
        self.mode == UploadMode::Streamed && !self.state.is_terminal()
    }

    /// Marks a chunk durable. Returns false for duplicates and out-of-range
    /// indices.
    pub fn add_uploaded_chunk(&mut self, index: usize) -> bool {
        self.uploading_chunks.remove(index);
        self.uploaded_chunks.insert(index)
    }

    pub fn mark_uploading(&mut self, index: usize) {
        if !self.uploaded_chunks.contains(index) {
            self.uploading_chunks.insert(index);
        }
    }

    pub fn record_verification(&mut self) {
        self.verification_count += 1;
    }

    /// per-call advisory state cleared on every init
    pub fn reset_advisory(&mut self) {
        self.verification_count = 0;
        self.uploading_chunks.clear();
    }

    pub fn record_sample(&mut self, now_ms: u64) -> bool {
        let bytes = self.bytes_received();
        self.progress.record(bytes, now_ms)
    }

    pub fn transfer_rate(&self) -> f64 {
        self.progress.rate()
    }

    pub fn windowed_samples(&self) -> Vec<TransferSample> {
        self.progress.windowed()
    }

    /// INITIATED/FINISHING -> UPLOADING; terminal states are left alone
    pub fn begin_uploading(&mut self) -> bool {
        self.transition(UploadState::Uploading)
    }

    pub fn begin_finishing(&mut self) -> bool {
        self.transition(UploadState::Finishing)
    }

    /// FINISHING -> COMPLETE, only when every chunk is present
    pub fn complete(&mut self, now_ms: u64) -> bool {
        if self.state != UploadState::Finishing || !self.all_chunks_uploaded() {
            return false;
        }
        self.state = UploadState::Complete;
        self.completed_at = Some(now_ms);
        true
    }

    /// FINISHING -> FAILED, only while chunks are still missing
    pub fn fail(&mut self) -> bool {
        if self.state != UploadState::Finishing || self.all_chunks_uploaded() {
            return false;
        }
        self.state = UploadState::Failed;
        true
    }

    fn transition(&mut self, to: UploadState) -> bool {
        if self.state.is_terminal() {
            tracing::trace!("Session {} is {:?}; ignoring move to {:?}", self.id, self.state, to);
            return false;
        }
        self.state = to;
        true
    }

    pub fn record_streamed(&mut self, bytes: u64, now_ms: u64) {
        self.streamed_bytes = bytes;
        self.progress.record(bytes, now_ms);
    }

    /// Settles a streamed upload once the body is on disk: the real size
    /// replaces the estimate and the file counts as one verified chunk.
    pub fn settle_streamed(&mut self, actual_bytes: u64, saved_location: PathBuf, now_ms: u64) {
        self.geometry = ChunkGeometry::new(actual_bytes, actual_bytes);
        let total = self.geometry.total_chunks();
        self.uploaded_chunks = ChunkSet::with_capacity(total);
        self.uploading_chunks = ChunkSet::with_capacity(total);
        self.uploaded_chunks.insert(0);
        self.streamed_bytes = actual_bytes;
        self.saved_location = saved_location;
        self.state = UploadState::Complete;
        self.completed_at = Some(now_ms);
        self.progress.record(actual_bytes, now_ms);
    }

    pub fn fail_streamed(&mut self) {
        if !self.state.is_terminal() {
            self.state = UploadState::Failed;
        }
    }
}
