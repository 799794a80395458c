//! Client-side driver that pushes one file through the chunk protocol.

use bytes::Bytes;
use futures::stream::{FuturesUnordered, StreamExt};
use std::io::SeekFrom;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncSeekExt};

use super::transport::{CompleteReply, UploadTransport};
use super::ClientError;
use crate::chunks::ChunkGeometry;
use crate::hash::sha1_hex;
use crate::models::CompleteResponse;

/// delay between attempts at the same chunk
pub const CHUNK_RETRY_DELAY: Duration = Duration::from_millis(500);
/// completion is polled this many times before giving up
pub const COMPLETE_ATTEMPTS: u32 = 20;
pub const COMPLETE_RETRY_DELAY: Duration = Duration::from_secs(1);

/// How a chunk upload is retried. `max_attempts: None` keeps trying until the
/// server takes the chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub delay: Duration,
    pub max_attempts: Option<u32>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            delay: CHUNK_RETRY_DELAY,
            max_attempts: None,
        }
    }
}

impl RetryPolicy {
    fn exhausted(&self, attempts: u32) -> bool {
        self.max_attempts.is_some_and(|max| attempts >= max)
    }
}

/// how often and how patiently `complete` is polled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompletionPolicy {
    pub attempts: u32,
    pub delay: Duration,
}

impl Default for CompletionPolicy {
    fn default() -> Self {
        Self {
            attempts: COMPLETE_ATTEMPTS,
            delay: COMPLETE_RETRY_DELAY,
        }
    }
}

/// where chunk bytes are read from
#[derive(Debug, Clone)]
pub enum ChunkSource {
    Memory(Bytes),
    File(PathBuf),
}

impl ChunkSource {
    pub async fn len(&self) -> std::io::Result<u64> {
        match self {
            ChunkSource::Memory(bytes) => Ok(bytes.len() as u64),
            ChunkSource::File(path) => Ok(tokio::fs::metadata(path).await?.len()),
        }
    }

    pub async fn is_empty(&self) -> std::io::Result<bool> {
        Ok(self.len().await? == 0)
    }

    pub async fn read(&self, offset: u64, len: u64) -> std::io::Result<Bytes> {
        match self {
            ChunkSource::Memory(bytes) => {
                let start = (offset as usize).min(bytes.len());
                let end = (start + len as usize).min(bytes.len());
                Ok(bytes.slice(start..end))
            }
            ChunkSource::File(path) => {
                let mut file = tokio::fs::File::open(path).await?;
                file.seek(SeekFrom::Start(offset)).await?;
                let mut buffer = vec![0u8; len as usize];
                file.read_exact(&mut buffer).await?;
                Ok(Bytes::from(buffer))
            }
        }
    }

    /// the whole content, for the single-request fallback
    pub async fn read_all(&self) -> std::io::Result<Bytes> {
        match self {
            ChunkSource::Memory(bytes) => Ok(bytes.clone()),
            ChunkSource::File(path) => Ok(Bytes::from(tokio::fs::read(path).await?)),
        }
    }
}

/// how the server settled the upload
#[derive(Debug, Clone, PartialEq)]
pub enum CompletionOutcome {
    Complete(CompleteResponse),
    /// still incomplete after the last attempt; the server marked it failed
    Failed {
        uploaded_chunks: Vec<usize>,
        total_chunks: usize,
    },
    /// sent as one multipart request
    Streamed(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct UploadReport {
    pub file_name: String,
    pub file_id: Option<String>,
    pub total_chunks: usize,
    /// already durable on the server, not re-sent
    pub skipped: usize,
    pub uploaded: usize,
    /// chunks that ran out of attempts
    pub failed: Vec<usize>,
    /// extra attempts across all chunks
    pub retries: u32,
    pub outcome: CompletionOutcome,
}

impl UploadReport {
    pub fn is_complete(&self) -> bool {
        matches!(
            self.outcome,
            CompletionOutcome::Complete(_) | CompletionOutcome::Streamed(_)
        )
    }
}

#[derive(Debug)]
enum ChunkFate {
    Skipped,
    Uploaded { attempts: u32 },
}

/// Keeps at most `max_parallel` chunk operations (status check plus upload
/// with retries) unresolved at once. A failing chunk never cancels the
/// others.
pub struct ChunkScheduler {
    transport: Arc<dyn UploadTransport>,
    max_parallel: usize,
    retry: RetryPolicy,
    completion: CompletionPolicy,
}

impl ChunkScheduler {
    pub fn new(transport: Arc<dyn UploadTransport>, max_parallel: usize) -> Self {
        Self {
            transport,
            max_parallel: max_parallel.max(1),
            retry: RetryPolicy::default(),
            completion: CompletionPolicy::default(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_completion(mut self, completion: CompletionPolicy) -> Self {
        self.completion = completion;
        self
    }

    pub fn max_parallel(&self) -> usize {
        self.max_parallel
    }

    /// Sends every chunk of `source` that the server doesn't already hold,
    /// then polls for completion.
    pub async fn run(
        &self,
        file_name: &str,
        file_id: &str,
        geometry: ChunkGeometry,
        source: &ChunkSource,
    ) -> Result<UploadReport, ClientError> {
        let total = geometry.total_chunks();
        tracing::debug!(
            "Uploading {} in {} chunk(s), {} at a time",
            file_name,
            total,
            self.max_parallel
        );

        let mut report = UploadReport {
            file_name: file_name.to_string(),
            file_id: Some(file_id.to_string()),
            total_chunks: total,
            skipped: 0,
            uploaded: 0,
            failed: Vec::new(),
            retries: 0,
            outcome: CompletionOutcome::Failed {
                uploaded_chunks: Vec::new(),
                total_chunks: total,
            },
        };

        let mut in_flight = FuturesUnordered::new();
        let mut next = 0;
        while next < total || !in_flight.is_empty() {
            while next < total && in_flight.len() < self.max_parallel {
                let index = next;
                in_flight.push(async move { (index, self.process_chunk(file_id, geometry, source, index).await) });
                next += 1;
            }

            let Some((index, result)) = in_flight.next().await else {
                break;
            };
            match result {
                Ok(ChunkFate::Skipped) => report.skipped += 1,
                Ok(ChunkFate::Uploaded { attempts }) => {
                    report.uploaded += 1;
                    report.retries += attempts.saturating_sub(1);
                }
                Err(e) => {
                    tracing::warn!("❌ Chunk {} of {} gave up: {}", index, file_name, e);
                    report.failed.push(index);
                }
            }
        }
        report.failed.sort_unstable();

        report.outcome = self.complete(file_id).await?;
        Ok(report)
    }

    async fn process_chunk(
        &self,
        file_id: &str,
        geometry: ChunkGeometry,
        source: &ChunkSource,
        index: usize,
    ) -> Result<ChunkFate, ClientError> {
        let range = geometry.range(index);
        let data = source.read(range.start, range.end - range.start).await?;
        let hash = sha1_hex(&data);

        match self
            .transport
            .status(file_id, index, geometry.chunk_size(), &hash)
            .await
        {
            Ok(status) if status.hash_matches => {
                tracing::trace!("Chunk {} already on server", index);
                return Ok(ChunkFate::Skipped);
            }
            Ok(_) => {}
            // can't tell, so send it
            Err(e) => tracing::debug!("Status check for chunk {} failed: {}", index, e),
        }

        let mut attempts = 0;
        loop {
            attempts += 1;
            match self
                .transport
                .upload_chunk(file_id, index, &hash, data.clone())
                .await
            {
                Ok(resp) if resp.hash_matches => return Ok(ChunkFate::Uploaded { attempts }),
                Ok(_) => tracing::debug!("Server rejected hash of chunk {} (attempt {})", index, attempts),
                Err(e) => tracing::debug!("Chunk {} attempt {} failed: {}", index, attempts, e),
            }
            if self.retry.exhausted(attempts) {
                return Err(ClientError::ChunkFailed { index, attempts });
            }
            tokio::time::sleep(self.retry.delay).await;
        }
    }

    /// Polls `complete`; the last attempt asks the server to mark the upload
    /// failed. Any answer other than "incomplete" ends the loop.
    async fn complete(&self, file_id: &str) -> Result<CompletionOutcome, ClientError> {
        let attempts = self.completion.attempts.max(1);
        for attempt in 1..=attempts {
            let last = attempt == attempts;
            match self.transport.complete(file_id, last).await? {
                CompleteReply::Complete(resp) => return Ok(CompletionOutcome::Complete(resp)),
                CompleteReply::Incomplete(incomplete) if last => {
                    return Ok(CompletionOutcome::Failed {
                        uploaded_chunks: incomplete.uploaded_chunks,
                        total_chunks: incomplete.total_chunks,
                    });
                }
                CompleteReply::Incomplete(incomplete) => {
                    tracing::debug!(
                        "Upload {} not complete yet ({}/{}), attempt {}/{}",
                        file_id,
                        incomplete.uploaded_chunks.len(),
                        incomplete.total_chunks,
                        attempt,
                        attempts
                    );
                }
            }
            tokio::time::sleep(self.completion.delay).await;
        }
        Err(ClientError::Protocol(format!("completion of {} never settled", file_id)))
    }
}
