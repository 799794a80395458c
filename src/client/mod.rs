//! Upload client: protocol transport, chunk scheduler and a per-file driver.

pub mod scheduler;
pub mod transport;

use bytes::Bytes;
use futures::stream::{self, StreamExt};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

use crate::chunks::ChunkGeometry;
use crate::models::ServerConfigView;

pub use scheduler::{
    ChunkScheduler, ChunkSource, CompletionOutcome, CompletionPolicy, RetryPolicy, UploadReport,
};
pub use transport::{CompleteReply, HttpTransport, UploadTransport};

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("server answered {status}: {msg}")]
    Rejected { status: u16, msg: String },

    #[error("chunk {index} failed after {attempts} attempt(s)")]
    ChunkFailed { index: usize, attempts: u32 },

    #[error("protocol error: {0}")]
    Protocol(String),
}

/// Uploads whole files, picking chunked or multipart from the server config.
pub struct UploadClient {
    transport: Arc<dyn UploadTransport>,
    parallel_override: Option<usize>,
    retry: RetryPolicy,
    completion: CompletionPolicy,
}

impl UploadClient {
    pub fn new(transport: Arc<dyn UploadTransport>) -> Self {
        Self {
            transport,
            parallel_override: None,
            retry: RetryPolicy::default(),
            completion: CompletionPolicy::default(),
        }
    }

    /// cap chunk concurrency below what the server advertises
    pub fn with_parallel(mut self, max_parallel: usize) -> Self {
        self.parallel_override = Some(max_parallel.max(1));
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_completion(mut self, completion: CompletionPolicy) -> Self {
        self.completion = completion;
        self
    }

    pub async fn server_config(&self) -> Result<ServerConfigView, ClientError> {
        self.transport.config().await
    }

    pub async fn upload_path(&self, path: &Path) -> Result<UploadReport, ClientError> {
        let config = self.transport.config().await?;
        self.upload_with(&config, path).await
    }

    pub async fn upload_bytes(&self, file_name: &str, data: Bytes) -> Result<UploadReport, ClientError> {
        let config = self.transport.config().await?;
        self.upload_source(&config, file_name, ChunkSource::Memory(data)).await
    }

    /// Uploads several files, at most `maxParallelFileUploads` at a time.
    /// Results come back in input order.
    pub async fn upload_files(
        &self,
        paths: Vec<PathBuf>,
    ) -> Result<Vec<(PathBuf, Result<UploadReport, ClientError>)>, ClientError> {
        let config = self.transport.config().await?;
        let file_parallel = config.max_parallel_file_uploads.max(1);
        tracing::debug!("Uploading {} file(s), {} at a time", paths.len(), file_parallel);

        let config = &config;
        let results = stream::iter(paths)
            .map(|path| async move {
                let result = self.upload_with(config, &path).await;
                (path, result)
            })
            .buffered(file_parallel)
            .collect()
            .await;
        Ok(results)
    }

    async fn upload_with(&self, config: &ServerConfigView, path: &Path) -> Result<UploadReport, ClientError> {
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .ok_or_else(|| ClientError::Protocol(format!("{:?} has no file name", path)))?;
        self.upload_source(config, &file_name, ChunkSource::File(path.to_path_buf()))
            .await
    }

    async fn upload_source(
        &self,
        config: &ServerConfigView,
        file_name: &str,
        source: ChunkSource,
    ) -> Result<UploadReport, ClientError> {
        let size = source.len().await?;

        // empty files have no chunks, so they always go as one request
        if !config.chunked_upload || size == 0 {
            let data = source.read_all().await?;
            let resp = self.transport.upload_whole(file_name, data).await?;
            tracing::info!("📎 Sent {} in one request", file_name);
            return Ok(UploadReport {
                file_name: file_name.to_string(),
                file_id: None,
                total_chunks: 1,
                skipped: 0,
                uploaded: 1,
                failed: Vec::new(),
                retries: 0,
                outcome: CompletionOutcome::Streamed(resp.msg),
            });
        }

        let init = self.transport.init(file_name, size).await?;
        let geometry = ChunkGeometry::new(size, init.chunk_size);
        if geometry.total_chunks() != init.total_chunks {
            return Err(ClientError::Protocol(format!(
                "server counts {} chunks for {}, expected {}",
                init.total_chunks,
                file_name,
                geometry.total_chunks()
            )));
        }
        if init.bytes_received > 0 {
            tracing::info!(
                "🔁 Resuming {}: server reports {} of {} bytes",
                file_name,
                init.bytes_received,
                size
            );
        }

        let max_parallel = match self.parallel_override {
            Some(local) => local.min(init.max_parallel),
            None => init.max_parallel,
        };
        let scheduler = ChunkScheduler::new(self.transport.clone(), max_parallel)
            .with_retry(self.retry)
            .with_completion(self.completion);
        scheduler.run(file_name, &init.file_id, geometry, &source).await
    }
}
