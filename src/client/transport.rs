use async_trait::async_trait;
use bytes::Bytes;
use reqwest::multipart::{Form, Part};
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::Serialize;

use super::ClientError;
use crate::models::{
    ChunkResponse, CompleteResponse, IncompleteResponse, InitResponse, ServerConfigView,
    StatusResponse, UploadResponse,
};

/// answer to a completion attempt that isn't a hard error
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompleteReply {
    Complete(CompleteResponse),
    /// chunks are still missing, the caller may try again
    Incomplete(IncompleteResponse),
}

/// The protocol calls the chunk scheduler makes. Implemented over HTTP by
/// [`HttpTransport`]; tests plug in their own.
#[async_trait]
pub trait UploadTransport: Send + Sync {
    async fn config(&self) -> Result<ServerConfigView, ClientError>;

    async fn init(&self, file_name: &str, file_size: u64) -> Result<InitResponse, ClientError>;

    async fn status(
        &self,
        file_id: &str,
        chunk_index: usize,
        chunk_size: u64,
        hash: &str,
    ) -> Result<StatusResponse, ClientError>;

    async fn upload_chunk(
        &self,
        file_id: &str,
        chunk_index: usize,
        hash: &str,
        data: Bytes,
    ) -> Result<ChunkResponse, ClientError>;

    async fn complete(&self, file_id: &str, mark_failed: bool) -> Result<CompleteReply, ClientError>;

    /// single-request multipart upload for servers with chunking turned off
    async fn upload_whole(&self, file_name: &str, data: Bytes) -> Result<UploadResponse, ClientError>;
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct InitBody<'a> {
    file_name: &'a str,
    file_size: u64,
}

#[derive(Debug, Clone)]
pub struct HttpTransport {
    base_url: String,
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_client(base_url, reqwest::Client::new())
    }

    pub fn with_client(base_url: impl Into<String>, client: reqwest::Client) -> Self {
        let base_url: String = base_url.into();
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

/// decode a success body, or turn an error status into `ClientError::Rejected`
async fn decode<T: DeserializeOwned>(resp: reqwest::Response) -> Result<T, ClientError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp.json::<T>().await?);
    }
    Err(rejection(status, resp).await)
}

async fn rejection(status: StatusCode, resp: reqwest::Response) -> ClientError {
    let text = resp.text().await.unwrap_or_default();
    let msg = serde_json::from_str::<serde_json::Value>(&text)
        .ok()
        .and_then(|v| v.get("msg").and_then(|m| m.as_str()).map(str::to_string))
        .unwrap_or(text);
    ClientError::Rejected {
        status: status.as_u16(),
        msg,
    }
}

#[async_trait]
impl UploadTransport for HttpTransport {
    async fn config(&self) -> Result<ServerConfigView, ClientError> {
        let resp = self.client.get(self.url("/config")).send().await?;
        decode(resp).await
    }

    async fn init(&self, file_name: &str, file_size: u64) -> Result<InitResponse, ClientError> {
        let resp = self
            .client
            .post(self.url("/upload/init"))
            .json(&InitBody { file_name, file_size })
            .send()
            .await?;
        decode(resp).await
    }

    async fn status(
        &self,
        file_id: &str,
        chunk_index: usize,
        chunk_size: u64,
        hash: &str,
    ) -> Result<StatusResponse, ClientError> {
        let resp = self
            .client
            .get(self.url("/upload/status"))
            .query(&[
                ("fileId", file_id.to_string()),
                ("chunkIndex", chunk_index.to_string()),
                ("chunkSize", chunk_size.to_string()),
                ("hash", hash.to_string()),
            ])
            .send()
            .await?;
        decode(resp).await
    }

    async fn upload_chunk(
        &self,
        file_id: &str,
        chunk_index: usize,
        hash: &str,
        data: Bytes,
    ) -> Result<ChunkResponse, ClientError> {
        let resp = self
            .client
            .post(self.url("/upload/chunk"))
            .query(&[
                ("fileId", file_id.to_string()),
                ("chunkIndex", chunk_index.to_string()),
                ("hash", hash.to_string()),
            ])
            .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
            .body(data)
            .send()
            .await?;
        decode(resp).await
    }

    async fn complete(&self, file_id: &str, mark_failed: bool) -> Result<CompleteReply, ClientError> {
        let resp = self
            .client
            .post(self.url("/upload/complete"))
            .query(&[
                ("fileId", file_id.to_string()),
                ("markUploadFailed", mark_failed.to_string()),
            ])
            .send()
            .await?;

        let status = resp.status();
        if status.is_success() {
            return Ok(CompleteReply::Complete(resp.json().await?));
        }
        if status == StatusCode::BAD_REQUEST {
            let text = resp.text().await?;
            // only the incomplete body carries the chunk accounting
            return match serde_json::from_str::<IncompleteResponse>(&text) {
                Ok(incomplete) => Ok(CompleteReply::Incomplete(incomplete)),
                Err(_) => Err(ClientError::Rejected {
                    status: status.as_u16(),
                    msg: text,
                }),
            };
        }
        Err(rejection(status, resp).await)
    }

    async fn upload_whole(&self, file_name: &str, data: Bytes) -> Result<UploadResponse, ClientError> {
        let part = Part::bytes(data.to_vec()).file_name(file_name.to_string());
        let form = Form::new().part("file", part);
        let resp = self
            .client
            .post(self.url("/upload"))
            .multipart(form)
            .send()
            .await?;
        decode(resp).await
    }
}
