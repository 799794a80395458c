use axum::{
    body::Bytes,
    extract::{multipart::Field, FromRequest, Multipart, Query, Request, State},
    http::{header, StatusCode},
    response::Json,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

use crate::chunks::ChunkGeometry;
use crate::error::{UploadError, UploadResult};
use crate::hash::{hashes_match, sha1_hex};
use crate::models::{
    ChunkQuery, ChunkResponse, CompleteQuery, CompleteResponse, InitQuery, InitRequest,
    InitResponse, ServerConfigView, SessionSnapshot, StatusQuery, StatusResponse, UploadResponse,
};
use crate::session::{UploadSession, UploadState};
use crate::state::AppState;
use crate::utils::{now_millis, pretty_bytes, sanitize_filename};
use crate::writer::{read_range, ChunkWriter};

// start or resume an upload session
pub async fn init_upload(
    State(state): State<Arc<AppState>>,
    Query(query): Query<InitQuery>,
    body: Option<Json<InitRequest>>,
) -> UploadResult<Json<InitResponse>> {
    let body = body.map(|Json(b)| b).unwrap_or_default();

    // json body first, query string as fallback
    let raw_name = body
        .file_name
        .or(query.file_name)
        .filter(|n| !n.trim().is_empty())
        .ok_or_else(|| UploadError::InvalidRequest("Missing fileName".to_string()))?;
    let size = body
        .file_size
        .as_ref()
        .and_then(parse_size_value)
        .or_else(|| query.file_size.as_deref().and_then(|s| s.trim().parse::<u64>().ok()))
        .filter(|s| *s > 0)
        .ok_or_else(|| UploadError::InvalidRequest("Missing or invalid fileSize".to_string()))?;

    tracing::debug!("Init request for {} ({} bytes)", raw_name, size);

    if size > state.config.max_file_size {
        tracing::warn!("Rejecting {}: {} exceeds the {} byte limit", raw_name, size, state.config.max_file_size);
        return Err(UploadError::FileTooLarge {
            size,
            max: state.config.max_file_size,
        });
    }

    let file_name = sanitize_filename(&raw_name);
    if file_name.is_empty() {
        tracing::warn!("File name {:?} is empty after sanitizing", raw_name);
        return Err(UploadError::InvalidRequest("Invalid fileName".to_string()));
    }
    tracing::trace!("Sanitized filename: {} -> {}", raw_name, file_name);

    let saved_location = upload_root(&state).await?.join(&file_name);
    let chunk_size = state.config.upload_chunk_size;
    let now = now_millis();

    // two inits for the same new name must land on one session
    let _init = state.init_lock.lock().await;
    let placeholder = fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(&saved_location)
        .await;

    let file_id = match placeholder {
        Ok(_) => {
            let id = Uuid::new_v4().to_string();
            state.store.insert(UploadSession::new(
                id.clone(),
                file_name.clone(),
                size,
                chunk_size,
                saved_location.clone(),
                now,
            ));
            tracing::info!("📤 Initialized upload: {} (ID: {})", file_name, id);
            id
        }
        Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
            match state.store.find_resumable(&file_name, size) {
                Some(id) => {
                    tracing::info!("🔁 Resuming session {} for {}", id, file_name);
                    id
                }
                None => {
                    // on-disk bytes are only a hint until each chunk is re-verified
                    let on_disk = fs::metadata(&saved_location).await?.len();
                    let id = Uuid::new_v4().to_string();
                    tracing::info!(
                        "♻️  Rehydrating {} from {} on disk (ID: {})",
                        file_name,
                        pretty_bytes(on_disk),
                        id
                    );
                    state.store.insert(UploadSession::rehydrated(
                        id.clone(),
                        file_name.clone(),
                        size,
                        chunk_size,
                        saved_location.clone(),
                        on_disk,
                        now,
                    ));
                    id
                }
            }
        }
        Err(e) => return Err(e.into()),
    };

    let (chunk_size, total_chunks, bytes_received) = state
        .store
        .modify(&file_id, |s| {
            s.reset_advisory();
            (s.chunk_size(), s.total_chunks(), s.bytes_received())
        })
        .ok_or_else(|| UploadError::UnknownSession(file_id.clone()))?;

    state.broadcaster.notify();

    Ok(Json(InitResponse {
        file_id,
        chunk_size,
        total_chunks,
        max_parallel: state.config.max_parallel_chunk_uploads,
        bytes_received,
    }))
}

// receive one chunk, write it in place and verify what landed on disk
pub async fn upload_chunk(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ChunkQuery>,
    request: Request,
) -> UploadResult<Json<ChunkResponse>> {
    let file_id = required(query.file_id, "fileId")?;
    let session = state
        .store
        .get(&file_id)
        .ok_or_else(|| UploadError::UnknownSession(file_id.clone()))?;
    let geometry = session.geometry();
    let index = parse_index(query.chunk_index.as_deref(), &geometry)?;
    let claimed = query
        .hash
        .filter(|h| !h.trim().is_empty())
        .ok_or(UploadError::MissingHash)?;

    let data = read_chunk_body(request, state.config.max_chunk_body()).await?;
    let expected_len = geometry.chunk_len(index);
    if data.len() as u64 != expected_len {
        tracing::warn!(
            "Chunk {} of {} is {} bytes, expected {}",
            index,
            file_id,
            data.len(),
            expected_len
        );
        return Err(UploadError::InvalidRequest(format!(
            "Chunk body is {} bytes, expected {}",
            data.len(),
            expected_len
        )));
    }

    state.store.modify(&file_id, |s| s.mark_uploading(index));
    state.broadcaster.notify();

    let writer = ChunkWriter::new(
        session.saved_location.clone(),
        geometry.expected_bytes(),
        session.file_guard(),
    );
    let outcome = writer.write_chunk(geometry.offset(index), &data).await?;

    if !hashes_match(&outcome.computed_hash, &claimed) {
        tracing::warn!(
            "❌ Hash mismatch on chunk {} of {}: expected {}, got {}",
            index,
            file_id,
            claimed,
            outcome.computed_hash
        );
        state.broadcaster.notify();
        return Err(UploadError::HashMismatch {
            file_id,
            chunk_index: index,
            expected: claimed,
            got: outcome.computed_hash,
        });
    }

    let now = now_millis();
    let (bytes_received, uploaded_chunks) = state
        .store
        .modify(&file_id, |s| {
            s.add_uploaded_chunk(index);
            s.record_sample(now);
            (s.bytes_received(), s.uploaded_chunks().to_vec())
        })
        .ok_or_else(|| UploadError::UnknownSession(file_id.clone()))?;
    state.broadcaster.notify();

    tracing::debug!(
        "📦 Chunk {}/{} of {} verified ({} bytes)",
        index + 1,
        geometry.total_chunks(),
        session.file_name,
        outcome.bytes_written
    );

    Ok(Json(ChunkResponse {
        msg: "Chunk uploaded".to_string(),
        file_id,
        chunk_index: index,
        hash_matches: true,
        bytes_received,
        bytes_expected: geometry.expected_bytes(),
        uploaded_chunks,
    }))
}

// check whether a chunk is already durable on disk
pub async fn upload_status(
    State(state): State<Arc<AppState>>,
    Query(query): Query<StatusQuery>,
) -> UploadResult<Json<StatusResponse>> {
    let file_id = required(query.file_id, "fileId")?;
    let raw_index = required(query.chunk_index, "chunkIndex")?;
    let raw_chunk_size = required(query.chunk_size, "chunkSize")?;
    let claimed = required(query.hash, "hash")?;

    let session = state
        .store
        .get(&file_id)
        .ok_or_else(|| UploadError::UnknownSession(file_id.clone()))?;
    let geometry = session.geometry();

    let chunk_size = raw_chunk_size
        .trim()
        .parse::<u64>()
        .ok()
        .filter(|c| *c > 0)
        .ok_or(UploadError::InvalidChunkSize)?;
    if chunk_size != geometry.chunk_size() {
        tracing::warn!(
            "Status for {} asked with chunk size {}, session uses {}",
            file_id,
            chunk_size,
            geometry.chunk_size()
        );
        return Err(UploadError::InvalidChunkSize);
    }
    let index = parse_index(Some(&raw_index), &geometry)?;

    let range = geometry.range(index);
    let on_disk = match read_range(&session.saved_location, range.start, range.end - range.start).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::warn!("Destination for {} is gone: {:?}", file_id, session.saved_location);
            return Err(UploadError::FileNotFound(
                session.saved_location.to_string_lossy().to_string(),
            ));
        }
        Err(e) => return Err(e.into()),
    };

    // past EOF counts as not written
    let hash_matches = on_disk
        .map(|bytes| hashes_match(&sha1_hex(&bytes), &claimed))
        .unwrap_or(false);

    let bytes_received = state
        .store
        .modify(&file_id, |s| {
            s.record_verification();
            s.begin_uploading();
            if hash_matches {
                s.add_uploaded_chunk(index);
            } else {
                s.mark_uploading(index);
            }
            s.bytes_received()
        })
        .ok_or_else(|| UploadError::UnknownSession(file_id.clone()))?;
    state.broadcaster.notify();

    tracing::trace!("Status of chunk {} for {}: match={}", index, file_id, hash_matches);

    Ok(Json(StatusResponse {
        file_id,
        chunk_index: index,
        hash_matches,
        bytes_received,
        bytes_expected: geometry.expected_bytes(),
    }))
}

enum Completion {
    Done(CompleteResponse),
    Streaming,
    Incomplete {
        uploaded_chunks: Vec<usize>,
        total_chunks: usize,
        failed: bool,
    },
}

// finalize an upload once every chunk is verified
pub async fn complete_upload(
    State(state): State<Arc<AppState>>,
    Query(query): Query<CompleteQuery>,
) -> UploadResult<Json<CompleteResponse>> {
    let file_id = required(query.file_id, "fileId")?;
    let mark_failed = query
        .mark_upload_failed
        .as_deref()
        .map(|v| matches!(v.trim().to_ascii_lowercase().as_str(), "true" | "1" | "yes"))
        .unwrap_or(false);
    let now = now_millis();

    let completion = state
        .store
        .modify(&file_id, |s| {
            // multipart bodies settle themselves when the stream ends
            if s.is_streaming() {
                return Completion::Streaming;
            }
            s.begin_finishing();
            let done = s.state() == UploadState::Complete || s.complete(now);
            if done {
                return Completion::Done(CompleteResponse {
                    msg: "File upload complete".to_string(),
                    file_name: s.file_name.clone(),
                    saved_location: s.saved_location.to_string_lossy().to_string(),
                    bytes_received: s.bytes_received(),
                    total_chunks: s.total_chunks(),
                    chunk_size: s.chunk_size(),
                });
            }
            if mark_failed {
                s.fail();
            }
            Completion::Incomplete {
                uploaded_chunks: s.uploaded_chunks().to_vec(),
                total_chunks: s.total_chunks(),
                failed: s.state() == UploadState::Failed,
            }
        })
        .ok_or_else(|| UploadError::UnknownSession(file_id.clone()))?;
    state.broadcaster.notify();

    match completion {
        Completion::Streaming => {
            tracing::warn!("Refusing to complete {} while its multipart body is still streaming", file_id);
            Err(UploadError::InvalidRequest("Upload is still streaming".to_string()))
        }
        Completion::Done(response) => {
            tracing::info!(
                "✅ Completed upload: {} ({})",
                response.file_name,
                pretty_bytes(response.bytes_received)
            );
            Ok(Json(response))
        }
        Completion::Incomplete {
            uploaded_chunks,
            total_chunks,
            failed,
        } => {
            if failed {
                tracing::warn!(
                    "❌ Upload {} failed with {}/{} chunks",
                    file_id,
                    uploaded_chunks.len(),
                    total_chunks
                );
            } else {
                tracing::debug!(
                    "Upload {} incomplete: {}/{} chunks",
                    file_id,
                    uploaded_chunks.len(),
                    total_chunks
                );
            }
            Err(UploadError::IncompleteUpload {
                uploaded_chunks,
                total_chunks,
            })
        }
    }
}

// upload whole files via multipart form data, for clients without chunking
pub async fn upload_file(
    State(state): State<Arc<AppState>>,
    mut multipart: Multipart,
) -> UploadResult<Json<UploadResponse>> {
    tracing::debug!("Processing multipart upload request");
    let root = upload_root(&state).await?;
    let mut saved = Vec::new();

    while let Some(mut field) = multipart.next_field().await.map_err(|e| {
        tracing::error!("Failed to read multipart field: {}", e);
        UploadError::InvalidRequest(format!("Failed to read multipart field: {}", e))
    })? {
        // plain form fields carry no file
        let Some(raw_name) = field.file_name().map(str::to_string) else {
            continue;
        };
        let file_name = sanitize_filename(&raw_name);
        if file_name.is_empty() {
            tracing::warn!("Multipart file name {:?} is empty after sanitizing", raw_name);
            return Err(UploadError::InvalidRequest("Invalid file name".to_string()));
        }

        let id = Uuid::new_v4().to_string();
        // sanitized names never start with a dot, so this can't clash
        let temp_path = root.join(format!(".{}.part", id));
        let final_path = root.join(&file_name);
        state.store.insert(UploadSession::streamed(
            id.clone(),
            file_name.clone(),
            0,
            final_path.clone(),
            now_millis(),
        ));
        state.broadcaster.notify();
        tracing::debug!("Receiving file: {} (ID: {})", file_name, id);

        let size = match stream_field(&state, &id, &mut field, &temp_path).await {
            Ok(size) => size,
            Err(e) => {
                let _ = fs::remove_file(&temp_path).await;
                state.store.modify(&id, |s| s.fail_streamed());
                state.broadcaster.notify();
                tracing::warn!("❌ Multipart upload of {} failed: {}", file_name, e);
                return Err(e);
            }
        };

        fs::rename(&temp_path, &final_path).await?;
        let now = now_millis();
        state
            .store
            .modify(&id, |s| s.settle_streamed(size, final_path.clone(), now));
        state.broadcaster.notify();

        tracing::info!("✅ Uploaded file: {} ({})", file_name, pretty_bytes(size));
        saved.push(file_name);
    }

    if saved.is_empty() {
        tracing::warn!("Upload request contained no file field");
        return Err(UploadError::InvalidRequest("No file provided".to_string()));
    }

    Ok(Json(UploadResponse {
        msg: format!("Uploaded {} file(s): {}", saved.len(), saved.join(", ")),
    }))
}

// copy one multipart field to disk, recording progress as bytes arrive
async fn stream_field(
    state: &AppState,
    id: &str,
    field: &mut Field<'_>,
    temp_path: &Path,
) -> UploadResult<u64> {
    let mut file = fs::File::create(temp_path).await?;
    let mut received: u64 = 0;

    while let Some(chunk) = field.chunk().await.map_err(|e| {
        tracing::error!("Failed to read file data: {}", e);
        UploadError::InvalidRequest(format!("Failed to read file data: {}", e))
    })? {
        received += chunk.len() as u64;
        if received > state.config.max_file_size {
            return Err(UploadError::FileTooLarge {
                size: received,
                max: state.config.max_file_size,
            });
        }
        file.write_all(&chunk).await?;
        let now = now_millis();
        state.store.modify(id, |s| s.record_streamed(received, now));
        state.broadcaster.notify();
    }

    file.flush().await?;
    file.sync_all().await?;
    Ok(received)
}

// read-only view of the server configuration
pub async fn get_config(State(state): State<Arc<AppState>>) -> Json<ServerConfigView> {
    Json(state.config.view())
}

// snapshot of every session, same shape as the pushed events
pub async fn list_progresses(State(state): State<Arc<AppState>>) -> Json<Vec<SessionSnapshot>> {
    let sessions = state.store.list();
    tracing::trace!("Listing {} session(s)", sessions.len());
    Json(sessions.iter().map(SessionSnapshot::from).collect())
}

// health check endpoint
pub async fn health_check(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "service": "chunkferry",
        "sessions": state.store.len(),
        "timestamp": chrono::Utc::now().to_rfc3339(),
    }))
}

/// canonical upload directory, created on first use
async fn upload_root(state: &AppState) -> UploadResult<PathBuf> {
    let dir = state.upload_dir();
    fs::create_dir_all(dir).await?;
    Ok(fs::canonicalize(dir).await.unwrap_or_else(|_| dir.clone()))
}

fn required(value: Option<String>, name: &str) -> UploadResult<String> {
    value
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| UploadError::InvalidRequest(format!("Missing {}", name)))
}

fn parse_index(raw: Option<&str>, geometry: &ChunkGeometry) -> UploadResult<usize> {
    let raw = raw.unwrap_or_default();
    raw.trim()
        .parse::<usize>()
        .ok()
        .filter(|i| geometry.contains(*i))
        .ok_or_else(|| UploadError::InvalidIndex {
            index: raw.to_string(),
            total_chunks: geometry.total_chunks(),
        })
}

// numbers and numeric strings are both accepted
fn parse_size_value(value: &serde_json::Value) -> Option<u64> {
    match value {
        serde_json::Value::Number(n) => n.as_u64(),
        serde_json::Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

// chunk bytes arrive as the raw body or as the first multipart field
async fn read_chunk_body(request: Request, limit: usize) -> UploadResult<Bytes> {
    let is_multipart = request
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.starts_with("multipart/form-data"))
        .unwrap_or(false);

    let body_error = |status: StatusCode, context: &str, e: &dyn std::fmt::Display| {
        if status == StatusCode::PAYLOAD_TOO_LARGE {
            tracing::warn!("Chunk body over the {} byte limit", limit);
            UploadError::ChunkTooLarge { max: limit }
        } else {
            tracing::error!("{}: {}", context, e);
            UploadError::InvalidRequest(format!("{}: {}", context, e))
        }
    };

    if !is_multipart {
        return Bytes::from_request(request, &())
            .await
            .map_err(|e| body_error(e.status(), "Failed to read chunk body", &e));
    }

    let mut multipart = Multipart::from_request(request, &())
        .await
        .map_err(|e| body_error(e.status(), "Invalid multipart body", &e))?;
    let field = multipart
        .next_field()
        .await
        .map_err(|e| body_error(e.status(), "Failed to read chunk data", &e))?
        .ok_or_else(|| UploadError::InvalidRequest("No chunk data provided".to_string()))?;
    field
        .bytes()
        .await
        .map_err(|e| body_error(e.status(), "Failed to read chunk bytes", &e))
}
