use chunkferry::config::Config;
use chunkferry::error::{UploadError, UploadResult};
use chunkferry::handlers::{
    complete_upload, get_config, health_check, init_upload, list_progresses, upload_chunk,
    upload_status,
};
use chunkferry::hash::sha1_hex;
use chunkferry::models::{
    ChunkQuery, ChunkResponse, CompleteQuery, CompleteResponse, InitQuery, InitRequest,
    InitResponse, StatusQuery, StatusResponse,
};
use chunkferry::session::{UploadSession, UploadState};
use chunkferry::state::AppState;
use axum::body::Body;
use axum::extract::{Query, Request, State};
use axum::http::StatusCode;
use axum::Json;
use std::path::Path;
use std::sync::Arc;

const DATA: &[u8] = b"0123456789";

fn test_state(dir: &Path, chunk_size: u64) -> Arc<AppState> {
    let config = Config {
        upload_dir: dir.to_path_buf(),
        upload_chunk_size: chunk_size,
        max_file_size: 1024 * 1024,
        ..Config::default()
    };
    Arc::new(AppState::new(config))
}

async fn init(state: &Arc<AppState>, name: &str, size: u64) -> InitResponse {
    init_upload(
        State(state.clone()),
        Query(InitQuery::default()),
        Some(Json(InitRequest {
            file_name: Some(name.to_string()),
            file_size: Some(serde_json::json!(size)),
        })),
    )
    .await
    .unwrap()
    .0
}

async fn send_chunk(
    state: &Arc<AppState>,
    file_id: &str,
    index: usize,
    hash: &str,
    data: &[u8],
) -> UploadResult<Json<ChunkResponse>> {
    let query = ChunkQuery {
        file_id: Some(file_id.to_string()),
        chunk_index: Some(index.to_string()),
        hash: Some(hash.to_string()),
    };
    let request = Request::builder()
        .method("POST")
        .header("content-type", "application/octet-stream")
        .body(Body::from(data.to_vec()))
        .unwrap();
    upload_chunk(State(state.clone()), Query(query), request).await
}

async fn upload(state: &Arc<AppState>, file_id: &str, index: usize, chunk_size: usize) -> ChunkResponse {
    let start = index * chunk_size;
    let end = (start + chunk_size).min(DATA.len());
    let slice = &DATA[start..end];
    send_chunk(state, file_id, index, &sha1_hex(slice), slice)
        .await
        .unwrap()
        .0
}

async fn status(
    state: &Arc<AppState>,
    file_id: &str,
    index: usize,
    chunk_size: u64,
    hash: &str,
) -> UploadResult<Json<StatusResponse>> {
    let query = StatusQuery {
        file_id: Some(file_id.to_string()),
        chunk_index: Some(index.to_string()),
        chunk_size: Some(chunk_size.to_string()),
        hash: Some(hash.to_string()),
    };
    upload_status(State(state.clone()), Query(query)).await
}

fn slice_hash(index: usize, chunk_size: usize) -> String {
    let start = index * chunk_size;
    let end = (start + chunk_size).min(DATA.len());
    sha1_hex(&DATA[start..end])
}

async fn complete(state: &Arc<AppState>, file_id: &str, mark_failed: bool) -> UploadResult<Json<CompleteResponse>> {
    let query = CompleteQuery {
        file_id: Some(file_id.to_string()),
        mark_upload_failed: Some(mark_failed.to_string()),
    };
    complete_upload(State(state.clone()), Query(query)).await
}

#[tokio::test]
async fn test_health_check() {
    let temp_dir = tempfile::tempdir().unwrap();
    let state = test_state(temp_dir.path(), 4);
    let response = health_check(State(state)).await;
    assert_eq!(response.0["status"], "healthy");
    assert_eq!(response.0["sessions"], 0);
}

#[tokio::test]
async fn test_get_config() {
    let temp_dir = tempfile::tempdir().unwrap();
    let state = test_state(temp_dir.path(), 4);
    let view = get_config(State(state)).await.0;
    assert_eq!(view.upload_chunk_size, 4);
    assert_eq!(view.max_parallel_chunk_uploads, 10);
    assert!(view.chunked_upload);
}

#[tokio::test]
async fn test_init_creates_placeholder() {
    let temp_dir = tempfile::tempdir().unwrap();
    let state = test_state(temp_dir.path(), 4);

    let resp = init(&state, "data.bin", 10).await;
    assert_eq!(resp.chunk_size, 4);
    assert_eq!(resp.total_chunks, 3);
    assert_eq!(resp.max_parallel, 10);
    assert_eq!(resp.bytes_received, 0);

    let placeholder = temp_dir.path().join("data.bin");
    assert!(placeholder.exists());
    assert_eq!(std::fs::metadata(&placeholder).unwrap().len(), 0);

    let session = state.store.get(&resp.file_id).unwrap();
    assert_eq!(session.state(), UploadState::Initiated);
    assert_eq!(session.expected_bytes(), 10);
}

#[tokio::test]
async fn test_init_sanitizes_name() {
    let temp_dir = tempfile::tempdir().unwrap();
    let state = test_state(temp_dir.path(), 4);

    let resp = init(&state, "../../escape.bin", 10).await;
    let session = state.store.get(&resp.file_id).unwrap();
    assert_eq!(session.file_name, "escape.bin");
    assert!(temp_dir.path().join("escape.bin").exists());
}

#[tokio::test]
async fn test_init_query_fallback() {
    let temp_dir = tempfile::tempdir().unwrap();
    let state = test_state(temp_dir.path(), 4);

    let query = InitQuery {
        file_name: Some("q.bin".to_string()),
        file_size: Some("9".to_string()),
    };
    let resp = init_upload(State(state.clone()), Query(query), None).await.unwrap().0;
    assert_eq!(resp.total_chunks, 3);
}

#[tokio::test]
async fn test_init_rejects_bad_input() {
    let temp_dir = tempfile::tempdir().unwrap();
    let state = test_state(temp_dir.path(), 4);

    let missing_size = init_upload(
        State(state.clone()),
        Query(InitQuery::default()),
        Some(Json(InitRequest {
            file_name: Some("a.bin".to_string()),
            file_size: None,
        })),
    )
    .await;
    assert!(matches!(missing_size, Err(UploadError::InvalidRequest(_))));

    let zero = init_upload(
        State(state.clone()),
        Query(InitQuery::default()),
        Some(Json(InitRequest {
            file_name: Some("a.bin".to_string()),
            file_size: Some(serde_json::json!(0)),
        })),
    )
    .await;
    assert!(matches!(zero, Err(UploadError::InvalidRequest(_))));

    let not_numeric = init_upload(
        State(state.clone()),
        Query(InitQuery::default()),
        Some(Json(InitRequest {
            file_name: Some("a.bin".to_string()),
            file_size: Some(serde_json::json!("lots")),
        })),
    )
    .await;
    assert!(matches!(not_numeric, Err(UploadError::InvalidRequest(_))));

    let too_large = init_upload(
        State(state.clone()),
        Query(InitQuery::default()),
        Some(Json(InitRequest {
            file_name: Some("a.bin".to_string()),
            file_size: Some(serde_json::json!(2 * 1024 * 1024)),
        })),
    )
    .await;
    let err = too_large.err().unwrap();
    assert_eq!(err.status(), StatusCode::PAYLOAD_TOO_LARGE);

    let missing_name = init_upload(State(state.clone()), Query(InitQuery::default()), None).await;
    assert_eq!(missing_name.err().unwrap().status(), StatusCode::BAD_REQUEST);
    assert!(state.store.is_empty());
}

#[tokio::test]
async fn test_out_of_order_chunks_then_complete() {
    let temp_dir = tempfile::tempdir().unwrap();
    let state = test_state(temp_dir.path(), 4);
    let id = init(&state, "data.bin", 10).await.file_id;

    let last = upload(&state, &id, 2, 4).await;
    assert!(last.hash_matches);
    assert_eq!(last.bytes_received, 2);
    assert_eq!(last.uploaded_chunks, vec![2]);

    upload(&state, &id, 0, 4).await;
    let resp = upload(&state, &id, 1, 4).await;
    assert_eq!(resp.bytes_received, 10);
    assert_eq!(resp.bytes_expected, 10);
    assert_eq!(resp.uploaded_chunks, vec![0, 1, 2]);

    let done = complete(&state, &id, false).await.unwrap().0;
    assert_eq!(done.file_name, "data.bin");
    assert_eq!(done.bytes_received, 10);
    assert_eq!(done.total_chunks, 3);
    assert_eq!(done.chunk_size, 4);

    assert_eq!(std::fs::read(temp_dir.path().join("data.bin")).unwrap(), DATA);
    let session = state.store.get(&id).unwrap();
    assert_eq!(session.state(), UploadState::Complete);
    assert!(session.completed_at.is_some());
}

#[tokio::test]
async fn test_duplicate_chunk_is_idempotent() {
    let temp_dir = tempfile::tempdir().unwrap();
    let state = test_state(temp_dir.path(), 4);
    let id = init(&state, "data.bin", 10).await.file_id;

    upload(&state, &id, 0, 4).await;
    let again = upload(&state, &id, 0, 4).await;
    assert_eq!(again.uploaded_chunks, vec![0]);
    assert_eq!(again.bytes_received, 4);
}

#[tokio::test]
async fn test_hash_mismatch_leaves_chunk_unverified() {
    let temp_dir = tempfile::tempdir().unwrap();
    let state = test_state(temp_dir.path(), 4);
    let id = init(&state, "data.bin", 10).await.file_id;

    let wrong = sha1_hex(b"something else");
    let err = send_chunk(&state, &id, 0, &wrong, &DATA[0..4]).await.err().unwrap();
    assert_eq!(err.status(), StatusCode::BAD_REQUEST);
    match err {
        UploadError::HashMismatch {
            chunk_index,
            expected,
            got,
            ..
        } => {
            assert_eq!(chunk_index, 0);
            assert_eq!(expected, wrong);
            assert_eq!(got, sha1_hex(&DATA[0..4]));
        }
        other => panic!("unexpected error {other:?}"),
    }

    let session = state.store.get(&id).unwrap();
    assert!(session.uploaded_chunks().is_empty());
    assert_eq!(session.uploading_chunks().to_vec(), vec![0]);
    assert_eq!(session.bytes_received(), 0);
}

#[tokio::test]
async fn test_hash_comparison_ignores_case() {
    let temp_dir = tempfile::tempdir().unwrap();
    let state = test_state(temp_dir.path(), 4);
    let id = init(&state, "data.bin", 10).await.file_id;

    let upper = sha1_hex(&DATA[0..4]).to_uppercase();
    let resp = send_chunk(&state, &id, 0, &upper, &DATA[0..4]).await.unwrap().0;
    assert!(resp.hash_matches);
}

#[tokio::test]
async fn test_chunk_request_validation() {
    let temp_dir = tempfile::tempdir().unwrap();
    let state = test_state(temp_dir.path(), 4);
    let id = init(&state, "data.bin", 10).await.file_id;
    let hash = slice_hash(0, 4);

    let unknown = send_chunk(&state, "nope", 0, &hash, &DATA[0..4]).await;
    assert!(matches!(unknown, Err(UploadError::UnknownSession(_))));

    let out_of_range = send_chunk(&state, &id, 3, &hash, &DATA[0..4]).await;
    assert!(matches!(out_of_range, Err(UploadError::InvalidIndex { total_chunks: 3, .. })));

    let no_hash = send_chunk(&state, &id, 0, "", &DATA[0..4]).await;
    assert!(matches!(no_hash, Err(UploadError::MissingHash)));

    // a body longer than its range would spill into the next chunk
    let spill = send_chunk(&state, &id, 0, &sha1_hex(&DATA[0..6]), &DATA[0..6]).await;
    assert!(matches!(spill, Err(UploadError::InvalidRequest(_))));
    assert!(state.store.get(&id).unwrap().uploaded_chunks().is_empty());
}

#[tokio::test]
async fn test_status_verifies_on_disk_bytes() {
    let temp_dir = tempfile::tempdir().unwrap();
    let state = test_state(temp_dir.path(), 4);
    let id = init(&state, "data.bin", 10).await.file_id;

    // placeholder is empty, so every range is past EOF
    let before = status(&state, &id, 1, 4, &slice_hash(1, 4)).await.unwrap().0;
    assert!(!before.hash_matches);
    assert_eq!(before.bytes_expected, 10);

    upload(&state, &id, 1, 4).await;
    let after = status(&state, &id, 1, 4, &slice_hash(1, 4)).await.unwrap().0;
    assert!(after.hash_matches);
    assert_eq!(after.bytes_received, 4);

    // chunk 0 is zero-filled, not the client's bytes
    let hole = status(&state, &id, 0, 4, &slice_hash(0, 4)).await.unwrap().0;
    assert!(!hole.hash_matches);

    let session = state.store.get(&id).unwrap();
    assert_eq!(session.verification_count(), 3);
    assert_eq!(session.state(), UploadState::Uploading);
    assert_eq!(session.uploading_chunks().to_vec(), vec![0]);
    assert_eq!(session.uploaded_chunks().to_vec(), vec![1]);
}

#[tokio::test]
async fn test_status_validation() {
    let temp_dir = tempfile::tempdir().unwrap();
    let state = test_state(temp_dir.path(), 4);
    let id = init(&state, "data.bin", 10).await.file_id;
    let hash = slice_hash(0, 4);

    assert!(matches!(
        status(&state, "nope", 0, 4, &hash).await,
        Err(UploadError::UnknownSession(_))
    ));
    assert!(matches!(
        status(&state, &id, 0, 0, &hash).await,
        Err(UploadError::InvalidChunkSize)
    ));
    assert!(matches!(
        status(&state, &id, 0, 8, &hash).await,
        Err(UploadError::InvalidChunkSize)
    ));
    assert!(matches!(
        status(&state, &id, 7, 4, &hash).await,
        Err(UploadError::InvalidIndex { .. })
    ));

    let missing_hash = upload_status(
        State(state.clone()),
        Query(StatusQuery {
            file_id: Some(id.clone()),
            chunk_index: Some("0".to_string()),
            chunk_size: Some("4".to_string()),
            hash: None,
        }),
    )
    .await;
    assert!(matches!(missing_hash, Err(UploadError::InvalidRequest(_))));

    std::fs::remove_file(temp_dir.path().join("data.bin")).unwrap();
    let gone = status(&state, &id, 0, 4, &hash).await.err().unwrap();
    assert_eq!(gone.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_complete_gating_and_failure() {
    let temp_dir = tempfile::tempdir().unwrap();
    let state = test_state(temp_dir.path(), 4);
    let id = init(&state, "data.bin", 10).await.file_id;
    upload(&state, &id, 0, 4).await;

    match complete(&state, &id, false).await.err().unwrap() {
        UploadError::IncompleteUpload {
            uploaded_chunks,
            total_chunks,
        } => {
            assert_eq!(uploaded_chunks, vec![0]);
            assert_eq!(total_chunks, 3);
        }
        other => panic!("unexpected error {other:?}"),
    }
    assert_eq!(state.store.get(&id).unwrap().state(), UploadState::Finishing);

    // a later status check moves it back to uploading
    status(&state, &id, 1, 4, &slice_hash(1, 4)).await.unwrap();
    assert_eq!(state.store.get(&id).unwrap().state(), UploadState::Uploading);

    assert!(complete(&state, &id, true).await.is_err());
    assert_eq!(state.store.get(&id).unwrap().state(), UploadState::Failed);

    // terminal: status no longer moves it
    status(&state, &id, 1, 4, &slice_hash(1, 4)).await.unwrap();
    assert_eq!(state.store.get(&id).unwrap().state(), UploadState::Failed);
}

#[tokio::test]
async fn test_complete_is_repeatable() {
    let temp_dir = tempfile::tempdir().unwrap();
    let state = test_state(temp_dir.path(), 4);
    let id = init(&state, "data.bin", 10).await.file_id;
    for i in 0..3 {
        upload(&state, &id, i, 4).await;
    }

    let first = complete(&state, &id, false).await.unwrap().0;
    let second = complete(&state, &id, true).await.unwrap().0;
    assert_eq!(first, second);
    assert_eq!(state.store.get(&id).unwrap().state(), UploadState::Complete);
}

#[tokio::test]
async fn test_resume_five_chunk_upload() {
    let temp_dir = tempfile::tempdir().unwrap();
    let state = test_state(temp_dir.path(), 2);
    let first = init(&state, "five.bin", 10).await;
    assert_eq!(first.total_chunks, 5);

    for i in [0, 1, 3] {
        upload(&state, &first.file_id, i, 2).await;
    }

    // same name and size resume the live session and its bitmap
    let again = init(&state, "five.bin", 10).await;
    assert_eq!(again.file_id, first.file_id);
    assert_eq!(again.bytes_received, 6);
    assert_eq!(state.store.len(), 1);

    let mut missing = Vec::new();
    for i in 0..5 {
        let resp = status(&state, &again.file_id, i, 2, &slice_hash(i, 2)).await.unwrap().0;
        if !resp.hash_matches {
            missing.push(i);
        }
    }
    assert_eq!(missing, vec![2, 4]);

    for i in missing {
        upload(&state, &again.file_id, i, 2).await;
    }
    let done = complete(&state, &again.file_id, false).await.unwrap().0;
    assert_eq!(done.bytes_received, 10);
    assert_eq!(std::fs::read(temp_dir.path().join("five.bin")).unwrap(), DATA);
}

#[tokio::test]
async fn test_init_resets_advisory_state() {
    let temp_dir = tempfile::tempdir().unwrap();
    let state = test_state(temp_dir.path(), 4);
    let id = init(&state, "data.bin", 10).await.file_id;
    status(&state, &id, 0, 4, &slice_hash(0, 4)).await.unwrap();
    status(&state, &id, 1, 4, &slice_hash(1, 4)).await.unwrap();

    init(&state, "data.bin", 10).await;
    let session = state.store.get(&id).unwrap();
    assert_eq!(session.verification_count(), 0);
    assert!(session.uploading_chunks().is_empty());
}

#[tokio::test]
async fn test_rehydrates_file_left_on_disk() {
    let temp_dir = tempfile::tempdir().unwrap();
    std::fs::write(temp_dir.path().join("left.bin"), DATA).unwrap();
    let state = test_state(temp_dir.path(), 4);

    let resp = init(&state, "left.bin", 10).await;
    // on-disk length is reported, but nothing counts as verified yet
    assert_eq!(resp.bytes_received, 10);
    assert!(state.store.get(&resp.file_id).unwrap().uploaded_chunks().is_empty());

    for i in 0..3 {
        let s = status(&state, &resp.file_id, i, 4, &slice_hash(i, 4)).await.unwrap().0;
        assert!(s.hash_matches);
    }
    let done = complete(&state, &resp.file_id, false).await.unwrap().0;
    assert_eq!(done.bytes_received, 10);
}

#[tokio::test]
async fn test_failed_session_is_not_resumed() {
    let temp_dir = tempfile::tempdir().unwrap();
    let state = test_state(temp_dir.path(), 4);
    let id = init(&state, "data.bin", 10).await.file_id;
    complete(&state, &id, true).await.err().unwrap();

    let fresh = init(&state, "data.bin", 10).await;
    assert_ne!(fresh.file_id, id);
    assert_eq!(state.store.len(), 2);
}

#[tokio::test]
async fn test_list_progresses() {
    let temp_dir = tempfile::tempdir().unwrap();
    let state = test_state(temp_dir.path(), 4);
    let id = init(&state, "data.bin", 10).await.file_id;
    upload(&state, &id, 2, 4).await;

    let snapshots = list_progresses(State(state.clone())).await.0;
    assert_eq!(snapshots.len(), 1);
    let json = serde_json::to_value(&snapshots[0]).unwrap();
    assert_eq!(json["uuid"], id.as_str());
    assert_eq!(json["fileName"], "data.bin");
    assert_eq!(json["bytesReceived"], 2);
    assert_eq!(json["uploadedChunks"], serde_json::json!([2]));
    assert_eq!(json["lastState"], "INITIATED");
    assert_eq!(json["mode"], "CHUNKED");
}

#[tokio::test]
async fn test_complete_refused_while_multipart_streams() {
    let temp_dir = tempfile::tempdir().unwrap();
    let state = test_state(temp_dir.path(), 4);
    state.store.insert(UploadSession::streamed(
        "m1".to_string(),
        "stream.bin".to_string(),
        0,
        temp_dir.path().join(".m1.part"),
        1,
    ));
    state.store.modify("m1", |s| s.record_streamed(500, 2));

    let result = complete(&state, "m1", true).await;
    assert!(matches!(result, Err(UploadError::InvalidRequest(_))));
    assert_eq!(state.store.get("m1").unwrap().state(), UploadState::Uploading);

    // a broken stream can still be recorded as failed
    state.store.modify("m1", |s| s.fail_streamed());
    assert_eq!(state.store.get("m1").unwrap().state(), UploadState::Failed);
}

#[tokio::test]
async fn test_concurrent_init_shares_one_session() {
    let temp_dir = tempfile::tempdir().unwrap();
    let state = test_state(temp_dir.path(), 4);

    let (a, b) = tokio::join!(init(&state, "race.bin", 10), init(&state, "race.bin", 10));

    assert_eq!(a.file_id, b.file_id);
    assert_eq!(state.store.len(), 1);
    assert!(temp_dir.path().join("race.bin").exists());
}
