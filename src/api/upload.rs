//! `POST /api/upload-file`, `/api/upload-chunk`, `/api/merge-chunks`.

use axum::extract::{Multipart, State};
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::state::AppState;
use crate::storage::{sanitize_filename, DeleteMode, StorageIndex, StoredFile};

/// Allocate a pickup code for a storage-mode upload: unique against both the
/// live session registry and the storage index, same lottery as §4.1.
async fn allocate_storage_code(sessions: &crate::session::SharedSessionRegistry, storage: &StorageIndex) -> String {
    loop {
        let candidate = crate::codes::generate();
        if storage.contains(&candidate).await || sessions.contains(&candidate).await {
            continue;
        }
        return candidate;
    }
}

#[derive(Serialize)]
pub struct UploadResponse {
    success: bool,
    code: String,
    hash: String,
    size: u64,
}

pub async fn upload_file(State(state): State<AppState>, mut multipart: Multipart) -> Result<Json<UploadResponse>> {
    let cfg = state.config.snapshot().await;
    if !cfg.features.storage {
        return Err(Error::FeatureDisabled);
    }

    let mut field = None;
    while let Some(f) = multipart
        .next_field()
        .await
        .map_err(|e| Error::BadRequest(e.to_string()))?
    {
        if f.name() == Some("file") {
            field = Some(f);
            break;
        }
    }
    let field = field.ok_or_else(|| Error::BadRequest("missing multipart field \"file\"".to_string()))?;
    let original_name = field.file_name().unwrap_or("upload.bin").to_string();
    let sanitized_name = sanitize_filename(&original_name);

    let current_usage = state.storage.total_bytes().await;
    let outcome = crate::storage::engine::save_single_shot(
        &state.upload_dir,
        &sanitized_name,
        None,
        cfg.storage.max_bytes,
        current_usage,
        field,
    )
    .await?;

    let code = allocate_storage_code(&state.sessions, &state.storage).await;

    let delete_mode = cfg.storage.default_delete_mode();
    let delete_at = match delete_mode {
        DeleteMode::Timer => Some(chrono::Utc::now() + chrono::Duration::hours(cfg.storage.retention_hours as i64)),
        _ => None,
    };

    state
        .storage
        .insert(StoredFile {
            code: code.clone(),
            stored_name: outcome.stored_name,
            original_name,
            size: outcome.size,
            hash: outcome.hash.clone(),
            uploaded_at: chrono::Utc::now(),
            delete_at,
            delete_mode,
        })
        .await?;

    state.relay.counter.bump().await;

    Ok(Json(UploadResponse {
        success: true,
        code,
        hash: outcome.hash,
        size: outcome.size,
    }))
}

pub async fn upload_chunk(State(state): State<AppState>, mut multipart: Multipart) -> Result<Json<serde_json::Value>> {
    let cfg = state.config.snapshot().await;
    if !cfg.features.storage {
        return Err(Error::FeatureDisabled);
    }

    let mut file_id = None;
    let mut index = None;
    let mut bytes = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| Error::BadRequest(e.to_string()))?
    {
        match field.name().map(str::to_string).as_deref() {
            Some("fileID") => file_id = Some(field.text().await.map_err(|e| Error::BadRequest(e.to_string()))?),
            Some("chunkIndex") => {
                let text = field.text().await.map_err(|e| Error::BadRequest(e.to_string()))?;
                index = Some(text.parse::<u64>().map_err(|_| Error::BadRequest("bad chunkIndex".to_string()))?);
            }
            Some("chunk") => bytes = Some(field.bytes().await.map_err(|e| Error::BadRequest(e.to_string()))?),
            _ => {}
        }
    }

    let file_id = file_id.ok_or_else(|| Error::BadRequest("missing fileID".to_string()))?;
    let index = index.ok_or_else(|| Error::BadRequest("missing chunkIndex".to_string()))?;
    let bytes = bytes.ok_or_else(|| Error::BadRequest("missing chunk".to_string()))?;

    crate::storage::engine::write_chunk(&state.upload_dir, &file_id, index, &bytes).await?;

    Ok(Json(serde_json::json!({"success": true})))
}

#[derive(Deserialize)]
pub struct MergeChunksRequest {
    #[serde(rename = "fileID")]
    file_id: String,
    #[serde(rename = "totalChunks")]
    total_chunks: u64,
    #[serde(rename = "fileName")]
    file_name: String,
    #[serde(rename = "fileSize")]
    #[allow(dead_code)]
    file_size: u64,
}

pub async fn merge_chunks(
    State(state): State<AppState>,
    Json(request): Json<MergeChunksRequest>,
) -> Result<Json<UploadResponse>> {
    let cfg = state.config.snapshot().await;
    if !cfg.features.storage {
        return Err(Error::FeatureDisabled);
    }

    let sanitized_name = sanitize_filename(&request.file_name);
    let outcome = crate::storage::engine::merge_chunks(
        &state.upload_dir,
        &request.file_id,
        request.total_chunks,
        &sanitized_name,
    )
    .await?;

    let current_usage = state.storage.total_bytes().await;
    if current_usage.saturating_add(outcome.size) > cfg.storage.max_bytes {
        let _ = tokio::fs::remove_file(state.upload_dir.join(&outcome.stored_name)).await;
        return Err(Error::QuotaExceeded);
    }

    let delete_mode = cfg.storage.default_delete_mode();
    let delete_at = match delete_mode {
        DeleteMode::Timer => Some(chrono::Utc::now() + chrono::Duration::hours(cfg.storage.retention_hours as i64)),
        _ => None,
    };

    state
        .storage
        .insert(StoredFile {
            code: request.file_id.clone(),
            stored_name: outcome.stored_name,
            original_name: request.file_name.clone(),
            size: outcome.size,
            hash: outcome.hash.clone(),
            uploaded_at: chrono::Utc::now(),
            delete_at,
            delete_mode,
        })
        .await?;

    state.relay.counter.bump().await;
    state.hub.release_chunk_upload(&request.file_id).await;

    Ok(Json(UploadResponse {
        success: true,
        code: request.file_id,
        hash: outcome.hash,
        size: outcome.size,
    }))
}
