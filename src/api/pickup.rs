//! `GET /api/pickup-code/<code>` and `GET /api/stored-file/<code>`.

use axum::{
    extract::{Path, State},
    Json,
};
use serde::Serialize;
use serde_json::json;

use crate::error::Result;
use crate::session::Mode;
use crate::state::AppState;

#[derive(Serialize)]
pub struct PickupCodeResponse {
    exists: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    mode: Option<&'static str>,
    #[serde(rename = "fileName", skip_serializing_if = "Option::is_none")]
    file_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    size: Option<u64>,
    #[serde(rename = "fileHash", skip_serializing_if = "Option::is_none")]
    file_hash: Option<String>,
    #[serde(rename = "deleteMode", skip_serializing_if = "Option::is_none")]
    delete_mode: Option<&'static str>,
}

fn mode_label(mode: Mode) -> &'static str {
    match mode {
        Mode::Memory => "memory",
        Mode::P2p => "p2p",
        Mode::Storage => "storage",
    }
}

fn delete_mode_label(mode: crate::storage::DeleteMode) -> &'static str {
    match mode {
        crate::storage::DeleteMode::Timer => "timer",
        crate::storage::DeleteMode::Download => "download",
        crate::storage::DeleteMode::Never => "never",
    }
}

/// Empty code on `/api/pickup-code/` is a 200 with a localized failure
/// message, not a routing error.
pub async fn resolve_empty() -> Json<serde_json::Value> {
    Json(json!({"success": false, "message": "取件码不能为空"}))
}

pub async fn resolve(
    State(state): State<AppState>,
    Path(code): Path<String>,
) -> Result<Json<PickupCodeResponse>> {
    if let Some((_, _, mode)) = state.sessions.get_snapshot(&code).await {
        return Ok(Json(PickupCodeResponse {
            exists: true,
            mode: Some(mode_label(mode)),
            file_name: state.sessions.with(&code, |s| s.file_name.clone()).await,
            size: state.sessions.with(&code, |s| s.size).await,
            file_hash: None,
            delete_mode: None,
        }));
    }

    if let Some(file) = state.storage.get(&code).await {
        return Ok(Json(PickupCodeResponse {
            exists: true,
            mode: Some("storage"),
            file_name: Some(file.original_name),
            size: Some(file.size),
            file_hash: Some(file.hash),
            delete_mode: Some(delete_mode_label(file.delete_mode)),
        }));
    }

    state.sessions.record_unknown_download_attempt(&code).await?;
    Ok(Json(PickupCodeResponse {
        exists: false,
        mode: None,
        file_name: None,
        size: None,
        file_hash: None,
        delete_mode: None,
    }))
}

#[derive(Serialize)]
pub struct StoredFileResponse {
    #[serde(rename = "fileName")]
    file_name: String,
    size: u64,
    hash: String,
    #[serde(rename = "uploadedAt")]
    uploaded_at: chrono::DateTime<chrono::Utc>,
    #[serde(rename = "deleteMode")]
    delete_mode: &'static str,
}

pub async fn stored_file(
    State(state): State<AppState>,
    Path(code): Path<String>,
) -> Result<Json<StoredFileResponse>> {
    let file = state
        .storage
        .get(&code)
        .await
        .ok_or(crate::error::Error::Unknown)?;

    Ok(Json(StoredFileResponse {
        file_name: file.original_name,
        size: file.size,
        hash: file.hash,
        uploaded_at: file.uploaded_at,
        delete_mode: delete_mode_label(file.delete_mode),
    }))
}
