//! Admin surface: login, config read/write, storage config, file listing,
//! deletion, wipe, password rotation — the small surface the core exposes
//! to an external admin console.

use axum::{
    extract::{Path, State},
    http::HeaderMap,
    Json,
};
use serde::{Deserialize, Serialize};

use crate::config::{hash_password, FeatureFlags, StorageConfig};
use crate::error::{Error, Result};
use crate::state::AppState;

async fn check_admin_token(state: &AppState, headers: &HeaderMap) -> Result<()> {
    let token = headers
        .get("X-Admin-Token")
        .and_then(|v| v.to_str().ok())
        .ok_or(Error::Unauthorized)?;
    if state.admin_tokens.check(token).await {
        Ok(())
    } else {
        Err(Error::Unauthorized)
    }
}

#[derive(Deserialize)]
pub struct LoginRequest {
    password: String,
}

#[derive(Serialize)]
pub struct LoginResponse {
    success: bool,
    token: String,
}

pub async fn login(State(state): State<AppState>, Json(request): Json<LoginRequest>) -> Result<Json<LoginResponse>> {
    let cfg = state.config.snapshot().await;
    if !cfg.check_password(&request.password) {
        return Err(Error::Unauthorized);
    }
    let token = state.admin_tokens.issue().await;
    Ok(Json(LoginResponse { success: true, token }))
}

#[derive(Serialize)]
pub struct ConfigResponse {
    features: FeatureFlags,
    storage: StorageConfig,
    theme: String,
}

pub async fn get_config(State(state): State<AppState>, headers: HeaderMap) -> Result<Json<ConfigResponse>> {
    check_admin_token(&state, &headers).await?;
    let cfg = state.config.snapshot().await;
    Ok(Json(ConfigResponse {
        features: cfg.features,
        storage: cfg.storage,
        theme: cfg.theme,
    }))
}

#[derive(Deserialize)]
pub struct UpdateConfigRequest {
    features: Option<FeatureFlags>,
    theme: Option<String>,
}

pub async fn update_config(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<UpdateConfigRequest>,
) -> Result<Json<ConfigResponse>> {
    check_admin_token(&state, &headers).await?;
    let cfg = state
        .config
        .mutate(|cfg| {
            if let Some(features) = request.features {
                cfg.features = features;
            }
            if let Some(theme) = request.theme {
                cfg.theme = theme;
            }
        })
        .await?;
    Ok(Json(ConfigResponse {
        features: cfg.features,
        storage: cfg.storage,
        theme: cfg.theme,
    }))
}

pub async fn update_storage_config(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<StorageConfig>,
) -> Result<Json<StorageConfig>> {
    check_admin_token(&state, &headers).await?;
    let cfg = state.config.mutate(|cfg| cfg.storage = request).await?;
    Ok(Json(cfg.storage))
}

#[derive(Serialize)]
pub struct FileEntry {
    code: String,
    #[serde(rename = "fileName")]
    file_name: String,
    size: u64,
    hash: String,
    #[serde(rename = "uploadedAt")]
    uploaded_at: chrono::DateTime<chrono::Utc>,
    #[serde(rename = "deleteMode")]
    delete_mode: &'static str,
}

#[derive(Serialize)]
pub struct DiskUsage {
    #[serde(rename = "usedBytes")]
    used_bytes: u64,
    #[serde(rename = "maxBytes")]
    max_bytes: u64,
    #[serde(rename = "fileCount")]
    file_count: usize,
}

#[derive(Serialize)]
pub struct FilesResponse {
    files: Vec<FileEntry>,
    usage: DiskUsage,
}

pub async fn list_files(State(state): State<AppState>, headers: HeaderMap) -> Result<Json<FilesResponse>> {
    check_admin_token(&state, &headers).await?;
    let cfg = state.config.snapshot().await;
    let files = state
        .storage
        .list()
        .await
        .into_iter()
        .map(|f| FileEntry {
            code: f.code,
            file_name: f.original_name,
            size: f.size,
            hash: f.hash,
            uploaded_at: f.uploaded_at,
            delete_mode: match f.delete_mode {
                crate::storage::DeleteMode::Timer => "timer",
                crate::storage::DeleteMode::Download => "download",
                crate::storage::DeleteMode::Never => "never",
            },
        })
        .collect::<Vec<_>>();

    let used_bytes = state.storage.total_bytes().await;
    Ok(Json(FilesResponse {
        usage: DiskUsage {
            used_bytes,
            max_bytes: cfg.storage.max_bytes,
            file_count: files.len(),
        },
        files,
    }))
}

/// `code == "all"` wipes the whole upload dir and index instead of removing
/// a single record — folded in here rather than a sibling route, since a
/// static `/files/all` and a param `/files/:code` at the same path segment
/// is a routing conflict.
pub async fn delete_file(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(code): Path<String>,
) -> Result<Json<serde_json::Value>> {
    check_admin_token(&state, &headers).await?;
    if code == "all" {
        state.storage.wipe_all().await?;
    } else {
        state.storage.remove(&code).await?;
    }
    Ok(Json(serde_json::json!({"success": true})))
}

#[derive(Deserialize)]
pub struct ChangePasswordRequest {
    #[serde(rename = "currentPassword")]
    current_password: String,
    #[serde(rename = "newPassword")]
    new_password: String,
}

pub async fn change_password(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<ChangePasswordRequest>,
) -> Result<Json<serde_json::Value>> {
    check_admin_token(&state, &headers).await?;
    let cfg = state.config.snapshot().await;
    if !cfg.check_password(&request.current_password) {
        return Err(Error::Unauthorized);
    }
    state
        .config
        .mutate(|cfg| cfg.admin_password_hash = hash_password(&request.new_password))
        .await?;
    Ok(Json(serde_json::json!({"success": true})))
}
