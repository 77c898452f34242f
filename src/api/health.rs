//! `GET /health` and `GET /api/features`.

use axum::{extract::State, Json};
use serde::Serialize;

use crate::state::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    status: &'static str,
    #[serde(rename = "activeSessions")]
    active_sessions: usize,
    #[serde(rename = "storedFiles")]
    stored_files: usize,
    #[serde(rename = "uptime")]
    uptime_secs: i64,
}

pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        active_sessions: state.sessions.len().await,
        stored_files: state.storage.file_count().await,
        uptime_secs: (chrono::Utc::now() - state.started_at).num_seconds(),
    })
}

#[derive(Serialize)]
pub struct FeaturesResponse {
    features: crate::config::FeatureFlags,
    storage: crate::config::StorageConfig,
    theme: String,
}

pub async fn features(State(state): State<AppState>) -> Json<FeaturesResponse> {
    let cfg = state.config.snapshot().await;
    Json(FeaturesResponse {
        features: cfg.features,
        storage: cfg.storage,
        theme: cfg.theme,
    })
}
