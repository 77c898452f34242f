//! Axum router assembly and the process entry point.

use axum::{
    routing::{delete, get, post, put},
    Router,
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::api;
use crate::state::AppState;
use crate::ws;

pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub config_path: std::path::PathBuf,
    pub upload_dir: Option<std::path::PathBuf>,
}

/// Build the Axum app for a given state, without binding a listener — used
/// by `run_server` and by the black-box integration tests under `tests/`.
pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/health", get(api::health::health))
        .route("/api/features", get(api::health::features))
        .route("/api/pickup-code/", get(api::pickup::resolve_empty))
        .route("/api/pickup-code/:code", get(api::pickup::resolve))
        .route("/api/stored-file/:code", get(api::pickup::stored_file))
        .route("/api/upload-file", post(api::upload::upload_file))
        .route("/api/upload-chunk", post(api::upload::upload_chunk))
        .route("/api/merge-chunks", post(api::upload::merge_chunks))
        .route("/api/download-stored/:code", get(api::download::download_stored))
        .route("/api/download/:code", get(api::download::download_bridge))
        .route("/ws", get(ws::ws_handler))
        .route("/api/admin/login", post(api::admin::login))
        .route(
            "/api/admin/config",
            get(api::admin::get_config).put(api::admin::update_config).post(api::admin::update_config),
        )
        .route("/api/admin/storage-config", put(api::admin::update_storage_config))
        .route("/api/admin/files", get(api::admin::list_files))
        .route("/api/admin/files/:code", delete(api::admin::delete_file))
        .route("/api/admin/change-password", post(api::admin::change_password))
        .layer(
            CorsLayer::new()
                .allow_origin(tower_http::cors::Any)
                .allow_methods([
                    axum::http::Method::GET,
                    axum::http::Method::POST,
                    axum::http::Method::PUT,
                    axum::http::Method::DELETE,
                ])
                .allow_headers([
                    axum::http::header::CONTENT_TYPE,
                    axum::http::header::AUTHORIZATION,
                    axum::http::HeaderName::from_static("x-admin-token"),
                ]),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub async fn run_server(config: ServerConfig) -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info,dropyard=debug".into()),
        )
        .json()
        .init();

    tracing::info!("starting dropyard rendezvous core");

    let state = AppState::new(config.config_path, config.upload_dir).await?;
    tracing::info!("application state initialized");

    tokio::spawn(crate::janitor::run(state.clone()));

    let addr = format!("{}:{}", config.host, config.port);
    tracing::info!(%addr, "dropyard listening");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app(state)).await?;

    Ok(())
}
