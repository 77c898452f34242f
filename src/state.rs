//! Global application state: one `AppState`, Arc-wrapped and `Clone`,
//! passed into the router and the background tasks explicitly instead of
//! living as process globals.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::admin::AdminTokenStore;
use crate::config::ConfigStore;
use crate::counter::TransferCounter;
use crate::session::SessionRegistry;
use crate::socket::{RelayEngine, SocketHub};
use crate::storage::StorageIndex;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ConfigStore>,
    pub storage: Arc<StorageIndex>,
    pub sessions: Arc<SessionRegistry>,
    pub hub: Arc<SocketHub>,
    pub relay: Arc<RelayEngine>,
    pub admin_tokens: Arc<AdminTokenStore>,
    pub upload_dir: PathBuf,
    pub started_at: DateTime<Utc>,
}

impl AppState {
    pub async fn new(config_path: impl Into<PathBuf>, upload_dir_override: Option<PathBuf>) -> anyhow::Result<Self> {
        let config_path = config_path.into();
        let config = Arc::new(ConfigStore::load(&config_path).await?);
        let snapshot = config.snapshot().await;

        let upload_dir = upload_dir_override.unwrap_or_else(|| PathBuf::from(&snapshot.storage.upload_dir));
        tokio::fs::create_dir_all(&upload_dir).await?;

        let index_path = config_path
            .parent()
            .map(|p| p.join("storage_index.json"))
            .unwrap_or_else(|| PathBuf::from("storage_index.json"));
        let storage = Arc::new(StorageIndex::load(index_path, &upload_dir).await?);
        let sessions = Arc::new(SessionRegistry::new(snapshot.security.max_code_attempts));
        let hub = Arc::new(SocketHub::new());
        let counter = Arc::new(TransferCounter::new(config.clone()));
        let admin_tokens = Arc::new(AdminTokenStore::new(snapshot.security.admin_token_expiry_ms));

        let relay = Arc::new(RelayEngine {
            sessions: sessions.clone(),
            hub: hub.clone(),
            storage: storage.clone(),
            counter: counter.clone(),
        });

        Ok(Self {
            config,
            storage,
            sessions,
            hub,
            relay,
            admin_tokens,
            upload_dir,
            started_at: Utc::now(),
        })
    }

    /// A throwaway instance backed by a fresh temp directory, for tests
    /// (mirrors the teacher's `AppState` constructor taking explicit paths
    /// rather than reading global environment directly).
    pub async fn new_for_test() -> Self {
        let dir = tempfile::tempdir().unwrap();
        // Leak the tempdir so it outlives the test's AppState; acceptable
        // for throwaway test fixtures only.
        let path = dir.into_path();
        let upload_dir = path.join("uploads");
        tokio::fs::create_dir_all(&upload_dir).await.unwrap();
        Self::new(path.join("config.json"), Some(upload_dir)).await.unwrap()
    }
}
