//! Configuration lifecycle.
//!
//! Loaded once at startup from `config.json`; every admin mutation re-saves
//! the whole file via a `<path>.tmp` + rename, never an in-place truncation.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;

use crate::error::Result;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FeatureFlags {
    pub memory: bool,
    pub p2p: bool,
    pub storage: bool,
}

impl Default for FeatureFlags {
    fn default() -> Self {
        Self {
            memory: true,
            p2p: true,
            storage: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StorageConfig {
    pub upload_dir: String,
    pub max_bytes: u64,
    pub retention_hours: u64,
    pub delete_on_download: bool,
    pub never_delete: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            upload_dir: "uploads".to_string(),
            max_bytes: 10 * 1024 * 1024 * 1024, // 10 GiB
            retention_hours: 24,
            delete_on_download: false,
            never_delete: false,
        }
    }
}

impl StorageConfig {
    /// Which `DeleteMode` a freshly uploaded file should get, per the
    /// configured defaults. `never_delete` takes priority over
    /// `delete_on_download`, which takes priority over the timer.
    pub fn default_delete_mode(&self) -> crate::storage::index::DeleteMode {
        use crate::storage::index::DeleteMode;
        if self.never_delete {
            DeleteMode::Never
        } else if self.delete_on_download {
            DeleteMode::Download
        } else {
            DeleteMode::Timer
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SecurityConfig {
    pub max_code_attempts: u32,
    pub session_timeout_ms: u64,
    pub admin_token_expiry_ms: u64,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            max_code_attempts: 10,
            session_timeout_ms: 5 * 60 * 1000,
            admin_token_expiry_ms: 24 * 60 * 60 * 1000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StatsConfig {
    pub total: u64,
    pub today: u64,
    pub today_date: String,
}

impl Default for StatsConfig {
    fn default() -> Self {
        Self {
            total: 0,
            today: 0,
            today_date: today_stamp(),
        }
    }
}

pub fn today_stamp() -> String {
    chrono::Utc::now().format("%Y-%m-%d").to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Config {
    pub features: FeatureFlags,
    pub storage: StorageConfig,
    pub security: SecurityConfig,
    /// SHA-256 hex digest of the admin password. Plaintext passwords from
    /// `--reset`-generated defaults are hashed on first save.
    pub admin_password_hash: String,
    pub stats: StatsConfig,
    pub theme: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            features: FeatureFlags::default(),
            storage: StorageConfig::default(),
            security: SecurityConfig::default(),
            admin_password_hash: hash_password("admin"),
            stats: StatsConfig::default(),
            theme: "dark".to_string(),
        }
    }
}

pub fn hash_password(password: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(password.as_bytes());
    hex::encode(hasher.finalize())
}

impl Config {
    pub fn check_password(&self, candidate: &str) -> bool {
        hash_password(candidate) == self.admin_password_hash
    }

    /// Resets the `today` counter if the calendar day has rolled over.
    pub fn roll_stats_if_new_day(&mut self) {
        let stamp = today_stamp();
        if self.stats.today_date != stamp {
            self.stats.today_date = stamp;
            self.stats.today = 0;
        }
    }
}

/// A loaded configuration plus the path it was read from, behind a lock so
/// admin handlers can mutate and re-save it.
pub struct ConfigStore {
    path: PathBuf,
    inner: RwLock<Config>,
}

impl ConfigStore {
    /// Load `path`, falling back to defaults (and persisting them) if the
    /// file is absent, or to in-memory defaults (without persisting) if the
    /// file is present but malformed.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let config = match tokio::fs::read(&path).await {
            Ok(bytes) => match serde_json::from_slice::<Config>(&bytes) {
                Ok(cfg) => cfg,
                Err(e) => {
                    tracing::warn!(
                        error = %e,
                        path = %path.display(),
                        "malformed config.json, using in-memory defaults"
                    );
                    Config::default()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = %path.display(), "no config.json, writing defaults");
                let cfg = Config::default();
                write_atomic(&path, &cfg).await?;
                cfg
            }
            Err(e) => return Err(e.into()),
        };

        Ok(Self {
            path,
            inner: RwLock::new(config),
        })
    }

    pub async fn snapshot(&self) -> Config {
        self.inner.read().await.clone()
    }

    pub async fn mutate<F>(&self, f: F) -> Result<Config>
    where
        F: FnOnce(&mut Config),
    {
        let snapshot = {
            let mut guard = self.inner.write().await;
            f(&mut guard);
            guard.clone()
        };
        write_atomic(&self.path, &snapshot).await?;
        Ok(snapshot)
    }

    pub async fn save(&self) -> Result<()> {
        let snapshot = self.inner.read().await.clone();
        write_atomic(&self.path, &snapshot).await
    }
}

async fn write_atomic(path: &Path, config: &Config) -> Result<()> {
    let tmp = path.with_extension("json.tmp");
    let body = serde_json::to_vec_pretty(config)?;
    tokio::fs::write(&tmp, &body).await?;
    tokio::fs::rename(&tmp, path).await?;
    Ok(())
}

/// Writes the default configuration to `path` and returns it; used by the
/// `--reset` CLI flag.
pub async fn reset(path: impl AsRef<Path>) -> Result<Config> {
    let config = Config::default();
    write_atomic(path.as_ref(), &config).await?;
    Ok(config)
}

/// Parses a calendar date out of a stats stamp, for tests that need to
/// assert the rollover boundary.
#[allow(dead_code)]
pub fn parse_stamp(stamp: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(stamp, "%Y-%m-%d").ok()
}
