//! Durable stored-file index.
//!
//! Mapping code → `StoredFile`, held in memory behind a reader/writer lock
//! and serialized to `storage_index.json` on every mutation via a
//! `<path>.tmp` + rename.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::io::AsyncReadExt;
use tokio::sync::RwLock;

use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeleteMode {
    Timer,
    Download,
    Never,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredFile {
    pub code: String,
    pub stored_name: String,
    pub original_name: String,
    pub size: u64,
    /// Lowercase hex SHA-256. Empty for legacy records awaiting repair.
    pub hash: String,
    pub uploaded_at: DateTime<Utc>,
    /// `None` means "never" (spec's zero-timestamp sentinel).
    pub delete_at: Option<DateTime<Utc>>,
    pub delete_mode: DeleteMode,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct IndexFile {
    files: HashMap<String, StoredFile>,
}

pub struct StorageIndex {
    path: PathBuf,
    upload_dir: PathBuf,
    files: RwLock<HashMap<String, StoredFile>>,
}

impl StorageIndex {
    /// Load `path`, treating a missing or malformed file as empty (spec
    /// §4.2). Legacy records with an empty hash are repaired by hashing the
    /// file on disk; a record whose file is gone is left as-is.
    pub async fn load(path: impl AsRef<Path>, upload_dir: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let upload_dir = upload_dir.as_ref().to_path_buf();

        let mut files = match tokio::fs::read(&path).await {
            Ok(bytes) => match serde_json::from_slice::<IndexFile>(&bytes) {
                Ok(idx) => idx.files,
                Err(e) => {
                    tracing::warn!(error = %e, path = %path.display(), "malformed storage index, treating as empty");
                    HashMap::new()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => HashMap::new(),
            Err(e) => return Err(e.into()),
        };

        for file in files.values_mut() {
            if file.hash.is_empty() {
                let full = upload_dir.join(&file.stored_name);
                match hash_file(&full).await {
                    Ok(hash) => {
                        tracing::info!(code = %file.code, "repaired legacy hash");
                        file.hash = hash;
                    }
                    Err(e) => {
                        tracing::warn!(code = %file.code, error = %e, "failed to repair legacy hash, leaving in place");
                    }
                }
            }
        }

        let index = Self {
            path,
            upload_dir,
            files: RwLock::new(files),
        };
        Ok(index)
    }

    pub async fn contains(&self, code: &str) -> bool {
        self.files.read().await.contains_key(code)
    }

    pub async fn get(&self, code: &str) -> Option<StoredFile> {
        self.files.read().await.get(code).cloned()
    }

    pub async fn total_bytes(&self) -> u64 {
        self.files.read().await.values().map(|f| f.size).sum()
    }

    pub async fn file_count(&self) -> usize {
        self.files.read().await.len()
    }

    pub async fn list(&self) -> Vec<StoredFile> {
        self.files.read().await.values().cloned().collect()
    }

    /// Insert a record and persist the index. Exclusive with any concurrent
    /// insert/remove via the internal write lock.
    pub async fn insert(&self, file: StoredFile) -> Result<()> {
        {
            let mut guard = self.files.write().await;
            guard.insert(file.code.clone(), file);
        }
        self.save().await
    }

    /// Remove a record (and its file, best-effort) and persist the index.
    pub async fn remove(&self, code: &str) -> Result<Option<StoredFile>> {
        let removed = {
            let mut guard = self.files.write().await;
            guard.remove(code)
        };
        if let Some(file) = &removed {
            let path = self.upload_dir.join(&file.stored_name);
            if let Err(e) = tokio::fs::remove_file(&path).await {
                if e.kind() != std::io::ErrorKind::NotFound {
                    tracing::warn!(code = %code, error = %e, "failed to remove stored file from disk");
                }
            }
        }
        self.save().await?;
        Ok(removed)
    }

    /// Remove every stored file and wipe the index (admin "wipe all").
    pub async fn wipe_all(&self) -> Result<()> {
        let codes: Vec<String> = self.files.read().await.keys().cloned().collect();
        for code in codes {
            self.remove(&code).await?;
        }
        Ok(())
    }

    /// Codes whose timer-mode deletion timestamp has passed (janitor use).
    pub async fn expired_timer_codes(&self, now: DateTime<Utc>) -> Vec<String> {
        self.files
            .read()
            .await
            .values()
            .filter(|f| f.delete_mode == DeleteMode::Timer)
            .filter(|f| f.delete_at.map(|at| at <= now).unwrap_or(false))
            .map(|f| f.code.clone())
            .collect()
    }

    async fn save(&self) -> Result<()> {
        let snapshot = IndexFile {
            files: self.files.read().await.clone(),
        };
        let tmp = self.path.with_extension("json.tmp");
        let body = serde_json::to_vec_pretty(&snapshot)?;
        tokio::fs::write(&tmp, &body).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}

pub async fn hash_file(path: &Path) -> std::io::Result<String> {
    let mut file = tokio::fs::File::open(path).await?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; 1 << 16];
    loop {
        let n = file.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

/// Sanitize a filename: anything outside `[A-Za-z0-9_.-]` becomes `_`.
pub fn sanitize_filename(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == '-' || c == '.' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// `<nanos>_<sanitized>` stored filename, unique per upload.
pub fn unique_stored_name(original: &str) -> String {
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    format!("{}_{}", nanos, sanitize_filename(original))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_replaces_unsafe_characters() {
        assert_eq!(sanitize_filename("a b/c:d.txt"), "a_b_c_d.txt");
        assert_eq!(sanitize_filename("report-v2_final.PDF"), "report-v2_final.PDF");
    }

    #[tokio::test]
    async fn insert_then_get_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let index_path = dir.path().join("storage_index.json");
        let index = StorageIndex::load(&index_path, dir.path()).await.unwrap();

        let file = StoredFile {
            code: "AB12".to_string(),
            stored_name: "1_report.pdf".to_string(),
            original_name: "report.pdf".to_string(),
            size: 100,
            hash: "deadbeef".to_string(),
            uploaded_at: Utc::now(),
            delete_at: None,
            delete_mode: DeleteMode::Never,
        };
        index.insert(file.clone()).await.unwrap();

        let reloaded = StorageIndex::load(&index_path, dir.path()).await.unwrap();
        let got = reloaded.get("AB12").await.unwrap();
        assert_eq!(got.original_name, "report.pdf");
    }

    #[tokio::test]
    async fn malformed_index_loads_as_empty() {
        let dir = tempfile::tempdir().unwrap();
        let index_path = dir.path().join("storage_index.json");
        tokio::fs::write(&index_path, b"{not json").await.unwrap();
        let index = StorageIndex::load(&index_path, dir.path()).await.unwrap();
        assert_eq!(index.file_count().await, 0);
    }
}
