//! Active-session registry.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, RwLock};

use crate::codes;
use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    Memory,
    P2p,
    Storage,
}

/// An HTTP response body writer attached by the download-bridge handler,
/// borrowed from the HTTP handler for the lifetime of the request.
pub struct HttpSink {
    pub tx: mpsc::Sender<bytes::Bytes>,
}

pub struct ActiveSession {
    pub code: String,
    pub sender_socket: String,
    pub receiver_socket: Option<String>,
    pub mode: Mode,
    pub file_name: String,
    pub size: u64,
    pub created_at: DateTime<Utc>,
    pub last_active_at: DateTime<Utc>,
    pub expected_hash: Option<String>,
    pub pending_chunk_meta: HashMap<u64, serde_json::Value>,
    pub pending_transfer_end: Option<serde_json::Value>,
    pub sender_nat: Option<serde_json::Value>,
    pub receiver_nat: Option<serde_json::Value>,
    pub http_sink: Option<HttpSink>,
}

impl ActiveSession {
    fn new(code: String, mode: Mode, file_name: String, size: u64, sender_socket: String) -> Self {
        let now = Utc::now();
        Self {
            code,
            sender_socket,
            receiver_socket: None,
            mode,
            file_name,
            size,
            created_at: now,
            last_active_at: now,
            expected_hash: None,
            pending_chunk_meta: HashMap::new(),
            pending_transfer_end: None,
            sender_nat: None,
            receiver_nat: None,
            http_sink: None,
        }
    }

    pub fn is_idle(&self) -> bool {
        self.receiver_socket.is_none() && self.http_sink.is_none()
    }
}

pub enum JoinOutcome {
    Joined { capabilities: serde_json::Value },
    StorageMode,
    Locked,
    NotFound,
}

/// code -> ActiveSession, plus the per-code failed-attempt counter. Both live
/// under their own lock, never held across a socket send or disk write.
pub struct SessionRegistry {
    sessions: RwLock<HashMap<String, ActiveSession>>,
    attempts: RwLock<HashMap<String, u32>>,
    max_code_attempts: u32,
}

impl SessionRegistry {
    pub fn new(max_code_attempts: u32) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            attempts: RwLock::new(HashMap::new()),
            max_code_attempts,
        }
    }

    /// Allocate a unique code and register a new session under it. Checked
    /// against `storage` first (cheap, no write lock held across it), then
    /// against the live registry under its own write lock.
    pub async fn create(
        &self,
        mode: Mode,
        file_name: String,
        size: u64,
        sender_socket: String,
        storage: &crate::storage::StorageIndex,
    ) -> String {
        loop {
            let candidate = codes::generate();
            if storage.contains(&candidate).await {
                continue;
            }
            let mut guard = self.sessions.write().await;
            if guard.contains_key(&candidate) {
                continue;
            }
            guard.insert(
                candidate.clone(),
                ActiveSession::new(candidate.clone(), mode, file_name, size, sender_socket),
            );
            return candidate;
        }
    }

    /// Record a failed attempt against `code`. The cap is enforced by
    /// `is_locked` on the *next* attempt, so a call that pushes the counter
    /// up to the cap still reports `NotFound` this time.
    async fn record_failed_attempt(&self, code: &str) {
        let mut guard = self.attempts.write().await;
        *guard.entry(code.to_string()).or_insert(0) += 1;
    }

    async fn is_locked(&self, code: &str) -> bool {
        let guard = self.attempts.read().await;
        guard.get(code).copied().unwrap_or(0) >= self.max_code_attempts
    }

    pub async fn join(
        &self,
        code: &str,
        requested_mode: Mode,
        capabilities: serde_json::Value,
        receiver_socket: String,
        storage: &crate::storage::StorageIndex,
    ) -> JoinOutcome {
        if self.is_locked(code).await {
            return JoinOutcome::Locked;
        }

        {
            let mut guard = self.sessions.write().await;
            if let Some(session) = guard.get_mut(code) {
                if session.receiver_socket.is_none() {
                    session.receiver_socket = Some(receiver_socket);
                }
                if session.mode == Mode::P2p && requested_mode == Mode::Memory {
                    tracing::info!(code, "downgrading session from p2p to memory on join");
                    session.mode = Mode::Memory;
                }
                session.last_active_at = Utc::now();
                return JoinOutcome::Joined { capabilities };
            }
        }

        if storage.contains(code).await {
            return JoinOutcome::StorageMode;
        }

        self.record_failed_attempt(code).await;
        JoinOutcome::NotFound
    }

    /// Record a failed download attempt against an unknown code.
    pub async fn record_unknown_download_attempt(&self, code: &str) -> Result<()> {
        if self.is_locked(code).await {
            return Err(Error::Locked);
        }
        self.record_failed_attempt(code).await;
        Ok(())
    }

    pub async fn get_snapshot(&self, code: &str) -> Option<(String, Option<String>, Mode)> {
        let guard = self.sessions.read().await;
        guard
            .get(code)
            .map(|s| (s.sender_socket.clone(), s.receiver_socket.clone(), s.mode))
    }

    pub async fn touch(&self, code: &str) {
        let mut guard = self.sessions.write().await;
        if let Some(s) = guard.get_mut(code) {
            s.last_active_at = Utc::now();
        }
    }

    pub async fn remove(&self, code: &str) -> Option<ActiveSession> {
        self.sessions.write().await.remove(code)
    }

    pub async fn with_mut<F, T>(&self, code: &str, f: F) -> Option<T>
    where
        F: FnOnce(&mut ActiveSession) -> T,
    {
        let mut guard = self.sessions.write().await;
        guard.get_mut(code).map(f)
    }

    pub async fn with<F, T>(&self, code: &str, f: F) -> Option<T>
    where
        F: FnOnce(&ActiveSession) -> T,
    {
        let guard = self.sessions.read().await;
        guard.get(code).map(f)
    }

    /// Codes where this socket is sender or receiver (used on disconnect).
    pub async fn codes_for_socket(&self, socket_id: &str) -> Vec<String> {
        let guard = self.sessions.read().await;
        guard
            .values()
            .filter(|s| {
                s.sender_socket == socket_id
                    || s.receiver_socket.as_deref() == Some(socket_id)
            })
            .map(|s| s.code.clone())
            .collect()
    }

    /// The first session where `socket_id` participates, used when a
    /// control-message payload omits the pickup code.
    pub async fn find_code_for_socket(&self, socket_id: &str) -> Option<String> {
        self.codes_for_socket(socket_id).await.into_iter().next()
    }

    pub async fn touch_by_socket(&self, socket_id: &str) {
        for code in self.codes_for_socket(socket_id).await {
            self.touch(&code).await;
        }
    }

    /// Sessions with no receiver that have been idle past `timeout`, for the
    /// janitor sweep.
    pub async fn idle_timed_out(&self, timeout: chrono::Duration) -> Vec<String> {
        let now = Utc::now();
        let guard = self.sessions.read().await;
        guard
            .values()
            .filter(|s| s.is_idle() && now - s.last_active_at > timeout)
            .map(|s| s.code.clone())
            .collect()
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn contains(&self, code: &str) -> bool {
        self.sessions.read().await.contains_key(code)
    }
}

pub type SharedSessionRegistry = Arc<SessionRegistry>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::StorageIndex;

    async fn empty_storage() -> StorageIndex {
        let dir = tempfile::tempdir().unwrap();
        StorageIndex::load(dir.path().join("storage_index.json"), dir.path())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn create_then_join_pairs_sockets() {
        let registry = SessionRegistry::new(10);
        let storage = empty_storage().await;
        let code = registry
            .create(Mode::Memory, "a.bin".into(), 10, "sender01".into(), &storage)
            .await;

        let outcome = registry
            .join(&code, Mode::Memory, serde_json::json!({}), "recv0001".into(), &storage)
            .await;
        assert!(matches!(outcome, JoinOutcome::Joined { .. }));

        let snapshot = registry.get_snapshot(&code).await.unwrap();
        assert_eq!(snapshot.1.as_deref(), Some("recv0001"));
    }

    #[tokio::test]
    async fn p2p_join_with_memory_request_downgrades_mode() {
        let registry = SessionRegistry::new(10);
        let storage = empty_storage().await;
        let code = registry
            .create(Mode::P2p, "a.bin".into(), 10, "sender01".into(), &storage)
            .await;
        registry
            .join(&code, Mode::Memory, serde_json::json!({}), "recv0001".into(), &storage)
            .await;
        let snapshot = registry.get_snapshot(&code).await.unwrap();
        assert_eq!(snapshot.2, Mode::Memory);
    }

    #[tokio::test]
    async fn unknown_code_locks_after_max_attempts() {
        let registry = SessionRegistry::new(3);
        let storage = empty_storage().await;
        for _ in 0..3 {
            let outcome = registry
                .join("ZZZZ", Mode::Memory, serde_json::json!({}), "recv0001".into(), &storage)
                .await;
            assert!(matches!(outcome, JoinOutcome::NotFound));
        }
        let outcome = registry
            .join("ZZZZ", Mode::Memory, serde_json::json!({}), "recv0001".into(), &storage)
            .await;
        assert!(matches!(outcome, JoinOutcome::Locked));
    }
}
