//! Socket hub: registry of connected sockets.

use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;
use rand::Rng;
use tokio::sync::{mpsc, RwLock};

use crate::error::{Error, Result};

pub const OUTBOUND_QUEUE_CAPACITY: usize = 256;

#[derive(Debug, Clone)]
pub enum OutMessage {
    Text(String),
    Binary(Bytes),
}

pub struct SocketHandle {
    pub id: String,
    tx: mpsc::Sender<OutMessage>,
}

impl SocketHandle {
    /// Enqueue a message for delivery. A full queue drops the message and
    /// logs rather than blocking the caller on a slow peer.
    pub fn send(&self, msg: OutMessage) {
        if let Err(e) = self.tx.try_send(msg) {
            tracing::warn!(socket = %self.id, error = %e, "outbound queue full or closed, dropping message");
        }
    }
}

/// Generate an 8-hex-char socket id.
pub fn generate_socket_id() -> String {
    let mut rng = rand::rng();
    (0..8)
        .map(|_| {
            let n: u8 = rng.random_range(0..16);
            std::char::from_digit(n as u32, 16).unwrap()
        })
        .collect::<String>()
        .to_uppercase()
}

pub struct SocketHub {
    clients: RwLock<HashMap<String, Arc<SocketHandle>>>,
    /// file id -> the one socket allowed to upload chunks for it.
    chunk_claims: RwLock<HashMap<String, String>>,
}

impl SocketHub {
    pub fn new() -> Self {
        Self {
            clients: RwLock::new(HashMap::new()),
            chunk_claims: RwLock::new(HashMap::new()),
        }
    }

    pub async fn register(&self) -> (Arc<SocketHandle>, mpsc::Receiver<OutMessage>) {
        let (tx, rx) = mpsc::channel(OUTBOUND_QUEUE_CAPACITY);
        let id = generate_socket_id();
        let handle = Arc::new(SocketHandle { id: id.clone(), tx });
        self.clients.write().await.insert(id, handle.clone());
        (handle, rx)
    }

    /// Tear down everything owned by `socket_id`: hub entry, and its chunk
    /// claim if any. Returns the orphaned file id, if this socket had
    /// claimed one, so the caller can remove the chunk directory.
    pub async fn unregister(&self, socket_id: &str) -> Option<String> {
        self.clients.write().await.remove(socket_id);
        let mut claims = self.chunk_claims.write().await;
        let orphaned = claims
            .iter()
            .find(|(_, owner)| owner.as_str() == socket_id)
            .map(|(file_id, _)| file_id.clone());
        if let Some(file_id) = &orphaned {
            claims.remove(file_id);
        }
        orphaned
    }

    pub async fn send_to(&self, socket_id: &str, msg: OutMessage) {
        let guard = self.clients.read().await;
        if let Some(handle) = guard.get(socket_id) {
            handle.send(msg);
        }
    }

    pub async fn contains(&self, socket_id: &str) -> bool {
        self.clients.read().await.contains_key(socket_id)
    }

    /// Atomically claim chunk-upload ownership of `file_id` for `socket_id`.
    /// Rejects with `Error::Locked` if another live socket already claimed
    /// it — fixes the orphan-cleanup-by-socket-identity bug noted in design
    /// notes, where two sockets uploading the same file id would otherwise
    /// corrupt each other's parts.
    pub async fn claim_chunk_upload(&self, file_id: &str, socket_id: &str) -> Result<()> {
        let mut claims = self.chunk_claims.write().await;
        match claims.get(file_id) {
            Some(owner) if owner != socket_id => Err(Error::Locked),
            _ => {
                claims.insert(file_id.to_string(), socket_id.to_string());
                Ok(())
            }
        }
    }

    pub async fn release_chunk_upload(&self, file_id: &str) {
        self.chunk_claims.write().await.remove(file_id);
    }
}

impl Default for SocketHub {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn socket_ids_are_eight_hex_chars() {
        for _ in 0..50 {
            let id = generate_socket_id();
            assert_eq!(id.len(), 8);
            assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
        }
    }

    #[tokio::test]
    async fn second_claim_by_different_socket_is_rejected() {
        let hub = SocketHub::new();
        hub.claim_chunk_upload("FILE1", "AAAA0001").await.unwrap();
        let result = hub.claim_chunk_upload("FILE1", "BBBB0002").await;
        assert!(matches!(result, Err(Error::Locked)));
    }

    #[tokio::test]
    async fn same_socket_can_reclaim_its_own_file() {
        let hub = SocketHub::new();
        hub.claim_chunk_upload("FILE1", "AAAA0001").await.unwrap();
        hub.claim_chunk_upload("FILE1", "AAAA0001").await.unwrap();
    }

    #[tokio::test]
    async fn unregister_returns_orphaned_file_id() {
        let hub = SocketHub::new();
        hub.claim_chunk_upload("FILE1", "AAAA0001").await.unwrap();
        let orphan = hub.unregister("AAAA0001").await;
        assert_eq!(orphan.as_deref(), Some("FILE1"));
    }
}
