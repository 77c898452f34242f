//! Admin token issuance and the thin admin surface presented to an
//! external admin console.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use rand::rngs::OsRng;
use rand::TryRngCore;
use tokio::sync::RwLock;

#[derive(Debug, Clone)]
struct Token {
    expires_at: DateTime<Utc>,
}

/// Opaque 64-hex-char bearer tokens, one registry, one lock.
pub struct AdminTokenStore {
    tokens: RwLock<HashMap<String, Token>>,
    ttl: Duration,
}

impl AdminTokenStore {
    pub fn new(ttl_ms: u64) -> Self {
        Self {
            tokens: RwLock::new(HashMap::new()),
            ttl: Duration::milliseconds(ttl_ms as i64),
        }
    }

    pub async fn issue(&self) -> String {
        let token = generate_token();
        self.tokens.write().await.insert(
            token.clone(),
            Token {
                expires_at: Utc::now() + self.ttl,
            },
        );
        token
    }

    /// A token is valid iff present and not past expiry.
    pub async fn check(&self, token: &str) -> bool {
        self.tokens
            .read()
            .await
            .get(token)
            .map(|t| t.expires_at > Utc::now())
            .unwrap_or(false)
    }

    pub async fn sweep_expired(&self) {
        let now = Utc::now();
        self.tokens.write().await.retain(|_, t| t.expires_at > now);
    }
}

fn generate_token() -> String {
    let mut bytes = [0u8; 32];
    OsRng.try_fill_bytes(&mut bytes).expect("OS RNG failure");
    hex::encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn issued_token_checks_valid() {
        let store = AdminTokenStore::new(60_000);
        let token = store.issue().await;
        assert_eq!(token.len(), 64);
        assert!(store.check(&token).await);
        assert!(!store.check("not-a-real-token").await);
    }

    #[tokio::test]
    async fn sweep_removes_expired_tokens() {
        let store = AdminTokenStore::new(0);
        let token = store.issue().await;
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        store.sweep_expired().await;
        assert!(!store.check(&token).await);
    }
}
