//! Relay protocol engine: control-message routing, chunk accounting, the
//! transfer-end barrier, and verification.

use std::sync::Arc;

use serde::Deserialize;
use serde_json::{json, Value};

use crate::counter::TransferCounter;
use crate::session::{JoinOutcome, Mode, SharedSessionRegistry};
use crate::storage::StorageIndex;

use super::hub::{OutMessage, SocketHub};

#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    payload: Value,
}

/// Which peer role may originate a given control-message type.
#[derive(PartialEq)]
enum Originator {
    Sender,
    Receiver,
    Either,
}

fn originator_for(kind: &str) -> Option<Originator> {
    match kind {
        "transfer-start" | "chunk-meta" | "transfer-end" | "transfer-chunk" => {
            Some(Originator::Sender)
        }
        "receiver-ready" | "receiver-sink-ready" | "receiver-fatal" | "chunk-ack"
        | "chunk-nack" | "transfer-complete" | "verify-ok" | "verify-fail" => {
            Some(Originator::Receiver)
        }
        "signal" | "p2p-nat-info" => Some(Originator::Either),
        _ => None,
    }
}

pub struct RelayEngine {
    pub sessions: SharedSessionRegistry,
    pub hub: Arc<SocketHub>,
    pub storage: Arc<StorageIndex>,
    pub counter: Arc<TransferCounter>,
}

impl RelayEngine {
    /// Parse and route one text frame from `socket_id`. Protocol violations
    /// (unparseable JSON, wrong originator, missing pickup code) are dropped
    /// silently with a log — the server never signals the offending peer,
    /// to avoid leaking session existence to code-probing attackers.
    pub async fn handle_text(&self, socket_id: &str, text: &str) {
        let envelope: Envelope = match serde_json::from_str(text) {
            Ok(e) => e,
            Err(e) => {
                tracing::debug!(socket = %socket_id, error = %e, "dropping unparseable control frame");
                return;
            }
        };

        match envelope.kind.as_str() {
            "create-session" => self.handle_create(socket_id, envelope.payload).await,
            "join-session" => self.handle_join(socket_id, envelope.payload).await,
            "cancel" => self.handle_cancel(socket_id, envelope.payload).await,
            "heartbeat" => self.sessions.touch_by_socket(socket_id).await,
            "chunk-upload-claim" => self.handle_chunk_upload_claim(socket_id, envelope.payload).await,
            kind => self.handle_relay(socket_id, kind, envelope.payload).await,
        }
    }

    async fn handle_create(&self, socket_id: &str, payload: Value) {
        let mode = match payload.get("mode").and_then(Value::as_str) {
            Some("p2p") => Mode::P2p,
            Some("storage") => Mode::Storage,
            _ => Mode::Memory,
        };
        let file_name = payload
            .get("fileName")
            .and_then(Value::as_str)
            .unwrap_or("")
            .to_string();
        let size = payload.get("fileSize").and_then(Value::as_u64).unwrap_or(0);

        let code = self
            .sessions
            .create(mode, file_name, size, socket_id.to_string(), &self.storage)
            .await;

        self.counter.bump().await;

        self.hub
            .send_to(
                socket_id,
                OutMessage::Text(json!({"type": "session-created", "payload": {"pickupCode": code}}).to_string()),
            )
            .await;
    }

    async fn handle_join(&self, socket_id: &str, payload: Value) {
        let code = match payload.get("pickupCode").and_then(Value::as_str) {
            Some(c) => c.to_string(),
            None => return,
        };
        let mode = match payload.get("mode").and_then(Value::as_str) {
            Some("p2p") => Mode::P2p,
            Some("storage") => Mode::Storage,
            _ => Mode::Memory,
        };
        let capabilities = payload.get("capabilities").cloned().unwrap_or(json!({}));

        let outcome = self
            .sessions
            .join(&code, mode, capabilities.clone(), socket_id.to_string(), &self.storage)
            .await;

        match outcome {
            JoinOutcome::Joined { capabilities } => {
                if let Some(sender_socket) = self.sessions.with(&code, |s| s.sender_socket.clone()).await {
                    self.hub
                        .send_to(
                            &sender_socket,
                            OutMessage::Text(
                                json!({"type": "receiver-connected", "payload": {"capabilities": capabilities}})
                                    .to_string(),
                            ),
                        )
                        .await;
                }
                self.hub
                    .send_to(
                        socket_id,
                        OutMessage::Text(json!({"type": "session-joined", "payload": {"pickupCode": code}}).to_string()),
                    )
                    .await;
            }
            JoinOutcome::StorageMode => {
                self.hub
                    .send_to(
                        socket_id,
                        OutMessage::Text(json!({"type": "storage-mode", "payload": {"pickupCode": code}}).to_string()),
                    )
                    .await;
            }
            JoinOutcome::Locked => {
                self.hub
                    .send_to(
                        socket_id,
                        OutMessage::Text(json!({"type": "error", "payload": {"message": "locked"}}).to_string()),
                    )
                    .await;
            }
            JoinOutcome::NotFound => {
                self.hub
                    .send_to(
                        socket_id,
                        OutMessage::Text(json!({"type": "error", "payload": {"message": "unknown"}}).to_string()),
                    )
                    .await;
            }
        }
    }

    /// A socket advertises the fileID it's about to chunk-upload over HTTP,
    /// claiming ownership before the HTTP chunk POSTs begin. Claimed
    /// atomically so a second socket can't register the same fileID and
    /// corrupt the first upload's parts.
    async fn handle_chunk_upload_claim(&self, socket_id: &str, payload: Value) {
        let Some(file_id) = payload.get("fileID").and_then(Value::as_str) else {
            return;
        };
        let reply = match self.hub.claim_chunk_upload(file_id, socket_id).await {
            Ok(()) => json!({"type": "chunk-upload-claimed", "payload": {"fileID": file_id}}),
            Err(_) => json!({"type": "chunk-upload-denied", "payload": {"fileID": file_id}}),
        };
        self.hub.send_to(socket_id, OutMessage::Text(reply.to_string())).await;
    }

    async fn handle_cancel(&self, socket_id: &str, payload: Value) {
        let code = match payload.get("pickupCode").and_then(Value::as_str) {
            Some(c) => c.to_string(),
            None => return,
        };
        let peer = payload.get("socketID").and_then(Value::as_str).map(str::to_string);

        if self.sessions.remove(&code).await.is_none() {
            return;
        }
        tracing::info!(code = %code, socket = %socket_id, "session cancelled");

        if let Some(peer_id) = peer {
            if self.hub.contains(&peer_id).await {
                self.hub
                    .send_to(
                        &peer_id,
                        OutMessage::Text(json!({"type": "transfer-cancelled", "payload": {"pickupCode": code}}).to_string()),
                    )
                    .await;
            }
        }
    }

    /// The bulk of §4.6: originator checks, chunk bookkeeping, the
    /// transfer-end barrier, and hash verification.
    async fn handle_relay(&self, socket_id: &str, kind: &str, payload: Value) {
        let code = match payload
            .get("pickupCode")
            .and_then(Value::as_str)
            .map(str::to_string)
            .or(self.sessions.find_code_for_socket(socket_id).await)
        {
            Some(c) => c,
            None => return,
        };

        let Some(role) = originator_for(kind) else {
            tracing::debug!(kind, "dropping control frame of unknown type");
            return;
        };

        let (sender_socket, receiver_socket) = match self
            .sessions
            .with(&code, |s| (s.sender_socket.clone(), s.receiver_socket.clone()))
            .await
        {
            Some(v) => v,
            None => return,
        };

        let is_sender = sender_socket == socket_id;
        let is_receiver = receiver_socket.as_deref() == Some(socket_id);
        let allowed = match role {
            Originator::Sender => is_sender,
            Originator::Receiver => is_receiver,
            Originator::Either => is_sender || is_receiver,
        };
        if !allowed {
            tracing::debug!(kind, code = %code, socket = %socket_id, "dropping control frame from wrong originator");
            return;
        }

        self.sessions.touch(&code).await;

        match kind {
            "transfer-start" => self.on_transfer_start(&code, receiver_socket, payload).await,
            "chunk-meta" => self.on_chunk_meta(&code, receiver_socket, payload).await,
            "chunk-ack" => self.on_chunk_ack(&code, sender_socket, payload).await,
            "chunk-nack" => self.forward(&sender_socket, "chunk-nack", payload).await,
            "transfer-end" => self.on_transfer_end(&code, receiver_socket, payload).await,
            "verify-ok" => self.on_verify_ok(&code, sender_socket, payload).await,
            "verify-fail" => self.forward(&sender_socket, "verify-fail", payload).await,
            "signal" => {
                let other = if is_sender { receiver_socket } else { Some(sender_socket) };
                if let Some(target) = other {
                    self.forward(&target, "signal", payload).await;
                }
            }
            "p2p-nat-info" => self.on_p2p_nat_info(&code, is_sender, sender_socket, receiver_socket, payload).await,
            "transfer-chunk" => {
                if let Some(target) = receiver_socket {
                    self.forward(&target, "transfer-chunk", payload).await;
                }
            }
            "receiver-ready" | "receiver-sink-ready" | "receiver-fatal" | "transfer-complete" => {
                self.forward(&sender_socket, kind, payload).await;
            }
            _ => {}
        }
    }

    async fn forward(&self, target: &str, kind: &str, payload: Value) {
        self.hub
            .send_to(target, OutMessage::Text(json!({"type": kind, "payload": payload}).to_string()))
            .await;
    }

    async fn on_transfer_start(&self, code: &str, receiver_socket: Option<String>, payload: Value) {
        let expected_hash = payload
            .get("expectedHash")
            .and_then(Value::as_str)
            .map(|h| h.trim().to_lowercase());
        self.sessions
            .with_mut(code, |s| s.expected_hash = expected_hash)
            .await;
        if let Some(target) = receiver_socket {
            self.forward(&target, "transfer-start", payload).await;
        }
    }

    async fn on_chunk_meta(&self, code: &str, receiver_socket: Option<String>, payload: Value) {
        if let Some(index) = payload.get("chunkIndex").and_then(Value::as_u64) {
            self.sessions
                .with_mut(code, |s| {
                    s.pending_chunk_meta.insert(index, payload.clone());
                })
                .await;
        }
        if let Some(target) = receiver_socket {
            self.forward(&target, "chunk-meta", payload).await;
        }
    }

    async fn on_chunk_ack(&self, code: &str, sender_socket: String, payload: Value) {
        if let Some(index) = payload.get("chunkIndex").and_then(Value::as_u64) {
            let (now_empty, pending_end) = self
                .sessions
                .with_mut(code, |s| {
                    s.pending_chunk_meta.remove(&index);
                    let empty = s.pending_chunk_meta.is_empty();
                    let pending = if empty { s.pending_transfer_end.take() } else { None };
                    (empty, pending)
                })
                .await
                .unwrap_or((false, None));

            self.forward(&sender_socket, "chunk-ack", payload).await;

            if now_empty {
                if let Some(end_payload) = pending_end {
                    if let Some(receiver_socket) =
                        self.sessions.with(code, |s| s.receiver_socket.clone()).await.flatten()
                    {
                        self.forward(&receiver_socket, "transfer-end", end_payload).await;
                    }
                }
            }
        } else {
            self.forward(&sender_socket, "chunk-ack", payload).await;
        }
    }

    async fn on_transfer_end(&self, code: &str, receiver_socket: Option<String>, payload: Value) {
        let pending_empty = self
            .sessions
            .with(code, |s| s.pending_chunk_meta.is_empty())
            .await
            .unwrap_or(true);

        if pending_empty {
            match receiver_socket {
                Some(target) => self.forward(&target, "transfer-end", payload).await,
                None => {
                    // no receiver socket: this was an HTTP-stream download.
                    // Detaching the sink drops its mpsc::Sender, which ends
                    // the response body stream.
                    self.sessions.with_mut(code, |s| s.http_sink = None).await;
                }
            }
        } else {
            tracing::debug!(code, "parking transfer-end behind outstanding chunk acks");
            self.sessions
                .with_mut(code, |s| s.pending_transfer_end = Some(payload))
                .await;
        }
    }

    async fn on_verify_ok(&self, code: &str, sender_socket: String, payload: Value) {
        let actual_hash = payload
            .get("actualHash")
            .and_then(Value::as_str)
            .map(|h| h.trim().to_lowercase())
            .unwrap_or_default();

        let expected = self.sessions.with(code, |s| s.expected_hash.clone()).await.flatten();

        match expected {
            Some(expected) if expected != actual_hash => {
                let reason = format!(
                    "hash mismatch: expected {}, got {}",
                    expected, actual_hash
                );
                self.hub
                    .send_to(
                        &sender_socket,
                        OutMessage::Text(
                            json!({"type": "verify-fail", "payload": {"reason": reason, "expectedHash": expected, "actualHash": actual_hash}})
                                .to_string(),
                        ),
                    )
                    .await;
            }
            _ => {
                self.forward(&sender_socket, "verify-ok", payload).await;
            }
        }
    }

    async fn on_p2p_nat_info(
        &self,
        code: &str,
        is_sender: bool,
        sender_socket: String,
        receiver_socket: Option<String>,
        payload: Value,
    ) {
        let role = payload.get("role").and_then(Value::as_str).unwrap_or("");
        if (role == "sender") != is_sender {
            tracing::debug!(code, "dropping p2p-nat-info with mismatched role");
            return;
        }

        if is_sender {
            self.sessions.with_mut(code, |s| s.sender_nat = Some(payload.clone())).await;
            if let Some(target) = &receiver_socket {
                self.forward(target, "p2p-nat-info", payload).await;
            }
        } else {
            let sender_nat_already_known = self
                .sessions
                .with_mut(code, |s| {
                    s.receiver_nat = Some(payload.clone());
                    s.sender_nat.clone()
                })
                .await
                .flatten();

            self.forward(&sender_socket, "p2p-nat-info", payload).await;

            // Close the race where the receiver joins after the sender's
            // own p2p-nat-info was already sent: echo it back now.
            if let Some(sender_nat) = sender_nat_already_known {
                if let Some(target) = &receiver_socket {
                    self.forward(target, "p2p-nat-info", sender_nat).await;
                }
            }
        }
    }
}
