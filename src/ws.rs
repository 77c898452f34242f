//! WebSocket transport: per-socket read/write loops, heartbeat, and
//! teardown on disconnect.

use std::time::Duration;

use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::Response,
};
use futures::{SinkExt, StreamExt};
use tokio::time::{interval, sleep, Instant};

use crate::socket::OutMessage;
use crate::state::AppState;

const PING_INTERVAL: Duration = Duration::from_secs(60);
const WRITE_TIMEOUT: Duration = Duration::from_secs(10);
/// Max read size: 5 GiB.
const MAX_MESSAGE_SIZE: usize = 5 * 1024 * 1024 * 1024;

pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.max_message_size(MAX_MESSAGE_SIZE)
        .on_upgrade(move |socket| handle_socket(socket, state))
}

fn is_heartbeat(text: &str) -> bool {
    serde_json::from_str::<serde_json::Value>(text)
        .ok()
        .and_then(|v| v.get("type").and_then(|t| t.as_str().map(str::to_string)))
        .as_deref()
        == Some("heartbeat")
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let (mut sink, mut stream) = socket.split();
    let (handle, mut outbound) = state.hub.register().await;
    let socket_id = handle.id.clone();
    tracing::info!(socket = %socket_id, "socket connected");

    let mut ping_ticker = interval(PING_INTERVAL);
    let session_timeout = Duration::from_millis(state.config.snapshot().await.security.session_timeout_ms);
    let mut read_deadline = Box::pin(sleep(session_timeout));

    loop {
        tokio::select! {
            _ = ping_ticker.tick() => {
                if tokio::time::timeout(WRITE_TIMEOUT, sink.send(Message::Ping(Vec::new()))).await.is_err() {
                    break;
                }
            }
            () = &mut read_deadline => {
                tracing::debug!(socket = %socket_id, "read deadline expired, disconnecting");
                break;
            }
            outgoing = outbound.recv() => {
                let Some(msg) = outgoing else { break };
                let frame = match msg {
                    OutMessage::Text(text) => Message::Text(text),
                    OutMessage::Binary(bytes) => Message::Binary(bytes.to_vec()),
                };
                if tokio::time::timeout(WRITE_TIMEOUT, sink.send(frame)).await.is_err() {
                    break;
                }
            }
            incoming = stream.next() => {
                match incoming {
                    Some(Ok(Message::Text(text))) => {
                        if is_heartbeat(&text) {
                            read_deadline.as_mut().reset(Instant::now() + session_timeout);
                        }
                        state.relay.handle_text(&socket_id, &text).await;
                    }
                    Some(Ok(Message::Binary(bytes))) => {
                        forward_binary(&state, &socket_id, bytes.into()).await;
                    }
                    Some(Ok(Message::Pong(_))) => {
                        read_deadline.as_mut().reset(Instant::now() + session_timeout);
                        state.sessions.touch_by_socket(&socket_id).await;
                    }
                    Some(Ok(Message::Ping(_))) => {}
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(e)) => {
                        tracing::debug!(socket = %socket_id, error = %e, "socket read error");
                        break;
                    }
                }
            }
        }
    }

    teardown(&state, &socket_id).await;
}

/// Binary frames are opaque and forwarded verbatim: to the receiver socket,
/// or into the HTTP-stream bridge if one is attached to the session.
pub async fn forward_binary(state: &AppState, socket_id: &str, bytes: bytes::Bytes) {
    let Some(code) = state.sessions.find_code_for_socket(socket_id).await else {
        return;
    };
    let target = state
        .sessions
        .with(&code, |s| (s.receiver_socket.clone(), s.sender_socket.clone()))
        .await;
    let Some((receiver_socket, sender_socket)) = target else {
        return;
    };
    if sender_socket != socket_id {
        // only the sender's binary frames are forwarded
        return;
    }

    if let Some(tx) = state.sessions.with(&code, |s| s.http_sink.as_ref().map(|h| h.tx.clone())).await.flatten() {
        if tx.send(bytes).await.is_err() {
            tracing::debug!(code = %code, "http-stream receiver aborted, dropping frame");
        }
        return;
    }

    if let Some(receiver) = receiver_socket {
        state.hub.send_to(&receiver, OutMessage::Binary(bytes)).await;
    }
}

/// On disconnect: hub entry removed, sessions referencing this socket are
/// cleaned up, any orphan chunk directory is removed.
pub async fn teardown(state: &AppState, socket_id: &str) {
    tracing::info!(socket = %socket_id, "socket disconnected, tearing down");

    if let Some(file_id) = state.hub.unregister(socket_id).await {
        let dir = state.upload_dir.join("chunks").join(&file_id);
        if let Err(e) = tokio::fs::remove_dir_all(&dir).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!(file_id = %file_id, error = %e, "failed to remove orphan chunk directory");
            }
        }
    }

    for code in state.sessions.codes_for_socket(socket_id).await {
        state.sessions.remove(&code).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::Mode;

    #[tokio::test]
    async fn teardown_removes_sessions_owned_by_socket() {
        let state = AppState::new_for_test().await;
        let code = state
            .sessions
            .create(Mode::Memory, "a.bin".into(), 10, "sender01".into(), &state.storage)
            .await;

        teardown(&state, "sender01").await;
        assert!(!state.sessions.contains(&code).await);
    }
}
