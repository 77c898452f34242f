//! Black-box end-to-end scenarios covering the rendezvous, relay, and
//! stored-file paths.

use axum::body::Body;
use axum::http::{header, Method, Request, StatusCode};
use dropyard::socket::OutMessage;
use dropyard::AppState;
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use tower::ServiceExt;

async fn drain_text(rx: &mut tokio::sync::mpsc::Receiver<OutMessage>) -> Value {
    loop {
        match rx.recv().await.expect("socket closed before expected message") {
            OutMessage::Text(text) => return serde_json::from_str(&text).unwrap(),
            OutMessage::Binary(_) => continue,
        }
    }
}

/// Scenario 1: memory relay happy path.
#[tokio::test]
async fn memory_relay_happy_path() {
    let state = AppState::new_for_test().await;
    let (sender, mut sender_rx) = state.hub.register().await;
    let (receiver, mut receiver_rx) = state.hub.register().await;

    state
        .relay
        .handle_text(
            &sender.id,
            &json!({"type": "create-session", "payload": {"mode": "memory", "fileName": "report.pdf", "fileSize": 5 * 1024 * 1024}})
                .to_string(),
        )
        .await;
    let created = drain_text(&mut sender_rx).await;
    let code = created["payload"]["pickupCode"].as_str().unwrap().to_string();

    state
        .relay
        .handle_text(&receiver.id, &json!({"type": "join-session", "payload": {"pickupCode": code}}).to_string())
        .await;
    let _receiver_connected = drain_text(&mut sender_rx).await;
    let _session_joined = drain_text(&mut receiver_rx).await;

    for i in 0..5u64 {
        state
            .relay
            .handle_text(
                &sender.id,
                &json!({"type": "chunk-meta", "payload": {"pickupCode": code, "chunkIndex": i}}).to_string(),
            )
            .await;
        let forwarded = drain_text(&mut receiver_rx).await;
        assert_eq!(forwarded["payload"]["chunkIndex"], i);

        state
            .relay
            .handle_text(
                &receiver.id,
                &json!({"type": "chunk-ack", "payload": {"pickupCode": code, "chunkIndex": i}}).to_string(),
            )
            .await;
        let ack = drain_text(&mut sender_rx).await;
        assert_eq!(ack["payload"]["chunkIndex"], i);
    }

    state
        .relay
        .handle_text(&sender.id, &json!({"type": "transfer-end", "payload": {"pickupCode": code}}).to_string())
        .await;
    let transfer_end = drain_text(&mut receiver_rx).await;
    assert_eq!(transfer_end["type"], "transfer-end");

    state
        .relay
        .handle_text(
            &receiver.id,
            &json!({"type": "verify-ok", "payload": {"pickupCode": code, "actualHash": "abc"}}).to_string(),
        )
        .await;
    let verify_ok = drain_text(&mut sender_rx).await;
    assert_eq!(verify_ok["type"], "verify-ok");

    assert_eq!(state.config.snapshot().await.stats.total, 1);

    dropyard::ws::teardown(&state, &sender.id).await;
    dropyard::ws::teardown(&state, &receiver.id).await;
    assert!(!state.sessions.contains(&code).await);
}

/// Scenario 2: transfer-end barrier — not delivered until the final ack.
#[tokio::test]
async fn transfer_end_waits_for_outstanding_acks() {
    let state = AppState::new_for_test().await;
    let (sender, mut sender_rx) = state.hub.register().await;
    let (receiver, mut receiver_rx) = state.hub.register().await;

    state
        .relay
        .handle_text(
            &sender.id,
            &json!({"type": "create-session", "payload": {"mode": "memory", "fileName": "a.bin", "fileSize": 2}}).to_string(),
        )
        .await;
    let created = drain_text(&mut sender_rx).await;
    let code = created["payload"]["pickupCode"].as_str().unwrap().to_string();

    state
        .relay
        .handle_text(&receiver.id, &json!({"type": "join-session", "payload": {"pickupCode": code}}).to_string())
        .await;
    drain_text(&mut sender_rx).await;
    drain_text(&mut receiver_rx).await;

    for i in 0..2u64 {
        state
            .relay
            .handle_text(&sender.id, &json!({"type": "chunk-meta", "payload": {"pickupCode": code, "chunkIndex": i}}).to_string())
            .await;
        drain_text(&mut receiver_rx).await;
    }

    state
        .relay
        .handle_text(&sender.id, &json!({"type": "transfer-end", "payload": {"pickupCode": code}}).to_string())
        .await;

    // neither ack has landed yet: transfer-end must not reach the receiver
    assert!(receiver_rx.try_recv().is_err());

    state
        .relay
        .handle_text(&receiver.id, &json!({"type": "chunk-ack", "payload": {"pickupCode": code, "chunkIndex": 0}}).to_string())
        .await;
    drain_text(&mut sender_rx).await;
    assert!(receiver_rx.try_recv().is_err(), "still one outstanding chunk-meta");

    state
        .relay
        .handle_text(&receiver.id, &json!({"type": "chunk-ack", "payload": {"pickupCode": code, "chunkIndex": 1}}).to_string())
        .await;
    drain_text(&mut sender_rx).await;
    let transfer_end = drain_text(&mut receiver_rx).await;
    assert_eq!(transfer_end["type"], "transfer-end");
    assert!(receiver_rx.try_recv().is_err(), "transfer-end delivered exactly once");
}

/// Scenario 3: hash mismatch synthesizes verify-fail, never forwards verify-ok.
#[tokio::test]
async fn hash_mismatch_synthesizes_verify_fail() {
    let state = AppState::new_for_test().await;
    let (sender, mut sender_rx) = state.hub.register().await;
    let (receiver, mut receiver_rx) = state.hub.register().await;

    state
        .relay
        .handle_text(
            &sender.id,
            &json!({"type": "create-session", "payload": {"mode": "memory", "fileName": "a.bin", "fileSize": 1}}).to_string(),
        )
        .await;
    let created = drain_text(&mut sender_rx).await;
    let code = created["payload"]["pickupCode"].as_str().unwrap().to_string();

    state
        .relay
        .handle_text(&receiver.id, &json!({"type": "join-session", "payload": {"pickupCode": code}}).to_string())
        .await;
    drain_text(&mut sender_rx).await;
    drain_text(&mut receiver_rx).await;

    state
        .relay
        .handle_text(
            &sender.id,
            &json!({"type": "transfer-start", "payload": {"pickupCode": code, "expectedHash": "aabbccddeebb"}}).to_string(),
        )
        .await;
    drain_text(&mut receiver_rx).await;

    state
        .relay
        .handle_text(
            &receiver.id,
            &json!({"type": "verify-ok", "payload": {"pickupCode": code, "actualHash": "aabbccddeecc"}}).to_string(),
        )
        .await;

    let reply = drain_text(&mut sender_rx).await;
    assert_eq!(reply["type"], "verify-fail");
    let reason = reply["payload"]["reason"].as_str().unwrap();
    assert!(reason.contains("aabbccddeebb"));
    assert!(reason.contains("aabbccddeecc"));
}

/// Scenario 4: storage range resume.
#[tokio::test]
async fn storage_range_resume_concatenates_to_original() {
    let state = AppState::new_for_test().await;

    let body = vec![0x5Au8; 10 * 1024 * 1024];
    let mut hasher = Sha256::new();
    hasher.update(&body);
    let expected_hash = hex::encode(hasher.finalize());

    let boundary = "X-BOUNDARY-X";
    let mut multipart = Vec::new();
    multipart.extend_from_slice(format!("--{boundary}\r\n").as_bytes());
    multipart.extend_from_slice(b"Content-Disposition: form-data; name=\"file\"; filename=\"big.bin\"\r\n");
    multipart.extend_from_slice(b"Content-Type: application/octet-stream\r\n\r\n");
    multipart.extend_from_slice(&body);
    multipart.extend_from_slice(format!("\r\n--{boundary}--\r\n").as_bytes());

    let app = dropyard::app(state.clone());
    let upload_request = Request::builder()
        .method(Method::POST)
        .uri("/api/upload-file")
        .header(header::CONTENT_TYPE, format!("multipart/form-data; boundary={boundary}"))
        .body(Body::from(multipart))
        .unwrap();
    let response = app.clone().oneshot(upload_request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let uploaded: Value = serde_json::from_slice(&bytes).unwrap();
    let code = uploaded["code"].as_str().unwrap().to_string();
    assert_eq!(uploaded["hash"].as_str().unwrap(), expected_hash);

    let first_half = app
        .clone()
        .oneshot(
            Request::builder()
                .uri(format!("/api/download-stored/{code}"))
                .header(header::RANGE, "bytes=0-4194303")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(first_half.status(), StatusCode::PARTIAL_CONTENT);
    assert_eq!(
        first_half.headers().get(header::CONTENT_RANGE).unwrap(),
        "bytes 0-4194303/10485760"
    );
    let first_bytes = axum::body::to_bytes(first_half.into_body(), usize::MAX).await.unwrap();

    let second_half = app
        .clone()
        .oneshot(
            Request::builder()
                .uri(format!("/api/download-stored/{code}"))
                .header(header::RANGE, "bytes=4194304-")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(second_half.status(), StatusCode::PARTIAL_CONTENT);
    let second_bytes = axum::body::to_bytes(second_half.into_body(), usize::MAX).await.unwrap();

    let mut concatenated = first_bytes.to_vec();
    concatenated.extend_from_slice(&second_bytes);
    assert_eq!(concatenated, body);
}

/// Scenario 5: lockout after maxCodeAttempts.
#[tokio::test]
async fn unknown_pickup_code_locks_after_max_attempts() {
    let state = AppState::new_for_test().await;
    state.config.mutate(|cfg| cfg.security.max_code_attempts = 3).await.unwrap();

    let app = dropyard::app(state);
    for _ in 0..3 {
        let response = app
            .clone()
            .oneshot(Request::builder().uri("/api/pickup-code/ZZZZ").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["exists"], false);
    }

    let response = app
        .clone()
        .oneshot(Request::builder().uri("/api/pickup-code/ZZZZ").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

/// Scenario 6: HTTP-stream splice.
#[tokio::test]
async fn http_stream_splice_byte_for_byte() {
    let state = AppState::new_for_test().await;
    let (sender, mut sender_rx) = state.hub.register().await;

    state
        .relay
        .handle_text(
            &sender.id,
            &json!({"type": "create-session", "payload": {"mode": "memory", "fileName": "a.bin", "fileSize": 1024 * 1024}}).to_string(),
        )
        .await;
    let created = drain_text(&mut sender_rx).await;
    let code = created["payload"]["pickupCode"].as_str().unwrap().to_string();

    let app = dropyard::app(state.clone());
    let download_code = code.clone();
    let download_task = tokio::spawn(async move {
        app.oneshot(
            Request::builder()
                .uri(format!("/api/download/{download_code}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap()
    });

    // let the handler attach the bridge before we push the start-transfer check
    tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    let start_transfer = drain_text(&mut sender_rx).await;
    assert_eq!(start_transfer["type"], "start-transfer");
    assert_eq!(start_transfer["payload"]["dataPlane"], "http-stream");

    let payload = vec![0x7Eu8; 1024 * 1024];
    dropyard::ws::forward_binary(&state, &sender.id, bytes::Bytes::from(payload.clone())).await;

    state
        .relay
        .handle_text(&sender.id, &json!({"type": "transfer-end", "payload": {"pickupCode": code}}).to_string())
        .await;

    let response = download_task.await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    assert_eq!(bytes.to_vec(), payload);
}
