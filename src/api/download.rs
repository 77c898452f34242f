//! `GET /api/download-stored/<code>` and `GET /api/download/<code>`.

use axum::{
    body::Body,
    extract::{Path, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
};
use serde_json::json;

use crate::error::{Error, Result};
use crate::session::HttpSink;
use crate::state::AppState;
use crate::storage::{engine, DeleteMode};

/// Range-capable download of a stored file.
pub async fn download_stored(
    State(state): State<AppState>,
    Path(code): Path<String>,
    headers: HeaderMap,
) -> Result<Response> {
    let Some(file) = state.storage.get(&code).await else {
        state.sessions.record_unknown_download_attempt(&code).await?;
        return Err(Error::Unknown);
    };

    let full_path = state.upload_dir.join(&file.stored_name);
    let range_header = headers.get(header::RANGE).and_then(|v| v.to_str().ok());
    let range = match engine::parse_range(range_header, file.size) {
        None => None,
        Some(Ok(r)) => Some(r),
        Some(Err(e)) => return Err(e),
    };

    let bytes = engine::read_range(&full_path, range).await?;

    let mut response = if let Some(r) = range {
        let mut resp = (StatusCode::PARTIAL_CONTENT, bytes).into_response();
        resp.headers_mut().insert(
            header::CONTENT_RANGE,
            HeaderValue::from_str(&format!("bytes {}-{}/{}", r.start, r.end, file.size)).unwrap(),
        );
        resp
    } else {
        (StatusCode::OK, bytes).into_response()
    };

    let h = response.headers_mut();
    h.insert(header::ACCEPT_RANGES, HeaderValue::from_static("bytes"));
    h.insert(
        header::CONTENT_LENGTH,
        HeaderValue::from_str(&range.map(|r| r.len()).unwrap_or(file.size).to_string()).unwrap(),
    );
    h.insert("X-File-SHA256", HeaderValue::from_str(&file.hash).unwrap());
    h.insert(
        header::CONTENT_DISPOSITION,
        HeaderValue::from_str(&format!("attachment; filename=\"{}\"", file.original_name)).unwrap(),
    );

    if file.delete_mode == DeleteMode::Download {
        // deleted only after the response has been fully built, per §4.3 —
        // a partial-range consumer can't resume once this fires.
        state.storage.remove(&code).await?;
    }

    Ok(response)
}

/// Attaches the HTTP-stream bridge to a live active session.
pub async fn download_bridge(State(state): State<AppState>, Path(code): Path<String>) -> Result<Response> {
    let Some((sender_socket, _, _)) = state.sessions.get_snapshot(&code).await else {
        state.sessions.record_unknown_download_attempt(&code).await?;
        return Err(Error::Unknown);
    };

    let (tx, body) = crate::http_stream::new_bridge();
    let (file_name, size) = state
        .sessions
        .with_mut(&code, |s| {
            s.http_sink = Some(HttpSink { tx });
            (s.file_name.clone(), s.size)
        })
        .await
        .ok_or(Error::Unknown)?;

    state
        .hub
        .send_to(
            &sender_socket,
            crate::socket::OutMessage::Text(
                json!({"type": "start-transfer", "payload": {"pickupCode": code, "dataPlane": "http-stream"}}).to_string(),
            ),
        )
        .await;

    let encoded_name = percent_encode_filename(&file_name);
    let mut response = Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_LENGTH, size)
        .header(
            header::CONTENT_DISPOSITION,
            format!(
                "attachment; filename=\"{}\"; filename*=UTF-8''{}",
                sanitize_for_quoted_string(&file_name),
                encoded_name
            ),
        )
        .body(body)
        .map_err(|e| Error::Internal(e.to_string()))?;

    response
        .headers_mut()
        .insert(header::ACCEPT_RANGES, HeaderValue::from_static("none"));

    Ok(response)
}

fn sanitize_for_quoted_string(name: &str) -> String {
    name.replace('"', "_")
}

/// RFC 5987 `filename*` percent-encoding.
fn percent_encode_filename(name: &str) -> String {
    let mut out = String::new();
    for byte in name.as_bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'.' | b'_' | b'~' => out.push(*byte as char),
            _ => out.push_str(&format!("%{:02X}", byte)),
        }
    }
    out
}
