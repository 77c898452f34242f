//! Crate-wide error taxonomy and its HTTP mapping.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;

/// Result type alias used throughout the core.
pub type Result<T> = std::result::Result<T, Error>;

/// The error taxonomy surfaced to HTTP and WebSocket clients.
#[derive(Debug, Error)]
pub enum Error {
    #[error("feature disabled")]
    FeatureDisabled,

    #[error("storage quota exceeded")]
    QuotaExceeded,

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("unknown pickup code")]
    Unknown,

    #[error("pickup code locked")]
    Locked,

    #[error("unauthorized")]
    Unauthorized,

    #[error("range not satisfiable")]
    RangeUnsatisfiable { size: u64 },

    #[error("internal error: {0}")]
    Internal(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl From<&str> for Error {
    fn from(msg: &str) -> Self {
        Error::Internal(msg.to_string())
    }
}

impl From<String> for Error {
    fn from(msg: String) -> Self {
        Error::Internal(msg)
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = match &self {
            Error::FeatureDisabled | Error::QuotaExceeded | Error::Locked => StatusCode::FORBIDDEN,
            Error::BadRequest(_) => StatusCode::BAD_REQUEST,
            Error::Unknown => StatusCode::NOT_FOUND,
            Error::Unauthorized => StatusCode::UNAUTHORIZED,
            Error::RangeUnsatisfiable { .. } => StatusCode::RANGE_NOT_SATISFIABLE,
            Error::Internal(_) | Error::Io(_) | Error::Json(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };

        let body = serde_json::json!({
            "success": false,
            "message": self.to_string(),
        });

        let mut response = (status, axum::Json(body)).into_response();
        if let Error::RangeUnsatisfiable { size } = self {
            response.headers_mut().insert(
                axum::http::header::CONTENT_RANGE,
                format!("bytes */{}", size).parse().unwrap(),
            );
        }
        response
    }
}
