//! # HTTP Error Mapping
//!
//! Converts failures from every layer into JSON error responses.
//!
//! ## Layers:
//! - **`SessionError`** (clip pipeline) and **`GenerationError`** (image jobs) are the
//!   domain errors; handlers bubble them up with `?`
//! - **`AppError`** is the only error type handlers return. It implements actix-web's
//!   `ResponseError`, so every failure leaves the service in the same shape:
//!
//! ```json
//! {
//!   "error": {
//!     "type": "duplicate_source",
//!     "message": "source 'https://cdn/a.mp3' was already ingested for session 'demo'",
//!     "timestamp": "2025-01-01T12:00:00Z"
//!   }
//! }
//! ```

use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError};
use serde_json::json;
use std::fmt;

use crate::generation::GenerationError;
use crate::session::SessionError;

/// Error returned by every handler.
///
/// ## Status mapping:
/// - `ValidationError` / `BadRequest` → 400
/// - `NotFound` → 404
/// - `DuplicateSource` → 409
/// - `Transport` / `Upstream` → 502 (a remote party misbehaved, not the caller)
/// - `Processing` / `Internal` / `ConfigError` → 500
#[derive(Debug)]
pub enum AppError {
    Internal(String),
    BadRequest(String),
    NotFound(String),
    ConfigError(String),
    ValidationError(String),
    /// The URL is already part of the session
    DuplicateSource(String),
    /// Clips exist but no artifact could be produced
    Processing(String),
    /// Fetching a caller-supplied URL failed
    Transport(String),
    /// The image generation API failed or answered nonsense
    Upstream(String),
}

impl AppError {
    fn parts(&self) -> (StatusCode, &'static str, &str) {
        match self {
            AppError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error", msg.as_str()),
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "bad_request", msg.as_str()),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, "not_found", msg.as_str()),
            AppError::ConfigError(msg) => (StatusCode::INTERNAL_SERVER_ERROR, "config_error", msg.as_str()),
            AppError::ValidationError(msg) => (StatusCode::BAD_REQUEST, "validation_error", msg.as_str()),
            AppError::DuplicateSource(msg) => (StatusCode::CONFLICT, "duplicate_source", msg.as_str()),
            AppError::Processing(msg) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "processing_error", msg.as_str())
            }
            AppError::Transport(msg) => (StatusCode::BAD_GATEWAY, "transport_error", msg.as_str()),
            AppError::Upstream(msg) => (StatusCode::BAD_GATEWAY, "upstream_error", msg.as_str()),
        }
    }

    /// Machine-readable error type, as it appears in the response body.
    pub fn error_type(&self) -> &'static str {
        self.parts().1
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::Internal(msg) => write!(f, "Internal error: {}", msg),
            AppError::BadRequest(msg) => write!(f, "Bad request: {}", msg),
            AppError::NotFound(msg) => write!(f, "Not found: {}", msg),
            AppError::ConfigError(msg) => write!(f, "Configuration error: {}", msg),
            AppError::ValidationError(msg) => write!(f, "Validation error: {}", msg),
            AppError::DuplicateSource(msg) => write!(f, "Duplicate source: {}", msg),
            AppError::Processing(msg) => write!(f, "Processing error: {}", msg),
            AppError::Transport(msg) => write!(f, "Transport error: {}", msg),
            AppError::Upstream(msg) => write!(f, "Upstream error: {}", msg),
        }
    }
}

impl ResponseError for AppError {
    fn status_code(&self) -> StatusCode {
        self.parts().0
    }

    fn error_response(&self) -> HttpResponse {
        let (status, error_type, message) = self.parts();
        HttpResponse::build(status).json(json!({
            "error": {
                "type": error_type,
                "message": message,
                "timestamp": chrono::Utc::now().to_rfc3339()
            }
        }))
    }
}

impl From<SessionError> for AppError {
    fn from(err: SessionError) -> Self {
        let message = err.to_string();
        match err {
            SessionError::Validation(_) => AppError::ValidationError(message),
            SessionError::DuplicateSource { .. } => AppError::DuplicateSource(message),
            SessionError::NotFound(_) => AppError::NotFound(message),
            SessionError::Processing { .. } => AppError::Processing(message),
            SessionError::Transport { .. } => AppError::Transport(message),
            SessionError::Io(_) => AppError::Internal(message),
        }
    }
}

impl From<GenerationError> for AppError {
    fn from(err: GenerationError) -> Self {
        match err {
            GenerationError::Log(_) => AppError::Internal(err.to_string()),
            _ => AppError::Upstream(err.to_string()),
        }
    }
}

/// Anything that reaches the boundary as `anyhow` is unexpected.
impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::Internal(err.to_string())
    }
}

/// Malformed request bodies are the caller's fault.
impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::BadRequest(format!("JSON parsing error: {}", err))
    }
}

impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        AppError::ConfigError(err.to_string())
    }
}

pub type AppResult<T> = Result<T, AppError>;
