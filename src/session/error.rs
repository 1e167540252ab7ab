//! # Session Errors
//!
//! Every failure the clip pipeline can produce, from the content validator up to the
//! lifecycle manager. Handlers never see raw `std::io::Error`s or `reqwest` errors;
//! everything is translated into one of these variants first.
//!
//! ## Error classes:
//! - **Validation**: bad input detected before any mutation (unsupported content,
//!   missing field, malformed session id, oversized payload)
//! - **DuplicateSource**: the URL was already ingested for this session
//! - **NotFound**: nothing to merge for this session
//! - **Processing**: no clip could be decoded, or the encoder failed
//! - **Transport**: the remote fetch failed
//! - **Io**: the storage backend failed

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("{0}")]
    Validation(String),

    #[error("source '{url}' was already ingested for session '{session}'")]
    DuplicateSource { session: String, url: String },

    #[error("no audio clips found for session '{0}'")]
    NotFound(String),

    #[error("processing failed for session '{session}': {reason}")]
    Processing { session: String, reason: String },

    #[error("failed to fetch '{url}': {reason}")]
    Transport { url: String, reason: String },

    #[error("storage error: {0}")]
    Io(#[from] std::io::Error),
}

impl SessionError {
    /// Content was sniffed as `detected` but the channel only accepts `allowed`.
    pub fn unsupported_content(detected: Option<&str>, allowed: &[&str]) -> Self {
        SessionError::Validation(format!(
            "unsupported content type '{}'; allowed types: {}",
            detected.unwrap_or("unknown"),
            allowed.join(", ")
        ))
    }

    pub fn processing(session: impl Into<String>, reason: impl Into<String>) -> Self {
        SessionError::Processing {
            session: session.into(),
            reason: reason.into(),
        }
    }

    pub fn transport(url: impl Into<String>, reason: impl ToString) -> Self {
        SessionError::Transport {
            url: url.into(),
            reason: reason.to_string(),
        }
    }
}

pub type SessionResult<T> = Result<T, SessionError>;
