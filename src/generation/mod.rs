//! # Image Generation Jobs
//!
//! Thin client for the external image-generation API plus the local job log that
//! records finished jobs.
//!
//! ## Flow:
//! 1. `POST /generate-image` submits a prompt, retried per [`RetryPolicy`]
//! 2. `GET /check-status/{id}` polls the job; once it is `completed` or `failed` the job
//!    data is appended to the [`JobLog`]

pub mod client;
pub mod job_log;
pub mod retry;

pub use client::{GenerationClient, JobTicket};
pub use job_log::JobLog;
pub use retry::RetryPolicy;

use thiserror::Error;

/// Job states after which the job will not change again.
pub const TERMINAL_STATUSES: [&str; 2] = ["completed", "failed"];

pub fn is_terminal(status: &str) -> bool {
    TERMINAL_STATUSES.contains(&status)
}

#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("generation API request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("generation API returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("unexpected generation API response: {0}")]
    Malformed(String),

    #[error("job log error: {0}")]
    Log(String),
}

pub type GenerationResult<T> = Result<T, GenerationError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_statuses() {
        assert!(is_terminal("completed"));
        assert!(is_terminal("failed"));
        assert!(!is_terminal("pending"));
        assert!(!is_terminal("in-progress"));
    }
}
