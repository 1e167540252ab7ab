//! # Remote Fetcher
//!
//! Downloads a clip from a caller-supplied URL. One attempt only: retries would make
//! ingestion latency unpredictable, and the caller can simply resubmit.
//!
//! ## Guarantees:
//! - **Scheme**: `//host/path` is treated as `https://host/path`; only http(s) is allowed
//! - **Timeout**: every request is bounded by `fetch.timeout_secs`
//! - **All or nothing**: any transport problem (DNS, timeout, reset, non-2xx) becomes a
//!   `Transport` error naming the URL, and no partial body is ever returned
//! - **Size**: bodies above `limits.max_clip_bytes` are refused

use futures_util::StreamExt;
use std::time::Duration;
use tracing::{debug, warn};

use crate::session::{SessionError, SessionResult};

pub struct RemoteFetcher {
    client: reqwest::Client,
}

impl RemoteFetcher {
    pub fn new(timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { client })
    }

    /// Canonical form of a source URL; also the dedup key.
    pub fn normalize_url(raw: &str) -> SessionResult<String> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(SessionError::Validation("url is required".to_string()));
        }

        let candidate = match trimmed.strip_prefix("//") {
            Some(rest) => format!("https://{}", rest),
            None => trimmed.to_string(),
        };

        let parsed = reqwest::Url::parse(&candidate)
            .map_err(|e| SessionError::Validation(format!("invalid url '{}': {}", trimmed, e)))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(SessionError::Validation(format!(
                "unsupported url scheme '{}', expected http or https",
                parsed.scheme()
            )));
        }
        if parsed.host_str().is_none() {
            return Err(SessionError::Validation(format!("url '{}' has no host", trimmed)));
        }
        Ok(parsed.to_string())
    }

    /// Fetch `url` (already normalised) into memory.
    pub async fn fetch(&self, url: &str, max_bytes: usize) -> SessionResult<Vec<u8>> {
        debug!(url = %url, "Fetching remote clip");

        let response = self
            .client
            .get(url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| {
                warn!(url = %url, error = %e, "Remote fetch failed");
                SessionError::transport(url, e)
            })?;

        if let Some(length) = response.content_length() {
            if length as usize > max_bytes {
                return Err(too_large(url, length as usize, max_bytes));
            }
        }

        let mut body = Vec::new();
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| {
                warn!(url = %url, error = %e, "Remote fetch interrupted");
                SessionError::transport(url, e)
            })?;
            if body.len() + chunk.len() > max_bytes {
                return Err(too_large(url, body.len() + chunk.len(), max_bytes));
            }
            body.extend_from_slice(&chunk);
        }

        debug!(url = %url, bytes = body.len(), "Remote clip fetched");
        Ok(body)
    }
}

fn too_large(url: &str, size: usize, max_bytes: usize) -> SessionError {
    SessionError::Validation(format!(
        "remote file '{}' is too large: {} bytes (max: {} bytes)",
        url, size, max_bytes
    ))
}

/// Filename for a fetched clip: last path segment of the URL.
pub fn filename_from_url(url: &str) -> String {
    reqwest::Url::parse(url)
        .ok()
        .and_then(|u| {
            u.path_segments()
                .and_then(|mut segments| segments.next_back().map(|s| s.to_string()))
        })
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "remote".to_string())
}
