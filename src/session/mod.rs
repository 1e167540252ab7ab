//! # Clip Sessions
//!
//! A session is a caller-chosen identifier that scopes a set of audio clips waiting to
//! be merged. Sessions are never registered up front: the first ingestion creates the
//! storage namespace, and the first successful merge deletes it again. After that the
//! same id can be reused and starts out empty.
//!
//! ## Session Lifecycle:
//! 1. **Empty**: nothing stored under the id (implicit)
//! 2. **Active**: one or more clips stored, more can be appended
//! 3. **Merging**: a merge is reading the clips
//! 4. **Terminal**: namespace deleted; the id may start over at **Empty**
//!
//! ## Components:
//! - **backend**: storage capability trait plus the local filesystem implementation
//! - **store**: clip naming, ordering, descriptors and metadata on top of a backend
//! - **dedup**: rejects a second ingestion of the same source URL
//! - **lifecycle**: merge orchestration and guaranteed namespace reclamation

pub mod backend;
pub mod dedup;
pub mod error;
pub mod lifecycle;
pub mod store;

pub use error::{SessionError, SessionResult};
pub use lifecycle::{MergedArtifact, SessionLifecycle};
pub use store::SessionStore;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

const MAX_SESSION_ID_LEN: usize = 128;

/// Validated session identifier.
///
/// The id is opaque to the service, but it doubles as a directory name, so only
/// `[A-Za-z0-9._-]` is accepted and it may not start with a dot.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionId(String);

impl SessionId {
    pub fn parse(raw: &str) -> SessionResult<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(SessionError::Validation("session_id is required".to_string()));
        }
        if trimmed.len() > MAX_SESSION_ID_LEN {
            return Err(SessionError::Validation(format!(
                "session_id must be at most {} characters",
                MAX_SESSION_ID_LEN
            )));
        }
        if trimmed.starts_with('.')
            || !trimmed
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
        {
            return Err(SessionError::Validation(format!(
                "invalid session_id '{}': use letters, digits, '.', '_' or '-'",
                trimmed
            )));
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Download name of the merged artifact.
    pub fn artifact_filename(&self) -> String {
        format!("{}.mp3", self.0)
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// How a clip entered the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    Uploaded,
    Fetched,
}

/// One stored audio blob.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Clip {
    /// Generated blob name, `<stamp>-<uuid>.<ext>`
    pub name: String,
    /// Ordering key for merges
    pub created_at: DateTime<Utc>,
    pub source: SourceKind,
    pub original_filename: String,
    /// Sniffed at ingestion, always on the audio allow-list
    pub content_type: String,
}

/// Per-session dedup record of ingested source URLs.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Metadata {
    #[serde(default)]
    pub source_urls: BTreeSet<String>,
}

impl Metadata {
    pub fn contains(&self, url: &str) -> bool {
        self.source_urls.contains(url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_id_accepts_opaque_tokens() {
        for raw in ["s1", "user-42_take.3", "ABCdef0123"] {
            assert_eq!(SessionId::parse(raw).unwrap().as_str(), raw);
        }
        assert_eq!(SessionId::parse("  padded ").unwrap().as_str(), "padded");
    }

    #[test]
    fn test_session_id_rejects_path_like_values() {
        for raw in ["", "   ", "../etc", ".hidden", "a/b", "a\\b", "sp ace"] {
            assert!(
                matches!(SessionId::parse(raw), Err(SessionError::Validation(_))),
                "{:?} should be rejected",
                raw
            );
        }
        assert!(SessionId::parse(&"x".repeat(129)).is_err());
    }

    #[test]
    fn test_artifact_filename_derives_from_session() {
        let session = SessionId::parse("s1").unwrap();
        assert_eq!(session.artifact_filename(), "s1.mp3");
    }
}
