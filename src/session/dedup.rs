//! Dedup guard for remote sources.
//!
//! The guard is a check-then-insert policy over a session's [`Metadata`]. There is no
//! lock between the check and the insert: two concurrent ingestions of the same URL can
//! both pass the check and store the clip twice. That race only ever produces a
//! duplicate segment in the merged audio, so it is tolerated.

use super::{Metadata, SessionError, SessionId, SessionResult};

pub struct DedupGuard;

impl DedupGuard {
    /// Fail with `DuplicateSource` if `url` was already ingested for `session`.
    pub fn check(session: &SessionId, metadata: &Metadata, url: &str) -> SessionResult<()> {
        if metadata.contains(url) {
            return Err(SessionError::DuplicateSource {
                session: session.to_string(),
                url: url.to_string(),
            });
        }
        Ok(())
    }

    /// Record `url`; returns false if it was already present.
    pub fn record(metadata: &mut Metadata, url: &str) -> bool {
        metadata.source_urls.insert(url.to_string())
    }
}
