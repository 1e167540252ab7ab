//! # Session Store
//!
//! Maps a session id to its ordered clips and its dedup metadata. All mutation of
//! session storage goes through this type (and the lifecycle manager's purge).
//!
//! ## Clip naming:
//! Every clip gets a fresh `<stamp>-<uuid>.<ext>` name. The stamp is the creation time
//! in nanoseconds, zero-padded to 20 digits and forced to be strictly increasing inside
//! this process, so sorting names sorts clips by creation time. The original extension
//! is kept when it looks sane, otherwise [`DEFAULT_EXTENSION`] is used.
//!
//! Next to each blob sits a small JSON descriptor with the remaining clip attributes
//! (source kind, original filename, content type).

use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::backend::StorageBackend;
use super::dedup::DedupGuard;
use super::{Clip, Metadata, SessionError, SessionId, SessionResult, SourceKind};
use crate::audio::sniff::PayloadKind;

pub const METADATA_RECORD: &str = "metadata.json";
pub const DEFAULT_EXTENSION: &str = "mp3";
const DESCRIPTOR_SUFFIX: &str = ".json";
const STAMP_DIGITS: usize = 20;

pub struct SessionStore {
    backend: Arc<dyn StorageBackend>,
    /// Last stamp handed out; keeps clip ordering strict under clock ties
    last_stamp: AtomicI64,
}

impl SessionStore {
    pub fn new(backend: Arc<dyn StorageBackend>) -> Self {
        Self {
            backend,
            last_stamp: AtomicI64::new(0),
        }
    }

    pub async fn ensure(&self, session: &SessionId) -> SessionResult<()> {
        self.backend.ensure(session).await
    }

    /// Dedup record for `session`. Missing or unreadable metadata counts as empty.
    pub async fn load_metadata(&self, session: &SessionId) -> Metadata {
        let raw = match self.backend.read_record(session, METADATA_RECORD).await {
            Ok(Some(raw)) => raw,
            Ok(None) => return Metadata::default(),
            Err(e) => {
                warn!(session_id = %session, error = %e, "Failed to read session metadata, treating as empty");
                return Metadata::default();
            }
        };

        match serde_json::from_slice(&raw) {
            Ok(metadata) => metadata,
            Err(e) => {
                warn!(session_id = %session, error = %e, "Corrupt session metadata, treating as empty");
                Metadata::default()
            }
        }
    }

    /// Read-only dedup probe, used to skip fetching a URL the session already has.
    pub async fn is_known_source(&self, session: &SessionId, url: &str) -> bool {
        self.load_metadata(session).await.contains(url)
    }

    /// Store one clip.
    ///
    /// ## Order of operations:
    /// 1. Reject content types outside the audio allow-list
    /// 2. With a `source_url`, reject URLs already in the metadata
    /// 3. Create the namespace on demand and write the blob plus descriptor
    /// 4. With a `source_url`, persist it into the metadata
    ///
    /// Steps 1 and 2 run before anything is written, so a rejected clip leaves no trace.
    pub async fn append_clip(
        &self,
        session: &SessionId,
        bytes: &[u8],
        filename: &str,
        content_type: &str,
        source_url: Option<&str>,
    ) -> SessionResult<Clip> {
        if !PayloadKind::Audio.permits(content_type) {
            return Err(SessionError::unsupported_content(
                Some(content_type),
                PayloadKind::Audio.allow_list(),
            ));
        }

        let mut metadata = match source_url {
            Some(url) => {
                let metadata = self.load_metadata(session).await;
                DedupGuard::check(session, &metadata, url)?;
                Some(metadata)
            }
            None => None,
        };

        self.ensure(session).await?;

        let created_at = self.next_timestamp();
        let name = clip_name(created_at, filename);
        let clip = Clip {
            name: name.clone(),
            created_at,
            source: if source_url.is_some() {
                SourceKind::Fetched
            } else {
                SourceKind::Uploaded
            },
            original_filename: filename.to_string(),
            content_type: content_type.to_string(),
        };

        self.backend.append(session, &name, bytes).await?;
        let descriptor = serde_json::to_vec(&clip)
            .map_err(|e| SessionError::Io(std::io::Error::new(std::io::ErrorKind::InvalidData, e)))?;
        self.backend
            .write_record(session, &descriptor_name(&name), &descriptor)
            .await?;

        if let (Some(url), Some(metadata)) = (source_url, metadata.as_mut()) {
            DedupGuard::record(metadata, url);
            let raw = serde_json::to_vec_pretty(&*metadata)
                .map_err(|e| SessionError::Io(std::io::Error::new(std::io::ErrorKind::InvalidData, e)))?;
            self.backend.write_record(session, METADATA_RECORD, &raw).await?;
        }

        info!(
            session_id = %session,
            clip = %clip.name,
            content_type = %clip.content_type,
            bytes = bytes.len(),
            "Clip stored"
        );
        Ok(clip)
    }

    /// Clips of `session`, oldest first.
    pub async fn list_clips(&self, session: &SessionId) -> SessionResult<Vec<Clip>> {
        let names = self
            .backend
            .list(session)
            .await?
            .ok_or_else(|| SessionError::NotFound(session.to_string()))?;

        let mut stamped: Vec<(i64, String)> = names
            .into_iter()
            .filter_map(|name| parse_stamp(&name).map(|stamp| (stamp, name)))
            .collect();
        if stamped.is_empty() {
            return Err(SessionError::NotFound(session.to_string()));
        }
        stamped.sort();

        let mut clips = Vec::with_capacity(stamped.len());
        for (stamp, name) in stamped {
            clips.push(self.describe(session, stamp, name).await);
        }
        debug!(session_id = %session, clips = clips.len(), "Listed clips");
        Ok(clips)
    }

    pub async fn read_clip(&self, session: &SessionId, clip: &Clip) -> SessionResult<Vec<u8>> {
        self.backend.read(session, &clip.name).await
    }

    /// Remove the whole namespace. Purging an absent namespace is a no-op.
    pub async fn purge(&self, session: &SessionId) -> SessionResult<()> {
        if self.backend.purge(session).await? {
            info!(session_id = %session, "Session storage reclaimed");
        } else {
            debug!(session_id = %session, "Purge skipped, namespace already gone");
        }
        Ok(())
    }

    pub async fn namespace_count(&self) -> SessionResult<usize> {
        self.backend.namespace_count().await
    }

    /// Creation timestamp that is strictly greater than any handed out before.
    fn next_timestamp(&self) -> DateTime<Utc> {
        let now = Utc::now().timestamp_nanos_opt().unwrap_or(i64::MAX);
        let mut last = self.last_stamp.load(Ordering::SeqCst);
        loop {
            let candidate = now.max(last + 1);
            match self
                .last_stamp
                .compare_exchange(last, candidate, Ordering::SeqCst, Ordering::SeqCst)
            {
                Ok(_) => return DateTime::from_timestamp_nanos(candidate),
                Err(actual) => last = actual,
            }
        }
    }

    /// Rebuild a clip from its descriptor, falling back to name-derived values.
    async fn describe(&self, session: &SessionId, stamp: i64, name: String) -> Clip {
        let descriptor = match self.backend.read_record(session, &descriptor_name(&name)).await {
            Ok(Some(raw)) => serde_json::from_slice::<ClipDescriptor>(&raw).ok(),
            Ok(None) => None,
            Err(e) => {
                warn!(session_id = %session, clip = %name, error = %e, "Unreadable clip descriptor");
                None
            }
        };

        let created_at = DateTime::from_timestamp_nanos(stamp);
        match descriptor {
            Some(d) => Clip {
                name,
                created_at,
                source: d.source,
                original_filename: d.original_filename,
                content_type: d.content_type,
            },
            None => Clip {
                original_filename: name.clone(),
                name,
                created_at,
                source: SourceKind::Uploaded,
                content_type: "application/octet-stream".to_string(),
            },
        }
    }
}

#[derive(Deserialize)]
struct ClipDescriptor {
    source: SourceKind,
    original_filename: String,
    content_type: String,
}

fn descriptor_name(clip_name: &str) -> String {
    format!("{}{}", clip_name, DESCRIPTOR_SUFFIX)
}

fn clip_name(created_at: DateTime<Utc>, filename: &str) -> String {
    let stamp = created_at.timestamp_nanos_opt().unwrap_or(i64::MAX);
    format!(
        "{:0width$}-{}.{}",
        stamp,
        Uuid::new_v4().simple(),
        sanitized_extension(filename),
        width = STAMP_DIGITS
    )
}

/// Extension of `filename` if it is 1-8 ASCII alphanumerics, else the default.
fn sanitized_extension(filename: &str) -> String {
    let base = filename.rsplit(['/', '\\']).next().unwrap_or(filename);
    match base.rsplit_once('.') {
        Some((stem, ext))
            if !stem.is_empty()
                && (1..=8).contains(&ext.len())
                && ext.chars().all(|c| c.is_ascii_alphanumeric()) =>
        {
            ext.to_ascii_lowercase()
        }
        _ => DEFAULT_EXTENSION.to_string(),
    }
}

/// Stamp of a clip blob name, `None` for records and anything else.
fn parse_stamp(name: &str) -> Option<i64> {
    if name.ends_with(DESCRIPTOR_SUFFIX) {
        return None;
    }
    let (stamp, rest) = name.split_once('-')?;
    if stamp.len() != STAMP_DIGITS || !stamp.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    let (id, ext) = rest.split_once('.')?;
    if id.len() != 32 || !id.chars().all(|c| c.is_ascii_hexdigit()) || ext.is_empty() {
        return None;
    }
    stamp.parse().ok()
}
