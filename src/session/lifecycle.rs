//! # Merge Lifecycle
//!
//! Wraps the merge-and-respond path so a session's namespace is reclaimed exactly once,
//! whatever happens:
//!
//! - **Failure after listing** (read error, nothing decodable, encoder error): the
//!   namespace is purged before the error is returned
//! - **Success**: the artifact owns a [`NamespaceLease`]. The lease travels into the
//!   response body ([`ArtifactBody`]) and purges the namespace when the body is dropped,
//!   which happens after the last byte was written or when the client goes away
//! - **Nothing to merge**: `NotFound`, and nothing is touched
//!
//! Merges on the same session are not serialised here. Two concurrent merges can see
//! one of them delete the namespace under the other, which then reports `NotFound`.

use bytes::Bytes;
use futures_util::Stream;
use std::fmt;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tracing::{error, info, warn};

use super::{Clip, SessionError, SessionId, SessionResult, SessionStore};
use crate::audio::merge::{ClipInput, MergeEngine, MergeFailure};

pub const ARTIFACT_CONTENT_TYPE: &str = "audio/mpeg";
const BODY_CHUNK_BYTES: usize = 64 * 1024;

pub struct SessionLifecycle {
    store: Arc<SessionStore>,
}

impl SessionLifecycle {
    pub fn new(store: Arc<SessionStore>) -> Self {
        Self { store }
    }

    /// Merge every clip of `session` into one MP3.
    pub async fn merge(&self, session: &SessionId, bitrate_kbps: u32) -> SessionResult<MergedArtifact> {
        let clips = self.store.list_clips(session).await?;
        info!(session_id = %session, clips = clips.len(), "Merging session");

        match self.build(session, &clips, bitrate_kbps).await {
            Ok(artifact) => Ok(artifact),
            Err(e) => {
                error!(session_id = %session, error = %e, "Merge failed, reclaiming session storage");
                if let Err(purge_err) = self.store.purge(session).await {
                    warn!(session_id = %session, error = %purge_err, "Cleanup after failed merge also failed");
                }
                Err(e)
            }
        }
    }

    async fn build(
        &self,
        session: &SessionId,
        clips: &[Clip],
        bitrate_kbps: u32,
    ) -> SessionResult<MergedArtifact> {
        let mut inputs = Vec::with_capacity(clips.len());
        for clip in clips {
            inputs.push(ClipInput {
                label: clip.name.clone(),
                bytes: self.store.read_clip(session, clip).await?,
            });
        }

        let engine = MergeEngine::new(bitrate_kbps);
        let output = tokio::task::spawn_blocking(move || engine.merge(inputs))
            .await
            .map_err(|e| SessionError::processing(session.as_str(), format!("merge task failed: {}", e)))?
            .map_err(|failure: MergeFailure| SessionError::processing(session.as_str(), failure.to_string()))?;

        info!(
            session_id = %session,
            merged = output.clips_merged,
            skipped = output.clips_skipped,
            seconds = output.duration_seconds,
            bytes = output.mp3.len(),
            "Artifact ready"
        );

        Ok(MergedArtifact {
            filename: session.artifact_filename(),
            duration_seconds: output.duration_seconds,
            clips_merged: output.clips_merged,
            clips_skipped: output.clips_skipped,
            bytes: Bytes::from(output.mp3),
            lease: NamespaceLease::new(self.store.clone(), session.clone()),
        })
    }
}

/// The merged MP3 plus the lease that keeps its session alive until delivery.
pub struct MergedArtifact {
    pub filename: String,
    pub duration_seconds: f64,
    pub clips_merged: usize,
    pub clips_skipped: usize,
    pub bytes: Bytes,
    lease: NamespaceLease,
}

impl fmt::Debug for MergedArtifact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MergedArtifact")
            .field("filename", &self.filename)
            .field("duration_seconds", &self.duration_seconds)
            .field("clips_merged", &self.clips_merged)
            .field("clips_skipped", &self.clips_skipped)
            .field("bytes", &self.bytes.len())
            .field("session", &self.lease.session)
            .finish()
    }
}

impl MergedArtifact {
    pub fn content_type(&self) -> &'static str {
        ARTIFACT_CONTENT_TYPE
    }

    /// Streaming body that releases the lease once it is dropped.
    pub fn into_body(self) -> ArtifactBody {
        ArtifactBody {
            remaining: self.bytes,
            _lease: self.lease,
        }
    }

    /// Reclaim the namespace now, without streaming.
    #[cfg(test)]
    pub async fn release(self) -> SessionResult<()> {
        self.lease.release().await
    }
}

/// Handle whose release purges the session namespace, at most once.
pub struct NamespaceLease {
    store: Option<Arc<SessionStore>>,
    session: SessionId,
}

impl NamespaceLease {
    fn new(store: Arc<SessionStore>, session: SessionId) -> Self {
        Self {
            store: Some(store),
            session,
        }
    }

    /// Purge synchronously (from the caller's point of view).
    #[cfg(test)]
    pub async fn release(mut self) -> SessionResult<()> {
        match self.store.take() {
            Some(store) => store.purge(&self.session).await,
            None => Ok(()),
        }
    }
}

impl Drop for NamespaceLease {
    fn drop(&mut self) {
        let Some(store) = self.store.take() else {
            return;
        };
        let session = self.session.clone();
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(e) = store.purge(&session).await {
                        warn!(session_id = %session, error = %e, "Deferred session cleanup failed");
                    }
                });
            }
            Err(_) => {
                warn!(session_id = %session, "No runtime for deferred cleanup, namespace left on disk");
            }
        }
    }
}

/// Response body for a merged artifact.
pub struct ArtifactBody {
    remaining: Bytes,
    _lease: NamespaceLease,
}

impl Stream for ArtifactBody {
    type Item = Result<Bytes, std::io::Error>;

    fn poll_next(mut self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if self.remaining.is_empty() {
            return Poll::Ready(None);
        }
        let take = self.remaining.len().min(BODY_CHUNK_BYTES);
        Poll::Ready(Some(Ok(self.remaining.split_to(take))))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let chunks = self.remaining.len().div_ceil(BODY_CHUNK_BYTES);
        (chunks, Some(chunks))
    }
}
