//! # Storage Backends
//!
//! The session store never touches the filesystem directly; it goes through the
//! [`StorageBackend`] capability trait. [`FsBackend`] keeps one directory per session
//! under an explicit root handed in at construction, so tests and deployments can point
//! it anywhere and an object-store backend could replace it later.
//!
//! ## Layout:
//! ```text
//! <root>/<session_id>/<clip blobs>
//! <root>/<session_id>/<clip>.json     (clip descriptors)
//! <root>/<session_id>/metadata.json   (dedup record)
//! ```

use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::debug;

use super::{SessionId, SessionResult};

#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Create the namespace if it does not exist yet.
    async fn ensure(&self, session: &SessionId) -> SessionResult<()>;

    /// Write a new blob. The namespace must exist.
    async fn append(&self, session: &SessionId, name: &str, bytes: &[u8]) -> SessionResult<()>;

    /// Names of everything stored in the namespace, `None` if it does not exist.
    async fn list(&self, session: &SessionId) -> SessionResult<Option<Vec<String>>>;

    async fn read(&self, session: &SessionId, name: &str) -> SessionResult<Vec<u8>>;

    /// Side records (metadata, descriptors). `None` when absent.
    async fn read_record(&self, session: &SessionId, name: &str) -> SessionResult<Option<Vec<u8>>>;

    /// Replace a side record. The namespace must exist.
    async fn write_record(&self, session: &SessionId, name: &str, bytes: &[u8]) -> SessionResult<()>;

    /// Delete the namespace recursively. Returns whether anything was removed.
    async fn purge(&self, session: &SessionId) -> SessionResult<bool>;

    /// Number of namespaces currently present.
    async fn namespace_count(&self) -> SessionResult<usize>;
}

/// Local-disk backend: one directory per session below `root`.
#[derive(Debug, Clone)]
pub struct FsBackend {
    root: PathBuf,
}

impl FsBackend {
    /// Create the backend, making sure the root directory exists.
    pub async fn new(root: impl Into<PathBuf>) -> SessionResult<Self> {
        let root = root.into();
        fs::create_dir_all(&root).await?;
        debug!(root = %root.display(), "Session storage root ready");
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn namespace(&self, session: &SessionId) -> PathBuf {
        self.root.join(session.as_str())
    }
}

#[async_trait]
impl StorageBackend for FsBackend {
    async fn ensure(&self, session: &SessionId) -> SessionResult<()> {
        fs::create_dir_all(self.namespace(session)).await?;
        Ok(())
    }

    async fn append(&self, session: &SessionId, name: &str, bytes: &[u8]) -> SessionResult<()> {
        let path = self.namespace(session).join(name);
        // create_new: a generated name must never overwrite an existing clip
        let mut file = fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await?;
        tokio::io::AsyncWriteExt::write_all(&mut file, bytes).await?;
        tokio::io::AsyncWriteExt::flush(&mut file).await?;
        Ok(())
    }

    async fn list(&self, session: &SessionId) -> SessionResult<Option<Vec<String>>> {
        let mut entries = match fs::read_dir(self.namespace(session)).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let mut names = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_file() {
                names.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        Ok(Some(names))
    }

    async fn read(&self, session: &SessionId, name: &str) -> SessionResult<Vec<u8>> {
        Ok(fs::read(self.namespace(session).join(name)).await?)
    }

    async fn read_record(&self, session: &SessionId, name: &str) -> SessionResult<Option<Vec<u8>>> {
        match fs::read(self.namespace(session).join(name)).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn write_record(&self, session: &SessionId, name: &str, bytes: &[u8]) -> SessionResult<()> {
        let dir = self.namespace(session);
        // Write-then-rename so a concurrent reader never sees a torn record
        let tmp = dir.join(format!(".{}.{}.tmp", name, uuid::Uuid::new_v4().simple()));
        fs::write(&tmp, bytes).await?;
        fs::rename(&tmp, dir.join(name)).await?;
        Ok(())
    }

    async fn purge(&self, session: &SessionId) -> SessionResult<bool> {
        match fs::remove_dir_all(self.namespace(session)).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn namespace_count(&self) -> SessionResult<usize> {
        let mut entries = fs::read_dir(&self.root).await?;
        let mut count = 0;
        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_dir() {
                count += 1;
            }
        }
        Ok(count)
    }
}
