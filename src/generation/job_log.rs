//! Append-only JSON array of finished generation jobs.

use serde_json::Value;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::debug;

use super::{GenerationError, GenerationResult};

pub struct JobLog {
    path: PathBuf,
    // Serialises the read-modify-write cycle within this process
    lock: Mutex<()>,
}

impl JobLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append `record`; returns the number of entries now in the log.
    pub async fn append(&self, record: &Value) -> GenerationResult<usize> {
        let _guard = self.lock.lock().await;

        let mut entries = self.read_entries().await?;
        entries.push(record.clone());

        let encoded = serde_json::to_vec_pretty(&entries).map_err(|e| GenerationError::Log(e.to_string()))?;
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await.map_err(log_error)?;
        }
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, encoded).await.map_err(log_error)?;
        tokio::fs::rename(&tmp, &self.path).await.map_err(log_error)?;

        debug!(path = %self.path.display(), entries = entries.len(), "Job recorded");
        Ok(entries.len())
    }

    pub async fn entries(&self) -> GenerationResult<Vec<Value>> {
        let _guard = self.lock.lock().await;
        self.read_entries().await
    }

    async fn read_entries(&self) -> GenerationResult<Vec<Value>> {
        match tokio::fs::read(&self.path).await {
            Ok(raw) => serde_json::from_slice(&raw).map_err(|e| {
                GenerationError::Log(format!("{} is not a JSON array: {}", self.path.display(), e))
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(log_error(e)),
        }
    }
}

fn log_error(e: std::io::Error) -> GenerationError {
    GenerationError::Log(e.to_string())
}
