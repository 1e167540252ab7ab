//! # Application State Management
//!
//! Everything the request handlers share, built once at startup and handed to actix-web
//! as `web::Data<AppState>`.
//!
//! ## Sharing Pattern:
//! - **Services** (`SessionStore`, `SessionLifecycle`, `RemoteFetcher`, `GenerationClient`,
//!   `JobLog`) are immutable after construction and live behind plain `Arc`s
//! - **Config and metrics** change at runtime and live behind `Arc<RwLock<T>>`: many
//!   readers or one writer. Locks are held only long enough to copy or bump a value,
//!   never across an `.await`
//!
//! A poisoned lock only means another request panicked while holding it; the data
//! itself is still usable, so readers recover it instead of propagating the panic.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Instant;
use tracing::info;

use crate::config::AppConfig;
use crate::fetch::RemoteFetcher;
use crate::generation::{GenerationClient, JobLog, RetryPolicy};
use crate::session::backend::FsBackend;
use crate::session::{SessionLifecycle, SessionStore};

/// Shared handle to the service's components.
///
/// ## Cloning:
/// actix-web builds one `App` per worker thread and clones this struct into each of
/// them. Apart from `start_time` and `storage_root`, every field is an `Arc`, so all
/// workers observe the same store, clients, config and counters.
///
/// ## Thread Safety:
/// - `SessionStore`, `SessionLifecycle`, `RemoteFetcher` and `GenerationClient` need no
///   lock: they hold no mutable state of their own (the filesystem and the HTTP
///   connection pool do their own synchronisation)
/// - `JobLog` serialises its writers internally with an async mutex
/// - `config` and `metrics` use `std::sync::RwLock`; guards are never held across
///   `.await`, so a blocking lock cannot stall the executor
#[derive(Clone)]
pub struct AppState {
    /// Runtime-tunable configuration
    pub config: Arc<RwLock<AppConfig>>,
    pub metrics: Arc<RwLock<AppMetrics>>,
    pub start_time: Instant,
    pub store: Arc<SessionStore>,
    pub lifecycle: Arc<SessionLifecycle>,
    pub fetcher: Arc<RemoteFetcher>,
    pub generation: Arc<GenerationClient>,
    pub job_log: Arc<JobLog>,
    /// Resolved storage root, reported by the health endpoint
    pub storage_root: PathBuf,
}

/// Counters collected across all requests.
///
/// Updated by `MetricsMiddleware` (request and endpoint counters) and by the clip
/// handlers (ingest, delivery and active merges). Read through
/// [`AppState::get_metrics_snapshot`], which clones the whole struct so the response
/// can be built without holding the lock.
#[derive(Debug, Default, Clone)]
pub struct AppMetrics {
    pub request_count: u64,
    pub error_count: u64,
    /// Merges currently decoding or encoding
    pub active_merges: u32,
    pub clips_ingested: u64,
    pub artifacts_delivered: u64,
    /// Keyed by `"<METHOD> <route template>"`, e.g. `"POST /api/v1/sessions/{id}/clips"`
    pub endpoint_metrics: HashMap<String, EndpointMetric>,
}

#[derive(Debug, Default, Clone)]
pub struct EndpointMetric {
    pub request_count: u64,
    pub total_duration_ms: u64,
    pub error_count: u64,
}

impl AppState {
    /// Wire up storage and the outbound clients from `config`.
    ///
    /// Fails if the storage root cannot be created or an HTTP client cannot be built.
    pub async fn new(config: AppConfig) -> anyhow::Result<Self> {
        let backend = FsBackend::new(&config.storage.root).await?;
        let storage_root = backend.root().to_path_buf();
        info!(root = %storage_root.display(), "Session storage ready");

        let store = Arc::new(SessionStore::new(Arc::new(backend)));
        let lifecycle = Arc::new(SessionLifecycle::new(store.clone()));
        let fetcher = Arc::new(RemoteFetcher::new(config.fetch.timeout())?);
        let generation = Arc::new(GenerationClient::new(
            &config.generation.base_url,
            &config.generation.api_key,
            RetryPolicy::fixed(config.generation.max_attempts),
            config.generation.timeout(),
        )?);
        let job_log = Arc::new(JobLog::new(config.generation.job_log_path.clone()));

        Ok(Self {
            config: Arc::new(RwLock::new(config)),
            metrics: Arc::new(RwLock::new(AppMetrics::default())),
            start_time: Instant::now(),
            store,
            lifecycle,
            fetcher,
            generation,
            job_log,
            storage_root,
        })
    }

    fn metrics_mut(&self) -> RwLockWriteGuard<'_, AppMetrics> {
        self.metrics.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn metrics_ref(&self) -> RwLockReadGuard<'_, AppMetrics> {
        self.metrics.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Copy of the current configuration; the lock is released on return.
    pub fn get_config(&self) -> AppConfig {
        self.config
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Replace the configuration if `new_config` validates.
    ///
    /// ## Returns:
    /// - **Ok(())**: the new config is visible to every request that starts afterwards
    /// - **Err(message)**: validation failed; the previous config stays in place
    pub fn update_config(&self, new_config: AppConfig) -> Result<(), String> {
        new_config.validate().map_err(|e| e.to_string())?;
        *self
            .config
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = new_config;
        Ok(())
    }

    pub fn increment_request_count(&self) {
        self.metrics_mut().request_count += 1;
    }

    pub fn increment_error_count(&self) {
        self.metrics_mut().error_count += 1;
    }

    pub fn record_endpoint_request(&self, endpoint: &str, duration_ms: u64, is_error: bool) {
        let mut metrics = self.metrics_mut();
        let endpoint_metric = metrics.endpoint_metrics.entry(endpoint.to_string()).or_default();
        endpoint_metric.request_count += 1;
        endpoint_metric.total_duration_ms += duration_ms;
        if is_error {
            endpoint_metric.error_count += 1;
        }
    }

    pub fn record_clip_ingested(&self) {
        self.metrics_mut().clips_ingested += 1;
    }

    pub fn record_artifact_delivered(&self) {
        self.metrics_mut().artifacts_delivered += 1;
    }

    /// Count a merge as active until the returned guard is dropped.
    pub fn track_merge(&self) -> ActiveMerge {
        self.metrics_mut().active_merges += 1;
        ActiveMerge {
            metrics: self.metrics.clone(),
        }
    }

    pub fn get_metrics_snapshot(&self) -> AppMetrics {
        self.metrics_ref().clone()
    }

    pub fn get_uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}

/// Keeps `active_merges` raised while alive.
pub struct ActiveMerge {
    metrics: Arc<RwLock<AppMetrics>>,
}

impl Drop for ActiveMerge {
    fn drop(&mut self) {
        let mut metrics = self.metrics.write().unwrap_or_else(|poisoned| poisoned.into_inner());
        metrics.active_merges = metrics.active_merges.saturating_sub(1);
    }
}

impl EndpointMetric {
    pub fn average_duration_ms(&self) -> f64 {
        if self.request_count > 0 {
            self.total_duration_ms as f64 / self.request_count as f64
        } else {
            0.0
        }
    }

    /// Fraction of failed requests, 0.0 to 1.0.
    pub fn error_rate(&self) -> f64 {
        if self.request_count > 0 {
            self.error_count as f64 / self.request_count as f64
        } else {
            0.0
        }
    }
}
