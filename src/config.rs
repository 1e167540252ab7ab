//! # Configuration Management
//!
//! Loads the service configuration from layered sources.
//!
//! ## Configuration Priority (highest to lowest):
//! 1. Deployment-platform variables: `HOST`, `PORT`, `IMAGINE_DEV_API_KEY`
//! 2. Environment variables with the `APP_` prefix; nested keys use a double underscore,
//!    e.g. `APP_LIMITS__MAX_CLIP_BYTES=1048576` or `APP_STORAGE__ROOT=/var/lib/clips`
//! 3. Configuration file (`config.toml`, optional)
//! 4. Defaults (the `Default` impl below)
//!
//! ## Runtime updates:
//! `PUT /api/v1/config` may change `limits` and `merge`. Everything else (bind address,
//! storage root, outbound clients) is wired into long-lived objects at startup and
//! requires a restart.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;
use std::time::Duration;

use crate::audio::codec::SUPPORTED_BITRATES;

/// Complete service configuration.
///
/// ## Sections:
/// - **server**: bind address
/// - **storage**: root directory holding one namespace per session
/// - **fetch**: timeout for downloading clips from caller-supplied URLs
/// - **limits**: per-clip size ceiling, applied to uploads and downloads alike
/// - **merge**: MP3 bitrate of merged artifacts
/// - **generation**: image-generation API endpoint, credentials, retries and job log
///
/// `Serialize` is derived so the config endpoint can return it (with the API key
/// redacted); `Deserialize` lets the `config` crate build it from every layer at once.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub storage: StorageConfig,
    pub fetch: FetchConfig,
    pub limits: LimitsConfig,
    pub merge: MergeConfig,
    pub generation: GenerationConfig,
}

/// Where the HTTP server listens.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// Session storage location.
///
/// Every session gets its own directory below `root`. The directory is created at
/// startup if it does not exist.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub root: PathBuf,
}

/// Remote clip downloads.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchConfig {
    /// Upper bound for one download, connect to last byte
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    /// Largest clip accepted, for uploads and downloads alike
    pub max_clip_bytes: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MergeConfig {
    /// Constant bitrate of merged artifacts; must be one of `SUPPORTED_BITRATES`
    pub bitrate_kbps: u32,
}

/// External image generation API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationConfig {
    pub base_url: String,
    /// Bearer token; usually supplied through `IMAGINE_DEV_API_KEY`
    pub api_key: String,
    /// Attempts per job submission, including the first
    pub max_attempts: u32,
    pub timeout_secs: u64,
    /// JSON array of finished jobs
    pub job_log_path: PathBuf,
}

impl FetchConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl GenerationConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 8080,
            },
            storage: StorageConfig {
                root: env::temp_dir().join("session-audio"),
            },
            fetch: FetchConfig { timeout_secs: 30 },
            limits: LimitsConfig {
                max_clip_bytes: 50 * 1024 * 1024,
            },
            merge: MergeConfig { bitrate_kbps: 128 },
            generation: GenerationConfig {
                base_url: "https://cl.imagineapi.dev".to_string(),
                api_key: String::new(),
                max_attempts: 3,
                timeout_secs: 30,
                job_log_path: PathBuf::from("responses.json"),
            },
        }
    }
}

impl AppConfig {
    /// Build the configuration from defaults, `config.toml` and the environment.
    pub fn load() -> Result<Self> {
        let mut settings = config::Config::builder()
            .add_source(config::Config::try_from(&AppConfig::default())?)
            .add_source(config::File::with_name("config").required(false))
            .add_source(
                config::Environment::with_prefix("APP")
                    .prefix_separator("_")
                    .separator("__"),
            );

        if let Ok(host) = env::var("HOST") {
            settings = settings.set_override("server.host", host)?;
        }
        if let Ok(port) = env::var("PORT") {
            settings = settings.set_override("server.port", port)?;
        }
        if let Ok(key) = env::var("IMAGINE_DEV_API_KEY") {
            settings = settings.set_override("generation.api_key", key)?;
        }

        let config = settings.build()?.try_deserialize()?;
        Ok(config)
    }

    /// Reject settings the service cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            return Err(anyhow::anyhow!("Server port cannot be 0"));
        }

        if self.storage.root.as_os_str().is_empty() {
            return Err(anyhow::anyhow!("Storage root must not be empty"));
        }

        if self.fetch.timeout_secs == 0 {
            return Err(anyhow::anyhow!("Fetch timeout must be greater than 0"));
        }

        if self.limits.max_clip_bytes == 0 {
            return Err(anyhow::anyhow!("Max clip size must be greater than 0"));
        }

        if !SUPPORTED_BITRATES.contains(&self.merge.bitrate_kbps) {
            return Err(anyhow::anyhow!(
                "Unsupported merge bitrate {} kbps (supported: {:?})",
                self.merge.bitrate_kbps,
                SUPPORTED_BITRATES
            ));
        }

        if self.generation.max_attempts == 0 {
            return Err(anyhow::anyhow!("Generation max attempts must be greater than 0"));
        }

        if self.generation.timeout_secs == 0 {
            return Err(anyhow::anyhow!("Generation timeout must be greater than 0"));
        }

        Ok(())
    }

    /// Apply a partial JSON update of the runtime-tunable sections.
    ///
    /// Only `limits` and `merge` are honoured; anything else in the document is ignored.
    /// The configuration is left untouched if the result would not validate.
    pub fn update_from_json(&mut self, json_str: &str) -> Result<()> {
        let partial_config: serde_json::Value = serde_json::from_str(json_str)?;
        let mut updated = self.clone();

        if let Some(limits) = partial_config.get("limits") {
            if let Some(max) = limits.get("max_clip_bytes").and_then(|v| v.as_u64()) {
                updated.limits.max_clip_bytes = max as usize;
            }
        }

        if let Some(merge) = partial_config.get("merge") {
            if let Some(bitrate) = merge.get("bitrate_kbps").and_then(|v| v.as_u64()) {
                updated.merge.bitrate_kbps = u32::try_from(bitrate).unwrap_or(u32::MAX);
            }
        }

        updated.validate()?;
        *self = updated;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.merge.bitrate_kbps, 128);
        assert_eq!(config.fetch.timeout(), Duration::from_secs(30));
        assert!(config.storage.root.ends_with("session-audio"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut config = AppConfig::default();
        config.server.port = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.limits.max_clip_bytes = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.merge.bitrate_kbps = 100;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.generation.max_attempts = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.fetch.timeout_secs = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_update() {
        let mut config = AppConfig::default();
        let json = r#"{"limits": {"max_clip_bytes": 1024}, "merge": {"bitrate_kbps": 192}}"#;
        assert!(config.update_from_json(json).is_ok());
        assert_eq!(config.limits.max_clip_bytes, 1024);
        assert_eq!(config.merge.bitrate_kbps, 192);
        assert_eq!(config.server.port, 8080);
    }

    #[test]
    fn test_config_update_ignores_static_sections() {
        let mut config = AppConfig::default();
        let json = r#"{"server": {"port": 9090}, "storage": {"root": "/elsewhere"}}"#;
        assert!(config.update_from_json(json).is_ok());
        assert_eq!(config.server.port, 8080);
        assert!(config.storage.root.ends_with("session-audio"));
    }

    #[test]
    fn test_invalid_update_leaves_config_untouched() {
        let mut config = AppConfig::default();
        let json = r#"{"limits": {"max_clip_bytes": 2048}, "merge": {"bitrate_kbps": 7}}"#;
        assert!(config.update_from_json(json).is_err());
        assert_eq!(config.limits.max_clip_bytes, 50 * 1024 * 1024);
        assert_eq!(config.merge.bitrate_kbps, 128);

        assert!(config.update_from_json("not json").is_err());
    }
}
