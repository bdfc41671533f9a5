//! Server configuration types
//!
//! Every section has serde defaults, so an empty file is a valid configuration.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{ensure, Context, Result};
use serde::{Deserialize, Serialize};
use turnstream_core::{BlobStore, BusConfig, DeliveryConfig, FsBlobStore, HttpBlobStore, MemoryBlobStore};
use turnstream_replay::LiveConfig;
use turnstream_turns::TurnsConfig;

/// Application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub bus: BusConfig,
    #[serde(default)]
    pub delivery: DeliveryConfig,
    #[serde(default)]
    pub turns: TurnsConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub relay: RelayConfig,
    #[serde(default)]
    pub uploads: UploadsConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl AppConfig {
    /// Reject settings the service cannot run with
    pub fn validate(&self) -> Result<()> {
        ensure!(self.bus.log_capacity > 0, "bus.log_capacity must be at least 1");
        ensure!(self.bus.flush_every > 0, "bus.flush_every must be at least 1");
        ensure!(
            self.turns.join_window_secs > 0,
            "turns.join_window_secs must be at least 1"
        );
        ensure!(
            self.relay.short_poll_tries > 0,
            "relay.short_poll_tries must be at least 1"
        );
        if self.storage.backend == StorageBackend::Http {
            ensure!(
                self.storage.base_url.is_some(),
                "storage.base_url is required for the http backend"
            );
        }
        Ok(())
    }
}

/// HTTP listener
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8000
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

/// Blob store backend
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    #[default]
    Memory,
    Fs,
    Http,
}

/// Where durable traces and artifacts live
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default)]
    pub backend: StorageBackend,
    /// Directory for the `fs` backend
    #[serde(default = "default_storage_root")]
    pub root: String,
    /// Object gateway for the `http` backend
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default = "default_bucket")]
    pub bucket: String,
}

fn default_storage_root() -> String {
    "data".to_string()
}

fn default_bucket() -> String {
    "turnstream".to_string()
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::default(),
            root: default_storage_root(),
            base_url: None,
            bucket: default_bucket(),
        }
    }
}

impl StorageConfig {
    /// Build the configured store
    pub fn build_store(&self) -> Result<Arc<dyn BlobStore>> {
        let store: Arc<dyn BlobStore> = match self.backend {
            StorageBackend::Memory => Arc::new(MemoryBlobStore::new()),
            StorageBackend::Fs => Arc::new(FsBlobStore::new(&self.root)),
            StorageBackend::Http => {
                let base_url = self
                    .base_url
                    .as_deref()
                    .context("storage.base_url is required for the http backend")?;
                Arc::new(
                    HttpBlobStore::new(base_url, self.bucket.clone())
                        .context("Failed to create HTTP blob store")?,
                )
            }
        };
        Ok(store)
    }
}

/// Analysis pipeline wiring
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Analysis service the webhook stage posts to; unset runs intake only
    #[serde(default)]
    pub webhook_url: Option<String>,
    #[serde(default = "default_webhook_timeout_secs")]
    pub webhook_timeout_secs: u64,
    /// Input used when a turn names no file
    #[serde(default)]
    pub default_file_path: Option<String>,
    /// Duplicate window for `/analyze` launches
    #[serde(default = "default_run_guard_secs")]
    pub run_guard_secs: u64,
}

fn default_webhook_timeout_secs() -> u64 {
    15
}

fn default_run_guard_secs() -> u64 {
    60
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            webhook_url: None,
            webhook_timeout_secs: default_webhook_timeout_secs(),
            default_file_path: None,
            run_guard_secs: default_run_guard_secs(),
        }
    }
}

impl PipelineConfig {
    pub fn webhook_timeout(&self) -> Duration {
        Duration::from_secs(self.webhook_timeout_secs.max(1))
    }

    pub fn run_guard(&self) -> Duration {
        Duration::from_secs(self.run_guard_secs.max(1))
    }
}

/// Chat front-end uploads the ingest endpoint copies into the store
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UploadsConfig {
    /// Directory the chat front end saves attachments to; unset disables ingest
    #[serde(default)]
    pub webui_dir: Option<PathBuf>,
    /// Extension preferred when a turn names no file and the newest upload is picked
    #[serde(default)]
    pub prefer_ext: Option<String>,
}

/// Client-side settings for following a session (`watch`, short polls)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayConfig {
    #[serde(default = "default_backend_url")]
    pub backend_url: String,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,
    #[serde(default = "default_trace_poll_ms")]
    pub trace_poll_ms: u64,
    #[serde(default = "default_short_poll_tries")]
    pub short_poll_tries: usize,
}

fn default_backend_url() -> String {
    "http://127.0.0.1:8000".to_string()
}

fn default_connect_timeout_secs() -> u64 {
    10
}

fn default_idle_timeout_secs() -> u64 {
    12
}

fn default_trace_poll_ms() -> u64 {
    1000
}

fn default_short_poll_tries() -> usize {
    3
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            backend_url: default_backend_url(),
            connect_timeout_secs: default_connect_timeout_secs(),
            idle_timeout_secs: default_idle_timeout_secs(),
            trace_poll_ms: default_trace_poll_ms(),
            short_poll_tries: default_short_poll_tries(),
        }
    }
}

impl RelayConfig {
    pub fn live(&self) -> LiveConfig {
        LiveConfig {
            connect_timeout_secs: self.connect_timeout_secs,
            idle_timeout_secs: self.idle_timeout_secs,
        }
    }

    pub fn trace_poll(&self) -> Duration {
        Duration::from_millis(self.trace_poll_ms.max(1))
    }
}

/// Log output
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Emit JSON lines instead of human-readable logs
    #[serde(default)]
    pub json: bool,
}
