//! Configuration loading and component factories
//!
//! Settings come from an optional `axon.toml` plus CLI overrides, in the
//! order CLI > config file > built-in defaults.

use std::sync::Arc;
use std::time::Duration;

use config::{Config, File};
use serde::{Deserialize, Serialize};

use crate::bus::{BackpressurePolicy, BusConfig};
use crate::cli::Cli;
use crate::storage::{FileStorage, MemoryStorage, SqliteStorage, Storage};

/// Top-level runtime settings
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Settings {
    #[serde(default)]
    pub bus: BusSettings,
    #[serde(default)]
    pub storage: StorageSettings,
}

/// Event bus queue configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BusSettings {
    /// Per-subscriber queue capacity
    #[serde(default = "default_capacity")]
    pub capacity: usize,
    /// Overflow behavior for full subscriber queues
    #[serde(default)]
    pub policy: PolicyKind,
    /// Bounded wait before dropping, for the `wait` policy
    #[serde(default = "default_wait_timeout_ms")]
    pub wait_timeout_ms: u64,
}

impl Default for BusSettings {
    fn default() -> Self {
        Self {
            capacity: default_capacity(),
            policy: PolicyKind::default(),
            wait_timeout_ms: default_wait_timeout_ms(),
        }
    }
}

impl BusSettings {
    /// Build the bus configuration these settings describe
    pub fn to_bus_config(&self) -> BusConfig {
        BusConfig {
            capacity: self.capacity,
            policy: match self.policy {
                PolicyKind::Wait => BackpressurePolicy::Wait {
                    timeout: Duration::from_millis(self.wait_timeout_ms),
                },
                PolicyKind::DropOldest => BackpressurePolicy::DropOldest,
            },
        }
    }
}

/// Backpressure policy selector
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum PolicyKind {
    #[default]
    Wait,
    DropOldest,
}

/// Storage backend configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct StorageSettings {
    #[serde(default)]
    pub backend: StorageBackend,
    /// Base directory (file backend) or database file (sqlite backend)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

/// Storage backend selector
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum StorageBackend {
    #[default]
    Memory,
    File,
    Sqlite,
}

impl StorageSettings {
    /// Build the configured storage backend
    pub async fn build(&self) -> anyhow::Result<Arc<dyn Storage>> {
        match self.backend {
            StorageBackend::Memory => Ok(Arc::new(MemoryStorage::new())),
            StorageBackend::File => {
                let path = self.path.clone().unwrap_or_else(|| "data/axon".to_string());
                Ok(Arc::new(FileStorage::new(path)?))
            }
            StorageBackend::Sqlite => {
                let path = self.path.clone().unwrap_or_else(|| "data/axon.db".to_string());
                Ok(Arc::new(SqliteStorage::open(path).await?))
            }
        }
    }
}

impl Settings {
    /// Load settings from `axon.toml` in the working directory, if present
    pub fn new() -> Result<Self, anyhow::Error> {
        Self::from_file("axon.toml")
    }

    /// Load settings from a specific config file (missing file is fine)
    pub fn from_file(path: impl AsRef<std::path::Path>) -> Result<Self, anyhow::Error> {
        let builder = Config::builder()
            .add_source(File::from(path.as_ref().to_path_buf()).required(false))
            .set_default("bus.capacity", default_capacity() as i64)?
            .set_default("bus.wait_timeout_ms", default_wait_timeout_ms() as i64)?;

        let settings: Settings = builder.build()?.try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    /// Load settings from the CLI's config file, then apply CLI overrides
    pub fn new_with_cli(cli: &Cli) -> Result<Self, anyhow::Error> {
        let mut settings = Self::from_file(&cli.config)?;

        if let Some(backend) = cli.storage_backend {
            settings.storage.backend = backend;
        }
        if let Some(path) = &cli.storage_path {
            settings.storage.path = Some(path.display().to_string());
        }
        if let Some(capacity) = cli.queue_capacity {
            settings.bus.capacity = capacity;
        }
        if let Some(policy) = cli.backpressure_policy {
            settings.bus.policy = policy;
        }

        settings.validate()?;
        Ok(settings)
    }

    fn validate(&self) -> Result<(), anyhow::Error> {
        if self.bus.capacity == 0 {
            anyhow::bail!("bus.capacity must be at least 1");
        }
        if self.bus.policy == PolicyKind::Wait && self.bus.wait_timeout_ms == 0 {
            anyhow::bail!("bus.wait_timeout_ms must be nonzero for the wait policy");
        }
        Ok(())
    }
}

fn default_capacity() -> usize {
    256
}

fn default_wait_timeout_ms() -> u64 {
    5000
}
