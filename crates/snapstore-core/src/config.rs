//! Store configuration
//!
//! Configuration is fixed when a store is opened and never changes
//! afterwards. Values come from:
//! 1. `StoreConfig::new` defaults
//! 2. Optionally a TOML document (`StoreConfig::from_toml_str`)
//! 3. Environment variables (SNAPSTORE_* prefix)
//!
//! Environment variables take precedence over TOML values.
//!
//! The backing file path is resolved exactly once, when the store opens:
//! an explicit `data_dir` wins, otherwise the platform directory for the
//! configured [`StorageArea`] is used.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use crate::storage::{StoreError, StoreResult};

/// Environment variable prefix
const ENV_PREFIX: &str = "SNAPSTORE";

/// Subdirectory created under the platform directory
const APP_DIR: &str = "snapstore";

/// Which platform directory backs the store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageArea {
    /// Per-user durable data directory; survives until the user removes it
    Durable,
    /// Reclaimable cache directory; the OS may purge it at any time
    Cache,
}

impl fmt::Display for StorageArea {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageArea::Durable => write!(f, "durable"),
            StorageArea::Cache => write!(f, "cache"),
        }
    }
}

/// Store configuration, immutable once the store is opened
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Document identity; used verbatim as the backing file name
    pub name: String,

    /// Storage area the backing file lives in
    #[serde(default = "default_area")]
    pub area: StorageArea,

    /// Whether reads and writes go through an in-memory snapshot
    ///
    /// With the cache on, reads never touch disk and writes are persisted
    /// by a debounced background flush. With it off, every read loads the
    /// backing file and every write goes straight through to it.
    #[serde(default = "default_cached")]
    pub cached: bool,

    /// Quiet period in milliseconds before a dirty snapshot is flushed
    ///
    /// Only meaningful with the cache on. Zero flushes on every write,
    /// still asynchronously.
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,

    /// Explicit data directory, overriding platform resolution
    #[serde(default)]
    pub data_dir: Option<PathBuf>,
}

impl StoreConfig {
    /// Configuration for a document with the given identity
    ///
    /// Defaults: durable area, cache on, one second debounce.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            area: default_area(),
            cached: default_cached(),
            debounce_ms: default_debounce_ms(),
            data_dir: None,
        }
    }

    /// Load configuration from a TOML document
    ///
    /// Environment variables are still applied as overrides.
    pub fn from_toml_str(content: &str) -> StoreResult<Self> {
        let mut config: StoreConfig = toml::from_str(content).map_err(|e| StoreError::Config {
            details: e.to_string(),
        })?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Apply environment variable overrides
    fn apply_env_overrides(&mut self) {
        // SNAPSTORE_DATA_DIR
        if let Ok(val) = std::env::var(format!("{}_DATA_DIR", ENV_PREFIX)) {
            self.data_dir = if val.is_empty() {
                None
            } else {
                Some(PathBuf::from(val))
            };
        }

        // SNAPSTORE_DEBOUNCE_MS
        if let Ok(val) = std::env::var(format!("{}_DEBOUNCE_MS", ENV_PREFIX)) {
            if let Ok(ms) = val.parse() {
                self.debounce_ms = ms;
            }
        }
    }

    /// The debounce interval as a [`Duration`]
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    /// Resolve the backing file path for this configuration
    ///
    /// Called once when the store opens, never per operation. Fails with
    /// [`StoreError::PathResolution`] when no `data_dir` is set and the
    /// platform directory for the configured area is unavailable.
    pub fn resolve_path(&self) -> StoreResult<PathBuf> {
        let base = match &self.data_dir {
            Some(dir) => dir.clone(),
            None => platform_dir(self.area)?.join(APP_DIR),
        };
        Ok(base.join(&self.name))
    }
}

/// Platform directory for a storage area
fn platform_dir(area: StorageArea) -> StoreResult<PathBuf> {
    let dir = match area {
        StorageArea::Durable => dirs::data_local_dir(),
        StorageArea::Cache => dirs::cache_dir(),
    };
    dir.ok_or(StoreError::PathResolution { area })
}

fn default_area() -> StorageArea {
    StorageArea::Durable
}

fn default_cached() -> bool {
    true
}

fn default_debounce_ms() -> u64 {
    1000
}
