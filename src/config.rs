//! Recorder configuration.

use crate::error::ConfigError;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// File name used under the home directory when no path is configured.
pub const DEFAULT_LOG_FILE: &str = "opcua.uclog";

/// Recorder configuration.
///
/// Every field has a default, so a JSON file only needs the keys it
/// changes:
///
/// ```json
/// { "store_path": "/var/lib/ua/plant.uclog", "queue_capacity": 10000 }
/// ```
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Log file location. Read on every open, so changes apply to the
    /// next open.
    pub store_path: PathBuf,

    /// Server URI recorded with each sample and event.
    pub source_tag: String,

    /// Writer queue bound. `None` = unbounded; `Some(n)` drops the oldest
    /// record when full.
    pub queue_capacity: Option<usize>,

    /// Upper bound on waiting for queued writes at close and shutdown.
    pub drain_timeout_ms: u64,

    /// fsync every N appends.
    pub sync_interval: u64,

    /// Passive display refresh cadence.
    pub refresh_interval_ms: u64,

    /// Records returned per passive refresh.
    pub refresh_limit: usize,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            store_path: default_store_path(),
            source_tag: String::new(),
            queue_capacity: None,
            drain_timeout_ms: 2000,
            sync_interval: 100,
            refresh_interval_ms: 5000,
            refresh_limit: 100,
        }
    }
}

impl GatewayConfig {
    /// Config with defaults and the given log path.
    pub fn with_store_path(path: impl Into<PathBuf>) -> Self {
        Self {
            store_path: path.into(),
            ..Default::default()
        }
    }

    /// Load from a JSON file. Missing keys take their defaults.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    pub fn from_json_str(text: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn drain_timeout(&self) -> Duration {
        Duration::from_millis(self.drain_timeout_ms)
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_millis(self.refresh_interval_ms)
    }
}

/// `<home>/opcua.uclog`, or the working directory if home is unknown.
pub fn default_store_path() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(DEFAULT_LOG_FILE)
}
