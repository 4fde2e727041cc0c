//! # Configuration Management Module
//!
//! TOML configuration for the base station, with serde defaults for every field so a
//! partial file (or no file at all) still yields a complete [`Config`].
//!
//! ## Configuration File Format
//!
//! ```toml
//! data_retention_days = 30
//!
//! [device]
//! source = "-"              # JSON-lines packet feed, "-" for stdin
//! station_name = "Base Station"
//! # station_id = "!ab12cd34"
//!
//! [store]
//! path = "./data/meshstation"
//! key_prefix = "meshtastic"
//!
//! [ingest]
//! queue_capacity = 10000
//! drain_timeout_ms = 5000
//! dedup_window = 256
//!
//! [logging]
//! level = "info"            # comma list of levels and packet/data/store categories
//! file = "meshstation.log"
//! threshold = false
//!
//! [display]
//! max_device_telemetry = 10
//! max_network_telemetry = 5
//! ```
//!
//! ## Environment Integration
//!
//! Precedence: CLI args > environment > config file > defaults. Recognized variables:
//! `MESHSTATION_STORE_PATH`, `MESHSTATION_KEY_PREFIX`, `MESHSTATION_DEVICE_SOURCE`,
//! `MESHSTATION_LOG_LEVEL`, `MESHSTATION_QUEUE_CAPACITY`.

use anyhow::{anyhow, bail, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tokio::fs;

use crate::display::DisplayLimits;
use crate::ingest::queue::MAX_QUEUE_CAPACITY;
use crate::ingest::DispatcherConfig;
use crate::storage::DEFAULT_KEY_PREFIX;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_retention_days")]
    pub data_retention_days: u32,
    #[serde(default)]
    pub device: DeviceConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub display: DisplayConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// Packet feed: a JSON-lines file, or `-` for stdin.
    #[serde(default = "default_source")]
    pub source: String,
    /// Name recorded for the local node when `station_id` is set.
    #[serde(default = "default_station_name")]
    pub station_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub station_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_store_path")]
    pub path: String,
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngestConfig {
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    #[serde(default = "default_drain_timeout_ms")]
    pub drain_timeout_ms: u64,
    /// Remembered `(station, packet id)` pairs for duplicate suppression; 0 disables.
    #[serde(default = "default_dedup_window")]
    pub dedup_window: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    #[serde(default)]
    pub threshold: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DisplayConfig {
    #[serde(default = "default_max_messages")]
    pub max_messages: usize,
    #[serde(default = "default_max_device_telemetry")]
    pub max_device_telemetry: usize,
    #[serde(default = "default_max_network_telemetry")]
    pub max_network_telemetry: usize,
    #[serde(default = "default_max_environment_telemetry")]
    pub max_environment_telemetry: usize,
}

fn default_retention_days() -> u32 {
    30
}
fn default_source() -> String {
    "-".to_string()
}
fn default_station_name() -> String {
    "Base Station".to_string()
}
fn default_store_path() -> String {
    "./data/meshstation".to_string()
}
fn default_key_prefix() -> String {
    DEFAULT_KEY_PREFIX.to_string()
}
fn default_queue_capacity() -> usize {
    10_000
}
fn default_drain_timeout_ms() -> u64 {
    5_000
}
fn default_dedup_window() -> usize {
    256
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_max_messages() -> usize {
    50
}
fn default_max_device_telemetry() -> usize {
    10
}
fn default_max_network_telemetry() -> usize {
    5
}
fn default_max_environment_telemetry() -> usize {
    10
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            source: default_source(),
            station_name: default_station_name(),
            station_id: None,
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: default_store_path(),
            key_prefix: default_key_prefix(),
        }
    }
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            queue_capacity: default_queue_capacity(),
            drain_timeout_ms: default_drain_timeout_ms(),
            dedup_window: default_dedup_window(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: Some("meshstation.log".to_string()),
            threshold: false,
        }
    }
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            max_messages: default_max_messages(),
            max_device_telemetry: default_max_device_telemetry(),
            max_network_telemetry: default_max_network_telemetry(),
            max_environment_telemetry: default_max_environment_telemetry(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_retention_days: default_retention_days(),
            device: DeviceConfig::default(),
            store: StoreConfig::default(),
            ingest: IngestConfig::default(),
            logging: LoggingConfig::default(),
            display: DisplayConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from a file
    pub async fn load(path: &str) -> Result<Self> {
        let content = fs::read_to_string(path)
            .await
            .map_err(|e| anyhow!("Failed to read config file {}: {}", path, e))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| anyhow!("Failed to parse config file {}: {}", path, e))?;

        Ok(config)
    }

    /// Load `path` if it exists, otherwise start from defaults. Environment overrides
    /// are applied and the result validated either way.
    pub async fn load_or_default(path: &str) -> Result<Self> {
        let mut config = if Path::new(path).exists() {
            Self::load(path).await?
        } else {
            log::info!("config file {} not found, using defaults", path);
            Config::default()
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Create a default configuration file
    pub async fn create_default(path: &str) -> Result<()> {
        let config = Config::default();
        let content = toml::to_string_pretty(&config)
            .map_err(|e| anyhow!("Failed to serialize default config: {}", e))?;

        fs::write(path, content)
            .await
            .map_err(|e| anyhow!("Failed to write config file {}: {}", path, e))?;

        Ok(())
    }

    /// Apply `MESHSTATION_*` overrides read through `lookup`.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(v) = lookup("MESHSTATION_STORE_PATH") {
            self.store.path = v;
        }
        if let Some(v) = lookup("MESHSTATION_KEY_PREFIX") {
            self.store.key_prefix = v;
        }
        if let Some(v) = lookup("MESHSTATION_DEVICE_SOURCE") {
            self.device.source = v;
        }
        if let Some(v) = lookup("MESHSTATION_LOG_LEVEL") {
            self.logging.level = v;
        }
        if let Some(v) = lookup("MESHSTATION_QUEUE_CAPACITY") {
            self.ingest.queue_capacity = v
                .trim()
                .parse()
                .map_err(|e| anyhow!("MESHSTATION_QUEUE_CAPACITY={:?}: {}", v, e))?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.ingest.queue_capacity == 0 {
            bail!("ingest.queue_capacity must be at least 1");
        }
        if self.ingest.queue_capacity > MAX_QUEUE_CAPACITY {
            bail!(
                "ingest.queue_capacity must be at most {} (got {})",
                MAX_QUEUE_CAPACITY,
                self.ingest.queue_capacity
            );
        }
        if self.store.path.trim().is_empty() {
            bail!("store.path must not be empty");
        }
        if self.store.key_prefix.trim().is_empty() {
            bail!("store.key_prefix must not be empty");
        }
        crate::logutil::LogSelection::parse(&self.logging.level, self.logging.threshold)
            .map_err(|e| anyhow!("logging.level: {}", e))?;
        Ok(())
    }

    pub fn dispatcher(&self) -> DispatcherConfig {
        DispatcherConfig {
            drain_timeout: Duration::from_millis(self.ingest.drain_timeout_ms),
            dedup_window: self.ingest.dedup_window,
        }
    }

    pub fn display_limits(&self) -> DisplayLimits {
        DisplayLimits {
            messages: self.display.max_messages,
            device_telemetry: self.display.max_device_telemetry,
            network_telemetry: self.display.max_network_telemetry,
            environment_telemetry: self.display.max_environment_telemetry,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_partial_file_fills_defaults() {
        let config: Config = toml::from_str("[store]\npath = \"/tmp/x\"\n").unwrap();
        assert_eq!(config.store.path, "/tmp/x");
        assert_eq!(config.store.key_prefix, "meshtastic");
        assert_eq!(config.ingest.queue_capacity, 10_000);
        assert_eq!(config.display.max_network_telemetry, 5);
        assert_eq!(config.data_retention_days, 30);
    }

    #[test]
    fn test_env_overrides_file_values() {
        let env: HashMap<&str, &str> = [
            ("MESHSTATION_KEY_PREFIX", "lab"),
            ("MESHSTATION_QUEUE_CAPACITY", " 32 "),
        ]
        .into_iter()
        .collect();
        let mut config = Config::default();
        config
            .apply_env(|k| env.get(k).map(|v| v.to_string()))
            .unwrap();
        assert_eq!(config.store.key_prefix, "lab");
        assert_eq!(config.ingest.queue_capacity, 32);
        assert_eq!(config.store.path, default_store_path());
    }

    #[test]
    fn test_bad_env_capacity_is_rejected() {
        let mut config = Config::default();
        let err = config
            .apply_env(|k| (k == "MESHSTATION_QUEUE_CAPACITY").then(|| "lots".to_string()))
            .unwrap_err();
        assert!(err.to_string().contains("MESHSTATION_QUEUE_CAPACITY"));
    }

    #[test]
    fn test_validate_rejects_zero_capacity_and_empty_prefix() {
        let mut config = Config::default();
        config.ingest.queue_capacity = 0;
        assert!(config.validate().is_err());
        let mut config = Config::default();
        config.store.key_prefix = " ".into();
        assert!(config.validate().is_err());
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_oversized_capacity() {
        let mut config = Config::default();
        config
            .apply_env(|k| (k == "MESHSTATION_QUEUE_CAPACITY").then(|| usize::MAX.to_string()))
            .unwrap();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("at most"));
        config.ingest.queue_capacity = MAX_QUEUE_CAPACITY;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_default_config_round_trips_through_toml() {
        let text = toml::to_string_pretty(&Config::default()).unwrap();
        let back: Config = toml::from_str(&text).unwrap();
        assert_eq!(back, Config::default());
    }
}
