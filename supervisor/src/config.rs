//! Supervisor configuration and its on-disk store
//!
//! Device identifiers and operating thresholds are persisted as JSON. The
//! supervisor reads the resolved values at startup and writes the humidity
//! threshold back when the operator changes it.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Electrical sense of the relay outputs.
///
/// Some relay boxes energize a circuit on a low output. The polarity is a
/// single bank-wide setting, not per-channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RelayPolarity {
    #[default]
    ActiveHigh,
    ActiveLow,
}

impl RelayPolarity {
    /// Output level that energizes a circuit.
    pub fn on_level(self) -> bool {
        matches!(self, RelayPolarity::ActiveHigh)
    }

    /// Output level that de-energizes a circuit.
    pub fn off_level(self) -> bool {
        !self.on_level()
    }
}

/// Resolved supervisor configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ObsyConfig {
    pub dome_id: Option<String>,
    pub mount_id: Option<String>,
    pub weather_id: Option<String>,
    pub safety_id: Option<String>,
    pub relay_id: Option<String>,

    /// Humidity above this is treated as fog/mist and the air axis goes unsafe.
    pub max_humidity: f64,

    /// Poll budget for "wait until the mount parks", in ticks.
    pub mount_timeout: u32,

    /// Poll budget for "wait until the roof finishes moving", in ticks.
    pub roof_timeout: u32,

    /// Supervisory cycle period.
    pub tick_interval_ms: u64,

    pub relay_polarity: RelayPolarity,
}

impl Default for ObsyConfig {
    fn default() -> Self {
        Self {
            dome_id: None,
            mount_id: None,
            weather_id: None,
            safety_id: None,
            relay_id: None,
            max_humidity: 97.0,
            mount_timeout: 15,
            roof_timeout: 20,
            tick_interval_ms: 2000,
            relay_polarity: RelayPolarity::ActiveHigh,
        }
    }
}

/// JSON-backed configuration store.
#[derive(Debug, Clone)]
pub struct ConfigStore {
    path: PathBuf,
}

impl ConfigStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the configuration, falling back to defaults if the file does not
    /// exist yet.
    pub fn load(&self) -> Result<ObsyConfig> {
        if !self.path.exists() {
            return Ok(ObsyConfig::default());
        }
        let raw = std::fs::read_to_string(&self.path)
            .with_context(|| format!("reading config {}", self.path.display()))?;
        serde_json::from_str(&raw)
            .with_context(|| format!("parsing config {}", self.path.display()))
    }

    pub fn save(&self, config: &ObsyConfig) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating config dir {}", parent.display()))?;
        }
        let raw = serde_json::to_string_pretty(config).context("serializing config")?;
        std::fs::write(&self.path, raw)
            .with_context(|| format!("writing config {}", self.path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_field_expectations() {
        let cfg = ObsyConfig::default();
        assert_eq!(cfg.max_humidity, 97.0);
        assert_eq!(cfg.mount_timeout, 15);
        assert_eq!(cfg.roof_timeout, 20);
        assert_eq!(cfg.tick_interval_ms, 2000);
        assert_eq!(cfg.relay_polarity, RelayPolarity::ActiveHigh);
    }

    #[test]
    fn polarity_levels_invert() {
        assert!(RelayPolarity::ActiveHigh.on_level());
        assert!(!RelayPolarity::ActiveHigh.off_level());
        assert!(!RelayPolarity::ActiveLow.on_level());
        assert!(RelayPolarity::ActiveLow.off_level());
    }

    #[test]
    fn store_round_trips_config() {
        let dir = tempfile::tempdir().unwrap();
        let store = ConfigStore::new(dir.path().join("obsy.json"));

        let mut cfg = ObsyConfig::default();
        cfg.dome_id = Some("ASCOM.LifeRoof.Dome".to_string());
        cfg.max_humidity = 92.5;
        cfg.relay_polarity = RelayPolarity::ActiveLow;
        store.save(&cfg).unwrap();

        let loaded = store.load().unwrap();
        assert_eq!(loaded.dome_id.as_deref(), Some("ASCOM.LifeRoof.Dome"));
        assert_eq!(loaded.max_humidity, 92.5);
        assert_eq!(loaded.relay_polarity, RelayPolarity::ActiveLow);
    }

    #[test]
    fn missing_file_loads_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let store = ConfigStore::new(dir.path().join("absent.json"));
        let cfg = store.load().unwrap();
        assert_eq!(cfg.mount_id, None);
        assert_eq!(cfg.max_humidity, 97.0);
    }

    #[test]
    fn partial_file_fills_in_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("obsy.json");
        std::fs::write(&path, r#"{ "max_humidity": 90.0 }"#).unwrap();
        let cfg = ConfigStore::new(path).load().unwrap();
        assert_eq!(cfg.max_humidity, 90.0);
        assert_eq!(cfg.mount_timeout, 15);
    }
}
