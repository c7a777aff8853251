//! Controller configuration
//!
//! Shapes the machine at startup: where the upstream line endpoint lives,
//! how many lines/stations/LU slots exist, the scan interval, and whether
//! the frame trace is on. Loaded from a JSON file under the user config
//! directory, with command-line overrides applied on top.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Default TCP port of the upstream line endpoint.
pub const DEFAULT_LINE_PORT: u16 = 37520;

/// Controller configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Config {
    /// Hostname or address of the host running the upstream line endpoint
    pub line_host: String,
    /// TCP port of the upstream line endpoint
    pub line_port: u16,
    /// Number of physical lines to drive
    pub line_count: usize,
    /// Secondary station addresses attached to each line
    pub station_addresses: Vec<u8>,
    /// LU slots per station
    pub lus_per_station: usize,
    /// Scan cycle interval in microseconds
    pub scan_interval_us: u64,
    /// Interrupt acknowledgement timeout in milliseconds
    pub ack_timeout_ms: u64,
    /// Frame trace enabled
    pub trace: bool,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            line_host: "localhost".to_string(),
            line_port: DEFAULT_LINE_PORT,
            line_count: 1,
            station_addresses: vec![0xC1, 0xC2],
            lus_per_station: 4,
            scan_interval_us: 1000,
            ack_timeout_ms: 5000,
            trace: false,
        }
    }
}

impl Config {
    /// Default location: `<user config dir>/cc3705r/config.json`.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("cc3705r").join("config.json"))
    }

    /// Load from a JSON file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Load the default file if it exists, otherwise the built-in defaults.
    pub fn load_or_default() -> Self {
        match Self::default_path() {
            Some(path) if path.exists() => Config::load(&path).unwrap_or_else(|e| {
                log::warn!("config file ignored: {e}");
                Config::default()
            }),
            _ => Config::default(),
        }
    }

    /// Write to a JSON file, creating parent directories as needed.
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(self)?;
        fs::write(path, contents)?;
        Ok(())
    }

    /// Check the shape makes a runnable machine.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.line_count == 0 {
            return Err(ConfigError::InvalidValue {
                field: "line_count",
                reason: "at least one line is required".to_string(),
            });
        }
        if self.station_addresses.is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "station_addresses",
                reason: "at least one station address is required".to_string(),
            });
        }
        if self.lus_per_station == 0 {
            return Err(ConfigError::InvalidValue {
                field: "lus_per_station",
                reason: "at least one LU slot per station is required".to_string(),
            });
        }
        for &addr in &self.station_addresses {
            if addr & 0x0F == 0 {
                return Err(ConfigError::InvalidValue {
                    field: "station_addresses",
                    reason: format!("address {addr:#04X} has no station nibble"),
                });
            }
        }
        Ok(())
    }

    pub fn scan_interval(&self) -> Duration {
        Duration::from_micros(self.scan_interval_us)
    }

    pub fn ack_timeout(&self) -> Duration {
        Duration::from_millis(self.ack_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn save_and_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        let mut config = Config::default();
        config.line_host = "mainframe.example.com".to_string();
        config.trace = true;
        config.save(&path).unwrap();

        let loaded = Config::load(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn invalid_shapes_are_rejected() {
        let mut config = Config::default();
        config.line_count = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.station_addresses = vec![0xC0];
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.lus_per_station = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn malformed_file_is_a_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, "{ not json").unwrap();
        assert!(matches!(
            Config::load(&path),
            Err(crate::error::ConfigError::Parse(_))
        ));
    }
}
