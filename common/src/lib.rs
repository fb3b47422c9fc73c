//! Configuration shared by the controller binary and the core library.
//!
//! Values come from three layers: the built-in defaults below, an optional
//! JSON file, and finally command-line flags applied by the binary.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Malformed config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("Unsupported data bits: {0} (expected 5-8)")]
    DataBits(u8),
    #[error("{0} must be greater than zero")]
    ZeroDuration(&'static str),
}

/// Parity setting of the serial line.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Parity {
    #[default]
    None,
    Odd,
    Even,
}

/// Stop bits of the serial line.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StopBits {
    #[default]
    One,
    Two,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SerialConfig {
    /// Device name, e.g. `/dev/ttyUSB0`. Empty means "not configured".
    pub port_name: String,
    pub baud_rate: u32,
    pub data_bits: u8,
    pub stop_bits: StopBits,
    pub parity: Parity,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            port_name: String::new(),
            baud_rate: 9600,
            data_bits: 8,
            stop_bits: StopBits::One,
            parity: Parity::None,
        }
    }
}

/// Timing knobs, all in milliseconds so the JSON stays readable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingConfig {
    pub response_timeout_ms: u64,
    pub connect_settle_ms: u64,
    pub tick_settle_ms: u64,
    pub reconnect_interval_ms: u64,
    pub read_poll_ms: u64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            response_timeout_ms: 5_000,
            connect_settle_ms: 1_000,
            tick_settle_ms: 50,
            reconnect_interval_ms: 200,
            read_poll_ms: 50,
        }
    }
}

impl TimingConfig {
    #[must_use]
    pub const fn response_timeout(&self) -> Duration {
        Duration::from_millis(self.response_timeout_ms)
    }

    #[must_use]
    pub const fn connect_settle(&self) -> Duration {
        Duration::from_millis(self.connect_settle_ms)
    }

    #[must_use]
    pub const fn tick_settle(&self) -> Duration {
        Duration::from_millis(self.tick_settle_ms)
    }

    #[must_use]
    pub const fn reconnect_interval(&self) -> Duration {
        Duration::from_millis(self.reconnect_interval_ms)
    }

    #[must_use]
    pub const fn read_poll(&self) -> Duration {
        Duration::from_millis(self.read_poll_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub serial: SerialConfig,
    pub timing: TimingConfig,
    pub rom_file: Option<PathBuf>,
    pub rom_origin: u16,
    pub microcode_file: PathBuf,
    pub export_dir: PathBuf,
    pub log_file: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            serial: SerialConfig::default(),
            timing: TimingConfig::default(),
            rom_file: None,
            rom_origin: 0x8000,
            microcode_file: PathBuf::from("microcode.json"),
            export_dir: PathBuf::from("."),
            log_file: PathBuf::from("logic-ctl.log"),
        }
    }
}

impl Config {
    /// Reads a JSON config file. Keys that are absent keep their defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Loads `path` when given, otherwise returns the defaults.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self, ConfigError> {
        path.map_or_else(|| Ok(Self::default()), Self::load)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(5..=8).contains(&self.serial.data_bits) {
            return Err(ConfigError::DataBits(self.serial.data_bits));
        }
        if self.timing.response_timeout_ms == 0 {
            return Err(ConfigError::ZeroDuration("response_timeout_ms"));
        }
        if self.timing.reconnect_interval_ms == 0 {
            return Err(ConfigError::ZeroDuration("reconnect_interval_ms"));
        }
        if self.timing.read_poll_ms == 0 {
            return Err(ConfigError::ZeroDuration("read_poll_ms"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests;
