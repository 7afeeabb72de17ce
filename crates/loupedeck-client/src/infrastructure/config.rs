//! TOML configuration for the device engine.
//!
//! Every field is optional in the file; absent fields take the defaults
//! below, so an empty file (or no file at all) is a valid configuration.
//!
//! ```toml
//! reconnect_interval_ms = 3000
//! reply_timeout_ms = 2000
//! ignore_websocket = true
//! path = "/dev/ttyACM0"
//! log_level = "debug"
//! ```
//!
//! Setting `reconnect_interval_ms = 0` disables automatic reconnection.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::transport::serial::BAUD_RATE;
use super::transport::TransportOptions;

/// Error type for configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A file system I/O error occurred.
    #[error("I/O error accessing config at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The TOML content could not be parsed.
    #[error("failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Engine behaviour settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EngineConfig {
    /// Delay before reconnecting after an abnormal disconnect.  `None` or `0`
    /// disables reconnection.
    #[serde(default = "default_reconnect_interval")]
    pub reconnect_interval_ms: Option<u64>,
    /// Network liveness window.
    #[serde(default = "default_timeout")]
    pub connection_timeout_ms: u64,
    /// Upper bound on the serial handshake.
    #[serde(default = "default_timeout")]
    pub handshake_timeout_ms: u64,
    /// How long an operation waits for its acknowledgement.
    #[serde(default = "default_reply_timeout")]
    pub reply_timeout_ms: u64,
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,
    /// Present the framebuffer after every key/screen draw.
    #[serde(default = "default_true")]
    pub auto_refresh: bool,
    #[serde(default)]
    pub ignore_serial: bool,
    #[serde(default)]
    pub ignore_websocket: bool,
    /// Explicit serial path; skips discovery.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    /// Explicit network host; skips discovery.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    /// Capacity of the device event channel.
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,
    /// `tracing` level used when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

// ── Default helpers ───────────────────────────────────────────────────────────

fn default_reconnect_interval() -> Option<u64> {
    Some(3000)
}
fn default_timeout() -> u64 {
    3000
}
fn default_reply_timeout() -> u64 {
    2000
}
fn default_baud_rate() -> u32 {
    BAUD_RATE
}
fn default_true() -> bool {
    true
}
fn default_event_capacity() -> usize {
    256
}
fn default_log_level() -> String {
    "info".to_string()
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            reconnect_interval_ms: default_reconnect_interval(),
            connection_timeout_ms: default_timeout(),
            handshake_timeout_ms: default_timeout(),
            reply_timeout_ms: default_reply_timeout(),
            baud_rate: default_baud_rate(),
            auto_refresh: default_true(),
            ignore_serial: false,
            ignore_websocket: false,
            path: None,
            host: None,
            event_capacity: default_event_capacity(),
            log_level: default_log_level(),
        }
    }
}

impl EngineConfig {
    /// Parses a configuration from TOML text.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Parse`] if the TOML is malformed.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// Loads a configuration file.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Io`] if the file cannot be read and
    /// [`ConfigError::Parse`] if it is malformed.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    /// Like [`EngineConfig::load`] but a missing file yields the defaults.
    ///
    /// # Errors
    ///
    /// As [`EngineConfig::load`], except for "not found".
    pub fn load_or_default(path: &Path) -> Result<Self, ConfigError> {
        match std::fs::read_to_string(path) {
            Ok(content) => Self::from_toml_str(&content),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(source) => Err(ConfigError::Io {
                path: path.to_path_buf(),
                source,
            }),
        }
    }

    /// Reconnect delay, or `None` when reconnection is disabled.
    pub fn reconnect_interval(&self) -> Option<Duration> {
        self.reconnect_interval_ms
            .filter(|ms| *ms > 0)
            .map(Duration::from_millis)
    }

    pub fn reply_timeout(&self) -> Duration {
        Duration::from_millis(self.reply_timeout_ms)
    }

    pub fn transport_options(&self) -> TransportOptions {
        TransportOptions {
            baud_rate: self.baud_rate,
            handshake_timeout: Duration::from_millis(self.handshake_timeout_ms),
            connection_timeout: Duration::from_millis(self.connection_timeout_ms),
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
