//! Proxy configuration.
//!
//! Configuration is assembled by the binary from a JSON file and command
//! line flags; the core only defines the types and their parsing rules.

use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

use crate::framing::DEFAULT_MAX_LINE_LENGTH;

/// Baud rate used when a serial spec names only the device.
pub const DEFAULT_BAUD_RATE: u32 = 115_200;

/// Default worker polling interval.
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 10;

/// Errors that can occur while building a configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A serial spec is not of the form `DEVICE[,BAUD]`.
    #[error("Invalid serial device spec '{0}', expected DEVICE[,BAUD]")]
    InvalidSerialSpec(String),

    /// The baud rate part of a serial spec is not a positive integer.
    #[error("Invalid baud rate '{0}'")]
    InvalidBaudRate(String),

    /// Failed to read a configuration file.
    #[error("Failed to read configuration: {0}")]
    Read(#[from] std::io::Error),

    /// Configuration file contents are invalid.
    #[error("Invalid configuration: {0}")]
    Parse(#[from] serde_json::Error),
}

/// A serial device to attach to the bus, written as `DEVICE[,BAUD]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SerialSpec {
    pub path: String,
    pub baud_rate: u32,
}

impl SerialSpec {
    pub fn new(path: impl Into<String>, baud_rate: u32) -> Self {
        Self {
            path: path.into(),
            baud_rate,
        }
    }
}

impl FromStr for SerialSpec {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (path, baud) = match s.split_once(',') {
            Some((path, baud)) => (path.trim(), Some(baud.trim())),
            None => (s.trim(), None),
        };
        if path.is_empty() {
            return Err(ConfigError::InvalidSerialSpec(s.to_string()));
        }

        let baud_rate = match baud {
            None => DEFAULT_BAUD_RATE,
            Some(baud) => match baud.parse::<u32>() {
                Ok(rate) if rate > 0 => rate,
                _ => return Err(ConfigError::InvalidBaudRate(baud.to_string())),
            },
        };

        Ok(Self::new(path, baud_rate))
    }
}

impl fmt::Display for SerialSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{}", self.path, self.baud_rate)
    }
}

impl Serialize for SerialSpec {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for SerialSpec {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// What a serial link does when its device reports an error after opening.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SerialErrorPolicy {
    /// Log at debug level and treat the error as "no data" / "not writable".
    #[default]
    Ignore,
    /// Treat the error as link-fatal: close and leave the bus.
    Deregister,
}

impl FromStr for SerialErrorPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "ignore" => Ok(SerialErrorPolicy::Ignore),
            "deregister" => Ok(SerialErrorPolicy::Deregister),
            other => Err(format!("unknown serial error policy '{other}'")),
        }
    }
}

/// Complete proxy configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProxyConfig {
    /// Serial devices to attach.
    pub serial: Vec<SerialSpec>,

    /// TCP ports to listen on (all interfaces).
    pub tcp_ports: Vec<u16>,

    /// Worker polling interval in milliseconds.
    pub poll_interval_ms: u64,

    /// Longest partial line kept while waiting for a carriage return.
    pub max_line_length: usize,

    /// Policy for serial errors after a successful open.
    pub serial_error_policy: SerialErrorPolicy,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            serial: Vec::new(),
            tcp_ports: Vec::new(),
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            max_line_length: DEFAULT_MAX_LINE_LENGTH,
            serial_error_policy: SerialErrorPolicy::default(),
        }
    }
}

impl ProxyConfig {
    /// Load a configuration from a JSON file. Missing fields take defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json(&text)
    }

    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    /// True if no link of any kind is configured.
    pub fn is_empty(&self) -> bool {
        self.serial.is_empty() && self.tcp_ports.is_empty()
    }
}
