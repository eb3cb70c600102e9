//! Error types for the proxy runtime.

use thiserror::Error;

use nmea_proxy_core::ConfigError;

/// Errors that stop the proxy from starting.
#[derive(Debug, Error)]
pub enum ProxyError {
    /// A TCP listener could not be bound.
    #[error("Failed to bind TCP port {port}: {source}")]
    Bind {
        port: u16,
        #[source]
        source: std::io::Error,
    },

    /// A serial device could not be opened.
    #[error("Failed to open serial device {path}: {source}")]
    SerialOpen {
        path: String,
        #[source]
        source: serialport::Error,
    },

    /// Configuration is invalid.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Nothing could be started.
    #[error("No serial device or TCP port could be started")]
    NothingToRun,

    /// I/O error outside any single link.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
