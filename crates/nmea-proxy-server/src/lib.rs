//! # nmea-proxy-server
//!
//! Tokio runtime layer of the NMEA proxy.
//!
//! This crate provides:
//! - `SerialLink` and `TcpConnectionLink` transports
//! - The TCP listener that turns each client into a new link
//! - One worker task per link, plus the listener's accept loop
//! - Signal-driven shutdown and stats reporting

pub mod error;
pub mod lifecycle;
pub mod proxy;
pub mod scheduler;
pub mod serial;
pub mod tcp;
mod write;

pub use error::ProxyError;
pub use lifecycle::{spawn_signal_forwarder, ControlRequest, LifecycleController};
pub use proxy::NmeaProxy;
pub use scheduler::{Scheduler, ShutdownReport};
pub use serial::SerialLink;
pub use tcp::{TcpConnectionLink, TcpLinkListener};

pub use nmea_proxy_core::{FanoutRegistry, LinkStatsSnapshot, ProxyConfig, Sentence};

/// Bytes requested from a transport per read.
pub const READ_CHUNK_SIZE: usize = 1024;
