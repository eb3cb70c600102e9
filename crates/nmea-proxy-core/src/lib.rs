//! # nmea-proxy-core
//!
//! Core of the NMEA proxy bus.
//!
//! This crate provides:
//! - Sentence type and carriage-return line framing
//! - The `LinkHandler` contract shared by every transport
//! - The fanout registry that routes sentences between links
//! - The per-iteration link driver (without I/O scheduling)
//! - Proxy configuration types
//!
//! This crate is intentionally runtime-agnostic and contains no async code.
//! Transports and workers live in `nmea-proxy-server`.

pub mod config;
pub mod driver;
pub mod framing;
pub mod link;
pub mod registry;
pub mod sentence;

pub use config::{ConfigError, ProxyConfig, SerialErrorPolicy, SerialSpec};
pub use driver::{LinkDriver, TickOutcome};
pub use framing::LineFramer;
pub use link::{LinkError, LinkHandler, LinkId, LinkState, LinkStats, LinkStatsSnapshot};
pub use registry::{FanoutRegistry, LinkEndpoint, LinkShared};
pub use sentence::Sentence;
