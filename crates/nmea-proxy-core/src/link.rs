//! The link contract shared by every transport on the bus.

use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

/// Registry-assigned identifier, unique for the lifetime of a registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct LinkId(pub u64);

impl fmt::Display for LinkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Errors a transport can report to its driver.
///
/// Any error returned from [`LinkHandler::receive`] or [`LinkHandler::send`]
/// is link-fatal: the driver closes the link and removes it from the bus.
/// Transient conditions are reported as `Ok(None)` / `Ok(false)` instead.
#[derive(Debug, Error)]
pub enum LinkError {
    /// I/O failure on the underlying transport.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The peer closed the connection.
    #[error("Peer disconnected")]
    Disconnected,

    /// Serial device failure.
    #[error("Serial device error: {0}")]
    Serial(String),
}

/// A bidirectional, transport-agnostic endpoint of the bus.
///
/// Every method must return promptly; the worker calling them is shared
/// with nothing else but must still never stall.
pub trait LinkHandler: Send {
    /// Human-readable identity derived from the transport.
    fn label(&self) -> &str;

    /// Read whatever bytes are available right now.
    ///
    /// `Ok(None)` means nothing is currently available.
    fn receive(&mut self) -> Result<Option<Vec<u8>>, LinkError>;

    /// Write one whole wire sentence if the transport is writable right now.
    ///
    /// `Ok(true)` means the sentence was accepted in full. A transport that
    /// could only take part of it keeps the rest and writes it out on later
    /// calls, so sentences never interleave on the wire. `Ok(false)` means
    /// none of `bytes` was written: the transport is not writable, or an
    /// earlier sentence is still being flushed.
    fn send(&mut self, bytes: &[u8]) -> Result<bool, LinkError>;

    /// Continue writing a sentence that `send` only partly wrote.
    ///
    /// `Ok(true)` once nothing is left pending.
    fn flush(&mut self) -> Result<bool, LinkError>;

    /// Release the transport.
    fn close(&mut self);
}

/// Connection state of a link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum LinkState {
    Disconnected = 0,
    Connected = 1,
    Closing = 2,
}

impl LinkState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => LinkState::Connected,
            2 => LinkState::Closing,
            _ => LinkState::Disconnected,
        }
    }
}

impl fmt::Display for LinkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LinkState::Disconnected => "disconnected",
            LinkState::Connected => "connected",
            LinkState::Closing => "closing",
        };
        f.write_str(name)
    }
}

/// Atomic cell holding a [`LinkState`].
#[derive(Debug)]
pub(crate) struct AtomicLinkState(AtomicU8);

impl AtomicLinkState {
    pub(crate) fn new(state: LinkState) -> Self {
        Self(AtomicU8::new(state as u8))
    }

    pub(crate) fn load(&self) -> LinkState {
        LinkState::from_u8(self.0.load(Ordering::Acquire))
    }

    pub(crate) fn store(&self, state: LinkState) {
        self.0.store(state as u8, Ordering::Release);
    }
}

/// Per-link traffic counters.
#[derive(Debug)]
pub struct LinkStats {
    rx: AtomicU64,
    tx: AtomicU64,
    connected_at: DateTime<Utc>,
}

impl Default for LinkStats {
    fn default() -> Self {
        Self::new()
    }
}

impl LinkStats {
    pub fn new() -> Self {
        Self {
            rx: AtomicU64::new(0),
            tx: AtomicU64::new(0),
            connected_at: Utc::now(),
        }
    }

    /// Sentences received from the transport.
    pub fn rx(&self) -> u64 {
        self.rx.load(Ordering::Relaxed)
    }

    /// Sentences accepted by the transport. Sentences dropped because the
    /// transport was not writable are not counted.
    pub fn tx(&self) -> u64 {
        self.tx.load(Ordering::Relaxed)
    }

    pub fn connected_at(&self) -> DateTime<Utc> {
        self.connected_at
    }

    pub(crate) fn record_rx(&self) {
        self.rx.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_tx(&self) {
        self.tx.fetch_add(1, Ordering::Relaxed);
    }
}

/// Point-in-time view of one link, as emitted by a stats report.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LinkStatsSnapshot {
    pub id: LinkId,
    pub label: String,
    pub state: LinkState,
    pub rx: u64,
    pub tx: u64,
    pub connected_at: DateTime<Utc>,
}

impl fmt::Display for LinkStatsSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} ({}): tx={} rx={}",
            self.id, self.label, self.state, self.tx, self.rx
        )
    }
}
