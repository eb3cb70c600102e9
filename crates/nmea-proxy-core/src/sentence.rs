//! NMEA sentence payloads.
//!
//! A sentence is whatever sits between two carriage returns on the wire.
//! No structure or checksum validation is performed.

use std::fmt;

/// Terminator appended to every sentence written to a link.
pub const WIRE_TERMINATOR: &[u8] = b"\r\n";

/// One carriage-return delimited text unit exchanged over a link.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Sentence(Vec<u8>);

impl Sentence {
    /// Create a sentence from raw payload bytes (without terminator).
    pub fn new(payload: impl Into<Vec<u8>>) -> Self {
        Self(payload.into())
    }

    /// Raw payload bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Payload followed by `\r\n`, ready to be written to a transport.
    pub fn to_wire(&self) -> Vec<u8> {
        let mut wire = Vec::with_capacity(self.0.len() + WIRE_TERMINATOR.len());
        wire.extend_from_slice(&self.0);
        wire.extend_from_slice(WIRE_TERMINATOR);
        wire
    }
}

impl From<&str> for Sentence {
    fn from(s: &str) -> Self {
        Self::new(s.as_bytes())
    }
}

impl fmt::Display for Sentence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&String::from_utf8_lossy(&self.0))
    }
}
