//! Carriage-return line framing over a byte stream.
//!
//! Reads from a transport arrive in arbitrary chunks. The framer carries the
//! trailing partial line across reads and yields one [`Sentence`] per
//! complete line.

use tracing::debug;

use crate::sentence::Sentence;

/// Input delimiter.
pub const DELIMITER: u8 = b'\r';

/// Default cap on a buffered partial line.
pub const DEFAULT_MAX_LINE_LENGTH: usize = 4096;

/// Reassembles carriage-return delimited lines from a byte stream.
#[derive(Debug, Clone)]
pub struct LineFramer {
    buffer: Vec<u8>,
    max_line_length: usize,
    /// Skipping the rest of an oversized line up to its delimiter.
    discarding: bool,
}

impl Default for LineFramer {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_LINE_LENGTH)
    }
}

impl LineFramer {
    /// Create a framer that discards partial lines longer than `max_line_length`.
    pub fn new(max_line_length: usize) -> Self {
        Self {
            buffer: Vec::new(),
            max_line_length,
            discarding: false,
        }
    }

    /// Append `data` and return every line completed by it, in wire order.
    ///
    /// Each line is trimmed of surrounding ASCII whitespace; lines that are
    /// empty after trimming are skipped. A line that outgrows
    /// `max_line_length` is dropped as a whole, through its delimiter.
    pub fn push(&mut self, data: &[u8]) -> Vec<Sentence> {
        let data = if self.discarding {
            match data.iter().position(|&b| b == DELIMITER) {
                Some(end) => {
                    self.discarding = false;
                    &data[end + 1..]
                }
                None => return Vec::new(),
            }
        } else {
            data
        };
        self.buffer.extend_from_slice(data);

        let mut sentences = Vec::new();
        let mut start = 0;
        while let Some(offset) = self.buffer[start..].iter().position(|&b| b == DELIMITER) {
            let line = trim_ascii(&self.buffer[start..start + offset]);
            if !line.is_empty() {
                sentences.push(Sentence::new(line));
            }
            start += offset + 1;
        }
        self.buffer.drain(..start);

        if self.buffer.len() > self.max_line_length {
            debug!(
                "Discarding {} buffered bytes without a line terminator",
                self.buffer.len()
            );
            self.buffer.clear();
            self.discarding = true;
        }

        sentences
    }

    /// The partial line carried to the next read.
    pub fn pending(&self) -> &[u8] {
        &self.buffer
    }

    pub fn clear(&mut self) {
        self.buffer.clear();
        self.discarding = false;
    }
}

fn trim_ascii(bytes: &[u8]) -> &[u8] {
    let start = bytes
        .iter()
        .position(|b| !b.is_ascii_whitespace())
        .unwrap_or(bytes.len());
    let end = bytes
        .iter()
        .rposition(|b| !b.is_ascii_whitespace())
        .map_or(start, |i| i + 1);
    &bytes[start..end]
}
