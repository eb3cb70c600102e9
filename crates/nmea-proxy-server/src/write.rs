//! Whole-sentence writes over non-blocking transports.
//!
//! A transport may accept only part of a sentence before its buffer fills.
//! The unwritten tail is held here and written out before anything else,
//! so the peer always sees complete, terminated sentences.

use std::io::{self, ErrorKind, Write};

/// Holds the unwritten tail of a partly written sentence.
#[derive(Debug, Default)]
pub(crate) struct SentenceWriter {
    tail: Vec<u8>,
}

fn not_ready(kind: ErrorKind) -> bool {
    matches!(kind, ErrorKind::WouldBlock | ErrorKind::TimedOut)
}

impl SentenceWriter {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Bytes still owed to the transport.
    pub(crate) fn pending(&self) -> usize {
        self.tail.len()
    }

    /// Write as much of the held tail as `out` accepts.
    ///
    /// Returns `Ok(true)` once nothing is held.
    pub(crate) fn flush<W: Write + ?Sized>(&mut self, out: &mut W) -> io::Result<bool> {
        while !self.tail.is_empty() {
            match out.write(&self.tail) {
                Ok(0) => return Err(ErrorKind::WriteZero.into()),
                Ok(n) => {
                    self.tail.drain(..n);
                }
                Err(e) if e.kind() == ErrorKind::Interrupted => {}
                Err(e) if not_ready(e.kind()) => return Ok(false),
                Err(e) => return Err(e),
            }
        }
        Ok(true)
    }

    /// Write one sentence.
    ///
    /// `Ok(false)` if none of it was written, either because `out` is not
    /// ready or because an earlier tail is still held. Once any byte is
    /// written the rest is held and `Ok(true)` returned.
    pub(crate) fn send<W: Write + ?Sized>(&mut self, out: &mut W, bytes: &[u8]) -> io::Result<bool> {
        if !self.flush(out)? {
            return Ok(false);
        }

        let mut written = 0;
        while written < bytes.len() {
            match out.write(&bytes[written..]) {
                Ok(0) => return Err(ErrorKind::WriteZero.into()),
                Ok(n) => written += n,
                Err(e) if e.kind() == ErrorKind::Interrupted => {}
                Err(e) if not_ready(e.kind()) => {
                    if written == 0 {
                        return Ok(false);
                    }
                    self.tail.extend_from_slice(&bytes[written..]);
                    return Ok(true);
                }
                Err(e) => {
                    // Keep the stream aligned in case the transport recovers
                    if written > 0 {
                        self.tail.extend_from_slice(&bytes[written..]);
                    }
                    return Err(e);
                }
            }
        }
        Ok(true)
    }

    pub(crate) fn clear(&mut self) {
        self.tail.clear();
    }
}
