// src/io/serial/framer.rs
//
// Newline framing for the device's text protocol.
// Bytes are accumulated until a '\n' delimiter; the delimiter is stripped and
// everything else (including '\r' and surrounding spaces) is kept. There is
// no maximum line length.

use std::io::{ErrorKind, Read};
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use crate::error::TransportError;

/// Line delimiter used by the device.
pub const LINE_DELIMITER: u8 = b'\n';

/// One framed line of device text. Transient, never persisted.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RawLine {
    pub text: String,
    /// Set when the line was produced by `flush()` without a trailing delimiter.
    pub incomplete: bool,
}

impl RawLine {
    pub fn new(text: impl Into<String>) -> Self {
        RawLine {
            text: text.into(),
            incomplete: false,
        }
    }

    fn from_bytes(bytes: &[u8], incomplete: bool) -> Self {
        RawLine {
            text: String::from_utf8_lossy(bytes).into_owned(),
            incomplete,
        }
    }
}

// =============================================================================
// Push-based framer
// =============================================================================

/// Push-based line framer. Feed it byte chunks as they arrive off the port.
#[derive(Debug, Default)]
pub struct LineFramer {
    buffer: Vec<u8>,
}

impl LineFramer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed bytes and return every line completed by them.
    /// Chunk boundaries may fall anywhere, including inside a line.
    pub fn feed(&mut self, data: &[u8]) -> Vec<RawLine> {
        let mut lines = Vec::new();

        for &byte in data {
            if byte == LINE_DELIMITER {
                let line: Vec<u8> = self.buffer.drain(..).collect();
                lines.push(RawLine::from_bytes(&line, false));
            } else {
                self.buffer.push(byte);
            }
        }

        lines
    }

    /// Emit whatever is buffered as a final, incomplete line.
    pub fn flush(&mut self) -> Option<RawLine> {
        if self.buffer.is_empty() {
            return None;
        }
        let line: Vec<u8> = self.buffer.drain(..).collect();
        Some(RawLine::from_bytes(&line, true))
    }

    /// Number of bytes waiting for a delimiter.
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }
}

// =============================================================================
// Pull-based line sequence over a reader
// =============================================================================

/// Lazy sequence of lines read from a transport.
///
/// - Read timeouts are not failures; the read is retried.
/// - End of stream flushes a trailing partial line, then the sequence ends.
/// - A read error is yielded once as `TransportError::Read`, then the sequence ends.
/// - Setting the cancel flag ends the sequence at the next read boundary
///   without flushing.
///
/// Not restartable: once it has ended it keeps returning `None`.
pub struct FramedLines<R: Read> {
    reader: R,
    framer: LineFramer,
    ready: std::collections::VecDeque<RawLine>,
    cancel: Arc<AtomicBool>,
    buf: [u8; 256],
    done: bool,
}

impl<R: Read> FramedLines<R> {
    pub fn new(reader: R, cancel: Arc<AtomicBool>) -> Self {
        FramedLines {
            reader,
            framer: LineFramer::new(),
            ready: std::collections::VecDeque::new(),
            cancel,
            buf: [0u8; 256],
            done: false,
        }
    }
}

impl<R: Read> Iterator for FramedLines<R> {
    type Item = Result<RawLine, TransportError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.cancel.load(Ordering::Relaxed) {
                self.done = true;
                self.ready.clear();
                return None;
            }
            if let Some(line) = self.ready.pop_front() {
                return Some(Ok(line));
            }
            if self.done {
                return None;
            }

            match self.reader.read(&mut self.buf) {
                Ok(0) => {
                    // EOF - port closed/disconnected
                    self.done = true;
                    if let Some(line) = self.framer.flush() {
                        self.ready.push_back(line);
                    }
                }
                Ok(n) => {
                    let lines = self.framer.feed(&self.buf[..n]);
                    self.ready.extend(lines);
                }
                Err(ref e)
                    if e.kind() == ErrorKind::TimedOut
                        || e.kind() == ErrorKind::WouldBlock
                        || e.kind() == ErrorKind::Interrupted =>
                {
                    // Timeout is expected for serial reads
                }
                Err(e) => {
                    self.done = true;
                    self.ready.clear();
                    return Some(Err(TransportError::Read(e)));
                }
            }
        }
    }
}
