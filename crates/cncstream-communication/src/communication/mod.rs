//! Byte-stream link abstraction
//!
//! The engine never opens or closes ports itself. It talks to a [`Link`]
//! that yields complete response lines and accepts raw bytes.

pub mod io_link;
pub mod ledger;
pub mod loopback;

pub use io_link::IoLink;
pub use ledger::{
    CommandLedger, CommandOrigin, Enqueued, PendingCommand, QueuedCommand, ResponseAccumulator,
    DEFAULT_BUFFER_CAPACITY, RESET_MARKER,
};
pub use loopback::{AutoReply, LoopbackHandle, LoopbackLink};

use cncstream_core::{ConnectionError, Result};
use std::collections::VecDeque;

/// Longest line kept from the controller; the rest is dropped
pub const MAX_LINE_LENGTH: usize = 1024;

/// Line-oriented byte stream to a controller
pub trait Link: Send {
    /// True while bytes can be exchanged
    fn is_open(&self) -> bool;

    /// True when a complete line is available without blocking
    fn can_read_line(&mut self) -> bool;

    /// Next complete line, trimmed of terminators and whitespace
    fn read_line(&mut self) -> Option<String>;

    /// Write raw bytes, returning how many were written
    fn write(&mut self, data: &[u8]) -> Result<usize>;

    /// Close the link
    fn close(&mut self);

    /// Failure observed while reading in the background, if any
    fn take_error(&mut self) -> Option<ConnectionError> {
        None
    }

    /// Human readable name for logs
    fn name(&self) -> String {
        "link".to_string()
    }
}

impl<L: Link + ?Sized> Link for Box<L> {
    fn is_open(&self) -> bool {
        (**self).is_open()
    }

    fn can_read_line(&mut self) -> bool {
        (**self).can_read_line()
    }

    fn read_line(&mut self) -> Option<String> {
        (**self).read_line()
    }

    fn write(&mut self, data: &[u8]) -> Result<usize> {
        (**self).write(data)
    }

    fn close(&mut self) {
        (**self).close()
    }

    fn take_error(&mut self) -> Option<ConnectionError> {
        (**self).take_error()
    }

    fn name(&self) -> String {
        (**self).name()
    }
}

/// Splits a raw byte stream into trimmed lines
///
/// CR, LF and CRLF all terminate a line. Blank lines are dropped and
/// lines longer than [`MAX_LINE_LENGTH`] are truncated.
#[derive(Debug, Default)]
pub struct LineReader {
    partial: Vec<u8>,
    truncated: bool,
    lines: VecDeque<String>,
}

impl LineReader {
    /// Create an empty reader
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed raw bytes
    pub fn push_bytes(&mut self, bytes: &[u8]) {
        for &byte in bytes {
            match byte {
                b'\r' | b'\n' => self.finish_line(),
                _ if self.partial.len() < MAX_LINE_LENGTH => self.partial.push(byte),
                _ => self.truncated = true,
            }
        }
    }

    fn finish_line(&mut self) {
        if self.truncated {
            tracing::warn!("Response line exceeded {} bytes, truncated", MAX_LINE_LENGTH);
            self.truncated = false;
        }
        let line = String::from_utf8_lossy(&self.partial).trim().to_string();
        self.partial.clear();
        if !line.is_empty() {
            self.lines.push_back(line);
        }
    }

    /// True when a complete line is buffered
    pub fn has_line(&self) -> bool {
        !self.lines.is_empty()
    }

    /// Pop the next complete line
    pub fn next_line(&mut self) -> Option<String> {
        self.lines.pop_front()
    }

    /// Drop buffered data
    pub fn clear(&mut self) {
        self.partial.clear();
        self.lines.clear();
        self.truncated = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mixed_terminators() {
        let mut reader = LineReader::new();
        reader.push_bytes(b"ok\r\nerror:20\n<Idle|MPos:0.000,0.000,0.000>\rpartial");
        assert_eq!(reader.next_line().as_deref(), Some("ok"));
        assert_eq!(reader.next_line().as_deref(), Some("error:20"));
        assert_eq!(
            reader.next_line().as_deref(),
            Some("<Idle|MPos:0.000,0.000,0.000>")
        );
        assert!(!reader.has_line());
        reader.push_bytes(b" line \n");
        assert_eq!(reader.next_line().as_deref(), Some("partial line"));
    }

    #[test]
    fn test_long_line_truncated() {
        let mut reader = LineReader::new();
        let long = vec![b'a'; MAX_LINE_LENGTH + 50];
        reader.push_bytes(&long);
        reader.push_bytes(b"\nok\n");
        assert_eq!(reader.next_line().map(|l| l.len()), Some(MAX_LINE_LENGTH));
        assert_eq!(reader.next_line().as_deref(), Some("ok"));
    }
}
