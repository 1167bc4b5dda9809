//! In-memory link
//!
//! [`LoopbackLink`] is the controller end of a pipe that lives entirely in
//! memory. The paired [`LoopbackHandle`] sees every byte the engine writes
//! and can inject response lines. With an [`AutoReply`] mode set, the link
//! behaves like a minimal controller that reports itself running for one
//! status poll after each command, which is enough to stream a job end to
//! end without hardware.

use super::{Link, LineReader};
use cncstream_core::{ConnectionError, Result};
use parking_lot::Mutex;
use std::sync::Arc;

const GRBL_BANNER: &str = "Grbl 1.1h ['$' for help]";
const BUSY_POLLS: usize = 1;

/// Built-in controller behaviour
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AutoReply {
    /// Answer like Grbl 1.1: `ok` per line, `<..>` for `?`, banner on soft reset
    Grbl,
    /// Answer like Marlin: `ok` per line, `S_XYZ:` for `S000`
    Marlin,
}

#[derive(Debug)]
struct LoopbackState {
    open: bool,
    fail_writes: bool,
    written: Vec<u8>,
    inbound: LineReader,
    auto_reply: Option<AutoReply>,
    status_report: String,
    busy_polls: usize,
    pending_line: Vec<u8>,
}

impl LoopbackState {
    fn new(auto_reply: Option<AutoReply>) -> Self {
        Self {
            open: true,
            fail_writes: false,
            written: Vec::new(),
            inbound: LineReader::new(),
            auto_reply,
            status_report: match auto_reply {
                Some(AutoReply::Marlin) => "S_XYZ:3".to_string(),
                _ => "<Idle|MPos:0.000,0.000,0.000|FS:0,0>".to_string(),
            },
            busy_polls: 0,
            pending_line: Vec::new(),
        }
    }

    fn status(&mut self) -> String {
        if self.busy_polls == 0 {
            return self.status_report.clone();
        }
        self.busy_polls -= 1;
        self.status_report
            .replacen("Idle", "Run", 1)
            .replacen("S_XYZ:3", "S_XYZ:5", 1)
    }

    fn reply(&mut self, line: &str) {
        self.inbound.push_bytes(line.as_bytes());
        self.inbound.push_bytes(b"\n");
    }

    fn answer(&mut self, data: &[u8]) {
        let Some(mode) = self.auto_reply else {
            return;
        };

        for &byte in data {
            match (mode, byte) {
                (_, b'\r' | b'\n') => {
                    let line = String::from_utf8_lossy(&self.pending_line).trim().to_string();
                    self.pending_line.clear();
                    if !line.is_empty() {
                        self.answer_line(mode, &line);
                    }
                }
                (AutoReply::Grbl, b'?') if self.pending_line.is_empty() => {
                    let report = self.status();
                    self.reply(&report);
                }
                (AutoReply::Grbl, 0x18) => {
                    self.pending_line.clear();
                    self.reply(GRBL_BANNER);
                }
                (AutoReply::Grbl, b'!' | b'~') if self.pending_line.is_empty() => {}
                (AutoReply::Grbl, 0x80..=0xff) => {}
                _ => self.pending_line.push(byte),
            }
        }
    }

    fn answer_line(&mut self, mode: AutoReply, line: &str) {
        match mode {
            AutoReply::Grbl => {
                match line {
                    "$G" => self.reply("[GC:G0 G54 G17 G21 G90 G94 M5 M9 T0 F0 S0]"),
                    "$#" => self.reply("[G92:0.000,0.000,0.000]"),
                    _ if line.starts_with('$') => {}
                    _ => self.busy_polls = BUSY_POLLS,
                }
                self.reply("ok");
            }
            AutoReply::Marlin => match line {
                "S000" => {
                    let report = self.status();
                    self.reply(&report);
                }
                "P000" | "R000" | "M112" => {}
                _ => {
                    self.busy_polls = BUSY_POLLS;
                    self.reply("ok");
                }
            },
        }
    }
}

/// Controller side of an in-memory link
#[derive(Debug, Clone)]
pub struct LoopbackHandle {
    state: Arc<Mutex<LoopbackState>>,
}

impl LoopbackHandle {
    /// Queue a response line for the engine to read
    pub fn push_line(&self, line: &str) {
        self.state.lock().reply(line);
    }

    /// Queue several response lines
    pub fn push_lines<'a>(&self, lines: impl IntoIterator<Item = &'a str>) {
        let mut state = self.state.lock();
        for line in lines {
            state.reply(line);
        }
    }

    /// Everything written so far
    pub fn written(&self) -> Vec<u8> {
        self.state.lock().written.clone()
    }

    /// Everything written so far, lossily decoded
    pub fn written_text(&self) -> String {
        String::from_utf8_lossy(&self.state.lock().written).into_owned()
    }

    /// Drain and return everything written so far
    pub fn take_written(&self) -> Vec<u8> {
        std::mem::take(&mut self.state.lock().written)
    }

    /// Drain the written bytes and split them on line terminators
    pub fn take_written_lines(&self) -> Vec<String> {
        let bytes = self.take_written();
        String::from_utf8_lossy(&bytes)
            .split(['\r', '\n'])
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect()
    }

    /// Status report returned by the auto-reply controller
    pub fn set_status_report(&self, report: impl Into<String>) {
        self.state.lock().status_report = report.into();
    }

    /// Make subsequent writes fail with a transport error
    pub fn set_fail_writes(&self, fail: bool) {
        self.state.lock().fail_writes = fail;
    }

    /// Simulate the remote end disappearing
    pub fn disconnect(&self) {
        self.state.lock().open = false;
    }
}

/// In-memory [`Link`]
#[derive(Debug)]
pub struct LoopbackLink {
    state: Arc<Mutex<LoopbackState>>,
}

impl LoopbackLink {
    /// Create a link whose responses are injected manually through the handle
    pub fn new() -> (Self, LoopbackHandle) {
        Self::build(None)
    }

    /// Create a link that answers like the given controller
    pub fn with_auto_reply(mode: AutoReply) -> (Self, LoopbackHandle) {
        Self::build(Some(mode))
    }

    fn build(auto_reply: Option<AutoReply>) -> (Self, LoopbackHandle) {
        let state = Arc::new(Mutex::new(LoopbackState::new(auto_reply)));
        (
            Self {
                state: Arc::clone(&state),
            },
            LoopbackHandle { state },
        )
    }
}

impl Link for LoopbackLink {
    fn is_open(&self) -> bool {
        self.state.lock().open
    }

    fn can_read_line(&mut self) -> bool {
        self.state.lock().inbound.has_line()
    }

    fn read_line(&mut self) -> Option<String> {
        self.state.lock().inbound.next_line()
    }

    fn write(&mut self, data: &[u8]) -> Result<usize> {
        let mut state = self.state.lock();
        if !state.open {
            return Err(ConnectionError::NotOpen.into());
        }
        if state.fail_writes {
            state.open = false;
            return Err(ConnectionError::WriteFailed {
                reason: "loopback write failure".to_string(),
            }
            .into());
        }
        state.written.extend_from_slice(data);
        state.answer(data);
        Ok(data.len())
    }

    fn close(&mut self) {
        self.state.lock().open = false;
    }

    fn name(&self) -> String {
        "loopback".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manual_injection() {
        let (mut link, handle) = LoopbackLink::new();
        assert!(!link.can_read_line());
        handle.push_lines(["ok", "error:20"]);
        assert_eq!(link.read_line().as_deref(), Some("ok"));
        assert_eq!(link.read_line().as_deref(), Some("error:20"));
        assert_eq!(link.read_line(), None);
    }

    #[test]
    fn test_grbl_auto_reply() {
        let (mut link, handle) = LoopbackLink::with_auto_reply(AutoReply::Grbl);
        link.write(b"G0X1\r").unwrap();
        link.write(b"?").unwrap();
        link.write(b"?").unwrap();
        link.write(&[0x18]).unwrap();
        assert_eq!(link.read_line().as_deref(), Some("ok"));
        assert_eq!(
            link.read_line().as_deref(),
            Some("<Run|MPos:0.000,0.000,0.000|FS:0,0>")
        );
        assert_eq!(
            link.read_line().as_deref(),
            Some("<Idle|MPos:0.000,0.000,0.000|FS:0,0>")
        );
        assert_eq!(link.read_line().as_deref(), Some(GRBL_BANNER));
        assert_eq!(handle.take_written_lines(), vec!["G0X1", "??\u{18}"]);
    }

    #[test]
    fn test_marlin_auto_reply_skips_realtime_tokens() {
        let (mut link, _handle) = LoopbackLink::with_auto_reply(AutoReply::Marlin);
        link.write(b"P000\n").unwrap();
        assert!(!link.can_read_line());
        link.write(b"G28\n").unwrap();
        assert_eq!(link.read_line().as_deref(), Some("ok"));
        link.write(b"S000\n").unwrap();
        assert_eq!(link.read_line().as_deref(), Some("S_XYZ:5"));
        link.write(b"S000\n").unwrap();
        assert_eq!(link.read_line().as_deref(), Some("S_XYZ:3"));
    }

    #[test]
    fn test_failed_write_closes() {
        let (mut link, handle) = LoopbackLink::new();
        handle.set_fail_writes(true);
        assert!(link.write(b"G0\r").is_err());
        assert!(!link.is_open());
    }
}
