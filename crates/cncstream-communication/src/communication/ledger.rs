//! Command ledger with flow control and response correlation
//!
//! Implements character-counting streaming: every command charged against
//! the controller's receive buffer stays in the in-flight FIFO until its
//! terminator line arrives. Controllers answer strictly in order, so the
//! oldest in-flight entry is always the one a terminator belongs to.
//!
//! # Features
//! - In-flight FIFO bounded by a byte budget
//! - Backpressure FIFO for commands that do not fit yet
//! - Response fragment accumulation for the oldest command
//! - Console slot bookkeeping for echoed commands

use cncstream_core::{ControllerError, Result};
use serde::Serialize;
use std::collections::VecDeque;

/// Default receive buffer budget in bytes
pub const DEFAULT_BUFFER_CAPACITY: usize = 127;

/// Text of the synthetic command that waits for a reset banner
pub const RESET_MARKER: &str = "[CTRL+X]";

/// Where a command came from
///
/// Program lines carry their index; everything else is tagged so its
/// response is never mistaken for program progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CommandOrigin {
    /// A line of the loaded program
    Program(usize),
    /// Typed by the operator or issued by a machine command
    Manual,
    /// Internal query whose response feeds a side channel
    /// (offsets, coordinate mode, continuous jog, spindle refresh)
    Query,
    /// Low priority background poll (parser state, stepped jog)
    Poll,
}

impl CommandOrigin {
    /// Program line index, if any
    pub fn program_index(&self) -> Option<usize> {
        match self {
            CommandOrigin::Program(index) => Some(*index),
            _ => None,
        }
    }

    /// Program lines and manual commands; internal traffic excluded
    pub fn is_operator_command(&self) -> bool {
        matches!(self, CommandOrigin::Program(_) | CommandOrigin::Manual)
    }

    /// Legacy numeric tag: program index, -1 manual, -2 query, -3 poll
    pub fn as_table_index(&self) -> i64 {
        match self {
            CommandOrigin::Program(index) => *index as i64,
            CommandOrigin::Manual => -1,
            CommandOrigin::Query => -2,
            CommandOrigin::Poll => -3,
        }
    }
}

/// A command transmitted but not yet acknowledged
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingCommand {
    /// Ledger-assigned identifier, unique per ledger
    pub id: u64,
    /// The literal line sent, without terminator
    pub text: String,
    /// Bytes charged against the budget (text plus one terminator byte)
    pub wire_length: usize,
    /// Origin of the command
    pub origin: CommandOrigin,
    /// Echo to the console when written
    pub echo: bool,
    /// Console slot the echo was written to
    pub log_slot: Option<usize>,
}

impl PendingCommand {
    /// True for the synthetic reset placeholder
    pub fn is_reset_marker(&self) -> bool {
        self.text == RESET_MARKER
    }
}

/// A command waiting for budget
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueuedCommand {
    /// Canonical command text
    pub text: String,
    /// Origin of the command
    pub origin: CommandOrigin,
    /// Echo to the console once transmitted
    pub echo: bool,
}

impl QueuedCommand {
    /// Create a queued command
    pub fn new(text: impl Into<String>, origin: CommandOrigin, echo: bool) -> Self {
        Self {
            text: text.into(),
            origin,
            echo,
        }
    }

    /// Bytes this command will occupy in the controller buffer
    pub fn wire_length(&self) -> usize {
        wire_length(&self.text)
    }
}

/// Result of [`CommandLedger::try_enqueue`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Enqueued {
    /// Appended to the in-flight FIFO; the caller must write it now
    Accepted(PendingCommand),
    /// Parked in the backpressure FIFO; nothing to write
    Queued,
}

/// Bytes a command occupies on the wire
pub fn wire_length(text: &str) -> usize {
    text.len() + 1
}

/// Collects non-terminal response lines for the oldest command
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResponseAccumulator {
    text: String,
}

impl ResponseAccumulator {
    /// Append a non-terminal fragment
    pub fn push_fragment(&mut self, line: &str) {
        self.text.push_str(line);
        self.text.push_str("; ");
    }

    /// Append the terminator and hand back the full response
    pub fn finish(&mut self, terminator: &str) -> String {
        self.text.push_str(terminator);
        std::mem::take(&mut self.text)
    }

    /// Text collected so far
    pub fn as_str(&self) -> &str {
        &self.text
    }

    /// Drop anything collected
    pub fn clear(&mut self) {
        self.text.clear();
    }

    /// True when nothing has been collected
    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }
}

/// In-flight and backpressure FIFOs sharing one byte budget
#[derive(Debug, Clone)]
pub struct CommandLedger {
    capacity: usize,
    in_flight: VecDeque<PendingCommand>,
    backlog: VecDeque<QueuedCommand>,
    usage: usize,
    next_id: u64,
    response: ResponseAccumulator,
}

impl CommandLedger {
    /// Create a ledger with the given budget in bytes
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            in_flight: VecDeque::new(),
            backlog: VecDeque::new(),
            usage: 0,
            next_id: 0,
            response: ResponseAccumulator::default(),
        }
    }

    /// Budget in bytes
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Sum of wire lengths over the in-flight FIFO
    pub fn current_budget_usage(&self) -> usize {
        self.usage
    }

    /// True when a command of this text would fit in the remaining budget
    pub fn has_headroom_for(&self, text: &str) -> bool {
        self.usage + wire_length(text) <= self.capacity
    }

    /// Charge a command against the budget or park it
    ///
    /// Commands are parked whenever anything is already parked, so the
    /// backlog is never overtaken by a later, shorter command.
    pub fn try_enqueue(&mut self, command: QueuedCommand) -> Result<Enqueued> {
        let length = command.wire_length();
        if length > self.capacity {
            tracing::warn!(
                "Command '{}' needs {} bytes, budget is {}",
                command.text,
                length,
                self.capacity
            );
            return Err(ControllerError::BufferOverflow {
                message: format!(
                    "'{}' is {} bytes, controller buffer holds {}",
                    command.text, length, self.capacity
                ),
            }
            .into());
        }

        if !self.backlog.is_empty() || self.usage + length > self.capacity {
            tracing::debug!("Parked until budget frees: {}", command.text);
            self.backlog.push_back(command);
            return Ok(Enqueued::Queued);
        }

        Ok(Enqueued::Accepted(self.admit(command)))
    }

    /// Append a command to the in-flight FIFO regardless of backlog
    ///
    /// Used for the reset placeholder, which is only pushed onto an
    /// emptied ledger.
    pub fn push_marker(&mut self, text: &str, origin: CommandOrigin, echo: bool) -> PendingCommand {
        self.admit(QueuedCommand::new(text, origin, echo))
    }

    fn admit(&mut self, command: QueuedCommand) -> PendingCommand {
        let pending = PendingCommand {
            id: self.next_id,
            wire_length: command.wire_length(),
            text: command.text,
            origin: command.origin,
            echo: command.echo,
            log_slot: None,
        };
        self.next_id += 1;
        self.usage += pending.wire_length;
        self.in_flight.push_back(pending.clone());
        pending
    }

    /// Remove the head of the in-flight FIFO
    pub fn pop_oldest_pending(&mut self) -> Result<PendingCommand> {
        match self.in_flight.pop_front() {
            Some(pending) => {
                self.usage -= pending.wire_length;
                Ok(pending)
            }
            None => Err(ControllerError::ProtocolViolation {
                line: self.response.as_str().to_string(),
            }
            .into()),
        }
    }

    /// Close out the oldest command with its terminator line
    ///
    /// Returns the command together with the full accumulated response.
    pub fn complete_oldest(&mut self, terminator: &str) -> Result<(PendingCommand, String)> {
        if self.in_flight.is_empty() {
            self.response.clear();
            return Err(ControllerError::ProtocolViolation {
                line: terminator.to_string(),
            }
            .into());
        }
        let response = self.response.finish(terminator);
        let pending = self.pop_oldest_pending()?;
        Ok((pending, response))
    }

    /// Collect a non-terminal response line for the oldest command
    pub fn append_fragment(&mut self, line: &str) {
        self.response.push_fragment(line);
    }

    /// Partial response collected so far
    pub fn partial_response(&self) -> &str {
        self.response.as_str()
    }

    /// Promote parked commands while the budget allows
    ///
    /// Stops at the first entry that does not fit, leaving it at the head.
    /// Every returned command is already in flight and must be written by
    /// the caller in the returned order.
    pub fn drain_queue_into_ledger(&mut self) -> Vec<PendingCommand> {
        let mut promoted = Vec::new();
        while let Some(next) = self.backlog.front() {
            if self.usage + next.wire_length() > self.capacity {
                break;
            }
            if let Some(command) = self.backlog.pop_front() {
                promoted.push(self.admit(command));
            }
        }
        promoted
    }

    /// Parked commands, oldest first
    pub fn queued(&self) -> impl Iterator<Item = &QueuedCommand> {
        self.backlog.iter()
    }

    /// Commands in flight, oldest first
    pub fn in_flight(&self) -> impl Iterator<Item = &PendingCommand> {
        self.in_flight.iter()
    }

    /// Oldest in-flight command
    pub fn oldest(&self) -> Option<&PendingCommand> {
        self.in_flight.front()
    }

    /// Newest in-flight command
    pub fn newest(&self) -> Option<&PendingCommand> {
        self.in_flight.back()
    }

    /// Number of commands in flight
    pub fn in_flight_len(&self) -> usize {
        self.in_flight.len()
    }

    /// Number of parked commands
    pub fn queued_len(&self) -> usize {
        self.backlog.len()
    }

    /// True when neither FIFO holds anything
    pub fn is_empty(&self) -> bool {
        self.in_flight.is_empty() && self.backlog.is_empty()
    }

    /// Record where an in-flight command was echoed
    pub fn set_log_slot(&mut self, id: u64, slot: usize) {
        if let Some(pending) = self.in_flight.iter_mut().find(|p| p.id == id) {
            pending.log_slot = Some(slot);
        }
    }

    /// Move every recorded console slot down by `lines`
    pub fn shift_log_slots(&mut self, lines: usize) {
        for slot in self.in_flight.iter_mut().filter_map(|p| p.log_slot.as_mut()) {
            *slot += lines;
        }
    }

    /// Drop parked commands only
    pub fn clear_backlog(&mut self) {
        self.backlog.clear();
    }

    /// Drop both FIFOs and any partial response
    pub fn clear_all(&mut self) {
        self.in_flight.clear();
        self.backlog.clear();
        self.usage = 0;
        self.response.clear();
    }
}

impl Default for CommandLedger {
    fn default() -> Self {
        Self::new(DEFAULT_BUFFER_CAPACITY)
    }
}
