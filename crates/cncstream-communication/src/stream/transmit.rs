//! Command transmission and job pipelining

use super::{LineStatus, StreamController, StreamEvent};
use crate::communication::ledger::wire_length;
use crate::communication::{CommandOrigin, Enqueued, Link, PendingCommand, QueuedCommand};
use crate::firmware::{is_program_end, spindle_word};
use cncstream_core::{ControllerError, Error, Result};

impl<L: Link> StreamController<L> {
    /// Send a command, or park it until the controller buffer has room
    ///
    /// Does nothing while the link is closed. Refused while a reset is
    /// pending.
    pub fn send_command(&mut self, text: &str, origin: CommandOrigin, echo: bool) -> Result<()> {
        if !self.link.is_open() {
            tracing::debug!("Link closed, dropping command: {}", text);
            return Ok(());
        }

        let command = text.trim().to_uppercase();
        if !self.reset_completed {
            return Err(ControllerError::ResetPending { command }.into());
        }

        match self
            .ledger
            .try_enqueue(QueuedCommand::new(command, origin, echo))?
        {
            Enqueued::Accepted(pending) => self.transmit(pending),
            Enqueued::Queued => Ok(()),
        }
    }

    /// Send a command on behalf of a machine operation; failures are logged
    pub(crate) fn issue(&mut self, text: &str, origin: CommandOrigin, echo: bool) {
        if let Err(e) = self.send_command(text, origin, echo) {
            tracing::warn!("Command '{}' not sent: {}", text, e);
        }
    }

    /// Write a command that is already charged to the ledger
    pub(crate) fn transmit(&mut self, pending: PendingCommand) -> Result<()> {
        if pending.echo {
            self.echo(&pending);
        }

        if pending.origin.is_operator_command() {
            if let Some(speed) = spindle_word(&pending.text) {
                let speed = f64::from(speed);
                if self.spindle_speed != speed {
                    self.spindle_speed = speed;
                    self.events.publish(StreamEvent::SpindleSpeedChanged(speed));
                }
            }
        }

        if is_program_end(&pending.text) {
            self.job.file_end_sent = true;
        }

        if let Some(index) = pending.origin.program_index() {
            self.events.publish(StreamEvent::LineSent { index });
        }

        tracing::trace!("> {}", pending.text);
        let mut bytes = pending.text.into_bytes();
        bytes.extend_from_slice(self.dialect.line_terminator().as_bytes());
        self.write_bytes(&bytes)
    }

    /// Record an echoed command in the next console slot
    pub(crate) fn echo(&mut self, pending: &PendingCommand) {
        let slot = self.console_lines;
        self.console_lines += 1;
        self.ledger.set_log_slot(pending.id, slot);
        self.events.publish(StreamEvent::CommandEchoed {
            slot,
            text: pending.text.clone(),
        });
    }

    /// Write realtime bytes that bypass the ledger
    pub(crate) fn write_realtime(&mut self, bytes: &[u8]) {
        if !self.link.is_open() {
            return;
        }
        tracing::trace!("> realtime {:02X?}", bytes);
        // Failures are already reported as transport errors
        let _ = self.write_bytes(bytes);
    }

    fn write_bytes(&mut self, bytes: &[u8]) -> Result<()> {
        match self.link.write(bytes) {
            Ok(_) => Ok(()),
            Err(e) => {
                tracing::error!("Write to {} failed: {}", self.link.name(), e);
                self.events.publish(StreamEvent::TransportError(e.to_string()));
                Err(e)
            }
        }
    }

    /// Promote parked commands that fit after an acknowledgement
    pub(crate) fn drain_backlog(&mut self) {
        for pending in self.ledger.drain_queue_into_ledger() {
            if let Err(e) = self.transmit(pending) {
                tracing::debug!("Promoted command not written: {}", e);
            }
        }
    }

    /// Keep the controller buffer as full as the budget allows
    ///
    /// Stops at the first line that does not fit, after a command that
    /// must finish before anything else is streamed, or at the end of the
    /// program. Nothing is streamed while commands are parked.
    pub fn send_next_file_commands(&mut self) {
        if self.ledger.queued_len() > 0 {
            return;
        }

        while self.link.is_open() {
            let index = self.job.command_index;
            let Some(text) = self
                .program
                .as_deref()
                .and_then(|p| p.line_text(index))
                .map(|t| t.trim().to_uppercase())
            else {
                break;
            };

            // An oversized line is passed on so the ledger rejects it
            let fits_at_all = wire_length(&text) <= self.ledger.capacity();
            if fits_at_all && !self.ledger.has_headroom_for(&text) {
                break;
            }
            if self
                .ledger
                .newest()
                .is_some_and(|p| self.dialect.is_sync_barrier(&p.text))
            {
                break;
            }

            if let Some(program) = self.program.as_deref_mut() {
                program.set_line_status(index, LineStatus::Sent);
            }
            let echo = self.config.echo_program_commands;
            let sent = self.send_command(&text, CommandOrigin::Program(index), echo);
            self.job.command_index += 1;

            match sent {
                Ok(()) => {}
                Err(Error::Controller(e @ ControllerError::BufferOverflow { .. })) => {
                    self.reject_program_line(index, &text, &e.to_string());
                    if self.hold.is_some() {
                        break;
                    }
                }
                Err(e) => {
                    tracing::warn!("Program line {} not sent: {}", index + 1, e);
                    break;
                }
            }
        }
    }

    /// Settle a program line that can never be transmitted
    ///
    /// The line counts as answered with `reason`, so the job can still
    /// finish once everything before it has been acknowledged.
    fn reject_program_line(&mut self, index: usize, text: &str, reason: &str) {
        if let Some(program) = self.program.as_deref_mut() {
            program.set_line_status(index, LineStatus::Processed);
            program.set_line_response(index, reason);
        }
        self.job.processed_index = self.job.processed_index.max(index);
        self.events.publish(StreamEvent::LineAcknowledged {
            index,
            response: reason.to_string(),
        });

        if self.config.ignore_errors {
            tracing::warn!("Skipping program line {}: {}", index + 1, reason);
        } else {
            self.raise_hold(index, text, reason);
        }

        let last = self.line_count().saturating_sub(1);
        if index == last && !self.program_in_flight() {
            tracing::info!("All program lines settled");
            self.job.transfer_completed = true;
        }
    }

    /// True while a program line awaits its acknowledgement
    pub(crate) fn program_in_flight(&self) -> bool {
        self.ledger
            .in_flight()
            .any(|p| p.origin.program_index().is_some())
    }
}
