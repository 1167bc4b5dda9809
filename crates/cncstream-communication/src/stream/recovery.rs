//! Error hold, abort and reset handling

use super::{HoldDecision, PollCadence, StreamController, StreamEvent};
use crate::communication::{CommandOrigin, Link, PendingCommand, RESET_MARKER};
use crate::firmware::{AbortSequence, MachineStatus};
use cncstream_core::{FirmwareError, Position};

impl<L: Link> StreamController<L> {
    /// Hold the job when a program line was answered with an error
    pub(crate) fn check_firmware_error(&mut self, command: &PendingCommand, response: &str) {
        let Some(index) = command.origin.program_index() else {
            return;
        };
        if self.config.ignore_errors || !response.to_uppercase().contains("ERROR") {
            return;
        }
        let response = self.dialect.annotate_response(response);
        self.raise_hold(index, &command.text, &response);
    }

    /// Start or extend the error hold
    ///
    /// Only one hold is ever open; later errors are appended to it.
    pub(crate) fn raise_hold(&mut self, index: usize, command: &str, response: &str) {
        let error = FirmwareError::Reported {
            line: index + 1,
            command: command.to_string(),
            response: response.to_string(),
        };
        tracing::warn!("{}", error);

        let entry = format!("{}: {} < {}\n", index + 1, command, response);
        match self.hold.as_mut() {
            Some(message) => {
                message.push_str(&entry);
                let message = message.clone();
                self.events.publish(StreamEvent::HoldUpdated { message });
            }
            None => {
                tracing::warn!("Holding job until the error is resolved");
                let feed_hold = self.dialect.feed_hold();
                self.write_realtime(feed_hold);
                self.hold = Some(entry.clone());
                self.events.publish(StreamEvent::HoldRequested { message: entry });
            }
        }
    }

    /// Answer an open error hold
    pub fn resolve_hold(&mut self, decision: HoldDecision) {
        let Some(message) = self.hold.take() else {
            tracing::debug!("No hold to resolve");
            return;
        };
        tracing::info!("Hold resolved with {:?}", decision);
        tracing::debug!("Held on: {}", message.trim_end());
        self.events.publish(StreamEvent::HoldResolved);

        match decision {
            HoldDecision::Ignore { ignore_future } => {
                if ignore_future {
                    self.config.ignore_errors = true;
                }
                let resume = self.dialect.resume();
                self.write_realtime(resume);
                if self.job.processing
                    && !self.job.transfer_completed
                    && !self.job.file_end_sent
                    && self.job.command_index < self.line_count()
                {
                    self.send_next_file_commands();
                }
            }
            HoldDecision::Abort => self.abort_job(),
        }
    }

    /// Abort the running job
    ///
    /// Grbl is held first and reset once it has come to a stop; Marlin is
    /// stopped at once.
    pub fn abort_job(&mut self) {
        tracing::info!("Aborting job");
        match self.dialect.abort_sequence() {
            AbortSequence::HoldThenReset { hold } => {
                self.aborting = true;
                if self.status.is_check() {
                    self.machine_reset();
                } else {
                    self.write_realtime(hold);
                }
            }
            AbortSequence::EmergencyStop { command } => {
                self.write_realtime(command);
                self.machine_reset();
            }
        }
    }

    /// Follow an abort through hold, reset and idle
    ///
    /// Returns true once the machine is idle again and the pre-abort
    /// offsets and parser state have been sent back.
    pub(crate) fn track_abort(&mut self, status: MachineStatus) -> bool {
        if status.is_idle() {
            if !self.job.processing && self.reset_completed {
                tracing::info!("Abort finished, restoring offsets");
                self.aborting = false;
                self.restore_offsets();
                self.restore_parser_state();
                return true;
            }
        } else if status.is_held() {
            // Reset only after two reports at the same position
            let position = self.machine_position.to_position();
            if !self.resetting && self.abort_sample == Some(position) {
                self.abort_sample = None;
                self.machine_reset();
            } else {
                self.abort_sample = Some(position);
            }
        }
        false
    }

    /// Reset the controller and drop all local state
    pub fn machine_reset(&mut self) {
        tracing::info!("Resetting controller");
        let sequence = self.dialect.reset_sequence();
        self.write_realtime(sequence.bytes);

        self.clear_job_state();
        self.resetting = sequence.await_banner;
        self.reset_completed = !sequence.await_banner;
        self.update_spindle_speed = true;
        self.paused = false;

        if sequence.await_banner {
            let echo = self.config.echo_ui_commands;
            let marker = self.ledger.push_marker(RESET_MARKER, CommandOrigin::Manual, echo);
            if echo {
                self.echo(&marker);
            }
            self.set_cadence(PollCadence::Fast);
        } else {
            self.events.publish(StreamEvent::ResetCompleted);
        }
    }

    /// The controller rebooted on its own
    ///
    /// Everything in flight is lost. The banner has already arrived, so
    /// the reset is complete as soon as local state is cleared.
    pub(crate) fn handle_unexpected_reset(&mut self, banner: &str) {
        let error = FirmwareError::UnexpectedReset {
            banner: banner.to_string(),
        };
        tracing::warn!("{}", error);

        self.clear_job_state();
        self.resetting = false;
        self.reset_completed = true;
        self.update_parser_status = true;
        self.events.publish(StreamEvent::UnexpectedReset {
            banner: banner.to_string(),
        });
        self.set_cadence(PollCadence::Normal);
    }

    fn clear_job_state(&mut self) {
        self.job.processing = false;
        self.job.transfer_completed = true;
        self.job.command_index = 0;
        self.homing = false;
        self.last_status = None;
        self.status_received = true;
        self.ledger.clear_all();
    }

    /// Keep the modal state of the parser, without motion, spindle and feed
    pub(crate) fn store_parser_state(&mut self) {
        self.stored_parser_state = strip_parser_state(&self.parser_state);
    }

    fn restore_parser_state(&mut self) {
        if !self.stored_parser_state.is_empty() {
            let state = self.stored_parser_state.clone();
            self.issue(&state, CommandOrigin::Manual, self.config.echo_ui_commands);
        }
    }

    /// Re-apply the offsets in effect before a reset
    fn restore_offsets(&mut self) {
        let units = self.config.units;
        let machine = self.machine_position.to_position().to_metric(units);
        let work = self.work_position.to_position().to_metric(units);
        let echo = self.config.echo_ui_commands;
        self.issue(&format!("G21G53G90{}", axis_words(&machine)), CommandOrigin::Manual, echo);
        self.issue(&format!("G21G92{}", axis_words(&work)), CommandOrigin::Manual, echo);
    }
}

/// `X..Y..Z..` words for a position
pub(crate) fn axis_words(position: &Position) -> String {
    format!("X{}Y{}Z{}", position.x, position.y, position.z)
}

/// Remove `GC:`, brackets, motion and spindle modes, feed and speed words
fn strip_parser_state(state: &str) -> String {
    let state = state.replace("GC:", "").replace(['[', ']'], "");
    let words: Vec<&str> = state.split(' ').collect();
    let mut kept = Vec::with_capacity(words.len());
    for (i, word) in words.iter().enumerate() {
        let last = i + 1 == words.len();
        let dropped = match word.as_bytes().first() {
            // Motion modes G0-G4 and M0/M3/M4/M5 are dropped when a word follows
            Some(b'G') => {
                !last && word.len() == 2 && is_code(&word[1..], |c| ('0'..='4').contains(&c))
            }
            Some(b'M') => !last && is_code(&word[1..], |c| "0345".contains(c)),
            // Feed and speed are dropped when a word precedes them
            Some(b'F') | Some(b'S') => i > 0 && is_number(&word[1..]),
            _ => false,
        };
        if !dropped {
            kept.push(*word);
        }
    }
    kept.join(" ")
}

fn is_code(digits: &str, allowed: impl Fn(char) -> bool) -> bool {
    !digits.is_empty() && digits.chars().all(allowed)
}

fn is_number(text: &str) -> bool {
    !text.is_empty() && text.chars().all(|c| c.is_ascii_digit() || c == '.')
}
