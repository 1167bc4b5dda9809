//! Inbound line handling

use super::{LineStatus, PollCadence, StreamController, StreamEvent};
use crate::communication::{CommandOrigin, Link, PendingCommand};
use crate::firmware::{is_program_end, AckEffect, LineClass, MachineStatus, StatusReport};
use cncstream_core::{ControllerError, CoordinateReadout, Position};

impl<L: Link> StreamController<L> {
    /// Read and handle every complete line the link has
    ///
    /// Returns the number of lines handled.
    pub fn poll_link(&mut self) -> usize {
        let mut handled = 0;
        while self.link.can_read_line() {
            let Some(line) = self.link.read_line() else {
                break;
            };
            self.on_line(&line);
            handled += 1;
        }
        if let Some(e) = self.link.take_error() {
            tracing::error!("Link {} failed: {}", self.link.name(), e);
            self.events.publish(StreamEvent::TransportError(e.to_string()));
        }
        handled
    }

    /// Handle one line from the controller
    pub fn on_line(&mut self, line: &str) {
        let line = line.trim();
        if line.is_empty() {
            return;
        }
        tracing::trace!("< {}", line);

        if self.resetting {
            if !self.dialect.is_reset_banner(line) {
                tracing::debug!("Reset filter dropped: {}", line);
                return;
            }
            self.resetting = false;
            self.set_cadence(PollCadence::Normal);
        }

        match self.dialect.classify_line(line, self.ledger.oldest()) {
            LineClass::StatusReport => self.handle_status_line(line),
            LineClass::Terminator => self.handle_terminator(line),
            LineClass::Fragment => {
                self.report_alarm(line);
                self.ledger.append_fragment(line);
            }
            LineClass::SideChannel => self.dialect.absorb_side_channel(line),
            LineClass::Floating => self.handle_floating(line),
        }
    }

    fn handle_status_line(&mut self, line: &str) {
        let Some(report) = self.dialect.parse_status(line) else {
            tracing::debug!("Unparsable status line: {}", line);
            return;
        };
        self.status_received = true;

        let moved = report.machine_position.is_some() || report.work_offset.is_some();
        if let Some(mpos) = &report.machine_position {
            self.machine_position = mpos.clone();
        }
        if let Some(wco) = report.work_offset {
            self.work_offset = wco;
        }
        let work = self.machine_position.to_position().subtract(&self.work_offset);
        self.work_position = CoordinateReadout::formatted(&work, self.config.units);
        if moved {
            self.events.publish(StreamEvent::PositionUpdated {
                machine: self.machine_position.clone(),
                work: self.work_position.clone(),
            });
        }

        if let Some(status) = report.status {
            if self.apply_status(status) {
                return;
            }
        }

        let checking = self.status.is_check();
        let line_count = self.line_count();
        if !(checking && self.job.processed_index + 1 < line_count) {
            let tool = self.work_position.to_position().to_metric(self.config.units);
            self.set_tool_position(tool);
        }
        if self.job.processing && !checking && !self.dialect.shadows_on_acknowledge() {
            self.shadow_toolpath(self.tool_position);
        }

        self.apply_machine_state(&report);
    }

    /// Record a status transition; true when an abort just finished
    fn apply_status(&mut self, status: MachineStatus) -> bool {
        let previous = self.last_status;
        if previous != Some(status) {
            self.events.publish(StreamEvent::StatusChanged {
                status,
                appearance: status.appearance(),
            });
        }
        self.status = status;

        let finished_running = status.is_idle() && previous.is_some_and(|p| p.is_running());
        let job_done = finished_running || status.is_check();
        if self.job.processing && self.job.transfer_completed && job_done {
            self.complete_job();
        }
        self.last_status = Some(status);

        self.aborting && self.track_abort(status)
    }

    fn apply_machine_state(&mut self, report: &StatusReport) {
        if let Some(overrides) = report.overrides {
            self.events.publish(StreamEvent::OverridesReported(overrides));
            if self.dialect.supports_overrides() {
                let corrections = self.overrides.corrections(&overrides);
                for byte in corrections {
                    self.write_realtime(&[byte]);
                }
            }

            let mut pins = Vec::new();
            if let Some(pn) = &report.pins {
                pins.push(format!("PS: {}", pn));
            }
            if let Some(accessories) = &report.accessories {
                pins.push(format!("AS: {}", accessories));
            }
            self.events.publish(StreamEvent::PinStateReported(pins.join(" / ")));
        }

        if let Some(spindle) = report.spindle {
            self.events.publish(StreamEvent::SpindleStateChanged(spindle));
        }

        if let Some(fs) = &report.feed_spindle {
            self.events.publish(StreamEvent::FeedSpindleReported(fs.clone()));
        }
    }

    fn handle_terminator(&mut self, line: &str) {
        let (command, response) = match self.ledger.complete_oldest(line) {
            Ok(done) => done,
            Err(e) => {
                tracing::warn!("{}", e);
                self.handle_floating(line);
                return;
            }
        };
        tracing::debug!("Acknowledged '{}': {}", command.text, response);

        let effects = self.dialect.on_command_acknowledged(&command, &response);
        for effect in effects {
            self.apply_effect(&command, effect);
        }

        self.log_response(&command, &response);
        self.drain_backlog();

        if self.job.processing {
            self.advance_job(&command, &response);
        }

        if self.status.is_check() {
            self.shadow_check_mode();
        }
    }

    fn apply_effect(&mut self, command: &PendingCommand, effect: AckEffect) {
        let echo_ui = self.config.echo_ui_commands;
        match effect {
            AckEffect::CoordinateMode { absolute } => {
                if self.keyboard_control {
                    self.absolute_coordinates = absolute;
                } else if absolute {
                    self.issue("G90", CommandOrigin::Manual, echo_ui);
                }
            }
            AckEffect::JogContinue => self.jog_step(),
            AckEffect::ParserState { text, spindle } => {
                self.parser_state = text.clone();
                self.events.publish(StreamEvent::ParserStateUpdated(text));
                if self.job.processing {
                    self.store_parser_state();
                }
                if let Some(speed) = spindle {
                    if self.spindle_speed != speed {
                        self.spindle_speed = speed;
                        self.events.publish(StreamEvent::SpindleSpeedChanged(speed));
                    }
                }
                self.update_parser_status = true;
            }
            AckEffect::Offsets { g92 } => {
                let g92 = g92.to_metric(self.config.units);
                if self.setting_zero_xy {
                    self.setting_zero_xy = false;
                    self.stored_origin.x = g92.x;
                    self.stored_origin.y = g92.y;
                } else if self.setting_zero_z {
                    self.setting_zero_z = false;
                    self.stored_origin.z = g92.z;
                } else {
                    return;
                }
                let origin = self.stored_origin;
                self.events.publish(StreamEvent::OriginStored {
                    x: origin.x,
                    y: origin.y,
                    z: origin.z,
                });
            }
            AckEffect::HomingFinished => {
                if self.homing {
                    tracing::info!("Homing finished");
                    self.homing = false;
                }
            }
            AckEffect::ResetCompleted => {
                tracing::info!("Reset completed");
                self.reset_completed = true;
                self.update_parser_status = true;
                self.events.publish(StreamEvent::ResetCompleted);
            }
            AckEffect::ProgramEndFlush => {
                tracing::debug!("Program end without flush, clearing buffers");
                self.ledger.clear_all();
            }
            AckEffect::ProbeSample { z, relative } => {
                let units = self.config.units;
                if let Some(probe) = self.height_map.as_mut() {
                    let z = z.map(|z| units.to_metric(z));
                    if let Some((row, col, z)) = probe.record(z, relative) {
                        self.events
                            .publish(StreamEvent::ProbePointCaptured { row, col, z });
                    }
                }
            }
            AckEffect::CheckMode { enabled } => {
                tracing::info!("Check mode {}", if enabled { "on" } else { "off" });
                self.set_cadence(if enabled {
                    PollCadence::CheckMode
                } else {
                    PollCadence::Normal
                });
            }
        }
        tracing::trace!("Applied acknowledgement of '{}'", command.text);
    }

    /// Append a response to its echoed command
    ///
    /// Every `"; "` becomes a new console line, pushing the slots of
    /// later echoed commands down.
    fn log_response(&mut self, command: &PendingCommand, response: &str) {
        let Some(slot) = command.log_slot else {
            return;
        };
        let added = response.matches("; ").count();
        if added > 0 {
            self.ledger.shift_log_slots(added);
            self.console_lines += added;
        }
        self.events.publish(StreamEvent::ResponseLogged {
            slot,
            response: response.to_string(),
        });
    }

    fn advance_job(&mut self, command: &PendingCommand, response: &str) {
        if let Some(index) = command.origin.program_index() {
            if let Some(program) = self.program.as_deref_mut() {
                program.set_line_status(index, LineStatus::Processed);
                program.set_line_response(index, response);
            }
            // Rejected lines may already have settled a later index
            self.job.processed_index = self.job.processed_index.max(index);
            self.events.publish(StreamEvent::LineAcknowledged {
                index,
                response: response.to_string(),
            });

            if self.dialect.shadows_on_acknowledge() {
                let tool = self.work_position.to_position().to_metric(self.config.units);
                self.set_tool_position(tool);
                self.shadow_toolpath(tool);
            }
        }

        self.check_firmware_error(command, response);

        let last = self.line_count().saturating_sub(1);
        let last_settled = self.job.processed_index == last && !self.program_in_flight();
        if last_settled || is_program_end(&command.text) {
            if !self.job.transfer_completed {
                tracing::info!("All program lines acknowledged");
            }
            self.job.transfer_completed = true;
        } else if !self.job.file_end_sent
            && self.job.command_index < self.line_count()
            && self.hold.is_none()
        {
            self.send_next_file_commands();
        }
    }

    fn handle_floating(&mut self, line: &str) {
        tracing::debug!("Floating response: {}", line);

        if line == "ok" || line.starts_with("error") {
            let violation = ControllerError::ProtocolViolation {
                line: line.to_string(),
            };
            tracing::warn!("{}", violation);
        }

        if self.dialect.is_reset_banner(line) {
            self.handle_unexpected_reset(line);
        }

        self.report_alarm(line);
        self.console_lines += 1;
        self.events.publish(StreamEvent::FloatingText(line.to_string()));
    }

    fn report_alarm(&mut self, line: &str) {
        if let Some((code, description)) = self.dialect.decode_alarm(line) {
            tracing::warn!("Alarm {}: {}", code, description);
            self.events.publish(StreamEvent::AlarmRaised {
                code,
                description: description.to_string(),
            });
        }
    }

    pub(crate) fn set_tool_position(&mut self, tool: Position) {
        if self.tool_position != tool {
            self.tool_position = tool;
            self.events.publish(StreamEvent::ToolPositionChanged(tool));
        }
    }

    pub(crate) fn line_count(&self) -> usize {
        self.program.as_deref().map_or(0, |p| p.line_count())
    }
}
