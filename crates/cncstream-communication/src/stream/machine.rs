//! Machine operations and periodic ticks

use super::{recovery::axis_words, RestoreMode, StreamController, StreamEvent};
use crate::communication::{CommandOrigin, Link};
use cncstream_core::Position;

impl<L: Link> StreamController<L> {
    /// Start a homing cycle
    pub fn home(&mut self) {
        tracing::info!("Homing");
        self.homing = true;
        self.update_spindle_speed = true;
        let command = self.dialect.home_command();
        self.issue(command, CommandOrigin::Manual, self.config.echo_ui_commands);
    }

    /// Clear an alarm lock
    pub fn unlock(&mut self) {
        match self.dialect.unlock_command() {
            Some(command) => {
                self.issue(command, CommandOrigin::Manual, self.config.echo_ui_commands)
            }
            None => tracing::debug!("{} has no unlock command", self.dialect.kind()),
        }
    }

    /// Make the current X and Y the work origin
    pub fn zero_xy(&mut self) {
        self.setting_zero_xy = true;
        let command = self.dialect.zero_xy_command();
        self.issue(command, CommandOrigin::Manual, self.config.echo_ui_commands);
        self.query_offsets();
    }

    /// Make the current Z the work origin
    pub fn zero_z(&mut self) {
        self.setting_zero_z = true;
        let command = self.dialect.zero_z_command();
        self.issue(command, CommandOrigin::Manual, self.config.echo_ui_commands);
        self.query_offsets();
    }

    fn query_offsets(&mut self) {
        if let Some(query) = self.dialect.offsets_query() {
            self.issue(query, CommandOrigin::Query, false);
        }
    }

    /// Bring back the origin stored by the last zeroing commands
    pub fn restore_origin(&mut self) {
        if self.dialect.offsets_query().is_none() {
            tracing::debug!("{} cannot restore an origin", self.dialect.kind());
            return;
        }
        let echo = self.config.echo_ui_commands;
        let machine = self.machine_position.to_position().to_metric(self.config.units);
        let offset = machine.subtract(&self.stored_origin);

        self.issue("G21", CommandOrigin::Manual, echo);
        self.issue(
            &format!("G53G90G0{}", axis_words(&machine)),
            CommandOrigin::Manual,
            echo,
        );
        self.issue(&format!("G92{}", axis_words(&offset)), CommandOrigin::Manual, echo);

        if self.config.move_on_restore {
            let target = match self.config.restore_mode {
                RestoreMode::Xy => "G0X0Y0",
                RestoreMode::Xyz => "G0X0Y0Z0",
            };
            self.issue(target, CommandOrigin::Manual, echo);
        }
    }

    /// Move to the configured safe position
    pub fn safe_position(&mut self) {
        let commands = self.config.safe_position_command.clone();
        let echo = self.config.echo_ui_commands;
        for command in commands.split(';').map(str::trim).filter(|c| !c.is_empty()) {
            self.issue(command, CommandOrigin::Manual, echo);
        }
    }

    /// Switch the spindle
    ///
    /// While paused the spindle is toggled with the realtime stop byte
    /// where the firmware has one.
    pub fn set_spindle(&mut self, on: bool) {
        if self.paused {
            if let Some(toggle) = self.dialect.spindle_stop_toggle() {
                self.write_realtime(toggle);
            }
            return;
        }
        let command = if on {
            format!("M3 S{}", self.spindle_speed)
        } else {
            "M5".to_string()
        };
        self.issue(&command, CommandOrigin::Manual, self.config.echo_ui_commands);
    }

    /// Set the speed used when the spindle is switched on
    pub fn set_spindle_speed(&mut self, speed: f64) {
        self.spindle_speed = speed;
        self.update_spindle_speed = true;
    }

    /// Feed hold or resume
    pub fn pause(&mut self, on: bool) {
        let bytes = if on {
            self.dialect.feed_hold()
        } else {
            self.dialect.resume()
        };
        self.write_realtime(bytes);
        self.paused = on;
    }

    /// Drop parked commands and cancel a jog in progress
    pub fn stop(&mut self) {
        self.ledger.clear_backlog();
        if let Some(cancel) = self.dialect.jog_cancel() {
            self.write_realtime(cancel);
        }
    }

    /// Enter or leave check mode
    ///
    /// Leaving check mode resets the controller, which restores the
    /// parser state stored on entry.
    pub fn set_check_mode(&mut self, on: bool) {
        let Some(command) = self.dialect.check_mode_command() else {
            tracing::debug!("{} has no check mode", self.dialect.kind());
            return;
        };
        if on {
            self.store_parser_state();
            self.issue(command, CommandOrigin::Manual, self.config.echo_ui_commands);
        } else {
            self.aborting = true;
            self.machine_reset();
        }
    }

    /// Hand coordinate mode changes to the keyboard jog controls
    pub fn set_keyboard_control(&mut self, on: bool) {
        self.keyboard_control = on;
        if on {
            if let Some(query) = self.dialect.parser_state_query() {
                self.issue(query, CommandOrigin::Query, false);
            }
        } else if self.absolute_coordinates {
            self.issue("G90", CommandOrigin::Manual, self.config.echo_ui_commands);
        }
    }

    /// Start jogging along `vector`
    ///
    /// A `step` of zero jogs continuously until [`Self::jog_stop`]; each
    /// acknowledged increment sends the next. Otherwise one move of `step`
    /// millimetres per axis is made.
    pub fn jog(&mut self, vector: Position, step: f64, feed: f64) {
        self.jog.vector = vector;
        self.jog.step = step;
        self.jog.feed = feed;
        self.jog_step();
    }

    /// Stop jogging
    pub fn jog_stop(&mut self) {
        self.jog.vector = Position::default();
        self.stop();
    }

    /// Send the next jog increment
    pub(crate) fn jog_step(&mut self) {
        if !self.dialect.supports_jogging() || self.jog.vector.length() == 0.0 {
            return;
        }
        let feed = self.jog.feed;
        let (delta, origin) = if self.jog.step == 0.0 {
            // Increment covering one planner window at this feed
            let speed = feed / 60.0;
            let dt = (speed.sqrt() / (2.0 * self.config.acceleration * 14.0)).max(0.01);
            (self.jog.vector.normalized().scale(speed * dt), CommandOrigin::Query)
        } else {
            (self.jog.vector.scale(self.jog.step), CommandOrigin::Poll)
        };

        let command = format!(
            "$J=G21G91X{}Y{}Z{}F{}",
            format_g4(delta.x),
            format_g4(delta.y),
            format_g4(delta.z),
            feed as i64
        );
        self.issue(&command, origin, false);
    }

    /// Request a status report and publish the buffer state
    pub fn on_status_tick(&mut self) {
        if self.link.is_open() && self.reset_completed && self.status_received {
            let request = self.dialect.status_request();
            self.write_realtime(request);
            self.status_received = false;
        }
        self.events.publish(StreamEvent::BufferState {
            usage: self.ledger.current_budget_usage(),
            in_flight: self.ledger.in_flight_len(),
            queued: self.ledger.queued_len(),
        });
    }

    /// Refresh spindle speed and parser state when the machine is quiet
    pub fn on_housekeeping_tick(&mut self) {
        if !self.link.is_open()
            || self.homing
            || self.resetting
            || self.paused
            || self.ledger.queued_len() > 0
        {
            return;
        }

        if self.update_spindle_speed {
            if let Some(command) = self.dialect.spindle_refresh_command(self.spindle_speed) {
                self.issue(&command, CommandOrigin::Query, false);
                self.update_spindle_speed = false;
            }
        }

        if self.update_parser_status {
            if let Some(query) = self.dialect.parser_state_query() {
                self.issue(query, CommandOrigin::Poll, false);
                self.update_parser_status = false;
            }
        }
    }
}

/// Four significant digits with trailing zeros removed
pub(crate) fn format_g4(value: f64) -> String {
    if value == 0.0 || !value.is_finite() {
        return "0".to_string();
    }
    let magnitude = value.abs().log10().floor() as i32;
    let decimals = 3 - magnitude;
    let text = if decimals >= 0 {
        let text = format!("{:.*}", decimals as usize, value);
        if text.contains('.') {
            text.trim_end_matches('0').trim_end_matches('.').to_string()
        } else {
            text
        }
    } else {
        let unit = 10f64.powi(-decimals);
        format!("{}", (value / unit).round() * unit)
    };
    if text.trim_start_matches('-').chars().all(|c| c == '0') {
        "0".to_string()
    } else {
        text
    }
}
