//! Grbl line classification and acknowledgement side effects

use super::error_decoder::{annotate_errors, decode_alarm, parse_alarm};
use super::status::{GrblStatus, StatusParser};
use super::{JOG_CANCEL, SOFT_RESET, SPINDLE_STOP_TOGGLE};
use crate::communication::{CommandOrigin, PendingCommand};
use crate::firmware::{
    is_program_end, last_spindle_value, triplet_after, AbortSequence, AckEffect, Dialect,
    DialectKind, LineClass, MachineStatus, ResetSequence, StatusReport,
};

/// Lines that are never part of a command response
const FLOATING_MARKERS: [&str; 5] = [
    "Reset to continue",
    "'$H'|'$X' to unlock",
    "ALARM: Soft limit",
    "ALARM: Hard limit",
    "Check Door",
];

/// Markers that complete a command
const END_MARKERS: [&str; 2] = ["ok", "error"];

const SOFT_RESET_BYTES: [u8; 1] = [SOFT_RESET];
const JOG_CANCEL_BYTES: [u8; 1] = [JOG_CANCEL];
const SPINDLE_STOP_BYTES: [u8; 1] = [SPINDLE_STOP_TOGGLE];

/// Grbl dialect engine
#[derive(Debug, Default)]
pub struct GrblDialect;

impl GrblDialect {
    /// Create the engine
    pub fn new() -> Self {
        Self
    }

    fn is_floating(line: &str) -> bool {
        FLOATING_MARKERS.iter().any(|m| line.contains(m))
    }

    fn is_end(line: &str) -> bool {
        END_MARKERS.iter().any(|m| line.contains(m))
    }
}

/// `GRBL` at the start of the line, or `GCARVIN <d>.<d>` anywhere
fn matches_banner(line: &str) -> bool {
    let upper = line.to_uppercase();
    if upper.starts_with("GRBL") {
        return true;
    }
    upper.match_indices("GCARVIN").any(|(i, m)| {
        let tail = &upper.as_bytes()[i + m.len()..];
        tail.len() >= 5
            && tail[0].is_ascii_whitespace()
            && tail[1].is_ascii_digit()
            && tail[2] == b'.'
            && tail[3].is_ascii_digit()
    })
}

impl Dialect for GrblDialect {
    fn kind(&self) -> DialectKind {
        DialectKind::Grbl
    }

    fn initial_status(&self) -> MachineStatus {
        MachineStatus::Grbl(GrblStatus::Unknown)
    }

    fn line_terminator(&self) -> &'static str {
        "\r"
    }

    fn classify_line(&self, line: &str, head: Option<&PendingCommand>) -> LineClass {
        if line.starts_with('<') {
            return LineClass::StatusReport;
        }

        let Some(head) = head else {
            return LineClass::Floating;
        };

        // A banner only belongs to the reset marker; anywhere else it is unsolicited
        if Self::is_floating(line) || (!head.is_reset_marker() && self.is_reset_banner(line)) {
            return LineClass::Floating;
        }

        let terminates = if head.is_reset_marker() {
            self.is_reset_banner(line)
        } else {
            Self::is_end(line)
        };

        if terminates {
            LineClass::Terminator
        } else {
            LineClass::Fragment
        }
    }

    fn is_reset_banner(&self, line: &str) -> bool {
        matches_banner(line)
    }

    fn parse_status(&self, line: &str) -> Option<StatusReport> {
        StatusParser::parse(line)
    }

    fn decode_alarm(&self, line: &str) -> Option<(u8, &'static str)> {
        parse_alarm(line).map(|code| (code, decode_alarm(code)))
    }

    fn on_command_acknowledged(
        &mut self,
        command: &PendingCommand,
        response: &str,
    ) -> Vec<AckEffect> {
        let mut effects = Vec::new();
        let text = command.text.as_str();
        let origin = command.origin;

        if text == "$G" && origin == CommandOrigin::Query {
            effects.push(AckEffect::CoordinateMode {
                absolute: response.contains("G90"),
            });
        }

        if text.contains("$J=") && origin == CommandOrigin::Query {
            effects.push(AckEffect::JogContinue);
        }

        if text == "$G" && origin == CommandOrigin::Poll {
            let state = response
                .find("; ")
                .map_or(response, |end| &response[..end]);
            effects.push(AckEffect::ParserState {
                text: state.to_string(),
                spindle: last_spindle_value(response),
            });
        }

        if text == "$#" && origin == CommandOrigin::Query {
            tracing::debug!("Received offsets: {}", response);
            if let Some(g92) = triplet_after(response, "G92:", &[']']) {
                effects.push(AckEffect::Offsets { g92 });
            }
        }

        if text == "$H" || text == "$T" {
            effects.push(AckEffect::HomingFinished);
        }

        if command.is_reset_marker() {
            effects.push(AckEffect::ResetCompleted);
        }

        // Older firmware does not flush its buffer on program end
        if is_program_end(text) && response.contains("ok") && !response.contains("Pgm End") {
            effects.push(AckEffect::ProgramEndFlush);
        }

        if text.contains("G38.2") && origin.program_index().is_some() {
            let z = triplet_after(response, "PRB:", &[']', ':']).map(|p| p.z);
            tracing::debug!("Probe reading: {:?}", z);
            effects.push(AckEffect::ProbeSample { z, relative: true });
        }

        if text == "$C" {
            effects.push(AckEffect::CheckMode {
                enabled: response.contains("Enable"),
            });
        }

        effects
    }

    fn abort_sequence(&self) -> AbortSequence {
        AbortSequence::HoldThenReset { hold: b"!" }
    }

    fn reset_sequence(&self) -> ResetSequence {
        ResetSequence {
            bytes: &SOFT_RESET_BYTES,
            await_banner: true,
        }
    }

    fn status_request(&self) -> &'static [u8] {
        b"?"
    }

    fn feed_hold(&self) -> &'static [u8] {
        b"!"
    }

    fn resume(&self) -> &'static [u8] {
        b"~"
    }

    fn is_sync_barrier(&self, command: &str) -> bool {
        is_program_end(command)
    }

    fn home_command(&self) -> &'static str {
        "$H"
    }

    fn zero_xy_command(&self) -> &'static str {
        "G92X0Y0"
    }

    fn zero_z_command(&self) -> &'static str {
        "G92Z0"
    }

    fn offsets_query(&self) -> Option<&'static str> {
        Some("$#")
    }

    fn parser_state_query(&self) -> Option<&'static str> {
        Some("$G")
    }

    fn unlock_command(&self) -> Option<&'static str> {
        Some("$X")
    }

    fn check_mode_command(&self) -> Option<&'static str> {
        Some("$C")
    }

    fn jog_cancel(&self) -> Option<&'static [u8]> {
        Some(&JOG_CANCEL_BYTES)
    }

    fn spindle_stop_toggle(&self) -> Option<&'static [u8]> {
        Some(&SPINDLE_STOP_BYTES)
    }

    fn supports_overrides(&self) -> bool {
        true
    }

    fn supports_jogging(&self) -> bool {
        true
    }

    fn spindle_refresh_command(&self, speed: f64) -> Option<String> {
        Some(format!("S{}", speed))
    }

    fn annotate_response(&self, response: &str) -> String {
        annotate_errors(response)
    }
}
