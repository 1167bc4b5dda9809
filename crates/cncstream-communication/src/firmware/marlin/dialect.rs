//! Marlin line classification and acknowledgement side effects

use super::status::{MarlinStatus, MarlinStatusParser};
use crate::communication::PendingCommand;
use crate::firmware::{
    has_m_code, AbortSequence, AckEffect, Dialect, DialectKind, LineClass, MachineStatus,
    ResetSequence, StatusReport,
};
use cncstream_core::Position;

/// Marlin dialect engine
///
/// Remembers the last bed probing result, which Marlin reports on its own
/// line before the `ok` of the probing command.
#[derive(Debug, Default)]
pub struct MarlinDialect {
    leveling: Option<Position>,
}

impl MarlinDialect {
    /// Create the engine
    pub fn new() -> Self {
        Self::default()
    }

    /// Last `Bed X: Y: Z:` reading
    pub fn last_bed_reading(&self) -> Option<Position> {
        self.leveling
    }
}

impl Dialect for MarlinDialect {
    fn kind(&self) -> DialectKind {
        DialectKind::Marlin
    }

    fn initial_status(&self) -> MachineStatus {
        MachineStatus::Marlin(MarlinStatus::Init)
    }

    fn line_terminator(&self) -> &'static str {
        "\n"
    }

    fn classify_line(&self, line: &str, head: Option<&PendingCommand>) -> LineClass {
        if MarlinStatusParser::parse_position(line).is_some()
            || MarlinStatusParser::parse_state(line).is_some()
        {
            return LineClass::StatusReport;
        }

        if MarlinStatusParser::is_driver_report(line)
            || MarlinStatusParser::parse_bed(line).is_some()
            || MarlinStatusParser::is_echo(line)
        {
            return LineClass::SideChannel;
        }

        // A reboot loses everything in flight
        if self.is_reset_banner(line) {
            return LineClass::Floating;
        }

        match head {
            Some(_) if line.contains("ok") => LineClass::Terminator,
            Some(_) => LineClass::Fragment,
            None => LineClass::Floating,
        }
    }

    fn is_reset_banner(&self, line: &str) -> bool {
        line == "start"
    }

    fn parse_status(&self, line: &str) -> Option<StatusReport> {
        MarlinStatusParser::parse(line)
    }

    fn absorb_side_channel(&mut self, line: &str) {
        if let Some(bed) = MarlinStatusParser::parse_bed(line) {
            tracing::debug!("Bed reading: {}", bed);
            self.leveling = Some(bed);
        } else {
            tracing::trace!("Marlin side channel: {}", line);
        }
    }

    fn on_command_acknowledged(
        &mut self,
        command: &PendingCommand,
        response: &str,
    ) -> Vec<AckEffect> {
        let mut effects = Vec::new();
        let text = command.text.as_str();

        if text == "G28" {
            effects.push(AckEffect::HomingFinished);
        }

        if has_m_code(text, 400) && response.contains("ok") && !response.contains("Pgm End") {
            effects.push(AckEffect::ProgramEndFlush);
        }

        if text.contains("G29") && command.origin.program_index().is_some() {
            effects.push(AckEffect::ProbeSample {
                z: self.leveling.map(|bed| bed.z),
                relative: false,
            });
        }

        effects
    }

    fn abort_sequence(&self) -> AbortSequence {
        AbortSequence::EmergencyStop { command: b"M112\n" }
    }

    fn reset_sequence(&self) -> ResetSequence {
        ResetSequence {
            bytes: b"M999\n",
            await_banner: false,
        }
    }

    fn status_request(&self) -> &'static [u8] {
        b"S000\n"
    }

    fn feed_hold(&self) -> &'static [u8] {
        b"P000\n"
    }

    fn resume(&self) -> &'static [u8] {
        b"R000\n"
    }

    fn is_sync_barrier(&self, command: &str) -> bool {
        has_m_code(command, 400)
    }

    fn home_command(&self) -> &'static str {
        "G28"
    }

    fn zero_xy_command(&self) -> &'static str {
        "G28 X Y"
    }

    fn zero_z_command(&self) -> &'static str {
        "G28 Z"
    }

    fn shadows_on_acknowledge(&self) -> bool {
        true
    }
}
