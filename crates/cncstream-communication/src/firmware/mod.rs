//! Firmware dialects
//!
//! Supported controllers:
//! - Grbl (and Grbl-derived firmware such as GCarvin)
//! - Marlin builds that report `S_XYZ:` machine states
//!
//! A [`Dialect`] knows how its firmware frames responses and status
//! reports and which bytes drive it. The flow control, job progress and
//! recovery policy shared by every dialect live in
//! [`crate::stream::StreamController`].

pub mod grbl;
pub mod marlin;
pub mod override_manager;

pub use grbl::{GrblDialect, GrblStatus};
pub use marlin::{MarlinDialect, MarlinStatus};
pub use override_manager::{OverrideManager, OverrideReport, RapidOverrideLevel};

use crate::communication::PendingCommand;
use cncstream_core::{CoordinateReadout, FirmwareError, Position, StatusAppearance};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Supported firmware dialects
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DialectKind {
    /// Grbl 1.1 and compatible
    #[default]
    Grbl,
    /// Marlin with machine state reports
    Marlin,
}

impl fmt::Display for DialectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Grbl => write!(f, "Grbl"),
            Self::Marlin => write!(f, "Marlin"),
        }
    }
}

impl FromStr for DialectKind {
    type Err = FirmwareError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "grbl" => Ok(Self::Grbl),
            "marlin" => Ok(Self::Marlin),
            _ => Err(FirmwareError::UnknownDialect {
                name: s.to_string(),
            }),
        }
    }
}

/// Create the engine for a dialect
pub fn dialect_for(kind: DialectKind) -> Box<dyn Dialect> {
    match kind {
        DialectKind::Grbl => Box::new(GrblDialect::new()),
        DialectKind::Marlin => Box::new(MarlinDialect::new()),
    }
}

/// Machine status in the vocabulary of the active dialect
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "dialect", content = "state")]
pub enum MachineStatus {
    /// Grbl state
    Grbl(GrblStatus),
    /// Marlin state
    Marlin(MarlinStatus),
}

impl MachineStatus {
    /// Caption and colour hints
    pub fn appearance(&self) -> StatusAppearance {
        match self {
            Self::Grbl(status) => status.appearance(),
            Self::Marlin(status) => status.appearance(),
        }
    }

    /// Machine is idle
    pub fn is_idle(&self) -> bool {
        matches!(
            self,
            Self::Grbl(GrblStatus::Idle) | Self::Marlin(MarlinStatus::Idle)
        )
    }

    /// Machine is executing motion from a program
    pub fn is_running(&self) -> bool {
        matches!(
            self,
            Self::Grbl(GrblStatus::Run)
                | Self::Marlin(
                    MarlinStatus::Running | MarlinStatus::Cycling | MarlinStatus::Probe
                )
        )
    }

    /// Machine is in a feed hold (or decelerating into one)
    pub fn is_held(&self) -> bool {
        matches!(
            self,
            Self::Grbl(GrblStatus::Hold0 | GrblStatus::Hold1 | GrblStatus::Queue)
                | Self::Marlin(MarlinStatus::Hold)
        )
    }

    /// Controller is parsing without moving
    pub fn is_check(&self) -> bool {
        matches!(self, Self::Grbl(GrblStatus::Check))
    }
}

impl fmt::Display for MachineStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.appearance().caption)
    }
}

/// How an inbound line relates to the outstanding commands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineClass {
    /// Periodic machine status report
    StatusReport,
    /// Completes the oldest outstanding command
    Terminator,
    /// Part of the oldest outstanding command's response
    Fragment,
    /// Data the dialect keeps for itself (bed probe readings, echo lines)
    SideChannel,
    /// Uncorrelated text
    Floating,
}

/// Spindle direction reported in a status line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SpindleState {
    /// Spindle stopped
    Off,
    /// Spindle running clockwise
    Clockwise,
    /// Spindle running counter-clockwise
    CounterClockwise,
}

impl SpindleState {
    /// Spindle is turning
    pub fn is_on(&self) -> bool {
        !matches!(self, Self::Off)
    }
}

/// Feed and spindle values as reported
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FeedSpindle {
    /// Current feed
    pub feed: String,
    /// Current spindle speed
    pub spindle: String,
}

/// Typed content of a status line
#[derive(Debug, Clone, PartialEq, Default)]
pub struct StatusReport {
    /// Machine state, when the line carried one
    pub status: Option<MachineStatus>,
    /// Machine position text
    pub machine_position: Option<CoordinateReadout>,
    /// Work coordinate offset
    pub work_offset: Option<Position>,
    /// Override percentages
    pub overrides: Option<OverrideReport>,
    /// Input pin state
    pub pins: Option<String>,
    /// Accessory state text
    pub accessories: Option<String>,
    /// Spindle state; only reported together with overrides
    pub spindle: Option<SpindleState>,
    /// Feed and spindle values
    pub feed_spindle: Option<FeedSpindle>,
}

/// Side effect of an acknowledged command
#[derive(Debug, Clone, PartialEq)]
pub enum AckEffect {
    /// Distance mode seen by a coordinate-mode query
    CoordinateMode {
        /// G90 was active
        absolute: bool,
    },
    /// A continuous jog step finished
    JogContinue,
    /// Parser state poll answered
    ParserState {
        /// State text up to the first continuation
        text: String,
        /// Spindle speed found in the state
        spindle: Option<f64>,
    },
    /// Coordinate offsets answered
    Offsets {
        /// G92 offset in controller units
        g92: Position,
    },
    /// A homing command finished
    HomingFinished,
    /// The reset marker received its banner
    ResetCompleted,
    /// Program end acknowledged by firmware that does not flush its buffer
    ProgramEndFlush,
    /// Probe reading from a program probing command
    ProbeSample {
        /// Z in controller units; `None` when the response carried no reading
        z: Option<f64>,
        /// Samples are relative to the first probe
        relative: bool,
    },
    /// Check mode toggled
    CheckMode {
        /// Check mode is now on
        enabled: bool,
    },
}

/// What an abort writes to the controller
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbortSequence {
    /// Feed hold, then a soft reset once the machine has stopped
    HoldThenReset {
        /// Feed hold bytes
        hold: &'static [u8],
    },
    /// Immediate emergency stop
    EmergencyStop {
        /// Emergency stop bytes
        command: &'static [u8],
    },
}

/// What a reset writes and whether the controller announces completion
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResetSequence {
    /// Reset bytes
    pub bytes: &'static [u8],
    /// Completion is signalled by a boot banner
    pub await_banner: bool,
}

/// Firmware line syntax and status vocabulary
pub trait Dialect: Send {
    /// Which dialect this is
    fn kind(&self) -> DialectKind;

    /// Status before the first report
    fn initial_status(&self) -> MachineStatus;

    /// Terminator appended to every command line
    fn line_terminator(&self) -> &'static str;

    /// Classify an inbound line against the oldest outstanding command
    fn classify_line(&self, line: &str, head: Option<&PendingCommand>) -> LineClass;

    /// Boot banner announcing a controller reset
    fn is_reset_banner(&self, line: &str) -> bool;

    /// Parse a line classified as a status report
    fn parse_status(&self, line: &str) -> Option<StatusReport>;

    /// Alarm code and description carried by a line
    fn decode_alarm(&self, line: &str) -> Option<(u8, &'static str)> {
        let _ = line;
        None
    }

    /// Keep dialect-private data from a side channel line
    fn absorb_side_channel(&mut self, line: &str) {
        tracing::trace!("Ignoring side channel line: {}", line);
    }

    /// Side effects of a completed command
    fn on_command_acknowledged(&mut self, command: &PendingCommand, response: &str)
        -> Vec<AckEffect>;

    /// Abort bytes
    fn abort_sequence(&self) -> AbortSequence;

    /// Soft reset bytes
    fn reset_sequence(&self) -> ResetSequence;

    /// Status report request
    fn status_request(&self) -> &'static [u8];

    /// Feed hold
    fn feed_hold(&self) -> &'static [u8];

    /// Resume from feed hold
    fn resume(&self) -> &'static [u8];

    /// Command after which nothing more may be streamed until it is acknowledged
    fn is_sync_barrier(&self, command: &str) -> bool;

    /// Homing command
    fn home_command(&self) -> &'static str;

    /// Commands that zero the XY work origin
    fn zero_xy_command(&self) -> &'static str;

    /// Commands that zero the Z work origin
    fn zero_z_command(&self) -> &'static str;

    /// Offset query sent after zeroing, if the firmware has one
    fn offsets_query(&self) -> Option<&'static str> {
        None
    }

    /// Parser state query, if the firmware has one
    fn parser_state_query(&self) -> Option<&'static str> {
        None
    }

    /// Alarm unlock command, if the firmware has one
    fn unlock_command(&self) -> Option<&'static str> {
        None
    }

    /// Check mode toggle command, if the firmware has one
    fn check_mode_command(&self) -> Option<&'static str> {
        None
    }

    /// Realtime jog cancel, if the firmware has one
    fn jog_cancel(&self) -> Option<&'static [u8]> {
        None
    }

    /// Realtime spindle stop toggle used while paused
    fn spindle_stop_toggle(&self) -> Option<&'static [u8]> {
        None
    }

    /// Firmware reports `Ov:` and accepts override bytes
    fn supports_overrides(&self) -> bool {
        false
    }

    /// Firmware accepts `$J=` jog commands
    fn supports_jogging(&self) -> bool {
        false
    }

    /// Command that re-applies the spindle speed after homing or a reset
    fn spindle_refresh_command(&self, speed: f64) -> Option<String> {
        let _ = speed;
        None
    }

    /// Position reports cannot be trusted while streaming, so the toolpath
    /// is advanced on acknowledgements instead
    fn shadows_on_acknowledge(&self) -> bool {
        false
    }

    /// Response text with firmware codes spelled out
    fn annotate_response(&self, response: &str) -> String {
        response.to_string()
    }
}

/// True when `command` contains the M-code `code` as a whole word
///
/// Leading zeros are accepted (`M02` is `M2`) and longer codes do not
/// match (`M20` is not `M2`).
pub fn has_m_code(command: &str, code: u32) -> bool {
    let bytes = command.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i].eq_ignore_ascii_case(&b'M') {
            let start = i + 1;
            let mut end = start;
            while end < bytes.len() && bytes[end].is_ascii_digit() {
                end += 1;
            }
            if end > start && command[start..end].parse::<u32>().ok() == Some(code) {
                return true;
            }
            i = end.max(start);
        } else {
            i += 1;
        }
    }
    false
}

/// Program end (`M2` or `M30`)
pub fn is_program_end(command: &str) -> bool {
    has_m_code(command, 2) || has_m_code(command, 30)
}

/// Integer operand of the first `S` word followed by digits
pub fn spindle_word(command: &str) -> Option<u32> {
    let bytes = command.as_bytes();
    for (i, byte) in bytes.iter().enumerate() {
        if !byte.eq_ignore_ascii_case(&b'S') {
            continue;
        }
        let digits: String = command[i + 1..]
            .chars()
            .take_while(|c| c.is_ascii_digit())
            .collect();
        if !digits.is_empty() {
            return digits.parse().ok();
        }
    }
    None
}

/// Operand of the last `S` word in a response, decimals allowed
pub fn last_spindle_value(text: &str) -> Option<f64> {
    text.match_indices('S').rev().find_map(|(i, _)| {
        let number: String = text[i + 1..]
            .chars()
            .take_while(|c| c.is_ascii_digit() || *c == '.')
            .collect();
        if number.is_empty() {
            None
        } else {
            number.parse().ok()
        }
    })
}

/// Three comma separated values following the last `prefix`
///
/// The third value ends at any of `stops`. Unparsable values read as zero.
pub(crate) fn triplet_after(text: &str, prefix: &str, stops: &[char]) -> Option<Position> {
    let start = text.rfind(prefix)? + prefix.len();
    let rest = &text[start..];
    let mut parts = rest.splitn(3, ',');
    let x = parts.next()?;
    let y = parts.next()?;
    let tail = parts.next()?;
    let z = tail.split(|c| stops.contains(&c)).next().unwrap_or(tail);
    let value = |s: &str| s.trim().parse::<f64>().unwrap_or(0.0);
    Some(Position::new(value(x), value(y), value(z)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_program_end_detection() {
        assert!(is_program_end("M30"));
        assert!(is_program_end("M2"));
        assert!(is_program_end("G0X0 M02"));
        assert!(!is_program_end("M20"));
        assert!(!is_program_end("M300"));
        assert!(!is_program_end("G1X2"));
    }

    #[test]
    fn test_spindle_word() {
        assert_eq!(spindle_word("M3 S1000"), Some(1000));
        assert_eq!(spindle_word("S0250"), Some(250));
        assert_eq!(spindle_word("G0X1"), None);
        assert_eq!(spindle_word("$SLP"), None);
    }

    #[test]
    fn test_last_spindle_value() {
        assert_eq!(
            last_spindle_value("[GC:G0 G54 G17 G21 G90 G94 M3 M9 T0 F500 S12000.5]"),
            Some(12000.5)
        );
        assert_eq!(last_spindle_value("[GC:G0 G54]"), None);
    }

    #[test]
    fn test_triplet_after() {
        let p = triplet_after("[G92:1.000,-2.500,3.250]; ok", "G92:", &[']']).unwrap();
        assert_eq!(p, Position::new(1.0, -2.5, 3.25));
        assert!(triplet_after("ok", "G92:", &[']']).is_none());
    }

    #[test]
    fn test_dialect_kind_parse() {
        assert_eq!("GRBL".parse::<DialectKind>().unwrap(), DialectKind::Grbl);
        assert_eq!("marlin".parse::<DialectKind>().unwrap(), DialectKind::Marlin);
        assert!(matches!(
            "tinyg".parse::<DialectKind>(),
            Err(FirmwareError::UnknownDialect { .. })
        ));
    }
}
