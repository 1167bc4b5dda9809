//! Marlin status lines

use crate::firmware::{MachineStatus, StatusReport};
use cncstream_core::{CoordinateReadout, Position, StatusAppearance};
use serde::Serialize;

/// Marlin machine state, numbered as the firmware reports it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum MarlinStatus {
    /// Initializing
    #[default]
    Init,
    /// Ready for use
    Reset,
    /// Soft shut down
    Alarm,
    /// Program stop or no more blocks
    Idle,
    /// Program end
    End,
    /// Motion running
    Running,
    /// Motion holding
    Hold,
    /// Probe cycle active
    Probe,
    /// Running (cycling)
    Cycling,
    /// Homing
    Homing,
    /// Jogging
    Jogging,
    /// Hard alarm, shut down
    Error,
}

impl MarlinStatus {
    /// Every state, indexed by its wire number
    pub const ALL: [MarlinStatus; 12] = [
        Self::Init,
        Self::Reset,
        Self::Alarm,
        Self::Idle,
        Self::End,
        Self::Running,
        Self::Hold,
        Self::Probe,
        Self::Cycling,
        Self::Homing,
        Self::Jogging,
        Self::Error,
    ];

    /// State for a wire number; out of range numbers read as `Init`
    pub fn from_index(index: i64) -> Self {
        usize::try_from(index)
            .ok()
            .and_then(|i| Self::ALL.get(i).copied())
            .unwrap_or_default()
    }

    /// Caption and colour hints
    pub fn appearance(&self) -> StatusAppearance {
        match self {
            Self::Init => StatusAppearance::new("Init", "palette(button)", "palette(text)"),
            Self::Reset => StatusAppearance::new("Reset", "palette(button)", "palette(text)"),
            Self::Alarm => StatusAppearance::new("Alarm", "red", "white"),
            Self::Idle => StatusAppearance::new("Idle", "palette(button)", "palette(text)"),
            Self::End => StatusAppearance::new("End", "yellow", "black"),
            Self::Running => StatusAppearance::new("Running", "lime", "black"),
            Self::Hold => StatusAppearance::new("Hold", "yellow", "black"),
            Self::Probe => StatusAppearance::new("Probe", "yellow", "black"),
            Self::Cycling => StatusAppearance::new("Cycling", "yellow", "black"),
            Self::Homing => StatusAppearance::new("Homing", "lime", "black"),
            Self::Jogging => StatusAppearance::new("Jogging", "lime", "black"),
            Self::Error => StatusAppearance::new("Error", "red", "white"),
        }
    }
}

/// Stateless matchers for Marlin report lines
pub struct MarlinStatusParser;

impl MarlinStatusParser {
    /// `X:<x> Y:<y> Z:<z>` at the start of the line, space separated
    pub fn parse_position(line: &str) -> Option<CoordinateReadout> {
        let (x, y, z) = Self::axes(line, ' ')?;
        Some(CoordinateReadout::new(x, y, z))
    }

    /// Tab separated stepper driver report (`X:..\tY:..\tZ:..`)
    pub fn is_driver_report(line: &str) -> bool {
        Self::axes(line, '\t').is_some()
    }

    /// `S_XYZ:<n>` state token
    pub fn parse_state(line: &str) -> Option<MarlinStatus> {
        let rest = line.strip_prefix("S_XYZ:")?;
        let digits: String = rest.chars().take_while(|c| c.is_ascii_digit()).collect();
        Some(MarlinStatus::from_index(digits.parse().unwrap_or(0)))
    }

    /// `Bed X:<x> Y:<y> Z:<z>` probing result
    pub fn parse_bed(line: &str) -> Option<Position> {
        let rest = line.strip_prefix("Bed ")?;
        let (x, y, z) = Self::axes(rest, ' ')?;
        let value = |s: &str| s.parse::<f64>().unwrap_or(0.0);
        Some(Position::new(value(x), value(y), value(z)))
    }

    /// Echo line
    pub fn is_echo(line: &str) -> bool {
        line.starts_with("echo:")
    }

    /// Position or state report
    pub fn parse(line: &str) -> Option<StatusReport> {
        if let Some(position) = Self::parse_position(line) {
            return Some(StatusReport {
                machine_position: Some(position),
                ..StatusReport::default()
            });
        }
        Self::parse_state(line).map(|state| StatusReport {
            status: Some(MachineStatus::Marlin(state)),
            ..StatusReport::default()
        })
    }

    fn axes(line: &str, separator: char) -> Option<(&str, &str, &str)> {
        let rest = line.strip_prefix("X:")?;
        let (x, rest) = rest.split_once(separator)?;
        let rest = rest.strip_prefix("Y:")?;
        let (y, rest) = rest.split_once(separator)?;
        let rest = rest.strip_prefix("Z:")?;
        let z = rest.split(char::is_whitespace).next().unwrap_or(rest);
        let clean = |s: &str| !s.contains(char::is_whitespace);
        (clean(x) && clean(y)).then_some((x, y, z))
    }
}
