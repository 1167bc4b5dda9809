//! Grbl status report parsing
//!
//! Grbl 1.1 reports look like
//! `<Idle|MPos:1.000,2.000,3.000|FS:0,0|WCO:0.000,0.000,0.000|Ov:100,100,100>`.
//! Grbl 0.9 separates fields with commas instead of pipes; both are
//! accepted. Fields are located by name, so their order does not matter.

use crate::firmware::{
    FeedSpindle, MachineStatus, OverrideReport, SpindleState, StatusReport,
};
use cncstream_core::{CoordinateReadout, Position, StatusAppearance};
use serde::Serialize;

/// Grbl machine state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum GrblStatus {
    /// Not reported or not recognized
    #[default]
    Unknown,
    /// Idle
    Idle,
    /// Alarm lock
    Alarm,
    /// Running a motion
    Run,
    /// Homing cycle
    Home,
    /// Hold complete
    Hold0,
    /// Decelerating into hold
    Hold1,
    /// Queued hold (Grbl 0.9)
    Queue,
    /// Check mode
    Check,
    /// Safety door open
    Door,
    /// Jogging
    Jog,
}

impl GrblStatus {
    /// Every state in report order
    pub const ALL: [GrblStatus; 11] = [
        Self::Unknown,
        Self::Idle,
        Self::Alarm,
        Self::Run,
        Self::Home,
        Self::Hold0,
        Self::Hold1,
        Self::Queue,
        Self::Check,
        Self::Door,
        Self::Jog,
    ];

    /// Map the state token of a report
    ///
    /// Unrecognized tokens are `Unknown`. `Door:<n>` substates map to `Door`.
    pub fn from_token(token: &str) -> Self {
        match token {
            "Idle" => Self::Idle,
            "Alarm" => Self::Alarm,
            "Run" => Self::Run,
            "Home" => Self::Home,
            "Hold:0" => Self::Hold0,
            "Hold:1" => Self::Hold1,
            "Queue" => Self::Queue,
            "Check" => Self::Check,
            "Jog" => Self::Jog,
            t if t == "Door" || t.starts_with("Door:") => Self::Door,
            _ => Self::Unknown,
        }
    }

    /// Caption and colour hints
    pub fn appearance(&self) -> StatusAppearance {
        match self {
            Self::Unknown => StatusAppearance::new("Unknown", "red", "white"),
            Self::Idle => StatusAppearance::new("Idle", "palette(button)", "palette(text)"),
            Self::Alarm => StatusAppearance::new("Alarm", "red", "white"),
            Self::Run => StatusAppearance::new("Run", "lime", "black"),
            Self::Home => StatusAppearance::new("Home", "lime", "black"),
            Self::Hold0 | Self::Hold1 => StatusAppearance::new("Hold", "yellow", "black"),
            Self::Queue => StatusAppearance::new("Queue", "yellow", "black"),
            Self::Check => StatusAppearance::new("Check", "palette(button)", "palette(text)"),
            Self::Door => StatusAppearance::new("Door", "red", "white"),
            Self::Jog => StatusAppearance::new("Jog", "lime", "black"),
        }
    }
}

/// Stateless parser for Grbl status lines
pub struct StatusParser;

impl StatusParser {
    /// Parse a full status line
    ///
    /// Returns `None` unless the line starts with `<`.
    pub fn parse(line: &str) -> Option<StatusReport> {
        if !line.starts_with('<') {
            return None;
        }

        let mut report = StatusReport {
            status: Self::parse_machine_state(line)
                .map(|token| MachineStatus::Grbl(GrblStatus::from_token(token))),
            machine_position: Self::parse_mpos(line),
            work_offset: Self::parse_wco(line),
            feed_spindle: Self::parse_feed_spindle(line),
            ..StatusReport::default()
        };

        if let Some(overrides) = Self::parse_overrides(line) {
            report.overrides = Some(overrides);
            report.pins = Self::field(line, "Pn:")
                .map(|rest| until(rest, &['|', '>']).to_string());
            report.accessories = Self::field(line, "A:")
                .map(|rest| until(rest, &[',', '>', '|']).to_string())
                .filter(|text| !text.is_empty());
            report.spindle = Some(match report.accessories.as_deref() {
                Some(state) if state.contains('S') => SpindleState::Clockwise,
                Some(state) if state.contains('C') => SpindleState::CounterClockwise,
                _ => SpindleState::Off,
            });
        }

        Some(report)
    }

    /// State token between `<` and the first separator
    pub fn parse_machine_state(line: &str) -> Option<&str> {
        let rest = line.strip_prefix('<')?;
        Some(until(rest, &[',', '>', '|']))
    }

    /// Machine position, kept as reported
    pub fn parse_mpos(line: &str) -> Option<CoordinateReadout> {
        let (x, y, z) = Self::triplet(line, "MPos:")?;
        Some(CoordinateReadout::new(x, y, z))
    }

    /// Work coordinate offset
    pub fn parse_wco(line: &str) -> Option<Position> {
        let (x, y, z) = Self::triplet(line, "WCO:")?;
        let value = |s: &str| s.trim().parse::<f64>().unwrap_or(0.0);
        Some(Position::new(value(x), value(y), value(z)))
    }

    /// Override percentages
    pub fn parse_overrides(line: &str) -> Option<OverrideReport> {
        let (feed, rapid, spindle) = Self::triplet(line, "Ov:")?;
        OverrideReport::parse(feed, rapid, spindle)
    }

    /// Feed and spindle values
    pub fn parse_feed_spindle(line: &str) -> Option<FeedSpindle> {
        let rest = Self::field(line, "FS:")?;
        let (feed, tail) = rest.split_once(',')?;
        Some(FeedSpindle {
            feed: feed.to_string(),
            spindle: until(tail, &[',', '|', '>']).to_string(),
        })
    }

    /// Three comma separated values after `name`; the last ends at a field separator
    fn triplet<'a>(line: &'a str, name: &str) -> Option<(&'a str, &'a str, &'a str)> {
        let rest = Self::field(line, name)?;
        let mut parts = rest.splitn(3, ',');
        let x = parts.next()?;
        let y = parts.next()?;
        let z = until(parts.next()?, &[',', '>', '|']);
        Some((x, y, z))
    }

    /// Text following a field name that starts a field
    fn field<'a>(line: &'a str, name: &str) -> Option<&'a str> {
        line.match_indices(name)
            .find(|(i, _)| *i > 0 && matches!(line.as_bytes()[i - 1], b'<' | b'|' | b','))
            .map(|(i, _)| &line[i + name.len()..])
    }
}

fn until<'a>(text: &'a str, stops: &[char]) -> &'a str {
    text.split(|c| stops.contains(&c)).next().unwrap_or(text)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_state_tokens() {
        assert_eq!(StatusParser::parse_machine_state("<Idle|MPos:0,0,0>"), Some("Idle"));
        assert_eq!(StatusParser::parse_machine_state("<Hold:1|MPos:0,0,0>"), Some("Hold:1"));
        assert_eq!(StatusParser::parse_machine_state("<Run,MPos:0,0,0>"), Some("Run"));
        assert_eq!(GrblStatus::from_token("Door:2"), GrblStatus::Door);
        assert_eq!(GrblStatus::from_token("Sleep"), GrblStatus::Unknown);
    }

    #[test]
    fn test_parse_positions_keep_text() {
        let report = StatusParser::parse("<Idle|MPos:1.000,2.000,3.000|WCO:0.500,0.000,-1.000>")
            .unwrap();
        assert_eq!(
            report.machine_position,
            Some(CoordinateReadout::new("1.000", "2.000", "3.000"))
        );
        assert_eq!(report.work_offset, Some(Position::new(0.5, 0.0, -1.0)));
        assert!(report.overrides.is_none());
        assert!(report.spindle.is_none());
    }

    #[test]
    fn test_parse_grbl09_commas() {
        let report =
            StatusParser::parse("<Run,MPos:5.000,6.000,7.000,WPos:5.000,6.000,7.000>").unwrap();
        assert_eq!(report.status, Some(MachineStatus::Grbl(GrblStatus::Run)));
        assert_eq!(
            report.machine_position,
            Some(CoordinateReadout::new("5.000", "6.000", "7.000"))
        );
    }

    #[test]
    fn test_parse_overrides_and_accessories() {
        let report = StatusParser::parse(
            "<Run|MPos:0.000,0.000,0.000|FS:500,12000|Pn:XZ|Ov:110,50,90|A:CF>",
        )
        .unwrap();
        assert_eq!(report.overrides, OverrideReport::parse("110", "50", "90"));
        assert_eq!(report.pins.as_deref(), Some("XZ"));
        assert_eq!(report.accessories.as_deref(), Some("CF"));
        assert_eq!(report.spindle, Some(SpindleState::CounterClockwise));
        let fs = report.feed_spindle.unwrap();
        assert_eq!((fs.feed.as_str(), fs.spindle.as_str()), ("500", "12000"));
    }

    #[test]
    fn test_overrides_without_accessories_mean_spindle_off() {
        let report = StatusParser::parse("<Idle|MPos:0,0,0|Ov:100,100,100>").unwrap();
        assert_eq!(report.spindle, Some(SpindleState::Off));
        assert!(report.accessories.is_none());
    }

    #[test]
    fn test_field_requires_boundary() {
        // "A:" inside another field name must not be taken as the accessory field
        assert!(StatusParser::field("<Idle|DATA:1>", "A:").is_none());
    }
}
