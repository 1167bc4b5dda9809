//! Job and toolpath collaborators
//!
//! The engine streams from a [`ProgramSource`] and, when one is attached,
//! marks the segments of a [`Toolpath`] as the tool passes them. Both are
//! owned by the surrounding application; the in-memory implementations
//! here cover the CLI and tests.

use cncstream_core::Position;
use serde::Serialize;

/// Per-line transmission state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum LineStatus {
    /// Not transmitted yet
    #[default]
    Pending,
    /// Written to the controller
    Sent,
    /// Acknowledged by the controller
    Processed,
}

/// Ordered, index-addressable command lines of a job
pub trait ProgramSource: Send {
    /// Number of lines
    fn line_count(&self) -> usize;

    /// Text of a line
    fn line_text(&self, index: usize) -> Option<&str>;

    /// Record the transmission state of a line
    fn set_line_status(&mut self, index: usize, status: LineStatus);

    /// Record the controller's response to a line
    fn set_line_response(&mut self, index: usize, response: &str);

    /// Toolpath line number of the last segment generated by this line
    fn line_geometry_end_index(&self, index: usize) -> usize {
        index
    }
}

/// One line of an in-memory program
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProgramLine {
    /// Command text
    pub text: String,
    /// Transmission state
    pub status: LineStatus,
    /// Controller response
    pub response: String,
    /// Toolpath line number of the line's last segment
    pub geometry_end: usize,
}

/// Program held in memory
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VecProgram {
    lines: Vec<ProgramLine>,
}

impl VecProgram {
    /// Build from command lines as given
    pub fn from_lines<I, S>(lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let lines = lines
            .into_iter()
            .enumerate()
            .map(|(index, text)| ProgramLine {
                text: text.into(),
                status: LineStatus::Pending,
                response: String::new(),
                geometry_end: index,
            })
            .collect();
        Self { lines }
    }

    /// Build from G-code text
    ///
    /// Comments (`;` to end of line and parenthesised) and blank lines are
    /// dropped, everything else is trimmed.
    pub fn parse(text: &str) -> Self {
        Self::from_lines(text.lines().map(strip_comments).filter(|l| !l.is_empty()))
    }

    /// Line by index
    pub fn line(&self, index: usize) -> Option<&ProgramLine> {
        self.lines.get(index)
    }

    /// All lines
    pub fn lines(&self) -> &[ProgramLine] {
        &self.lines
    }

    /// Set the toolpath line number a program line ends at
    pub fn set_geometry_end(&mut self, index: usize, end: usize) {
        if let Some(line) = self.lines.get_mut(index) {
            line.geometry_end = end;
        }
    }

    /// Number of lines in the given state
    pub fn count_with_status(&self, status: LineStatus) -> usize {
        self.lines.iter().filter(|l| l.status == status).count()
    }
}

impl ProgramSource for VecProgram {
    fn line_count(&self) -> usize {
        self.lines.len()
    }

    fn line_text(&self, index: usize) -> Option<&str> {
        self.lines.get(index).map(|l| l.text.as_str())
    }

    fn set_line_status(&mut self, index: usize, status: LineStatus) {
        if let Some(line) = self.lines.get_mut(index) {
            line.status = status;
        }
    }

    fn set_line_response(&mut self, index: usize, response: &str) {
        if let Some(line) = self.lines.get_mut(index) {
            line.response = response.to_string();
        }
    }

    fn line_geometry_end_index(&self, index: usize) -> usize {
        self.lines.get(index).map_or(index, |l| l.geometry_end)
    }
}

fn strip_comments(line: &str) -> String {
    let line = line.split(';').next().unwrap_or_default();
    let mut out = String::with_capacity(line.len());
    let mut depth = 0usize;
    for c in line.chars() {
        match c {
            '(' => depth += 1,
            ')' if depth > 0 => depth -= 1,
            _ if depth == 0 => out.push(c),
            _ => {}
        }
    }
    out.trim().to_string()
}

/// Rendered toolpath segments, in program order
pub trait Toolpath: Send {
    /// Number of segments
    fn len(&self) -> usize;

    /// True when there are no segments
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Program line number the segment was generated from
    fn line_number(&self, segment: usize) -> usize;

    /// End point of the segment in millimetres
    fn end(&self, segment: usize) -> Position;

    /// True when the point lies on the segment
    fn contains(&self, segment: usize, point: &Position) -> bool;

    /// Mark the segment as passed by the tool
    fn set_drawn(&mut self, segment: usize);
}

/// Straight toolpath segment
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Segment {
    /// Program line number
    pub line_number: usize,
    /// Start point
    pub start: Position,
    /// End point
    pub end: Position,
    /// Passed by the tool
    pub drawn: bool,
}

impl Segment {
    /// True when `point` is within `tolerance` of the segment
    ///
    /// Uses the triangle inequality: a point on the segment splits it into
    /// two parts whose lengths add up to the whole.
    pub fn contains(&self, point: &Position, tolerance: f64) -> bool {
        let whole = self.start.distance_to(&self.end);
        let parts = self.start.distance_to(point) + point.distance_to(&self.end);
        parts - whole < tolerance
    }
}

/// Default tolerance for [`Segment::contains`], in millimetres
pub const SEGMENT_TOLERANCE: f64 = 0.01;

/// Polyline toolpath
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SegmentPath {
    segments: Vec<Segment>,
    tolerance: f64,
}

impl SegmentPath {
    /// Empty path
    pub fn new() -> Self {
        Self {
            segments: Vec::new(),
            tolerance: SEGMENT_TOLERANCE,
        }
    }

    /// Append a segment from the previous end point (or the origin) to `end`
    pub fn push(&mut self, line_number: usize, end: Position) {
        let start = self.segments.last().map_or(Position::default(), |s| s.end);
        self.segments.push(Segment {
            line_number,
            start,
            end,
            drawn: false,
        });
    }

    /// All segments
    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// Indices of segments already passed
    pub fn drawn(&self) -> Vec<usize> {
        self.segments
            .iter()
            .enumerate()
            .filter(|(_, s)| s.drawn)
            .map(|(i, _)| i)
            .collect()
    }
}

impl Toolpath for SegmentPath {
    fn len(&self) -> usize {
        self.segments.len()
    }

    fn line_number(&self, segment: usize) -> usize {
        self.segments.get(segment).map_or(usize::MAX, |s| s.line_number)
    }

    fn end(&self, segment: usize) -> Position {
        self.segments
            .get(segment)
            .map_or(Position::new(f64::NAN, f64::NAN, f64::NAN), |s| s.end)
    }

    fn contains(&self, segment: usize, point: &Position) -> bool {
        self.segments
            .get(segment)
            .is_some_and(|s| s.contains(point, self.tolerance))
    }

    fn set_drawn(&mut self, segment: usize) {
        if let Some(s) = self.segments.get_mut(segment) {
            s.drawn = true;
        }
    }
}
