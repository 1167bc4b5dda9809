//! Event system for stream observers
//!
//! Provides:
//! - Event types for machine state, job progress and console traffic
//! - Event dispatcher for publishing events to subscribers
//!
//! The engine never touches presentation state; everything a front end
//! needs to render arrives as a [`StreamEvent`].

use crate::firmware::{FeedSpindle, MachineStatus, OverrideReport, SpindleState};
use cncstream_core::{CoordinateReadout, Position, StatusAppearance};
use serde::Serialize;
use std::fmt;
use tokio::sync::broadcast;

/// Status poll cadence requested by the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PollCadence {
    /// Regular polling
    Normal,
    /// Fast polling while a reset is pending
    Fast,
    /// Slow polling while check mode is on
    CheckMode,
}

/// Stream event types
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum StreamEvent {
    /// Machine and work coordinates changed
    PositionUpdated {
        /// Machine coordinates as reported
        machine: CoordinateReadout,
        /// Work coordinates at display precision
        work: CoordinateReadout,
    },
    /// Machine status changed
    StatusChanged {
        /// New status
        status: MachineStatus,
        /// Caption and colours
        appearance: StatusAppearance,
    },
    /// A probe sample was written into the height map
    ProbePointCaptured {
        /// Grid row
        row: usize,
        /// Grid column
        col: usize,
        /// Height in millimetres
        z: f64,
    },
    /// A program line was transmitted
    LineSent {
        /// Program line index
        index: usize,
    },
    /// A program line was acknowledged
    LineAcknowledged {
        /// Program line index
        index: usize,
        /// Accumulated response
        response: String,
    },
    /// A job started streaming
    JobStarted {
        /// Number of program lines
        lines: usize,
    },
    /// The machine finished the job
    JobCompleted {
        /// Time since the job started
        elapsed_ms: u64,
    },
    /// A command was echoed to the console
    CommandEchoed {
        /// Console slot
        slot: usize,
        /// Command text
        text: String,
    },
    /// A response was appended to an echoed command
    ResponseLogged {
        /// Console slot of the command
        slot: usize,
        /// Response text
        response: String,
    },
    /// Uncorrelated controller output
    FloatingText(String),
    /// Controller alarm
    AlarmRaised {
        /// Alarm code
        code: u8,
        /// Description
        description: String,
    },
    /// Streaming held on a firmware error; a decision is needed
    HoldRequested {
        /// Accumulated error text
        message: String,
    },
    /// Another error arrived while held
    HoldUpdated {
        /// Accumulated error text
        message: String,
    },
    /// The hold was resolved
    HoldResolved,
    /// The controller rebooted without being asked to
    UnexpectedReset {
        /// Boot banner
        banner: String,
    },
    /// A reset finished
    ResetCompleted,
    /// Status poll cadence should change
    PollCadenceChanged(PollCadence),
    /// Override percentages reported
    OverridesReported(OverrideReport),
    /// Spindle state reported
    SpindleStateChanged(SpindleState),
    /// Spindle speed indicator changed
    SpindleSpeedChanged(f64),
    /// Feed and spindle values reported
    FeedSpindleReported(FeedSpindle),
    /// Pin and accessory state reported
    PinStateReported(String),
    /// Parser state text
    ParserStateUpdated(String),
    /// Origin stored by a zeroing command, in millimetres
    OriginStored {
        /// X origin
        x: f64,
        /// Y origin
        y: f64,
        /// Z origin
        z: f64,
    },
    /// Toolpath segments passed by the tool
    SegmentsDrawn(Vec<usize>),
    /// Tool position for display, in millimetres
    ToolPositionChanged(Position),
    /// Flow control state
    BufferState {
        /// Bytes in flight
        usage: usize,
        /// Commands in flight
        in_flight: usize,
        /// Commands waiting for budget
        queued: usize,
    },
    /// The link failed
    TransportError(String),
}

impl fmt::Display for StreamEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PositionUpdated { machine, work } => {
                write!(f, "Position - Machine: {}, Work: {}", machine, work)
            }
            Self::StatusChanged { status, .. } => write!(f, "Status: {}", status),
            Self::ProbePointCaptured { row, col, z } => {
                write!(f, "Probe [{}, {}]: {:.3}", row, col, z)
            }
            Self::LineSent { index } => write!(f, "Sent line {}", index + 1),
            Self::LineAcknowledged { index, response } => {
                write!(f, "Line {}: {}", index + 1, response)
            }
            Self::JobStarted { lines } => write!(f, "Job started ({} lines)", lines),
            Self::JobCompleted { elapsed_ms } => {
                write!(f, "Job done. Time elapsed: {}", format_elapsed(*elapsed_ms))
            }
            Self::CommandEchoed { text, .. } => write!(f, "{}", text),
            Self::ResponseLogged { response, .. } => write!(f, " < {}", response),
            Self::FloatingText(text) => write!(f, "{}", text),
            Self::AlarmRaised { code, description } => {
                write!(f, "Alarm {} ({})", code, description)
            }
            Self::HoldRequested { message } | Self::HoldUpdated { message } => {
                write!(f, "Error message(s) received:\n{}", message)
            }
            Self::HoldResolved => write!(f, "Hold resolved"),
            Self::UnexpectedReset { banner } => write!(f, "Controller reset: {}", banner),
            Self::ResetCompleted => write!(f, "Reset completed"),
            Self::PollCadenceChanged(cadence) => write!(f, "Poll cadence: {:?}", cadence),
            Self::OverridesReported(ov) => {
                write!(f, "Overrides: F{}% R{}% S{}%", ov.feed, ov.rapid, ov.spindle)
            }
            Self::SpindleStateChanged(state) => write!(f, "Spindle: {:?}", state),
            Self::SpindleSpeedChanged(speed) => write!(f, "Spindle: {} RPM", speed),
            Self::FeedSpindleReported(fs) => write!(f, "F/S: {} / {}", fs.feed, fs.spindle),
            Self::PinStateReported(pins) => write!(f, "{}", pins),
            Self::ParserStateUpdated(state) => write!(f, "Parser: {}", state),
            Self::OriginStored { x, y, z } => write!(f, "Restore origin: {}, {}, {}", x, y, z),
            Self::SegmentsDrawn(segments) => write!(f, "Drawn {} segments", segments.len()),
            Self::ToolPositionChanged(position) => write!(f, "Tool: {}", position),
            Self::BufferState {
                usage,
                in_flight,
                queued,
            } => write!(f, "Buffer: {} / {} / {}", usage, in_flight, queued),
            Self::TransportError(reason) => write!(f, "Connection error: {}", reason),
        }
    }
}

fn format_elapsed(ms: u64) -> String {
    let secs = ms / 1000;
    format!("{:02}:{:02}:{:02}", secs / 3600, (secs / 60) % 60, secs % 60)
}

/// Event dispatcher for publishing events to subscribers
#[derive(Debug, Clone)]
pub struct EventDispatcher {
    tx: broadcast::Sender<StreamEvent>,
}

impl EventDispatcher {
    /// Create a new event dispatcher
    ///
    /// # Arguments
    /// * `buffer_size` - Events kept for slow subscribers before they lag
    pub fn new(buffer_size: usize) -> Self {
        let (tx, _) = broadcast::channel(buffer_size.max(1));
        Self { tx }
    }

    /// Subscribe to events
    pub fn subscribe(&self) -> broadcast::Receiver<StreamEvent> {
        self.tx.subscribe()
    }

    /// Publish an event to all subscribers
    ///
    /// Publishing with nobody listening is not an error.
    pub fn publish(&self, event: StreamEvent) {
        tracing::trace!("event: {}", event);
        let _ = self.tx.send(event);
    }

    /// Get number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventDispatcher {
    fn default() -> Self {
        Self::new(256)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_publish_without_subscribers() {
        let events = EventDispatcher::new(4);
        events.publish(StreamEvent::HoldResolved);
        assert_eq!(events.subscriber_count(), 0);
    }

    #[test]
    fn test_subscriber_receives() {
        let events = EventDispatcher::new(4);
        let mut rx = events.subscribe();
        events.publish(StreamEvent::LineSent { index: 2 });
        assert_eq!(rx.try_recv().unwrap(), StreamEvent::LineSent { index: 2 });
    }

    #[test]
    fn test_display() {
        assert_eq!(
            StreamEvent::JobCompleted { elapsed_ms: 3_723_000 }.to_string(),
            "Job done. Time elapsed: 01:02:03"
        );
        assert_eq!(
            StreamEvent::BufferState {
                usage: 10,
                in_flight: 2,
                queued: 1
            }
            .to_string(),
            "Buffer: 10 / 2 / 1"
        );
    }
}
