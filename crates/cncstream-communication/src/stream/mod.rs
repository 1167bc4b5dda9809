//! Command streaming
//!
//! [`StreamController`] owns the command ledger, the active dialect and
//! the job progress. It is driven from a single task by three inputs:
//! lines read from the link, a status poll tick and a housekeeping tick.
//! Operator commands arrive through its methods between those calls.
//!
//! # Features
//! - Character-counting flow control against the controller buffer
//! - Response correlation and acknowledgement side effects
//! - Job streaming with hold on firmware errors
//! - Abort, reset and unexpected reset recovery
//! - Toolpath shadowing and height map probing

pub mod event;
pub mod heightmap;
pub mod program;
pub mod session;

mod job;
mod machine;
mod receive;
mod recovery;
mod shadow;
mod transmit;

pub use event::{EventDispatcher, PollCadence, StreamEvent};
pub use heightmap::{probe_program, HeightMapGrid, ProbeArea, ProbeCycle};
pub use program::{
    LineStatus, ProgramLine, ProgramSource, Segment, SegmentPath, Toolpath, VecProgram,
    SEGMENT_TOLERANCE,
};
pub use session::{run_session, SessionEnd, SessionRequest};

use crate::communication::{CommandLedger, Link, DEFAULT_BUFFER_CAPACITY};
use crate::firmware::{dialect_for, Dialect, DialectKind, MachineStatus, OverrideManager};
use cncstream_core::{CoordinateReadout, MeasurementSystem, Position};
use heightmap::HeightMapProbe;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

/// Where the tool goes after the origin is restored
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RestoreMode {
    /// Move to X0 Y0
    #[default]
    Xy,
    /// Move to X0 Y0 Z0
    Xyz,
}

/// Operator answer to a held job
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HoldDecision {
    /// Resume streaming
    Ignore {
        /// Stop holding on errors for the rest of the session
        ignore_future: bool,
    },
    /// Abort the job
    Abort,
}

/// Configuration for the stream controller
#[derive(Debug, Clone, PartialEq)]
pub struct StreamConfig {
    /// Firmware dialect
    pub dialect: DialectKind,
    /// Controller receive buffer in bytes
    pub buffer_capacity: usize,
    /// Units the controller reports in
    pub units: MeasurementSystem,
    /// Keep streaming when the firmware reports an error
    pub ignore_errors: bool,
    /// Echo program lines to the console
    pub echo_program_commands: bool,
    /// Echo commands issued by machine operations to the console
    pub echo_ui_commands: bool,
    /// Status poll period
    pub status_poll_interval: Duration,
    /// Status poll period while a reset is pending
    pub reset_poll_interval: Duration,
    /// Status poll period in check mode
    pub check_mode_poll_interval: Duration,
    /// Housekeeping period
    pub housekeeping_interval: Duration,
    /// Link read period
    pub link_poll_interval: Duration,
    /// Commands moving to a safe position, `;` separated
    pub safe_position_command: String,
    /// Move the tool after restoring the origin
    pub move_on_restore: bool,
    /// Axes moved after restoring the origin
    pub restore_mode: RestoreMode,
    /// Acceleration for continuous jogging in mm/s²
    pub acceleration: f64,
    /// Feed for height map probing
    pub heightmap_probing_feed: f64,
    /// Events buffered per subscriber
    pub event_capacity: usize,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            dialect: DialectKind::Grbl,
            buffer_capacity: DEFAULT_BUFFER_CAPACITY,
            units: MeasurementSystem::Metric,
            ignore_errors: false,
            echo_program_commands: false,
            echo_ui_commands: true,
            status_poll_interval: Duration::from_millis(100),
            reset_poll_interval: Duration::from_millis(20),
            check_mode_poll_interval: Duration::from_millis(1000),
            housekeeping_interval: Duration::from_millis(1000),
            link_poll_interval: Duration::from_millis(10),
            safe_position_command: "G21G90G53G0Z0".to_string(),
            move_on_restore: false,
            restore_mode: RestoreMode::Xy,
            acceleration: 10.0,
            heightmap_probing_feed: 10.0,
            event_capacity: 256,
        }
    }
}

impl StreamConfig {
    /// Status poll period for a cadence
    pub fn poll_interval(&self, cadence: PollCadence) -> Duration {
        match cadence {
            PollCadence::Normal => self.status_poll_interval,
            PollCadence::Fast => self.reset_poll_interval,
            PollCadence::CheckMode => self.check_mode_poll_interval,
        }
    }
    /// Probing cycle between two heights at the configured probing feed
    pub fn probe_cycle(&self, z_top: f64, z_bottom: f64) -> ProbeCycle {
        ProbeCycle {
            z_top,
            z_bottom,
            feed: self.heightmap_probing_feed,
        }
    }
}

/// Job streaming progress
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobProgress {
    /// Next program line to transmit
    pub command_index: usize,
    /// Last program line acknowledged
    pub processed_index: usize,
    /// Every line has been acknowledged or the program end was reached
    pub transfer_completed: bool,
    /// A program end command has been transmitted
    pub file_end_sent: bool,
    /// A job is running
    pub processing: bool,
}

impl Default for JobProgress {
    fn default() -> Self {
        Self {
            command_index: 0,
            processed_index: 0,
            transfer_completed: true,
            file_end_sent: false,
            processing: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
struct JogState {
    vector: Position,
    step: f64,
    feed: f64,
}

/// Streams commands to one controller over one link
pub struct StreamController<L: Link> {
    link: L,
    dialect: Box<dyn Dialect>,
    config: StreamConfig,
    ledger: CommandLedger,
    events: EventDispatcher,
    overrides: OverrideManager,

    program: Option<Box<dyn ProgramSource>>,
    toolpath: Option<Box<dyn Toolpath>>,
    height_map: Option<HeightMapProbe>,
    job: JobProgress,
    started_at: Option<Instant>,
    last_drawn: usize,

    status: MachineStatus,
    last_status: Option<MachineStatus>,
    machine_position: CoordinateReadout,
    work_position: CoordinateReadout,
    work_offset: Position,
    tool_position: Position,
    cadence: PollCadence,

    status_received: bool,
    reset_completed: bool,
    resetting: bool,
    homing: bool,
    aborting: bool,
    paused: bool,
    update_spindle_speed: bool,
    update_parser_status: bool,
    setting_zero_xy: bool,
    setting_zero_z: bool,
    keyboard_control: bool,
    absolute_coordinates: bool,

    hold: Option<String>,
    abort_sample: Option<Position>,
    stored_origin: Position,
    parser_state: String,
    stored_parser_state: String,
    spindle_speed: f64,
    jog: JogState,
    console_lines: usize,
}

impl<L: Link> StreamController<L> {
    /// Create a controller for an open link
    pub fn new(link: L, config: StreamConfig) -> Self {
        let dialect = dialect_for(config.dialect);
        Self::with_dialect(link, dialect, config)
    }

    /// Create a controller with a custom dialect engine
    pub fn with_dialect(link: L, dialect: Box<dyn Dialect>, config: StreamConfig) -> Self {
        tracing::debug!(
            "Stream controller for {} on {} (buffer {} bytes)",
            dialect.kind(),
            link.name(),
            config.buffer_capacity
        );
        Self {
            status: dialect.initial_status(),
            ledger: CommandLedger::new(config.buffer_capacity),
            events: EventDispatcher::new(config.event_capacity),
            overrides: OverrideManager::new(),
            link,
            dialect,
            config,
            program: None,
            toolpath: None,
            height_map: None,
            job: JobProgress::default(),
            started_at: None,
            last_drawn: 0,
            last_status: None,
            machine_position: CoordinateReadout::default(),
            work_position: CoordinateReadout::default(),
            work_offset: Position::default(),
            tool_position: Position::default(),
            cadence: PollCadence::Normal,
            status_received: true,
            reset_completed: true,
            resetting: false,
            homing: false,
            aborting: false,
            paused: false,
            update_spindle_speed: false,
            update_parser_status: false,
            setting_zero_xy: false,
            setting_zero_z: false,
            keyboard_control: false,
            absolute_coordinates: false,
            hold: None,
            abort_sample: None,
            stored_origin: Position::default(),
            parser_state: String::new(),
            stored_parser_state: String::new(),
            spindle_speed: 0.0,
            jog: JogState::default(),
            console_lines: 0,
        }
    }

    /// Subscribe to stream events
    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<StreamEvent> {
        self.events.subscribe()
    }

    /// Event dispatcher shared with observers
    pub fn events(&self) -> &EventDispatcher {
        &self.events
    }

    /// Active configuration
    pub fn config(&self) -> &StreamConfig {
        &self.config
    }

    /// Dialect in use
    pub fn dialect_kind(&self) -> DialectKind {
        self.dialect.kind()
    }

    /// Command ledger
    pub fn ledger(&self) -> &CommandLedger {
        &self.ledger
    }

    /// The link
    pub fn link(&self) -> &L {
        &self.link
    }

    /// The link, mutably
    pub fn link_mut(&mut self) -> &mut L {
        &mut self.link
    }

    /// Override targets
    pub fn overrides_mut(&mut self) -> &mut OverrideManager {
        &mut self.overrides
    }

    /// Current machine status
    pub fn status(&self) -> MachineStatus {
        self.status
    }

    /// Machine position as last reported
    pub fn machine_position(&self) -> &CoordinateReadout {
        &self.machine_position
    }

    /// Work position at display precision
    pub fn work_position(&self) -> &CoordinateReadout {
        &self.work_position
    }

    /// Tool position used for toolpath shadowing, in millimetres
    pub fn tool_position(&self) -> Position {
        self.tool_position
    }

    /// Job progress
    pub fn job_progress(&self) -> &JobProgress {
        &self.job
    }

    /// True while a job is streaming or running
    pub fn is_job_active(&self) -> bool {
        self.job.processing
    }

    /// Status poll cadence currently requested
    pub fn cadence(&self) -> PollCadence {
        self.cadence
    }

    /// Status poll period for the current cadence
    pub fn poll_interval(&self) -> Duration {
        self.config.poll_interval(self.cadence)
    }

    /// True once the last reset has been confirmed
    pub fn reset_completed(&self) -> bool {
        self.reset_completed
    }

    /// True while waiting for a reset banner
    pub fn is_resetting(&self) -> bool {
        self.resetting
    }

    /// True while a homing cycle runs
    pub fn is_homing(&self) -> bool {
        self.homing
    }

    /// True while an abort is in progress
    pub fn is_aborting(&self) -> bool {
        self.aborting
    }

    /// Accumulated error text while a job is held
    pub fn hold_message(&self) -> Option<&str> {
        self.hold.as_deref()
    }

    /// Last parser state reported
    pub fn parser_state(&self) -> &str {
        &self.parser_state
    }

    /// Parser state stored for restoring after an abort
    pub fn stored_parser_state(&self) -> &str {
        &self.stored_parser_state
    }

    /// Origin stored by the last zeroing commands, in millimetres
    pub fn stored_origin(&self) -> Position {
        self.stored_origin
    }

    /// Spindle speed indicator
    pub fn spindle_speed(&self) -> f64 {
        self.spindle_speed
    }

    /// Loaded program
    pub fn program(&self) -> Option<&dyn ProgramSource> {
        self.program.as_deref()
    }

    /// Attached toolpath
    pub fn toolpath(&self) -> Option<&dyn Toolpath> {
        self.toolpath.as_deref()
    }

    /// Height map being probed
    pub fn height_map(&self) -> Option<&HeightMapGrid> {
        self.height_map.as_ref().map(HeightMapProbe::grid)
    }

    fn set_cadence(&mut self, cadence: PollCadence) {
        if self.cadence != cadence {
            tracing::debug!("Status poll cadence {:?} -> {:?}", self.cadence, cadence);
            self.cadence = cadence;
            self.events.publish(StreamEvent::PollCadenceChanged(cadence));
        }
    }
}
