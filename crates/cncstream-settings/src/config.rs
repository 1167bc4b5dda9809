//! Stream controller settings
//!
//! Settings are read from a TOML or JSON file, picked by extension.
//! Every field has a default so a file only lists what it changes.
//! Durations are stored in milliseconds and converted when the
//! controller configuration is built.

use crate::error::{SettingsError, SettingsResult};
use cncstream_communication::firmware::DialectKind;
use cncstream_communication::stream::{RestoreMode, StreamConfig};
use cncstream_core::MeasurementSystem;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Link settings used by the command line front end
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionSettings {
    /// Baud rate for serial connections
    pub baud_rate: u32,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self { baud_rate: 115200 }
    }
}

/// Settings for one stream controller
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamSettings {
    /// Firmware dialect
    pub dialect: DialectKind,
    /// Controller receive buffer in bytes
    pub buffer_capacity: usize,
    /// Units the controller reports in
    pub units: MeasurementSystem,
    pub ignore_errors: bool,
    pub echo_program_commands: bool,
    pub echo_ui_commands: bool,
    pub status_poll_interval_ms: u64,
    pub reset_poll_interval_ms: u64,
    pub check_mode_poll_interval_ms: u64,
    pub housekeeping_interval_ms: u64,
    pub link_poll_interval_ms: u64,
    /// Commands moving to a safe position, `;` separated
    pub safe_position_command: String,
    pub move_on_restore: bool,
    pub restore_mode: RestoreMode,
    /// Continuous jog acceleration in mm/s²
    pub acceleration: f64,
    pub heightmap_probing_feed: f64,
    /// Events buffered per subscriber
    pub event_capacity: usize,
    pub connection: ConnectionSettings,
}

impl Default for StreamSettings {
    fn default() -> Self {
        let config = StreamConfig::default();
        Self {
            dialect: config.dialect,
            buffer_capacity: config.buffer_capacity,
            units: config.units,
            ignore_errors: config.ignore_errors,
            echo_program_commands: config.echo_program_commands,
            echo_ui_commands: config.echo_ui_commands,
            status_poll_interval_ms: millis(config.status_poll_interval),
            reset_poll_interval_ms: millis(config.reset_poll_interval),
            check_mode_poll_interval_ms: millis(config.check_mode_poll_interval),
            housekeeping_interval_ms: millis(config.housekeeping_interval),
            link_poll_interval_ms: millis(config.link_poll_interval),
            safe_position_command: config.safe_position_command,
            move_on_restore: config.move_on_restore,
            restore_mode: config.restore_mode,
            acceleration: config.acceleration,
            heightmap_probing_feed: config.heightmap_probing_feed,
            event_capacity: config.event_capacity,
            connection: ConnectionSettings::default(),
        }
    }
}

fn positive(value: f64) -> bool {
    value.is_finite() && value > 0.0
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

impl StreamSettings {
    /// Load and validate settings from a `.toml` or `.json` file
    pub fn load_from_file(path: &Path) -> SettingsResult<Self> {
        let content = std::fs::read_to_string(path)?;
        let settings: Self = match path.extension().and_then(|e| e.to_str()) {
            Some("toml") => toml::from_str(&content)?,
            Some("json") => serde_json::from_str(&content)?,
            other => {
                return Err(SettingsError::UnsupportedFormat(
                    other.unwrap_or("none").to_string(),
                ))
            }
        };
        settings.validate()?;
        tracing::info!(
            "Loaded settings from {} ({} dialect)",
            path.display(),
            settings.dialect
        );
        Ok(settings)
    }

    /// Parse and validate TOML settings
    pub fn from_toml_str(content: &str) -> SettingsResult<Self> {
        let settings: Self = toml::from_str(content)?;
        settings.validate()?;
        Ok(settings)
    }

    /// Validate settings
    pub fn validate(&self) -> SettingsResult<()> {
        if self.buffer_capacity == 0 {
            return Err(SettingsError::invalid("buffer_capacity", "must be > 0"));
        }
        if self.event_capacity == 0 {
            return Err(SettingsError::invalid("event_capacity", "must be > 0"));
        }

        let intervals = [
            ("status_poll_interval_ms", self.status_poll_interval_ms),
            ("reset_poll_interval_ms", self.reset_poll_interval_ms),
            ("check_mode_poll_interval_ms", self.check_mode_poll_interval_ms),
            ("housekeeping_interval_ms", self.housekeeping_interval_ms),
            ("link_poll_interval_ms", self.link_poll_interval_ms),
        ];
        if let Some((key, _)) = intervals.iter().find(|(_, value)| *value == 0) {
            return Err(SettingsError::invalid(key, "must be > 0"));
        }

        if !positive(self.acceleration) {
            return Err(SettingsError::invalid("acceleration", "must be > 0"));
        }
        if !positive(self.heightmap_probing_feed) {
            return Err(SettingsError::invalid(
                "heightmap_probing_feed",
                "must be > 0",
            ));
        }
        if self.connection.baud_rate == 0 {
            return Err(SettingsError::invalid("connection.baud_rate", "must be > 0"));
        }

        Ok(())
    }

    /// Controller configuration for these settings
    pub fn stream_config(&self) -> StreamConfig {
        StreamConfig {
            dialect: self.dialect,
            buffer_capacity: self.buffer_capacity,
            units: self.units,
            ignore_errors: self.ignore_errors,
            echo_program_commands: self.echo_program_commands,
            echo_ui_commands: self.echo_ui_commands,
            status_poll_interval: Duration::from_millis(self.status_poll_interval_ms),
            reset_poll_interval: Duration::from_millis(self.reset_poll_interval_ms),
            check_mode_poll_interval: Duration::from_millis(self.check_mode_poll_interval_ms),
            housekeeping_interval: Duration::from_millis(self.housekeeping_interval_ms),
            link_poll_interval: Duration::from_millis(self.link_poll_interval_ms),
            safe_position_command: self.safe_position_command.clone(),
            move_on_restore: self.move_on_restore,
            restore_mode: self.restore_mode,
            acceleration: self.acceleration,
            heightmap_probing_feed: self.heightmap_probing_feed,
            event_capacity: self.event_capacity,
        }
    }
}
