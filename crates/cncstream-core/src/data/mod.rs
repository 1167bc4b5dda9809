//! Data models shared by the streaming engine
//!
//! This module provides:
//! - Three-axis positions in controller units
//! - Textual coordinate readouts exactly as reported or formatted for display
//! - Display hints for machine status values

use crate::units::MeasurementSystem;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Position in 3D space
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Position {
    /// X-axis position
    pub x: f64,
    /// Y-axis position
    pub y: f64,
    /// Z-axis position
    pub z: f64,
}

impl Position {
    /// Create a new position with X, Y, Z coordinates
    pub const fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    /// Calculate distance to another position
    pub fn distance_to(&self, other: &Position) -> f64 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        let dz = self.z - other.z;
        (dx * dx + dy * dy + dz * dz).sqrt()
    }

    /// Subtract another position (component-wise)
    pub fn subtract(&self, other: &Position) -> Self {
        Self::new(self.x - other.x, self.y - other.y, self.z - other.z)
    }

    /// Scale every component
    pub fn scale(&self, factor: f64) -> Self {
        Self::new(self.x * factor, self.y * factor, self.z * factor)
    }

    /// Euclidean length
    pub fn length(&self) -> f64 {
        self.distance_to(&Position::default())
    }

    /// Unit vector in the same direction, or zero for a zero vector
    pub fn normalized(&self) -> Self {
        let len = self.length();
        if len == 0.0 {
            *self
        } else {
            self.scale(1.0 / len)
        }
    }

    /// Convert every component to millimetres
    pub fn to_metric(&self, units: MeasurementSystem) -> Self {
        Self::new(
            units.to_metric(self.x),
            units.to_metric(self.y),
            units.to_metric(self.z),
        )
    }

    /// True when all components are finite numbers
    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.z.is_finite()
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "X:{:.3} Y:{:.3} Z:{:.3}", self.x, self.y, self.z)
    }
}

/// Coordinate triplet as text
///
/// Machine coordinates keep the controller's own formatting; work
/// coordinates are formatted at the display precision.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CoordinateReadout {
    /// X text
    pub x: String,
    /// Y text
    pub y: String,
    /// Z text
    pub z: String,
}

impl CoordinateReadout {
    /// Build from three text fields
    pub fn new(x: impl Into<String>, y: impl Into<String>, z: impl Into<String>) -> Self {
        Self {
            x: x.into(),
            y: y.into(),
            z: z.into(),
        }
    }

    /// Format a position at the precision of the given unit system
    pub fn formatted(position: &Position, units: MeasurementSystem) -> Self {
        Self {
            x: units.format_coordinate(position.x),
            y: units.format_coordinate(position.y),
            z: units.format_coordinate(position.z),
        }
    }

    /// Numeric value of the readout; unparsable fields read as zero
    pub fn to_position(&self) -> Position {
        let value = |s: &str| s.trim().parse::<f64>().unwrap_or(0.0);
        Position::new(value(&self.x), value(&self.y), value(&self.z))
    }
}

impl fmt::Display for CoordinateReadout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}, {}, {}", self.x, self.y, self.z)
    }
}

/// Display hint for a machine status value
///
/// Passed outward for presentation; the engine never interprets it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StatusAppearance {
    /// Human readable caption
    pub caption: &'static str,
    /// Background colour name
    pub background: &'static str,
    /// Foreground colour name
    pub foreground: &'static str,
}

impl StatusAppearance {
    /// Build an appearance triple
    pub const fn new(
        caption: &'static str,
        background: &'static str,
        foreground: &'static str,
    ) -> Self {
        Self {
            caption,
            background,
            foreground,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subtract() {
        let mpos = Position::new(10.0, 20.0, 30.0);
        let wco = Position::new(1.0, 2.0, 3.0);
        assert_eq!(mpos.subtract(&wco), Position::new(9.0, 18.0, 27.0));
    }

    #[test]
    fn test_normalized_zero_vector() {
        assert_eq!(Position::default().normalized(), Position::default());
        let unit = Position::new(3.0, 4.0, 0.0).normalized();
        assert!((unit.length() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_readout_formatting() {
        let readout =
            CoordinateReadout::formatted(&Position::new(1.0, -2.5, 0.0), MeasurementSystem::Metric);
        assert_eq!(readout, CoordinateReadout::new("1.000", "-2.500", "0.000"));
        assert_eq!(readout.to_position(), Position::new(1.0, -2.5, 0.0));
    }

    #[test]
    fn test_readout_garbage_reads_zero() {
        let readout = CoordinateReadout::new("abc", "1", "");
        assert_eq!(readout.to_position(), Position::new(0.0, 1.0, 0.0));
    }
}
