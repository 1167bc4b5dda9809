//! Unit conversion utilities
//!
//! Controllers report coordinates in whatever unit system they were
//! configured for. Everything geometric inside the engine (toolpath
//! shadowing, probe heights, restored offsets) works in millimetres.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Millimetres per inch
pub const MM_PER_INCH: f64 = 25.4;

/// Measurement system
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MeasurementSystem {
    /// Metric system (mm)
    #[default]
    Metric,
    /// Imperial system (inches)
    Imperial,
}

impl MeasurementSystem {
    /// Convert a value reported in this system to millimetres
    pub fn to_metric(self, value: f64) -> f64 {
        match self {
            Self::Metric => value,
            Self::Imperial => value * MM_PER_INCH,
        }
    }

    /// Number of decimals used when displaying coordinates
    pub fn precision(self) -> usize {
        match self {
            Self::Metric => 3,
            Self::Imperial => 4,
        }
    }

    /// Format a coordinate at this system's display precision
    pub fn format_coordinate(self, value: f64) -> String {
        format!("{:.*}", self.precision(), value)
    }
}

impl fmt::Display for MeasurementSystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Metric => write!(f, "Metric"),
            Self::Imperial => write!(f, "Imperial"),
        }
    }
}

impl FromStr for MeasurementSystem {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "metric" | "mm" => Ok(Self::Metric),
            "imperial" | "inch" | "in" => Ok(Self::Imperial),
            _ => Err(format!("Unknown measurement system: {}", s)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_to_metric() {
        assert_eq!(MeasurementSystem::Metric.to_metric(2.5), 2.5);
        assert!((MeasurementSystem::Imperial.to_metric(1.0) - 25.4).abs() < 1e-9);
    }

    #[test]
    fn test_format_precision() {
        assert_eq!(MeasurementSystem::Metric.format_coordinate(1.0), "1.000");
        assert_eq!(MeasurementSystem::Imperial.format_coordinate(0.5), "0.5000");
        assert_eq!(MeasurementSystem::Metric.format_coordinate(-12.34567), "-12.346");
    }

    #[test]
    fn test_from_str() {
        assert_eq!(
            "mm".parse::<MeasurementSystem>(),
            Ok(MeasurementSystem::Metric)
        );
        assert_eq!(
            "Inch".parse::<MeasurementSystem>(),
            Ok(MeasurementSystem::Imperial)
        );
        assert!("furlong".parse::<MeasurementSystem>().is_err());
    }
}
