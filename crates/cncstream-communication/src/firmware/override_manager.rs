//! Override correction
//!
//! The operator sets target percentages for feed, rapid and spindle
//! overrides. Grbl reports the percentages actually in effect in every
//! `Ov:` field; whenever a reported value differs from its target, one
//! realtime step byte is written to move it closer. Steps are 10% until
//! the value is within 10% of the target, then 1%.

use cncstream_core::{ControllerError, Result};
use serde::Serialize;

/// Feed override: +10% (base), -10%, +1%, -1%
pub const FEED_OVERRIDE_BASE: u8 = 0x91;
/// Spindle override: +10% (base), -10%, +1%, -1%
pub const SPINDLE_OVERRIDE_BASE: u8 = 0x9A;

/// Percentages reported in an `Ov:` field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct OverrideReport {
    /// Feed override percentage
    pub feed: u16,
    /// Rapid override percentage
    pub rapid: u16,
    /// Spindle override percentage
    pub spindle: u16,
}

impl OverrideReport {
    /// Parse the three fields of an `Ov:` report
    pub fn parse(feed: &str, rapid: &str, spindle: &str) -> Option<Self> {
        Some(Self {
            feed: feed.trim().parse().ok()?,
            rapid: rapid.trim().parse().ok()?,
            spindle: spindle.trim().parse().ok()?,
        })
    }
}

/// Rapid override levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum RapidOverrideLevel {
    /// Slow rapid (25%)
    Slow,
    /// Medium rapid (50%)
    Medium,
    /// Full rapid (100%)
    #[default]
    Full,
}

impl RapidOverrideLevel {
    /// Percentage the level stands for
    pub fn percentage(&self) -> u16 {
        match self {
            Self::Slow => 25,
            Self::Medium => 50,
            Self::Full => 100,
        }
    }

    /// Realtime byte selecting the level
    pub fn byte(&self) -> u8 {
        match self {
            Self::Slow => 0x97,
            Self::Medium => 0x96,
            Self::Full => 0x95,
        }
    }

    /// Level for a percentage, if it is one of the supported ones
    pub fn from_percentage(percentage: u16) -> Option<Self> {
        match percentage {
            25 => Some(Self::Slow),
            50 => Some(Self::Medium),
            100 => Some(Self::Full),
            _ => None,
        }
    }
}

/// Override targets and the correction policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct OverrideManager {
    feed: Option<u16>,
    rapid: Option<RapidOverrideLevel>,
    spindle: Option<u16>,
}

impl OverrideManager {
    /// All overrides disabled, so every target is 100%
    pub fn new() -> Self {
        Self::default()
    }

    /// Set or clear the feed override target (10-200%)
    pub fn set_feed_target(&mut self, percentage: Option<u16>) -> Result<()> {
        self.feed = validate("Feed", percentage)?;
        Ok(())
    }

    /// Set or clear the spindle override target (10-200%)
    pub fn set_spindle_target(&mut self, percentage: Option<u16>) -> Result<()> {
        self.spindle = validate("Spindle", percentage)?;
        Ok(())
    }

    /// Set or clear the rapid override target
    pub fn set_rapid_target(&mut self, level: Option<RapidOverrideLevel>) {
        self.rapid = level;
    }

    /// Feed target in effect
    pub fn feed_target(&self) -> u16 {
        self.feed.unwrap_or(100)
    }

    /// Spindle target in effect
    pub fn spindle_target(&self) -> u16 {
        self.spindle.unwrap_or(100)
    }

    /// Rapid target in effect
    pub fn rapid_target(&self) -> RapidOverrideLevel {
        self.rapid.unwrap_or_default()
    }

    /// Bytes to write in answer to a report; at most one per override
    pub fn corrections(&self, report: &OverrideReport) -> Vec<u8> {
        let mut bytes = Vec::new();
        bytes.extend(step_toward(report.feed, self.feed_target(), FEED_OVERRIDE_BASE));
        bytes.extend(step_toward(report.spindle, self.spindle_target(), SPINDLE_OVERRIDE_BASE));
        let rapid = self.rapid_target();
        if report.rapid != rapid.percentage() {
            bytes.push(rapid.byte());
        }
        bytes
    }
}

fn validate(name: &str, percentage: Option<u16>) -> Result<Option<u16>> {
    match percentage {
        Some(p) if !(10..=200).contains(&p) => Err(ControllerError::Other {
            message: format!("{} override must be between 10 and 200%, got {}", name, p),
        }
        .into()),
        other => Ok(other),
    }
}

fn step_toward(current: u16, target: u16, base: u8) -> Option<u8> {
    let small = current.abs_diff(target) < 10;
    match current.cmp(&target) {
        std::cmp::Ordering::Equal => None,
        std::cmp::Ordering::Less if small => Some(base + 2),
        std::cmp::Ordering::Less => Some(base),
        std::cmp::Ordering::Greater if small => Some(base + 3),
        std::cmp::Ordering::Greater => Some(base + 1),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report(feed: u16, rapid: u16, spindle: u16) -> OverrideReport {
        OverrideReport {
            feed,
            rapid,
            spindle,
        }
    }

    #[test]
    fn test_no_correction_at_target() {
        let manager = OverrideManager::new();
        assert!(manager.corrections(&report(100, 100, 100)).is_empty());
    }

    #[test]
    fn test_coarse_then_fine_steps() {
        let mut manager = OverrideManager::new();
        manager.set_feed_target(Some(125)).unwrap();
        assert_eq!(manager.corrections(&report(100, 100, 100)), vec![0x91]);
        assert_eq!(manager.corrections(&report(120, 100, 100)), vec![0x93]);
        assert_eq!(manager.corrections(&report(130, 100, 100)), vec![0x94]);
        assert_eq!(manager.corrections(&report(150, 100, 100)), vec![0x92]);
    }

    #[test]
    fn test_spindle_and_rapid() {
        let mut manager = OverrideManager::new();
        manager.set_spindle_target(Some(50)).unwrap();
        manager.set_rapid_target(Some(RapidOverrideLevel::Medium));
        assert_eq!(manager.corrections(&report(100, 100, 100)), vec![0x9B, 0x96]);
        manager.set_rapid_target(None);
        assert_eq!(manager.corrections(&report(100, 25, 50)), vec![0x95]);
    }

    #[test]
    fn test_target_range_checked() {
        let mut manager = OverrideManager::new();
        assert!(manager.set_feed_target(Some(5)).is_err());
        assert!(manager.set_spindle_target(Some(201)).is_err());
        assert!(manager.set_feed_target(None).is_ok());
    }
}
