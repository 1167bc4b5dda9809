//! # cncstream core
//!
//! Core types shared by the cncstream crates: the error taxonomy,
//! unit handling and the small data models passed between the engine
//! and its collaborators.

pub mod data;
pub mod error;
pub mod units;

pub use data::{CoordinateReadout, Position, StatusAppearance};
pub use error::{ConnectionError, ControllerError, Error, FirmwareError, Result};
pub use units::{MeasurementSystem, MM_PER_INCH};
