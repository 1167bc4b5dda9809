//! cncstream settings crate
//!
//! Loads and validates the settings a stream controller runs with.

pub mod config;
pub mod error;

pub use config::{ConnectionSettings, StreamSettings};
pub use error::{SettingsError, SettingsResult};
