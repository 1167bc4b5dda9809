//! Grbl dialect
//!
//! Grbl answers every line with `ok` or `error:N`, reports status as a
//! single `<...>` line on demand, and takes realtime single-byte commands
//! (`?`, `!`, `~`, soft reset 0x18 and the override bytes) outside the line
//! buffer.

pub mod dialect;
pub mod error_decoder;
pub mod status;

pub use dialect::GrblDialect;
pub use error_decoder::{annotate_errors, decode_alarm, decode_error, parse_alarm};
pub use status::{GrblStatus, StatusParser};

/// Soft reset
pub const SOFT_RESET: u8 = 0x18;
/// Jog cancel
pub const JOG_CANCEL: u8 = 0x85;
/// Spindle stop toggle, honoured only while held
pub const SPINDLE_STOP_TOGGLE: u8 = 0x9E;
