//! Marlin dialect
//!
//! Targets Marlin builds extended for CNC use: the machine reports its
//! state as `S_XYZ:<n>` in answer to `S000`, and pause/resume are the
//! `P000`/`R000` tokens. Positions arrive as `X:.. Y:.. Z:..` lines and
//! bed probing results as `Bed X:.. Y:.. Z:..` lines.

pub mod dialect;
pub mod status;

pub use dialect::MarlinDialect;
pub use status::{MarlinStatus, MarlinStatusParser};
