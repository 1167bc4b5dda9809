//! # cncstream
//!
//! Streams G-code programs to Grbl and Marlin controllers while keeping
//! the controller's receive buffer full but never overflowing it.
//!
//! ## Architecture
//!
//! 1. **cncstream-core** - positions, units and the error taxonomy
//! 2. **cncstream-communication** - links, the command ledger, dialects
//!    and the stream controller
//! 3. **cncstream-settings** - controller settings from TOML or JSON
//! 4. **cncstream** - logging setup and the command line streamer

pub use cncstream_communication::{
    dialect_for, run_session, CommandLedger, CommandOrigin, Dialect, DialectKind, HoldDecision,
    IoLink, Link, LoopbackLink, MachineStatus, SessionEnd, SessionRequest, StreamConfig,
    StreamController, StreamEvent,
};
pub use cncstream_core::{Error, Result};
pub use cncstream_settings::StreamSettings;

/// Initialize logging
///
/// `RUST_LOG` selects what is logged, `info` when unset. `json` switches
/// to one JSON object per line for log collectors.
pub fn init_logging(json: bool) -> anyhow::Result<()> {
    use tracing_subscriber::fmt;
    use tracing_subscriber::prelude::*;
    use tracing_subscriber::EnvFilter;

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    if json {
        let fmt_layer = fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(true)
            .with_level(true)
            .json();

        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt_layer)
            .try_init()?;
    } else {
        let fmt_layer = fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(true)
            .with_level(true)
            .with_thread_names(true)
            .with_line_number(true);

        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt_layer)
            .try_init()?;
    }

    Ok(())
}
