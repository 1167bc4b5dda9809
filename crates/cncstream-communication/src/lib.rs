//! # cncstream communication
//!
//! Streams G-code to Grbl and Marlin controllers over a line-oriented
//! link. Flow control counts the bytes of every unacknowledged command
//! against the controller's receive buffer so it never overflows.
//!
//! - [`communication`]: the [`Link`] abstraction and the command ledger
//! - [`firmware`]: dialect engines for each firmware family
//! - [`stream`]: the [`StreamController`] and its async session driver

pub mod communication;
pub mod firmware;
pub mod stream;

pub use communication::{
    AutoReply, CommandLedger, CommandOrigin, IoLink, Link, LoopbackHandle, LoopbackLink,
    PendingCommand, DEFAULT_BUFFER_CAPACITY,
};
pub use firmware::{dialect_for, Dialect, DialectKind, MachineStatus};
pub use stream::{
    run_session, HoldDecision, JobProgress, RestoreMode, SessionEnd, SessionRequest,
    StreamConfig, StreamController, StreamEvent,
};
