//! Error handling for cncstream
//!
//! Error types for every layer of the streaming engine:
//! - Controller errors (flow control and response correlation)
//! - Connection errors (the byte-stream link)
//! - Firmware errors (what the controller itself reported)
//!
//! All error types use `thiserror` for ergonomic error handling.

use thiserror::Error;

/// Controller error type
///
/// Raised by the command ledger and stream controller when the local
/// bookkeeping cannot honour a request.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ControllerError {
    /// A terminator line arrived while no command was outstanding
    #[error("Protocol violation: terminator '{line}' with no command in flight")]
    ProtocolViolation {
        /// The line that could not be correlated.
        line: String,
    },

    /// A single command is larger than the whole receive budget
    #[error("Buffer overflow: {message}")]
    BufferOverflow {
        /// A message describing the buffer overflow.
        message: String,
    },

    /// A command was refused because the controller has not finished resetting
    #[error("Command refused while reset is pending: {command}")]
    ResetPending {
        /// The refused command.
        command: String,
    },

    /// No job is loaded for an operation that needs one
    #[error("No job loaded")]
    NoJob,

    /// Generic controller error
    #[error("Controller error: {message}")]
    Other {
        /// The error message.
        message: String,
    },
}

/// Connection error type
///
/// Surfaced to whoever owns the link; the engine itself never reopens it.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConnectionError {
    /// The link is closed
    #[error("Link is not open")]
    NotOpen,

    /// Writing to the link failed
    #[error("Write failed: {reason}")]
    WriteFailed {
        /// The reason the write failed.
        reason: String,
    },

    /// Reading from the link failed
    #[error("Read failed: {reason}")]
    ReadFailed {
        /// The reason the read failed.
        reason: String,
    },

    /// Connection lost
    #[error("Connection lost: {reason}")]
    ConnectionLost {
        /// The reason the connection was lost.
        reason: String,
    },

    /// Failed to open the underlying port or socket
    #[error("Failed to open {target}: {reason}")]
    FailedToOpen {
        /// Port name or socket address.
        target: String,
        /// The reason the open failed.
        reason: String,
    },
}

/// Firmware error type
///
/// Conditions reported by the controller firmware itself.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FirmwareError {
    /// The controller answered a program line with an error
    #[error("Line {line}: {command} < {response}")]
    Reported {
        /// One-based program line number.
        line: usize,
        /// The command text as sent.
        command: String,
        /// The accumulated response.
        response: String,
    },

    /// The controller rebooted without being asked to
    #[error("Unexpected controller reset: {banner}")]
    UnexpectedReset {
        /// The boot banner that was seen.
        banner: String,
    },

    /// Unknown firmware dialect
    #[error("Unknown firmware dialect: {name}")]
    UnknownDialect {
        /// The dialect name that was requested.
        name: String,
    },
}

/// Main error type for cncstream
///
/// A unified error type that can represent any error from all layers.
/// This is the primary error type used in public APIs.
#[derive(Error, Debug)]
pub enum Error {
    /// Controller error
    #[error(transparent)]
    Controller(#[from] ControllerError),

    /// Connection error
    #[error(transparent)]
    Connection(#[from] ConnectionError),

    /// Firmware error
    #[error(transparent)]
    Firmware(#[from] FirmwareError),

    /// Standard I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Check if this is a connection error
    pub fn is_connection_error(&self) -> bool {
        matches!(self, Error::Connection(_) | Error::Io(_))
    }

    /// Check if this is a controller error
    pub fn is_controller_error(&self) -> bool {
        matches!(self, Error::Controller(_))
    }

    /// Check if this is a firmware error
    pub fn is_firmware_error(&self) -> bool {
        matches!(self, Error::Firmware(_))
    }
}

/// Result type using Error
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_protocol_violation_display() {
        let err = ControllerError::ProtocolViolation {
            line: "ok".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Protocol violation: terminator 'ok' with no command in flight"
        );
    }

    #[test]
    fn test_from_conversions() {
        let err: Error = ConnectionError::NotOpen.into();
        assert!(err.is_connection_error());
        assert!(!err.is_firmware_error());

        let err: Error = FirmwareError::UnexpectedReset {
            banner: "Grbl 1.1h".to_string(),
        }
        .into();
        assert!(err.is_firmware_error());
        assert!(!err.is_connection_error());
    }

    #[test]
    fn test_reported_error_format() {
        let err = FirmwareError::Reported {
            line: 3,
            command: "G5".to_string(),
            response: "error:20".to_string(),
        };
        assert_eq!(err.to_string(), "Line 3: G5 < error:20");
    }

    #[test]
    fn test_io_error_is_connection_error() {
        let io = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "gone");
        let err: Error = io.into();
        assert!(err.is_connection_error());
    }
}
