//! Error taxonomy for the NodeMCU protocol engine.
//!
//! Every fallible operation of the engine resolves to one of the variants
//! below. `Transport` and `Timeout` are fatal to the current operation but
//! leave the session open for a retry or an orderly close. `Protocol` means
//! the device answered, but the echoed line did not match the command that
//! was sent. `DeviceNotDetected` can only be produced by the detection
//! handshake and is fatal to session construction.

use std::time::Duration;
use std::{fmt, io};

// =============================================================================
// Public Interface
// =============================================================================

/// Convenience alias used across the crate.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug)]
pub enum Error {
    /// The serial port write or an underlying I/O call failed.
    Transport {
        operation: &'static str,
        message: String,
    },
    /// No line (or byte) arrived within the per-read deadline.
    Timeout {
        operation: &'static str,
        timeout: Duration,
    },
    /// The device echoed something other than the command that was sent.
    Protocol {
        operation: &'static str,
        command: String,
        response: String,
    },
    /// The detection handshake did not find a NodeMCU on the other side.
    DeviceNotDetected { response: String },
    /// Local I/O failure (reading a source file, console access, ...).
    Io(io::Error),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Transport { operation, message } => {
                write!(f, "transport error in `{}`: {}", operation, message)
            }
            Error::Timeout { operation, timeout } => {
                write!(f, "`{}` timed out after {} ms", operation, timeout.as_millis())
            }
            Error::Protocol {
                operation,
                command,
                response,
            } => write!(
                f,
                "`{}`: device returned `{}`, which does not match command `{}`",
                operation,
                response.trim(),
                command
            ),
            Error::DeviceNotDetected { response } => {
                write!(f, "did not detect a NodeMCU, received data: {}", response)
            }
            Error::Io(e) => write!(f, "I/O error: {}", e),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        Error::Io(e)
    }
}

impl Error {
    /// `true` for errors that suggest the serial link itself is gone and the
    /// device needs to be re-plugged or re-selected.
    pub fn is_port_error(&self) -> bool {
        matches!(
            self,
            Error::Transport { .. } | Error::Timeout { .. }
        )
    }
}
