//! Error handling for JogKit
//!
//! Provides error types for the link and pacing layers:
//! - Link errors (serial port, framing, encoding)
//! - Pacer errors (jog loop state machine)
//!
//! All error types use `thiserror` for ergonomic error handling.
//! Soft conditions (per-attempt read timeouts, cancellation during shutdown,
//! sends against a closed link) are absorbed close to where they occur and
//! are not normally seen through these types by callers.

use thiserror::Error;

/// Link error type
///
/// Represents errors on the serial link to the motor driver board,
/// covering the open contract, line framing, and the write path.
#[derive(Error, Debug, Clone)]
pub enum LinkError {
    /// Failed to open the device
    #[error("Failed to open port {port}: {reason}")]
    OpenFailed {
        /// The name of the port that failed to open.
        port: String,
        /// The reason the port failed to open.
        reason: String,
    },

    /// Operation attempted with no open link
    #[error("Link not connected")]
    NotConnected,

    /// Connect attempted while a session is already open
    #[error("Link already connected")]
    AlreadyConnected,

    /// Write to the port failed
    #[error("Write failed: {reason}")]
    WriteFailed {
        /// The reason the write failed.
        reason: String,
    },

    /// Outbound payload contains bytes the wire format cannot carry
    #[error("Command contains non-ASCII data: {command:?}")]
    NonAsciiData {
        /// The offending command text.
        command: String,
    },

    /// Incoming bytes exceeded the maximum line length with no terminator
    #[error("Line exceeded {max_len} bytes without a terminator")]
    FrameTooLong {
        /// The maximum accepted line length in bytes.
        max_len: usize,
    },

    /// Operation was cancelled by a shutdown request
    #[error("Operation cancelled")]
    Cancelled,

    /// Operation exceeded its caller-supplied deadline
    #[error("Operation timed out after {timeout_ms}ms")]
    Timeout {
        /// The deadline in milliseconds.
        timeout_ms: u64,
    },
}

/// Pacer error type
///
/// Represents jog-pacer state machine violations.
#[derive(Error, Debug, Clone)]
pub enum PacerError {
    /// Start requested while the pacer loop is already running
    #[error("Pacer already running")]
    AlreadyRunning,

    /// Start requested with no open link
    #[error("Pacer requires an open link")]
    NotConnected,
}

/// Main error type for JogKit
///
/// A unified error type that can represent any error from all layers.
/// This is the primary error type used in public APIs.
#[derive(Error, Debug)]
pub enum Error {
    /// Link error
    #[error(transparent)]
    Link(#[from] LinkError),

    /// Pacer error
    #[error(transparent)]
    Pacer(#[from] PacerError),

    /// Standard I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Create an error from a string message
    pub fn other(msg: impl Into<String>) -> Self {
        Error::Other(msg.into())
    }

    /// Check if this is a deadline-expiry error
    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::Link(LinkError::Timeout { .. }))
    }

    /// Check if this is a cooperative-cancellation error
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Link(LinkError::Cancelled))
    }

    /// Check if this is a not-connected error
    pub fn is_not_connected(&self) -> bool {
        matches!(
            self,
            Error::Link(LinkError::NotConnected) | Error::Pacer(PacerError::NotConnected)
        )
    }
}

/// Result type using Error
pub type Result<T> = std::result::Result<T, Error>;
