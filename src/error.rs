//! Unified error types for the CodeLoader firmware.
//!
//! A single `Error` enum that every session-engine subsystem converts into,
//! so the command router can turn any fault into one `ERROR` response
//! without caring where it came from. None of these are fatal: the session
//! loop reports them to the peer and keeps running.

use core::fmt;

use crate::app::ports::StorageError;

// ---------------------------------------------------------------------------
// Top-level firmware error
// ---------------------------------------------------------------------------

/// Every recoverable fault in the session engine funnels into this type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// A command or chunk could not be decoded.
    Decode(DecodeError),
    /// The command is not valid in the current session state.
    Protocol(ProtocolError),
    /// A referenced storage entry does not exist.
    NotFound(String),
    /// A storage operation failed. The first field names the operation.
    Storage(&'static str, StorageError),
    /// The program faulted while running.
    Execution(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Decode(e) => write!(f, "decode failed: {e}"),
            Self::Protocol(e) => write!(f, "{e}"),
            Self::NotFound(name) => write!(f, "file not found: {name}"),
            Self::Storage(op, e) => write!(f, "{op} failed: {e}"),
            Self::Execution(msg) => write!(f, "execution error: {msg}"),
        }
    }
}

// ---------------------------------------------------------------------------
// Decode errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// Payload bytes are not valid UTF-8.
    InvalidUtf8,
    /// Payload is not a well-formed JSON object.
    Json(String),
    /// The envelope has no string `type` field.
    MissingType,
    /// A chunk line carried bytes that are not valid base64.
    Base64(String),
    /// A known field has the wrong JSON type.
    InvalidField(&'static str),
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidUtf8 => write!(f, "payload is not valid UTF-8"),
            Self::Json(e) => write!(f, "malformed JSON: {e}"),
            Self::MissingType => write!(f, "missing command type"),
            Self::Base64(e) => write!(f, "bad chunk encoding: {e}"),
            Self::InvalidField(name) => write!(f, "field '{name}' has the wrong type"),
        }
    }
}

impl From<DecodeError> for Error {
    fn from(e: DecodeError) -> Self {
        Self::Decode(e)
    }
}

// ---------------------------------------------------------------------------
// Protocol state errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// A chunk arrived while no transfer was active.
    NotReceiving,
    /// A run (or run transfer) was requested while a program is running.
    AlreadyRunning,
    /// `start_run` was requested while another transfer is in flight.
    TransferInProgress,
    /// The command needs a `filename`.
    FilenameRequired,
    /// `run` needs either `code` or `filename`.
    CodeOrFilenameRequired,
    /// `save` needs both `code` and `filename`.
    CodeAndFilenameRequired,
    /// The accumulated transfer exceeded the configured cap.
    TransferTooLarge { limit: usize },
    /// The command discriminator is not one the router knows.
    UnknownCommand(String),
}

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotReceiving => write!(f, "not receiving: no transfer in progress"),
            Self::AlreadyRunning => write!(f, "code already running, send stop first"),
            Self::TransferInProgress => write!(f, "another transfer is in progress"),
            Self::FilenameRequired => write!(f, "filename required"),
            Self::CodeOrFilenameRequired => write!(f, "code or filename required"),
            Self::CodeAndFilenameRequired => write!(f, "code and filename required"),
            Self::TransferTooLarge { limit } => {
                write!(f, "transfer exceeds {limit} bytes, aborted")
            }
            Self::UnknownCommand(name) => write!(f, "unknown command: {name}"),
        }
    }
}

impl From<ProtocolError> for Error {
    fn from(e: ProtocolError) -> Self {
        Self::Protocol(e)
    }
}

// ---------------------------------------------------------------------------
// Convenience Result alias
// ---------------------------------------------------------------------------

/// Firmware-wide `Result` alias.
pub type Result<T> = core::result::Result<T, Error>;
