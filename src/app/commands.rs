//! Inbound commands from the controlling peer.
//!
//! The codec turns a command envelope (JSON on both links, or a plain-text
//! line on the serial link) into one of these. The router matches on it
//! exhaustively; there is no string lookup after decoding.

/// Every command a peer can issue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Execute program text, or a stored program by name. `code` wins
    /// when both are present.
    Run {
        code: Option<String>,
        filename: Option<String>,
    },

    /// Persist program text under `filename`.
    Save {
        code: Option<String>,
        filename: Option<String>,
    },

    /// Enumerate stored entries with their sizes.
    List,

    /// Remove a stored entry.
    Delete { filename: Option<String> },

    /// Acknowledge, then restart the device.
    Reboot,

    /// Report platform, version, heap, storage and transport.
    Info,

    /// Begin a chunked upload that ends up in storage.
    StartUpload {
        filename: Option<String>,
        size: usize,
    },

    /// Begin a chunked upload that is executed once complete.
    StartRun { size: usize },

    /// Request cooperative cancellation of the active run.
    Stop,

    /// A well-formed envelope whose discriminator is not recognised.
    Unknown(String),
}

impl Command {
    /// Wire discriminator, for logging.
    pub fn name(&self) -> &str {
        match self {
            Self::Run { .. } => "run",
            Self::Save { .. } => "save",
            Self::List => "list",
            Self::Delete { .. } => "delete",
            Self::Reboot => "reboot",
            Self::Info => "info",
            Self::StartUpload { .. } => "start_upload",
            Self::StartRun { .. } => "start_run",
            Self::Stop => "stop",
            Self::Unknown(name) => name,
        }
    }
}
