//! Envelope and chunk codec.
//!
//! Wire format (both links):
//! ```text
//! command  → {"type": "run", "code": "...", "filename": "...", "size": 123}
//! response ← {"status": "PROGRESS", "message": "...", "data": {...} | null}
//! ```
//!
//! Chunks travel as raw bytes on the BLE chunk characteristic. On the serial
//! link they are `DATA:<base64>` lines, and the encoder on the other side
//! is allowed to drop the trailing `=` padding.

use std::borrow::Cow;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use serde_json::{Map, Value};

use crate::app::commands::Command;
use crate::app::events::Response;
use crate::error::DecodeError;

/// Serial line prefix for a chunk payload.
pub const DATA_MARKER: &str = "DATA:";

/// Serial line that closes a transfer regardless of the declared size.
pub const END_MARKER: &str = "END";

/// Undecoded chunk payload as delivered by a transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChunkPayload {
    /// Binary bytes, taken verbatim.
    Raw(Vec<u8>),
    /// Text-safe encoding (base64, padding optional).
    Encoded(String),
}

// ── Commands ──────────────────────────────────────────────────

/// Decode a JSON command envelope.
pub fn decode_command(bytes: &[u8]) -> Result<Command, DecodeError> {
    let text = core::str::from_utf8(bytes).map_err(|_| DecodeError::InvalidUtf8)?;
    let value: Value =
        serde_json::from_str(text.trim()).map_err(|e| DecodeError::Json(e.to_string()))?;
    let Value::Object(obj) = value else {
        return Err(DecodeError::Json("envelope is not an object".into()));
    };

    let Some(Value::String(kind)) = obj.get("type") else {
        return Err(DecodeError::MissingType);
    };

    let code = opt_string(&obj, "code")?;
    let filename = opt_string(&obj, "filename")?;

    let cmd = match kind.as_str() {
        "run" => Command::Run { code, filename },
        "save" => Command::Save { code, filename },
        "list" => Command::List,
        "delete" => Command::Delete { filename },
        "reboot" => Command::Reboot,
        "info" => Command::Info,
        "start_upload" => Command::StartUpload {
            filename,
            size: size_field(&obj)?,
        },
        "start_run" => Command::StartRun {
            size: size_field(&obj)?,
        },
        "stop" => Command::Stop,
        other => Command::Unknown(other.into()),
    };
    Ok(cmd)
}

/// Parse a plain-text serial command such as `list` or `delete main.lua`.
///
/// The verb is case-insensitive. Anything unrecognised (including `delete`
/// without an argument) becomes [`Command::Unknown`] carrying the line.
pub fn parse_text_command(line: &str) -> Command {
    let line = line.trim();
    let (verb, arg) = match line.split_once(' ') {
        Some((verb, arg)) => (verb, Some(arg.trim()).filter(|a| !a.is_empty())),
        None => (line, None),
    };

    match (verb.to_ascii_lowercase().as_str(), arg) {
        ("list", _) => Command::List,
        ("info", _) => Command::Info,
        ("reboot", _) => Command::Reboot,
        ("stop", _) => Command::Stop,
        ("delete", Some(name)) => Command::Delete {
            filename: Some(name.into()),
        },
        _ => Command::Unknown(line.into()),
    }
}

/// Encode a command envelope (host tooling and tests).
pub fn encode_command(cmd: &Command) -> Vec<u8> {
    let mut obj = Map::new();
    obj.insert("type".into(), Value::String(cmd.name().into()));

    let mut put = |key: &str, v: &Option<String>| {
        if let Some(s) = v {
            obj.insert(key.into(), Value::String(s.clone()));
        }
    };

    let size = match cmd {
        Command::Run { code, filename } | Command::Save { code, filename } => {
            put("code", code);
            put("filename", filename);
            None
        }
        Command::Delete { filename } => {
            put("filename", filename);
            None
        }
        Command::StartUpload { filename, size } => {
            put("filename", filename);
            Some(*size)
        }
        Command::StartRun { size } => Some(*size),
        _ => None,
    };
    if let Some(size) = size {
        obj.insert("size".into(), Value::from(size as u64));
    }

    serde_json::to_vec(&Value::Object(obj)).unwrap_or_default()
}

// ── Responses ─────────────────────────────────────────────────

/// Encode a response envelope. `data` is always present, `null` if empty.
pub fn encode_response(response: &Response) -> Vec<u8> {
    serde_json::to_vec(response).unwrap_or_else(|_| {
        br#"{"status":"ERROR","message":"response encoding failed","data":null}"#.to_vec()
    })
}

/// Decode a response envelope (host tooling and tests).
pub fn decode_response(bytes: &[u8]) -> Result<Response, DecodeError> {
    serde_json::from_slice(bytes).map_err(|e| DecodeError::Json(e.to_string()))
}

// ── Chunks ────────────────────────────────────────────────────

/// Decode one chunk payload into its bytes.
pub fn decode_chunk(payload: ChunkPayload) -> Result<Vec<u8>, DecodeError> {
    match payload {
        ChunkPayload::Raw(bytes) => Ok(bytes),
        ChunkPayload::Encoded(text) => STANDARD
            .decode(restore_padding(text.trim()).as_bytes())
            .map_err(|e| DecodeError::Base64(e.to_string())),
    }
}

/// Append `=` until the length is a multiple of the base64 block size.
pub fn restore_padding(encoded: &str) -> Cow<'_, str> {
    match encoded.len() % 4 {
        0 => Cow::Borrowed(encoded),
        rem => {
            let mut padded = String::with_capacity(encoded.len() + 4 - rem);
            padded.push_str(encoded);
            padded.extend(core::iter::repeat_n('=', 4 - rem));
            Cow::Owned(padded)
        }
    }
}

/// Build the serial `DATA:` line for a chunk (host tooling and tests).
pub fn encode_chunk_line(bytes: &[u8]) -> String {
    let mut line = String::from(DATA_MARKER);
    STANDARD.encode_string(bytes, &mut line);
    line
}

// ── Internal ──────────────────────────────────────────────────

fn opt_string(obj: &Map<String, Value>, key: &'static str) -> Result<Option<String>, DecodeError> {
    match obj.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.clone())),
        Some(_) => Err(DecodeError::InvalidField(key)),
    }
}

/// Declared transfer size. Absent or `null` means 0.
fn size_field(obj: &Map<String, Value>) -> Result<usize, DecodeError> {
    match obj.get("size") {
        None | Some(Value::Null) => Ok(0),
        Some(v) => v
            .as_u64()
            .and_then(|n| usize::try_from(n).ok())
            .ok_or(DecodeError::InvalidField("size")),
    }
}
