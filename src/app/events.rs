//! Outbound response envelopes.
//!
//! Responses are unsolicited as often as not: progress and program output
//! arrive without a matching request. The codec serialises them as
//! `{"status": ..., "message": ..., "data": ...}`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Response discriminator, upper-case on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Status {
    /// Welcome message after a link comes up.
    Connected,
    /// An upload-to-storage transfer is open.
    Ready,
    /// An upload-to-execute transfer is open.
    ReadyRun,
    /// A chunk was accepted.
    Progress,
    Success,
    Error,
    Info,
    /// One `print` call from the running program.
    Output,
}

/// A single response envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub status: Status,
    pub message: String,
    #[serde(default)]
    pub data: Option<Value>,
}

impl Response {
    pub fn new(status: Status, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            data: None,
        }
    }

    /// Attach a structured payload.
    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    pub fn info(message: impl Into<String>) -> Self {
        Self::new(Status::Info, message)
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::new(Status::Error, message)
    }

    pub fn output(message: impl Into<String>) -> Self {
        Self::new(Status::Output, message)
    }

    /// Look up an integer field of the payload (test and log helper).
    pub fn data_u64(&self, key: &str) -> Option<u64> {
        self.data.as_ref()?.get(key)?.as_u64()
    }

    /// Look up a numeric field of the payload as a float.
    pub fn data_f64(&self, key: &str) -> Option<f64> {
        self.data.as_ref()?.get(key)?.as_f64()
    }
}
