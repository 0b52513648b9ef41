//! Per-transport frame decoding.
//!
//! Both links are reduced to the same [`Frame`] before the engine sees
//! them:
//!
//! ```text
//! BLE  rx write   ──▶ Frame::Command(bytes)
//! BLE  code write ──▶ Frame::Chunk(Raw)
//! USB  "{...}"    ──▶ Frame::Command(bytes)
//! USB  "DATA:xx"  ──▶ Frame::Chunk(Encoded)
//! USB  "END"      ──▶ Frame::End
//! USB  "list"     ──▶ Frame::Text(line)
//! ```
//!
//! The serial decoder accumulates characters across polls and yields
//! complete lines. A partial line is dropped after an idle timeout so a
//! half-typed command cannot glue itself onto the next one.

use std::collections::VecDeque;

use log::warn;

use super::codec::{ChunkPayload, DATA_MARKER, END_MARKER};
use crate::config::DeviceConfig;

/// Uniform frame handed to the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// A JSON command envelope.
    Command(Vec<u8>),
    /// A plain-text serial command line.
    Text(String),
    /// One transfer chunk.
    Chunk(ChunkPayload),
    /// Explicit end-of-transfer marker.
    End,
}

// ── BLE ───────────────────────────────────────────────────────

/// Which writable characteristic a BLE delivery landed on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BleChannel {
    /// Command characteristic (JSON envelopes).
    Command,
    /// Code characteristic (raw transfer chunks).
    Chunk,
}

/// Map one BLE characteristic write to a frame.
pub fn ble_frame(channel: BleChannel, bytes: &[u8]) -> Frame {
    match channel {
        BleChannel::Command => Frame::Command(bytes.to_vec()),
        BleChannel::Chunk => Frame::Chunk(ChunkPayload::Raw(bytes.to_vec())),
    }
}

// ── Serial ────────────────────────────────────────────────────

/// Classify one trimmed serial line. Empty lines yield nothing.
pub fn classify_line(line: &str) -> Option<Frame> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    if line == END_MARKER {
        return Some(Frame::End);
    }
    if let Some(encoded) = line.strip_prefix(DATA_MARKER) {
        return Some(Frame::Chunk(ChunkPayload::Encoded(encoded.into())));
    }
    if line.starts_with('{') {
        return Some(Frame::Command(line.as_bytes().to_vec()));
    }
    Some(Frame::Text(line.into()))
}

/// Streaming line decoder for the serial link.
pub struct SerialLineDecoder {
    line: Vec<u8>,
    last_rx_ms: u64,
    /// Current line exceeded `max_line_len`; skip to the next terminator.
    discarding: bool,
    idle_timeout_ms: u64,
    max_line_len: usize,
    ready: VecDeque<Frame>,
}

impl SerialLineDecoder {
    pub fn new(idle_timeout_ms: u32, max_line_len: usize) -> Self {
        Self {
            line: Vec::new(),
            last_rx_ms: 0,
            discarding: false,
            idle_timeout_ms: u64::from(idle_timeout_ms),
            max_line_len,
            ready: VecDeque::new(),
        }
    }

    pub fn from_config(cfg: &DeviceConfig) -> Self {
        Self::new(cfg.serial_idle_timeout_ms, cfg.serial_max_line_len)
    }

    /// Feed the bytes read in one poll (possibly none).
    ///
    /// A partial line older than the idle timeout is discarded before the
    /// new bytes are appended.
    pub fn feed(&mut self, bytes: &[u8], now_ms: u64) {
        self.expire(now_ms);
        if bytes.is_empty() {
            return;
        }

        self.last_rx_ms = now_ms;
        for &b in bytes {
            match b {
                b'\r' | b'\n' => self.finish_line(),
                _ if self.discarding => {}
                _ if self.line.len() >= self.max_line_len => {
                    warn!("SERIAL: line exceeds {} bytes, dropped", self.max_line_len);
                    self.line.clear();
                    self.discarding = true;
                }
                _ => self.line.push(b),
            }
        }
    }

    /// Next complete frame, oldest first.
    pub fn next_frame(&mut self) -> Option<Frame> {
        self.ready.pop_front()
    }

    /// Bytes of the line currently being assembled.
    pub fn pending_len(&self) -> usize {
        self.line.len()
    }

    /// Drop any partial line and undelivered frames.
    pub fn reset(&mut self) {
        self.line.clear();
        self.discarding = false;
        self.ready.clear();
    }

    fn expire(&mut self, now_ms: u64) {
        if (!self.line.is_empty() || self.discarding)
            && now_ms.saturating_sub(self.last_rx_ms) > self.idle_timeout_ms
        {
            self.line.clear();
            self.discarding = false;
        }
    }

    fn finish_line(&mut self) {
        if self.discarding {
            self.discarding = false;
            return;
        }
        if self.line.is_empty() {
            return;
        }
        let line = core::mem::take(&mut self.line);
        let frame = match core::str::from_utf8(&line) {
            Ok(text) => classify_line(text),
            // Not text: the command decoder rejects it with a decode error.
            Err(_) => Some(Frame::Command(line)),
        };
        if let Some(frame) = frame {
            self.ready.push_back(frame);
        }
    }
}
