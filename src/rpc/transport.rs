//! Transport abstraction: one peer, framed deliveries in, envelopes out.
//!
//! Concrete implementations:
//! - BLE GATT (command write + chunk write + notify)
//! - USB serial (newline-terminated text)
//!
//! The session is generic over `Transport`, so both links share one
//! command/transfer state machine and cannot drift apart.

use super::frame::Frame;

/// Which physical link a session runs on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    Ble,
    Usb,
}

impl TransportKind {
    /// Label used in logs and the `info` payload.
    pub fn label(self) -> &'static str {
        match self {
            Self::Ble => "BLE",
            Self::Usb => "USB",
        }
    }
}

/// Connection lifecycle edge reported by a transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkEvent {
    Connected,
    Disconnected,
}

/// Single-peer framed transport.
pub trait Transport {
    /// Error type for this transport.
    type Error: core::fmt::Debug;

    fn kind(&self) -> TransportKind;

    /// Next pending connect/disconnect edge, oldest first.
    fn poll_link(&mut self) -> Option<LinkEvent>;

    /// Pull at most one bounded read from the link. The session calls this
    /// once per pass, before draining frames.
    fn receive(&mut self, _now_ms: u64) {}

    /// Next complete frame already received, or `None` without blocking.
    fn poll_frame(&mut self) -> Option<Frame>;

    /// Send one encoded response envelope. The transport adds its own
    /// framing (notify, or tagged line).
    fn send(&mut self, envelope: &[u8]) -> Result<(), Self::Error>;

    /// Whether a peer is attached right now.
    fn is_connected(&self) -> bool;
}
