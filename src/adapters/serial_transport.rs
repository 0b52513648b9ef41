//! USB serial transport: everything is newline-terminated text.
//!
//! Inbound lines go through [`SerialLineDecoder`]; outbound envelopes are
//! written as `USB_RESP:{json}\n` so a terminal can tell them apart from
//! ordinary log output on the same console.
//!
//! ## cfg gating
//!
//! - **`target_os = "espidf"`**: [`UartConsole`] drives UART0 (the USB
//!   bridge / console) with non-blocking reads.
//! - **all targets**: [`LoopbackSerial`] is an in-memory port for
//!   simulation and tests.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use log::warn;

use crate::config::DeviceConfig;
use crate::rpc::frame::{Frame, SerialLineDecoder};
use crate::rpc::transport::{LinkEvent, Transport, TransportKind};

/// Byte-level serial port.
pub trait SerialPort {
    type Error: core::fmt::Debug;

    /// Read whatever is available into `buf` without blocking.
    fn read_nonblocking(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error>;

    fn write_all(&mut self, bytes: &[u8]) -> Result<(), Self::Error>;
}

// ── Transport ────────────────────────────────────────────────

/// Line-oriented transport over any [`SerialPort`]. The wired link has no
/// connect handshake, so it reports itself permanently connected.
pub struct SerialTransport<P: SerialPort> {
    port: P,
    decoder: SerialLineDecoder,
    tag: heapless::String<16>,
    read_buf: Vec<u8>,
}

impl<P: SerialPort> SerialTransport<P> {
    pub fn new(port: P, cfg: &DeviceConfig) -> Self {
        Self {
            port,
            decoder: SerialLineDecoder::from_config(cfg),
            tag: cfg.serial_response_tag.clone(),
            read_buf: vec![0; cfg.serial_max_chars_per_poll.max(1)],
        }
    }

    pub fn port(&self) -> &P {
        &self.port
    }
}

impl<P: SerialPort> Transport for SerialTransport<P> {
    type Error = P::Error;

    fn kind(&self) -> TransportKind {
        TransportKind::Usb
    }

    fn poll_link(&mut self) -> Option<LinkEvent> {
        None
    }

    /// One read of at most `serial_max_chars_per_poll` characters.
    fn receive(&mut self, now_ms: u64) {
        let n = match self.port.read_nonblocking(&mut self.read_buf) {
            Ok(n) => n,
            Err(e) => {
                warn!("SERIAL: read failed: {:?}", e);
                0
            }
        };
        self.decoder.feed(&self.read_buf[..n], now_ms);
    }

    fn poll_frame(&mut self) -> Option<Frame> {
        self.decoder.next_frame()
    }

    fn send(&mut self, envelope: &[u8]) -> Result<(), P::Error> {
        let mut line = Vec::with_capacity(self.tag.len() + envelope.len() + 1);
        line.extend_from_slice(self.tag.as_bytes());
        line.extend_from_slice(envelope);
        line.push(b'\n');
        self.port.write_all(&line)
    }

    fn is_connected(&self) -> bool {
        true
    }
}

// ── In-memory port ───────────────────────────────────────────

#[derive(Default)]
struct LoopbackInner {
    input: VecDeque<u8>,
    output: Vec<u8>,
}

/// In-memory serial port. Clones share the same buffers, so one handle
/// can feed input while the transport owns another.
#[derive(Clone, Default)]
pub struct LoopbackSerial {
    inner: Arc<Mutex<LoopbackInner>>,
}

impl LoopbackSerial {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue bytes as if typed by the peer.
    pub fn push_input(&self, bytes: &[u8]) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.input.extend(bytes.iter().copied());
        }
    }

    /// Drain everything written so far, split into lines.
    pub fn take_lines(&self) -> Vec<String> {
        let Ok(mut inner) = self.inner.lock() else {
            return Vec::new();
        };
        let out = core::mem::take(&mut inner.output);
        String::from_utf8_lossy(&out)
            .lines()
            .map(str::to_owned)
            .collect()
    }
}

/// The shared buffers were poisoned by a panicking holder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoopbackPoisoned;

impl SerialPort for LoopbackSerial {
    type Error = LoopbackPoisoned;

    fn read_nonblocking(&mut self, buf: &mut [u8]) -> Result<usize, LoopbackPoisoned> {
        let mut inner = self.inner.lock().map_err(|_| LoopbackPoisoned)?;
        let n = buf.len().min(inner.input.len());
        for (slot, byte) in buf.iter_mut().zip(inner.input.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }

    fn write_all(&mut self, bytes: &[u8]) -> Result<(), LoopbackPoisoned> {
        let mut inner = self.inner.lock().map_err(|_| LoopbackPoisoned)?;
        inner.output.extend_from_slice(bytes);
        Ok(())
    }
}

// ── UART console (device) ────────────────────────────────────

#[cfg(target_os = "espidf")]
pub use uart::UartConsole;

#[cfg(target_os = "espidf")]
mod uart {
    use esp_idf_hal::delay::NON_BLOCK;
    use esp_idf_hal::gpio::AnyIOPin;
    use esp_idf_hal::uart::{UartDriver, config::Config};
    use esp_idf_hal::units::Hertz;
    use esp_idf_svc::sys::EspError;

    use super::SerialPort;

    /// UART0 console bridged to USB on the dev board.
    pub struct UartConsole {
        driver: UartDriver<'static>,
    }

    impl UartConsole {
        pub fn new(
            uart: esp_idf_hal::uart::UART0,
            tx: esp_idf_hal::gpio::Gpio1,
            rx: esp_idf_hal::gpio::Gpio3,
        ) -> Result<Self, EspError> {
            let config = Config::new().baudrate(Hertz(115_200));
            let driver = UartDriver::new(
                uart,
                tx,
                rx,
                Option::<AnyIOPin>::None,
                Option::<AnyIOPin>::None,
                &config,
            )?;
            Ok(Self { driver })
        }
    }

    impl SerialPort for UartConsole {
        type Error = EspError;

        fn read_nonblocking(&mut self, buf: &mut [u8]) -> Result<usize, EspError> {
            self.driver.read(buf, NON_BLOCK)
        }

        fn write_all(&mut self, mut bytes: &[u8]) -> Result<(), EspError> {
            while !bytes.is_empty() {
                let n = self.driver.write(bytes)?;
                bytes = &bytes[n..];
            }
            Ok(())
        }
    }
}

// ── Tests ────────────────────────────────────────────────────
