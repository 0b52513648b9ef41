//! Device configuration parameters
//!
//! All tunable parameters for the CodeLoader firmware.
//! Defaults can be overridden by a `config.json` file in storage at boot.

use serde::{Deserialize, Serialize};

/// Name of the optional override file in the flat storage namespace.
pub const CONFIG_FILE: &str = "config.json";

/// Core device configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    // --- Identity ---
    /// Advertised BLE name (also printed in the boot banner)
    pub device_name: heapless::String<24>,

    // --- Transports ---
    /// Bring up the BLE transport at boot
    pub ble_enabled: bool,
    /// Bring up the USB serial transport at boot
    pub usb_enabled: bool,

    // --- Serial link ---
    /// Prefix that marks a response line apart from ordinary log text
    pub serial_response_tag: heapless::String<16>,
    /// A partially received line is discarded after this much silence (ms)
    pub serial_idle_timeout_ms: u32,
    /// Characters consumed from the serial input per poll
    pub serial_max_chars_per_poll: usize,
    /// Longest accepted line; longer input is dropped
    pub serial_max_line_len: usize,

    // --- BLE link ---
    /// Command characteristic buffer (bytes)
    pub ble_command_buffer: usize,
    /// Chunk characteristic buffer (bytes)
    pub ble_chunk_buffer: usize,

    // --- Transfers & execution ---
    /// Hard cap on a single transfer's accumulated bytes
    pub max_transfer_bytes: usize,
    /// Files with this prefix are removed after being run
    pub ephemeral_prefix: heapless::String<16>,
    /// Extensions reported by `list`
    pub listed_extensions: heapless::Vec<heapless::String<8>, 4>,
    /// Program worker stack size (KiB)
    pub worker_stack_kb: usize,

    // --- Timing ---
    /// Main loop period (milliseconds)
    pub loop_interval_ms: u32,
    /// Pause between a disconnect and restarting advertising (milliseconds)
    pub readvertise_delay_ms: u32,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        let mut listed_extensions = heapless::Vec::new();
        for ext in [".py", ".txt", ".lua"] {
            let _ = listed_extensions.push(short_str(ext));
        }

        Self {
            // Identity
            device_name: short_str("ESP32-CodeLoader"),

            // Transports
            ble_enabled: true,
            usb_enabled: true,

            // Serial link
            serial_response_tag: short_str("USB_RESP:"),
            serial_idle_timeout_ms: 500,
            serial_max_chars_per_poll: 100,
            serial_max_line_len: 8192,

            // BLE link
            ble_command_buffer: 512,
            ble_chunk_buffer: 1024,

            // Transfers & execution
            max_transfer_bytes: 64 * 1024,
            ephemeral_prefix: short_str("_temp_"),
            listed_extensions,
            worker_stack_kb: 16,

            // Timing
            loop_interval_ms: 50,          // 20 Hz
            readvertise_delay_ms: 100,
        }
    }
}

impl DeviceConfig {
    /// Range-check every field. Returns the name of the first bad field.
    pub fn validate(&self) -> Result<(), &'static str> {
        if self.device_name.is_empty() {
            return Err("device_name must not be empty");
        }
        if !self.ble_enabled && !self.usb_enabled {
            return Err("at least one transport must be enabled");
        }
        if self.serial_response_tag.is_empty() {
            return Err("serial_response_tag must not be empty");
        }
        if self.serial_idle_timeout_ms == 0 {
            return Err("serial_idle_timeout_ms must be > 0");
        }
        if self.serial_max_chars_per_poll == 0 {
            return Err("serial_max_chars_per_poll must be > 0");
        }
        if self.serial_max_line_len < 64 {
            return Err("serial_max_line_len must be >= 64");
        }
        if self.ble_command_buffer < 20 || self.ble_chunk_buffer < 20 {
            return Err("BLE buffers must hold at least one ATT payload");
        }
        if self.max_transfer_bytes == 0 {
            return Err("max_transfer_bytes must be > 0");
        }
        if self.worker_stack_kb < 8 {
            return Err("worker_stack_kb must be >= 8");
        }
        if self.loop_interval_ms == 0 || self.loop_interval_ms > 1000 {
            return Err("loop_interval_ms must be in 1..=1000");
        }
        Ok(())
    }

    /// Parse an override file. Missing fields keep their defaults.
    pub fn from_json(bytes: &[u8]) -> Result<Self, &'static str> {
        let cfg: Self = serde_json::from_slice(bytes).map_err(|_| "config is not valid JSON")?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Whether `name` carries one of the extensions `list` reports.
    pub fn is_listed(&self, name: &str) -> bool {
        self.listed_extensions
            .iter()
            .any(|ext| name.ends_with(ext.as_str()))
    }

    /// Whether `name` marks a staging file that is deleted after its run.
    pub fn is_ephemeral(&self, name: &str) -> bool {
        name.starts_with(self.ephemeral_prefix.as_str())
    }
}

/// Fixed-capacity copy of a compile-time literal (truncates silently).
fn short_str<const N: usize>(s: &str) -> heapless::String<N> {
    let mut out = heapless::String::new();
    for c in s.chars() {
        if out.push(c).is_err() {
            break;
        }
    }
    out
}
