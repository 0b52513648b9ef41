//! Chip services adapter: identity, heap figures, uptime and reset.
//!
//! - **`target_os = "espidf"`**: [`EspSystem`] wraps the ESP-IDF heap
//!   allocator statistics, `esp_timer_get_time()` and `esp_restart()`.
//! - **all targets**: [`SimSystem`] reports fixed heap figures and an
//!   `Instant`-based uptime, and records reboot requests instead of
//!   restarting.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use log::warn;

use crate::app::ports::SystemPort;

const FIRMWARE_VERSION: &str = env!("CARGO_PKG_VERSION");

// ── Simulation ───────────────────────────────────────────────

/// Host stand-in for the chip.
pub struct SimSystem {
    start: Instant,
    heap_total: u64,
    heap_used: u64,
    reboot_requested: AtomicBool,
}

impl Default for SimSystem {
    fn default() -> Self {
        Self::new()
    }
}

impl SimSystem {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
            heap_total: 320 * 1024,
            heap_used: 48 * 1024,
            reboot_requested: AtomicBool::new(false),
        }
    }

    /// Whether [`SystemPort::reboot`] has been called.
    pub fn reboot_requested(&self) -> bool {
        self.reboot_requested.load(Ordering::Acquire)
    }
}

impl SystemPort for SimSystem {
    fn platform(&self) -> &str {
        "sim"
    }

    fn firmware_version(&self) -> &str {
        FIRMWARE_VERSION
    }

    fn heap_free(&self) -> u64 {
        self.heap_total - self.heap_used
    }

    fn heap_used(&self) -> u64 {
        self.heap_used
    }

    fn reboot(&self) {
        warn!("SYSTEM: reboot requested (simulated)");
        self.reboot_requested.store(true, Ordering::Release);
    }

    fn uptime_ms(&self) -> u64 {
        self.start.elapsed().as_millis() as u64
    }
}

// ── Device ───────────────────────────────────────────────────

#[cfg(target_os = "espidf")]
pub use esp::EspSystem;

#[cfg(target_os = "espidf")]
mod esp {
    use esp_idf_svc::sys;

    use super::FIRMWARE_VERSION;
    use crate::app::ports::SystemPort;

    /// Delay between the reboot acknowledgement and the reset, so the
    /// response can leave the radio.
    const REBOOT_DELAY_MS: u32 = 1000;

    pub struct EspSystem;

    impl SystemPort for EspSystem {
        fn platform(&self) -> &str {
            "esp32"
        }

        fn firmware_version(&self) -> &str {
            FIRMWARE_VERSION
        }

        fn heap_free(&self) -> u64 {
            // SAFETY: read-only allocator statistic.
            unsafe { sys::esp_get_free_heap_size() as u64 }
        }

        fn heap_used(&self) -> u64 {
            let mut info = sys::multi_heap_info_t::default();
            // SAFETY: `info` is a valid out-pointer for the call.
            unsafe { sys::heap_caps_get_info(&mut info, sys::MALLOC_CAP_DEFAULT) };
            info.total_allocated_bytes as u64
        }

        fn reboot(&self) {
            log::warn!("SYSTEM: restarting in {} ms", REBOOT_DELAY_MS);
            esp_idf_hal::delay::FreeRtos::delay_ms(REBOOT_DELAY_MS);
            // SAFETY: never returns; all state is discarded by the reset.
            unsafe { sys::esp_restart() };
        }

        fn uptime_ms(&self) -> u64 {
            // SAFETY: monotonic timer read.
            (unsafe { sys::esp_timer_get_time() }) as u64 / 1000
        }
    }
}
