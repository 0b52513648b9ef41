//! ISR-debounced user button.
//!
//! ## Hardware
//!
//! Active-low momentary switch on [`pins::BUTTON_GPIO`] with the internal
//! pull-up. The GPIO fires on the falling edge; the ISR records the raw
//! timestamp into an atomic, and [`ButtonDriver::tick`] (called from the
//! main loop) turns new edges into at most one press per
//! [`DEBOUNCE_MS`] window.

use core::sync::atomic::{AtomicU32, Ordering};

#[cfg(target_os = "espidf")]
use crate::pins;

/// Edges closer together than this are contact bounce.
pub const DEBOUNCE_MS: u32 = 200;

/// Raw ISR timestamp (milliseconds since boot, truncated to u32, 0 = never).
/// Written by the ISR, read by the main loop.
static BUTTON_ISR_TIMESTAMP: AtomicU32 = AtomicU32::new(0);

pub struct ButtonDriver {
    edges: &'static AtomicU32,
    last_edge_ms: u32,
    last_press_ms: Option<u32>,
}

impl Default for ButtonDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl ButtonDriver {
    pub fn new() -> Self {
        Self::with_source(&BUTTON_ISR_TIMESTAMP)
    }

    /// Read edges from `edges` instead of the board ISR slot.
    pub fn with_source(edges: &'static AtomicU32) -> Self {
        Self {
            edges,
            last_edge_ms: 0,
            last_press_ms: None,
        }
    }

    /// Returns `true` once per debounced press.
    pub fn tick(&mut self) -> bool {
        let edge = self.edges.load(Ordering::Acquire);
        if edge == 0 || edge == self.last_edge_ms {
            return false;
        }
        self.last_edge_ms = edge;

        match self.last_press_ms {
            Some(prev) if edge.wrapping_sub(prev) < DEBOUNCE_MS => false,
            _ => {
                self.last_press_ms = Some(edge);
                true
            }
        }
    }
}

/// ISR handler: record a falling edge at `now_ms`.
/// Safe to call from interrupt context (lock-free atomic store).
pub fn button_isr_handler(now_ms: u32) {
    BUTTON_ISR_TIMESTAMP.store(now_ms.max(1), Ordering::Release);
}

/// Configure the button pin and attach the falling-edge ISR.
#[cfg(target_os = "espidf")]
pub fn install() -> Result<(), i32> {
    use esp_idf_svc::sys::*;

    unsafe extern "C" fn on_edge(_arg: *mut core::ffi::c_void) {
        // SAFETY: esp_timer_get_time is ISR-safe.
        let now_us = unsafe { esp_timer_get_time() };
        button_isr_handler((now_us / 1000) as u32);
    }

    let gpio = pins::BUTTON_GPIO as i32;
    let cfg = gpio_config_t {
        pin_bit_mask: 1u64 << gpio,
        mode: gpio_mode_t_GPIO_MODE_INPUT,
        pull_up_en: gpio_pullup_t_GPIO_PULLUP_ENABLE,
        pull_down_en: gpio_pulldown_t_GPIO_PULLDOWN_DISABLE,
        intr_type: gpio_int_type_t_GPIO_INTR_NEGEDGE,
        ..Default::default()
    };
    // SAFETY: called once from main() before the loop starts.
    unsafe {
        let rc = gpio_config(&cfg);
        if rc != ESP_OK as i32 {
            return Err(rc);
        }
        let rc = gpio_install_isr_service(0);
        // Already installed by another driver is fine.
        if rc != ESP_OK as i32 && rc != ESP_ERR_INVALID_STATE as i32 {
            return Err(rc);
        }
        let rc = gpio_isr_handler_add(gpio, Some(on_edge), core::ptr::null_mut());
        if rc != ESP_OK as i32 {
            return Err(rc);
        }
    }
    log::info!("BUTTON: GPIO{} armed (falling edge)", gpio);
    Ok(())
}
