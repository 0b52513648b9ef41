//! Program pin adapter: implements [`PinPort`] over the board GPIOs.
//!
//! Every access is checked against [`pins::PROGRAM_PINS`]. A pin is put in
//! input/output mode on first use so its driven level can be read back.
//! On non-espidf targets the levels live in a map, which is what the
//! simulation and the tests observe.

use std::collections::HashMap;

use embedded_hal::digital::PinState;

use crate::app::ports::{PinError, PinPort};
use crate::pins;

pub struct BoardPins {
    /// Pins already configured, with the last level written.
    levels: HashMap<u8, PinState>,
}

impl Default for BoardPins {
    fn default() -> Self {
        Self::new()
    }
}

impl BoardPins {
    pub fn new() -> Self {
        Self {
            levels: HashMap::new(),
        }
    }

    fn check(pin: u8) -> Result<(), PinError> {
        if pins::program_pin_allowed(pin) {
            Ok(())
        } else {
            Err(PinError::NotAllowed(pin))
        }
    }

    /// Last level written to `pin`, if any.
    pub fn last_written(&self, pin: u8) -> Option<PinState> {
        self.levels.get(&pin).copied()
    }
}

impl PinPort for BoardPins {
    fn write(&mut self, pin: u8, level: PinState) -> Result<(), PinError> {
        Self::check(pin)?;
        if !self.levels.contains_key(&pin) {
            hw::configure(pin)?;
        }
        hw::set_level(pin, level)?;
        self.levels.insert(pin, level);
        Ok(())
    }

    fn read(&mut self, pin: u8) -> Result<PinState, PinError> {
        Self::check(pin)?;
        let written = match self.levels.get(&pin) {
            Some(level) => *level,
            None => {
                hw::configure(pin)?;
                self.levels.insert(pin, PinState::Low);
                PinState::Low
            }
        };
        Ok(hw::get_level(pin).unwrap_or(written))
    }
}

// ── Hardware access ───────────────────────────────────────────

#[cfg(target_os = "espidf")]
mod hw {
    use embedded_hal::digital::PinState;
    use esp_idf_svc::sys::*;

    use crate::app::ports::PinError;

    pub fn configure(pin: u8) -> Result<(), PinError> {
        // SAFETY: `pin` is on the allow-list, so it is a valid GPIO number
        // not owned by another driver.
        let rc = unsafe {
            gpio_reset_pin(pin as i32);
            gpio_set_direction(pin as i32, gpio_mode_t_GPIO_MODE_INPUT_OUTPUT)
        };
        if rc == ESP_OK as i32 {
            Ok(())
        } else {
            log::warn!("PINS: configure GPIO{} failed (rc={})", pin, rc);
            Err(PinError::Driver(pin))
        }
    }

    pub fn set_level(pin: u8, level: PinState) -> Result<(), PinError> {
        // SAFETY: pin configured as input/output by `configure`.
        let rc = unsafe { gpio_set_level(pin as i32, (level == PinState::High) as u32) };
        if rc == ESP_OK as i32 {
            Ok(())
        } else {
            Err(PinError::Driver(pin))
        }
    }

    pub fn get_level(pin: u8) -> Option<PinState> {
        // SAFETY: reading a configured GPIO input register.
        let raw = unsafe { gpio_get_level(pin as i32) };
        Some(PinState::from(raw != 0))
    }
}

#[cfg(not(target_os = "espidf"))]
mod hw {
    use embedded_hal::digital::PinState;

    use crate::app::ports::PinError;

    pub fn configure(pin: u8) -> Result<(), PinError> {
        log::debug!("PINS(sim): GPIO{} configured", pin);
        Ok(())
    }

    pub fn set_level(_pin: u8, _level: PinState) -> Result<(), PinError> {
        Ok(())
    }

    /// No hardware to sample; the caller falls back to the written level.
    pub fn get_level(_pin: u8) -> Option<PinState> {
        None
    }
}
