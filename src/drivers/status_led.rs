//! Status LED driver.
//!
//! One discrete LED on [`pins::STATUS_LED_GPIO`], driven through the shared
//! [`PinPort`] so a running program and the main loop see the same level.
//!
//! | Link state   | Pattern                          |
//! |--------------|----------------------------------|
//! | connected    | solid on                         |
//! | advertising  | toggles every [`BLINK_PERIOD_MS`] |
//! | manual       | whatever the button last set     |
//!
//! The button switches the LED to manual mode; the next link change hands
//! it back to the link pattern.

use embedded_hal::digital::PinState;
use log::warn;

use crate::app::ports::{SharedPins, with_pins};
use crate::pins;

/// Blink half-period while advertising.
pub const BLINK_PERIOD_MS: u64 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LedMode {
    Solid,
    Blinking,
    Manual,
}

pub struct StatusLed {
    pins: SharedPins,
    mode: LedMode,
    level: PinState,
    last_flip_ms: u64,
}

impl StatusLed {
    /// Starts blinking: nobody is connected at boot.
    pub fn new(pins: SharedPins) -> Self {
        Self {
            pins,
            mode: LedMode::Blinking,
            level: PinState::Low,
            last_flip_ms: 0,
        }
    }

    pub fn mode(&self) -> LedMode {
        self.mode
    }

    pub fn is_on(&self) -> bool {
        self.level == PinState::High
    }

    /// Solid on.
    pub fn connected(&mut self) {
        self.mode = LedMode::Solid;
        self.drive(PinState::High);
    }

    /// Blink until the next connection.
    pub fn advertising(&mut self, now_ms: u64) {
        self.mode = LedMode::Blinking;
        self.last_flip_ms = now_ms;
    }

    /// Invert the LED under user control and return the new state.
    pub fn toggle_manual(&mut self) -> bool {
        self.mode = LedMode::Manual;
        self.drive(!self.level);
        self.is_on()
    }

    /// Advance the blink pattern. Call every main-loop iteration.
    pub fn tick(&mut self, now_ms: u64) {
        if self.mode != LedMode::Blinking {
            return;
        }
        if now_ms.saturating_sub(self.last_flip_ms) >= BLINK_PERIOD_MS {
            self.last_flip_ms = now_ms;
            self.drive(!self.level);
        }
    }

    fn drive(&mut self, level: PinState) {
        let pin = pins::STATUS_LED_GPIO;
        match with_pins(&self.pins, pin, |p| p.write(pin, level)) {
            Ok(()) => self.level = level,
            Err(e) => warn!("LED: {}", e),
        }
    }
}
