//! GPIO assignments for the code-loader dev board.
//!
//! Single source of truth. Drivers and the program pin adapter reference
//! this module rather than hard-coding pin numbers.

// ---------------------------------------------------------------------------
// Indicators
// ---------------------------------------------------------------------------

/// Status LED: solid while a BLE peer is connected, blinking while
/// advertising. Also toggled by the user button.
pub const STATUS_LED_GPIO: u8 = 4;

/// Auxiliary LED, driven low at boot.
pub const AUX_LED_GPIO: u8 = 15;

// ---------------------------------------------------------------------------
// User input
// ---------------------------------------------------------------------------

/// Momentary push-button, active low with internal pull-up.
pub const BUTTON_GPIO: u8 = 26;

// ---------------------------------------------------------------------------
// Console UART (USB bridge)
// ---------------------------------------------------------------------------

pub const UART_TX_GPIO: u8 = 1;
pub const UART_RX_GPIO: u8 = 3;

// ---------------------------------------------------------------------------
// Pins reachable from programs
// ---------------------------------------------------------------------------

/// General-purpose pins a program may drive or sample. Excludes the
/// console UART, the button input and the flash bus (6..=11).
pub const PROGRAM_PINS: &[u8] = &[
    2, 4, 5, 12, 13, 14, 15, 16, 17, 18, 19, 21, 22, 23, 25, 27, 32, 33,
];

/// Whether `pin` is on the program allow-list.
pub fn program_pin_allowed(pin: u8) -> bool {
    PROGRAM_PINS.contains(&pin)
}
