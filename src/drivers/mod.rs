//! Board drivers: worker thread spawning, status LED, user button.

pub mod button;
pub mod status_led;
pub mod task_pin;
