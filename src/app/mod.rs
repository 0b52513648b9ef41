//! Application core: domain types and the execution supervisor.
//!
//! Commands in, responses out, and the single background program run.
//! All interaction with storage, GPIO and the interpreter happens through
//! the **port traits** in [`ports`], keeping this layer testable without
//! real peripherals.

pub mod commands;
pub mod events;
pub mod ports;
pub mod supervisor;
