//! CodeLoader firmware library.
//!
//! Exposes the session engine, the execution supervisor and the adapters
//! for integration testing and simulation. All ESP-IDF-specific code is
//! guarded by `#[cfg(target_os = "espidf")]` within each module.

#![deny(unused_must_use)]

pub mod adapters;
pub mod app;
pub mod config;
pub mod diagnostics;
pub mod drivers;
pub mod error;
pub mod events;
pub mod pins;
pub mod rpc;
