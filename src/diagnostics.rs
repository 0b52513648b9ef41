//! Runtime diagnostics.
//!
//! Heap and filesystem figures are collected on demand for the `info`
//! command. A panic hook logs the reason before the default handler
//! aborts, so a crashing worker leaves a trace on the serial console.

use serde::Serialize;

use crate::app::ports::{FileStore, SystemPort};
use crate::rpc::transport::TransportKind;

/// Point-in-time memory and storage snapshot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RuntimeMetrics {
    pub heap_free: u64,
    pub heap_used: u64,
    pub fs_free: u64,
    pub fs_total: u64,
}

impl RuntimeMetrics {
    pub fn collect(system: &dyn SystemPort, store: &dyn FileStore) -> Self {
        let usage = store.usage();
        Self {
            heap_free: system.heap_free(),
            heap_used: system.heap_used(),
            fs_free: usage.free_bytes,
            fs_total: usage.total_bytes,
        }
    }
}

/// Payload of the `info` response.
#[derive(Debug, Clone, Serialize)]
pub struct DeviceInfo {
    pub platform: String,
    pub version: String,
    pub memory_free: u64,
    pub memory_alloc: u64,
    pub fs_free: u64,
    pub fs_total: u64,
    pub connection: &'static str,
}

impl DeviceInfo {
    pub fn new(system: &dyn SystemPort, metrics: RuntimeMetrics, link: TransportKind) -> Self {
        Self {
            platform: system.platform().into(),
            version: system.firmware_version().into(),
            memory_free: metrics.heap_free,
            memory_alloc: metrics.heap_used,
            fs_free: metrics.fs_free,
            fs_total: metrics.fs_total,
            connection: link.label(),
        }
    }
}

// ───────────────────────────────────────────────────────────────
// Panic hook
// ───────────────────────────────────────────────────────────────

/// Install a panic hook that logs the reason through `log`.
///
/// Call once during init, after the logger is up.
pub fn install_panic_handler() {
    std::panic::set_hook(Box::new(|info| {
        let reason = if let Some(msg) = info.payload().downcast_ref::<&str>() {
            *msg
        } else if let Some(msg) = info.payload().downcast_ref::<String>() {
            msg.as_str()
        } else {
            "unknown panic"
        };
        let thread = std::thread::current();
        let location = info
            .location()
            .map(|l| format!("{}:{}", l.file(), l.line()))
            .unwrap_or_default();

        log::error!(
            "PANIC in '{}' at {}: {}",
            thread.name().unwrap_or("?"),
            location,
            reason
        );
    }));
}
