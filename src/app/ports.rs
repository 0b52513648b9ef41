//! Port traits: the hexagonal boundary between the session engine and the
//! outside world.
//!
//! ```text
//!   Adapter ──▶ Port trait ──▶ Engine / Supervisor (domain)
//! ```
//!
//! Driven adapters (flash filesystem, chip introspection, GPIO, the
//! embedded interpreter) implement these traits. The domain core only ever
//! sees the trait objects, so it runs unchanged on the host under test.

use std::sync::{Arc, Mutex};

use embedded_hal::digital::PinState;

use super::supervisor::ProgramEnv;

// ───────────────────────────────────────────────────────────────
// File store port (driven adapter: domain ↔ flash filesystem)
// ───────────────────────────────────────────────────────────────

/// One entry of a directory listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEntry {
    pub name: String,
    pub size: u64,
}

/// Capacity figures for the backing store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StorageUsage {
    pub free_bytes: u64,
    pub total_bytes: u64,
}

/// Flat-namespace file storage. Names are plain file names, never paths.
pub trait FileStore: Send {
    /// Read an entire entry.
    fn read(&self, name: &str) -> Result<Vec<u8>, StorageError>;

    /// Create or replace an entry with `data`.
    fn write(&mut self, name: &str, data: &[u8]) -> Result<(), StorageError>;

    /// Remove an entry.
    fn delete(&mut self, name: &str) -> Result<(), StorageError>;

    /// Check whether an entry exists without reading it.
    fn exists(&self, name: &str) -> bool;

    /// Every entry with its size, in no particular order.
    fn list(&self) -> Result<Vec<FileEntry>, StorageError>;

    /// Free and total bytes of the backing store.
    fn usage(&self) -> StorageUsage;
}

// ───────────────────────────────────────────────────────────────
// System port (driven adapter: domain → chip services)
// ───────────────────────────────────────────────────────────────

/// Chip identity, memory introspection and reset.
pub trait SystemPort: Send + Sync {
    fn platform(&self) -> &str;

    fn firmware_version(&self) -> &str;

    /// Free heap in bytes.
    fn heap_free(&self) -> u64;

    /// Allocated heap in bytes.
    fn heap_used(&self) -> u64;

    /// Restart the device. Does not return on hardware.
    fn reboot(&self);

    /// Milliseconds since boot.
    fn uptime_ms(&self) -> u64;
}

// ───────────────────────────────────────────────────────────────
// Pin port (driven adapter: programs → GPIO)
// ───────────────────────────────────────────────────────────────

/// Digital I/O exposed to running programs. Only pins on the board's
/// allow-list are reachable.
pub trait PinPort: Send {
    fn write(&mut self, pin: u8, level: PinState) -> Result<(), PinError>;

    fn read(&mut self, pin: u8) -> Result<PinState, PinError>;

    /// Invert the current level and return the new one.
    fn toggle(&mut self, pin: u8) -> Result<PinState, PinError> {
        let next = !self.read(pin)?;
        self.write(pin, next)?;
        Ok(next)
    }
}

// ───────────────────────────────────────────────────────────────
// Interpreter port (driven adapter: supervisor → program runtime)
// ───────────────────────────────────────────────────────────────

/// Runs program text against the capability set in `env`.
///
/// Each call gets a fresh, isolated context. Returns the fault description
/// if the program raised.
pub trait Interpreter: Send + Sync {
    fn run(&self, source: &str, env: ProgramEnv) -> Result<(), String>;
}

// ───────────────────────────────────────────────────────────────
// Shared handles
// ───────────────────────────────────────────────────────────────

/// Store shared by both sessions and the program worker.
pub type SharedStore = Arc<Mutex<dyn FileStore>>;

/// Pins shared by the main loop and the program worker.
pub type SharedPins = Arc<Mutex<dyn PinPort>>;

pub type SharedSystem = Arc<dyn SystemPort>;

// ───────────────────────────────────────────────────────────────
// Error types
// ───────────────────────────────────────────────────────────────

/// Errors from [`FileStore`] operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageError {
    /// Requested entry does not exist.
    NotFound,
    /// Storage partition is full.
    Full,
    /// Name is empty or contains a path separator.
    InvalidName,
    /// The shared store lock was poisoned by a panicking holder.
    Unavailable,
    /// I/O error from the backing filesystem.
    Io(String),
}

impl core::fmt::Display for StorageError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::NotFound => write!(f, "entry not found"),
            Self::Full => write!(f, "storage full"),
            Self::InvalidName => write!(f, "invalid file name"),
            Self::Unavailable => write!(f, "storage unavailable"),
            Self::Io(e) => write!(f, "I/O error: {}", e),
        }
    }
}

/// Errors from [`PinPort`] operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PinError {
    /// Pin is not on the board's allow-list.
    NotAllowed(u8),
    /// The pin driver rejected the operation.
    Driver(u8),
}

impl core::fmt::Display for PinError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::NotAllowed(pin) => write!(f, "pin {} is not available to programs", pin),
            Self::Driver(pin) => write!(f, "pin {} driver error", pin),
        }
    }
}

/// Run `f` against the shared store. A poisoned lock reports
/// [`StorageError::Unavailable`] rather than panicking.
pub fn with_store<R>(
    store: &SharedStore,
    f: impl FnOnce(&mut dyn FileStore) -> Result<R, StorageError>,
) -> Result<R, StorageError> {
    let mut guard = store.lock().map_err(|_| StorageError::Unavailable)?;
    f(&mut *guard)
}

/// Run `f` against the shared pins.
pub fn with_pins<R>(
    pins: &SharedPins,
    pin: u8,
    f: impl FnOnce(&mut dyn PinPort) -> Result<R, PinError>,
) -> Result<R, PinError> {
    let mut guard = pins.lock().map_err(|_| PinError::Driver(pin))?;
    f(&mut *guard)
}

/// Reject names that could escape the flat namespace.
pub fn validate_name(name: &str) -> Result<(), StorageError> {
    if name.is_empty() || name.contains('/') || name.contains('\\') || name == "." || name == ".." {
        return Err(StorageError::InvalidName);
    }
    Ok(())
}
