//! File store adapters.
//!
//! Implements [`FileStore`] two ways:
//!
//! - [`FsStore`]: plain files under one directory. On the device that
//!   directory is a SPIFFS partition mounted through the ESP-IDF VFS; on
//!   the host it is any directory (tests use a temp dir).
//! - [`MemStore`]: a capacity-limited in-memory map for simulation.

use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};

#[cfg(target_os = "espidf")]
use log::info;

use crate::app::ports::{FileEntry, FileStore, StorageError, StorageUsage, validate_name};

fn io_err(e: io::Error) -> StorageError {
    match e.kind() {
        io::ErrorKind::NotFound => StorageError::NotFound,
        _ => StorageError::Io(e.to_string()),
    }
}

// ───────────────────────────────────────────────────────────────
// Filesystem-backed store
// ───────────────────────────────────────────────────────────────

/// Flat directory of files with a fixed capacity budget.
pub struct FsStore {
    root: PathBuf,
    capacity: u64,
}

impl FsStore {
    /// Use `root` (created if missing) with `capacity` bytes of budget.
    pub fn open(root: impl Into<PathBuf>, capacity: u64) -> Result<Self, StorageError> {
        let root = root.into();
        std::fs::create_dir_all(&root).map_err(io_err)?;
        Ok(Self { root, capacity })
    }

    /// Register the `storage` SPIFFS partition at `/storage` and open it.
    #[cfg(target_os = "espidf")]
    pub fn mount_spiffs() -> Result<Self, StorageError> {
        use esp_idf_svc::sys::*;

        const BASE: &core::ffi::CStr = c"/storage";
        const LABEL: &core::ffi::CStr = c"storage";

        let conf = esp_vfs_spiffs_conf_t {
            base_path: BASE.as_ptr(),
            partition_label: LABEL.as_ptr(),
            max_files: 5,
            format_if_mount_failed: true,
        };
        // SAFETY: conf and the C strings are 'static for the call.
        let rc = unsafe { esp_vfs_spiffs_register(&conf) };
        if rc != ESP_OK as i32 {
            return Err(StorageError::Io(format!("spiffs mount failed ({rc})")));
        }

        let (mut total, mut used) = (0usize, 0usize);
        // SAFETY: out-pointers are valid locals.
        let rc = unsafe { esp_spiffs_info(LABEL.as_ptr(), &mut total, &mut used) };
        if rc != ESP_OK as i32 {
            return Err(StorageError::Io(format!("spiffs info failed ({rc})")));
        }
        info!("STORAGE: SPIFFS mounted ({} / {} bytes used)", used, total);
        Self::open("/storage", total as u64)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path(&self, name: &str) -> Result<PathBuf, StorageError> {
        validate_name(name)?;
        Ok(self.root.join(name))
    }
}

impl FileStore for FsStore {
    fn read(&self, name: &str) -> Result<Vec<u8>, StorageError> {
        std::fs::read(self.path(name)?).map_err(io_err)
    }

    fn write(&mut self, name: &str, data: &[u8]) -> Result<(), StorageError> {
        let path = self.path(name)?;
        let existing = std::fs::metadata(&path).map(|m| m.len()).unwrap_or(0);
        if data.len() as u64 > self.usage().free_bytes + existing {
            return Err(StorageError::Full);
        }
        std::fs::write(path, data).map_err(io_err)
    }

    fn delete(&mut self, name: &str) -> Result<(), StorageError> {
        std::fs::remove_file(self.path(name)?).map_err(io_err)
    }

    fn exists(&self, name: &str) -> bool {
        self.path(name).map(|p| p.is_file()).unwrap_or(false)
    }

    fn list(&self) -> Result<Vec<FileEntry>, StorageError> {
        let mut entries = Vec::new();
        for dirent in std::fs::read_dir(&self.root).map_err(io_err)? {
            let dirent = dirent.map_err(io_err)?;
            let meta = dirent.metadata().map_err(io_err)?;
            if !meta.is_file() {
                continue;
            }
            entries.push(FileEntry {
                name: dirent.file_name().to_string_lossy().into_owned(),
                size: meta.len(),
            });
        }
        Ok(entries)
    }

    fn usage(&self) -> StorageUsage {
        let used: u64 = self
            .list()
            .map(|v| v.iter().map(|e| e.size).sum())
            .unwrap_or(0);
        StorageUsage {
            free_bytes: self.capacity.saturating_sub(used),
            total_bytes: self.capacity,
        }
    }
}

// ───────────────────────────────────────────────────────────────
// In-memory store
// ───────────────────────────────────────────────────────────────

/// Capacity-limited in-memory store.
pub struct MemStore {
    files: BTreeMap<String, Vec<u8>>,
    capacity: u64,
}

impl MemStore {
    pub fn with_capacity(capacity: u64) -> Self {
        Self {
            files: BTreeMap::new(),
            capacity,
        }
    }

    fn used(&self) -> u64 {
        self.files.values().map(|v| v.len() as u64).sum()
    }
}

impl FileStore for MemStore {
    fn read(&self, name: &str) -> Result<Vec<u8>, StorageError> {
        self.files.get(name).cloned().ok_or(StorageError::NotFound)
    }

    fn write(&mut self, name: &str, data: &[u8]) -> Result<(), StorageError> {
        validate_name(name)?;
        let existing = self.files.get(name).map_or(0, |v| v.len() as u64);
        if self.used() - existing + data.len() as u64 > self.capacity {
            return Err(StorageError::Full);
        }
        self.files.insert(name.into(), data.to_vec());
        Ok(())
    }

    fn delete(&mut self, name: &str) -> Result<(), StorageError> {
        self.files
            .remove(name)
            .map(|_| ())
            .ok_or(StorageError::NotFound)
    }

    fn exists(&self, name: &str) -> bool {
        self.files.contains_key(name)
    }

    fn list(&self) -> Result<Vec<FileEntry>, StorageError> {
        Ok(self
            .files
            .iter()
            .map(|(name, data)| FileEntry {
                name: name.clone(),
                size: data.len() as u64,
            })
            .collect())
    }

    fn usage(&self) -> StorageUsage {
        StorageUsage {
            free_bytes: self.capacity.saturating_sub(self.used()),
            total_bytes: self.capacity,
        }
    }
}
