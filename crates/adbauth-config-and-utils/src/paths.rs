//! File system paths for the daemon.

use crate::CoreResult;
use std::path::{Path, PathBuf};

/// Data directory shared with adbd.
const DEFAULT_DATA_DIR: &str = "/data/misc/adb";
/// Read-only key file baked into the system image.
const DEFAULT_SYSTEM_KEYS_FILE: &str = "/adb_keys";
/// Key file adbd reads directly.
const USER_KEYS_FILE_NAME: &str = "adb_keys";
/// Structured grant ledger.
const LEDGER_FILE_NAME: &str = "adb_temp_keys.xml";
const CONFIG_FILE_NAME: &str = "adbauth.json";
/// System key file name used when the paths are rooted somewhere else.
const RELOCATED_SYSTEM_KEYS_FILE_NAME: &str = "system_adb_keys";

/// Manages file system paths for the daemon.
#[derive(Debug, Clone)]
pub struct Paths {
    /// Directory holding the user key file, the ledger and the config.
    data_dir: PathBuf,
    system_keys_file: PathBuf,
}

impl Paths {
    /// Create a new Paths instance using the device locations.
    pub fn new() -> Self {
        Self {
            data_dir: PathBuf::from(DEFAULT_DATA_DIR),
            system_keys_file: PathBuf::from(DEFAULT_SYSTEM_KEYS_FILE),
        }
    }

    /// Create a new Paths instance rooted at a custom directory.
    ///
    /// The system key file moves into the same directory.
    pub fn with_base_dir(base_dir: PathBuf) -> Self {
        Self {
            system_keys_file: base_dir.join(RELOCATED_SYSTEM_KEYS_FILE_NAME),
            data_dir: base_dir,
        }
    }

    /// Override the system key file location.
    pub fn with_system_keys_file(mut self, path: PathBuf) -> Self {
        self.system_keys_file = path;
        self
    }

    /// Get the data directory (/data/misc/adb).
    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// Get the user key file path (/data/misc/adb/adb_keys).
    pub fn user_keys_file(&self) -> PathBuf {
        self.data_dir.join(USER_KEYS_FILE_NAME)
    }

    /// Get the ledger file path (/data/misc/adb/adb_temp_keys.xml).
    pub fn ledger_file(&self) -> PathBuf {
        self.data_dir.join(LEDGER_FILE_NAME)
    }

    /// Get the system key file path (/adb_keys).
    pub fn system_keys_file(&self) -> &Path {
        &self.system_keys_file
    }

    /// Get the config file path (/data/misc/adb/adbauth.json).
    pub fn config_file(&self) -> PathBuf {
        self.data_dir.join(CONFIG_FILE_NAME)
    }

    /// Ensure the data directory exists.
    pub fn ensure_dirs(&self) -> CoreResult<()> {
        std::fs::create_dir_all(&self.data_dir)?;
        Ok(())
    }
}

impl Default for Paths {
    fn default() -> Self {
        Self::new()
    }
}
