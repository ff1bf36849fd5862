//! Newline-delimited trusted key files.

use crate::StorageResult;
use safe_file_ops::AtomicFile;
use std::collections::BTreeSet;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, error};

/// Owner read/write, group read.
pub const TRUSTED_KEY_FILE_MODE: u32 = 0o640;

/// A key file with one public key per line.
///
/// Used for both the user key file adbd reads and the read-only system key
/// file. Nothing here ever writes the system key file.
#[derive(Debug, Clone)]
pub struct TrustedKeyStorage {
    file: AtomicFile,
}

impl TrustedKeyStorage {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            file: AtomicFile::new(path),
        }
    }

    pub fn path(&self) -> &Path {
        self.file.path()
    }

    /// Keys in the file. Missing or unreadable files yield an empty set.
    pub fn load_keys(&self) -> BTreeSet<String> {
        match self.try_load_keys() {
            Ok(keys) => keys,
            Err(e) => {
                error!(path = %self.path().display(), error = %e, "Failed to read key file");
                BTreeSet::new()
            }
        }
    }

    /// Atomically replace the file with `keys`, one per line.
    pub fn save_keys<'a, I>(&self, keys: I)
    where
        I: IntoIterator<Item = &'a String>,
    {
        if let Err(e) = self.try_save_keys(keys) {
            error!(path = %self.path().display(), error = %e, "Failed to write key file");
        }
    }

    pub fn delete(&self) {
        match self.file.delete() {
            Ok(true) => debug!(path = %self.path().display(), "Deleted key file"),
            Ok(false) => {}
            Err(e) => error!(path = %self.path().display(), error = %e, "Failed to delete key file"),
        }
    }

    fn try_load_keys(&self) -> StorageResult<BTreeSet<String>> {
        let Some(content) = self.file.read_to_string()? else {
            return Ok(BTreeSet::new());
        };
        Ok(content
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect())
    }

    fn try_save_keys<'a, I>(&self, keys: I) -> StorageResult<()>
    where
        I: IntoIterator<Item = &'a String>,
    {
        let mut staged = self.file.start_write()?;
        staged.set_mode(TRUSTED_KEY_FILE_MODE);
        for key in keys {
            if let Err(e) = writeln!(staged, "{key}") {
                staged.fail();
                return Err(e.into());
            }
        }
        staged.finish()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn keys(list: &[&str]) -> BTreeSet<String> {
        list.iter().map(|k| k.to_string()).collect()
    }

    #[test]
    fn missing_file_loads_empty() {
        let dir = tempfile::tempdir().expect("tempdir");
        let storage = TrustedKeyStorage::new(dir.path().join("adb_keys"));
        assert!(storage.load_keys().is_empty());
    }

    #[test]
    fn save_then_load() {
        let dir = tempfile::tempdir().expect("tempdir");
        let storage = TrustedKeyStorage::new(dir.path().join("adb_keys"));
        let expected = keys(&["AAAA alice@host", "BBBB bob@host"]);

        storage.save_keys(&expected);

        assert_eq!(storage.load_keys(), expected);
        let raw = fs::read_to_string(storage.path()).unwrap();
        assert_eq!(raw, "AAAA alice@host\nBBBB bob@host\n");
    }

    #[test]
    fn load_skips_blank_lines_and_trims() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("adb_keys");
        fs::write(&path, "\n  AAAA alice@host  \n\n\nBBBB\n").unwrap();

        let storage = TrustedKeyStorage::new(&path);
        assert_eq!(storage.load_keys(), keys(&["AAAA alice@host", "BBBB"]));
    }

    #[test]
    fn unreadable_path_loads_empty() {
        let dir = tempfile::tempdir().expect("tempdir");
        // A directory cannot be read as a key file.
        let storage = TrustedKeyStorage::new(dir.path());
        assert!(storage.load_keys().is_empty());
    }

    #[cfg(unix)]
    #[test]
    fn saved_file_is_group_readable_only() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().expect("tempdir");
        let storage = TrustedKeyStorage::new(dir.path().join("adb_keys"));
        storage.save_keys(&keys(&["AAAA"]));

        let mode = fs::metadata(storage.path()).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, TRUSTED_KEY_FILE_MODE);
    }

    #[test]
    fn delete_twice_is_fine() {
        let dir = tempfile::tempdir().expect("tempdir");
        let storage = TrustedKeyStorage::new(dir.path().join("adb_keys"));
        storage.save_keys(&keys(&["AAAA"]));

        storage.delete();
        storage.delete();
        assert!(!storage.path().exists());
    }
}
