//! SafeFileOps: crash-safe whole-file replacement.
//!
//! Writers stage their bytes in a sibling temp file and commit with a single
//! rename, so readers observe either the previous content or the new content.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;
use tracing::warn;

#[derive(thiserror::Error, Debug)]
pub enum SafeFileOpsError {
    #[error("path has no parent directory or file name: {0}")]
    InvalidPath(PathBuf),
    #[error("file is not valid UTF-8")]
    InvalidUtf8,
    #[error("staged write was already committed or abandoned")]
    StagingClosed,
    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

pub type SafeFileOpsResult<T> = Result<T, SafeFileOpsError>;

/// A file that is only ever replaced atomically.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AtomicFile {
    path: PathBuf,
}

impl AtomicFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Read the committed content. `None` when the file does not exist.
    pub fn read_to_string(&self) -> SafeFileOpsResult<Option<String>> {
        match fs::read(&self.path) {
            Ok(bytes) => String::from_utf8(bytes)
                .map(Some)
                .map_err(|_| SafeFileOpsError::InvalidUtf8),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    /// Open a staged write next to the target.
    ///
    /// Nothing is visible at the target path until [`StagedWrite::finish`].
    pub fn start_write(&self) -> SafeFileOpsResult<StagedWrite> {
        let dir = self
            .path
            .parent()
            .ok_or_else(|| SafeFileOpsError::InvalidPath(self.path.clone()))?;
        let file_name = self
            .path
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(|| SafeFileOpsError::InvalidPath(self.path.clone()))?;

        if !dir.as_os_str().is_empty() {
            fs::create_dir_all(dir)?;
        }

        let tmp_name = format!(
            ".{}.adbauth.tmp.{}",
            file_name,
            std::time::SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .unwrap_or_default()
                .as_nanos()
        );
        let tmp_path = dir.join(tmp_name);

        let file = fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&tmp_path)?;

        Ok(StagedWrite {
            target: self.path.clone(),
            tmp_path,
            file: Some(file),
            mode: None,
            committed: false,
        })
    }

    /// Replace the whole file with `bytes`.
    ///
    /// With `mode == None` the permissions of an existing target are kept.
    pub fn write_all(&self, bytes: &[u8], mode: Option<u32>) -> SafeFileOpsResult<()> {
        let mut staged = self.start_write()?;
        if let Some(mode) = mode {
            staged.set_mode(mode);
        }
        if let Err(err) = staged.write_all(bytes) {
            staged.fail();
            return Err(err.into());
        }
        staged.finish()
    }

    /// Remove the file. Returns whether anything was removed.
    pub fn delete(&self) -> SafeFileOpsResult<bool> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(true),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(err) => Err(err.into()),
        }
    }
}

/// An uncommitted replacement of an [`AtomicFile`].
///
/// Dropping without calling [`finish`](Self::finish) discards the staged bytes.
#[derive(Debug)]
pub struct StagedWrite {
    target: PathBuf,
    tmp_path: PathBuf,
    file: Option<fs::File>,
    mode: Option<u32>,
    committed: bool,
}

impl StagedWrite {
    /// Permissions applied to the file before it is committed.
    pub fn set_mode(&mut self, mode: u32) {
        self.mode = Some(mode);
    }

    pub fn staged_path(&self) -> &Path {
        &self.tmp_path
    }

    /// Flush, sync and rename over the target.
    pub fn finish(mut self) -> SafeFileOpsResult<()> {
        let file = self.file.take().ok_or(SafeFileOpsError::StagingClosed)?;

        let result = (|| -> io::Result<()> {
            let mut file = file;
            file.flush()?;
            file.sync_all()?;
            drop(file);

            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt;
                let mode = match self.mode {
                    Some(mode) => Some(mode),
                    None => fs::metadata(&self.target)
                        .ok()
                        .map(|meta| meta.permissions().mode()),
                };
                if let Some(mode) = mode {
                    fs::set_permissions(&self.tmp_path, fs::Permissions::from_mode(mode))?;
                }
            }

            fs::rename(&self.tmp_path, &self.target)?;

            if let Some(dir) = self.target.parent() {
                if let Ok(parent_dir) = fs::File::open(dir) {
                    let _ = parent_dir.sync_all();
                }
            }
            Ok(())
        })();

        match result {
            Ok(()) => {
                self.committed = true;
                Ok(())
            }
            // Drop removes the staged file.
            Err(err) => Err(err.into()),
        }
    }

    /// Abandon the staged bytes. The target is left untouched.
    pub fn fail(mut self) {
        self.discard();
    }

    fn discard(&mut self) {
        self.file.take();
        if self.committed {
            return;
        }
        if let Err(err) = fs::remove_file(&self.tmp_path) {
            if err.kind() != io::ErrorKind::NotFound {
                warn!(path = %self.tmp_path.display(), error = %err, "Failed to remove staged file");
            }
        }
        self.committed = true;
    }
}

impl Write for StagedWrite {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self.file.as_mut() {
            Some(file) => file.write(buf),
            None => Err(io::Error::new(io::ErrorKind::Other, "staged write closed")),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self.file.as_mut() {
            Some(file) => file.flush(),
            None => Ok(()),
        }
    }
}

impl Drop for StagedWrite {
    fn drop(&mut self) {
        self.discard();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn leftover_temp_files(dir: &Path) -> Vec<String> {
        fs::read_dir(dir)
            .expect("read dir")
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.file_name().to_string_lossy().into_owned())
            .filter(|name| name.contains(".adbauth.tmp."))
            .collect()
    }

    #[test]
    fn write_all_creates_and_replaces() {
        let temp = tempfile::tempdir().expect("tempdir");
        let file = AtomicFile::new(temp.path().join("adb_keys"));
        assert!(!file.exists());

        file.write_all(b"first\n", None).expect("write first");
        assert_eq!(file.read_to_string().unwrap().as_deref(), Some("first\n"));

        file.write_all(b"second\n", None).expect("write second");
        assert_eq!(file.read_to_string().unwrap().as_deref(), Some("second\n"));
        assert!(leftover_temp_files(temp.path()).is_empty());
    }

    #[test]
    fn missing_file_reads_as_none() {
        let temp = tempfile::tempdir().expect("tempdir");
        let file = AtomicFile::new(temp.path().join("absent"));
        assert_eq!(file.read_to_string().unwrap(), None);
    }

    #[test]
    fn failed_staged_write_keeps_committed_content() {
        let temp = tempfile::tempdir().expect("tempdir");
        let file = AtomicFile::new(temp.path().join("adb_temp_keys.xml"));
        file.write_all(b"<keyStore version=\"1\"/>", None)
            .expect("initial write");

        let mut staged = file.start_write().expect("start write");
        staged.write_all(b"<keyStore ver").expect("partial write");
        let staged_path = staged.staged_path().to_path_buf();
        assert!(staged_path.exists());
        staged.fail();

        assert!(!staged_path.exists());
        assert_eq!(
            file.read_to_string().unwrap().as_deref(),
            Some("<keyStore version=\"1\"/>")
        );
        assert!(leftover_temp_files(temp.path()).is_empty());
    }

    #[test]
    fn dropped_staged_write_is_discarded() {
        let temp = tempfile::tempdir().expect("tempdir");
        let file = AtomicFile::new(temp.path().join("keys"));

        {
            let mut staged = file.start_write().expect("start write");
            staged.write_all(b"never committed").expect("write");
        }

        assert!(!file.exists());
        assert!(leftover_temp_files(temp.path()).is_empty());
    }

    #[test]
    fn start_write_creates_parent_directory() {
        let temp = tempfile::tempdir().expect("tempdir");
        let file = AtomicFile::new(temp.path().join("misc").join("adb").join("adb_keys"));

        file.write_all(b"k\n", None).expect("write");
        assert!(file.exists());
    }

    #[cfg(unix)]
    #[test]
    fn explicit_mode_is_applied() {
        use std::os::unix::fs::PermissionsExt;

        let temp = tempfile::tempdir().expect("tempdir");
        let file = AtomicFile::new(temp.path().join("adb_keys"));
        file.write_all(b"k\n", Some(0o640)).expect("write");

        let mode = fs::metadata(file.path()).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o640);
    }

    #[cfg(unix)]
    #[test]
    fn existing_mode_is_preserved_without_override() {
        use std::os::unix::fs::PermissionsExt;

        let temp = tempfile::tempdir().expect("tempdir");
        let file = AtomicFile::new(temp.path().join("adb_keys"));
        file.write_all(b"k\n", Some(0o600)).expect("write");
        file.write_all(b"k2\n", None).expect("rewrite");

        let mode = fs::metadata(file.path()).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn delete_is_idempotent() {
        let temp = tempfile::tempdir().expect("tempdir");
        let file = AtomicFile::new(temp.path().join("adb_keys"));
        file.write_all(b"k\n", None).expect("write");

        assert!(file.delete().expect("delete"));
        assert!(!file.delete().expect("second delete"));
        assert!(!file.exists());
    }
}
