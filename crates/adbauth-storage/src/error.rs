//! Storage error types.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("File error: {0}")]
    File(#[from] safe_file_ops::SafeFileOpsError),

    #[error("XML error: {0}")]
    Xml(String),

    #[error("Keystore version {found} not supported (max supported {max})")]
    UnsupportedVersion { found: i64, max: i64 },
}

impl StorageError {
    pub(crate) fn xml(err: impl std::fmt::Display) -> Self {
        StorageError::Xml(err.to_string())
    }
}

pub type StorageResult<T> = Result<T, StorageError>;
