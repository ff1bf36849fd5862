//! Durable storage for adb host authorization.
//!
//! Two stores live side by side in the adb data directory:
//!
//! - [`TrustedKeyStorage`]: the newline-delimited key file adbd reads.
//! - [`AuthorizationLedgerStorage`]: the XML ledger of grant timestamps and
//!   trusted Wi-Fi networks.
//!
//! Both replace their file atomically. Read and write failures are logged and
//! surface as empty or unchanged results, never as errors.

mod entries;
mod error;
mod ledger_store;
mod trusted_keys;

pub use entries::AuthorizationEntries;
pub use error::{StorageError, StorageResult};
pub use ledger_store::{AuthorizationLedgerStorage, KEYSTORE_VERSION, MAX_SUPPORTED_KEYSTORE_VERSION};
pub use trusted_keys::{TrustedKeyStorage, TRUSTED_KEY_FILE_MODE};
