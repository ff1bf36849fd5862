//! The authorization ledger: which host keys may connect without a prompt,
//! which Wi-Fi networks are trusted, and when grants expire.

mod ledger;
mod persist;

pub use ledger::{AuthorizationLedger, LedgerStores, NO_EXPIRATION, NO_PREVIOUS_CONNECTION};
pub use persist::{PersistRequester, RecordingPersist};
