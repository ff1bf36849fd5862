//! Persistence request capability.

use std::sync::atomic::{AtomicUsize, Ordering};

/// Asks the owner of the ledger to write it out at a later point.
///
/// Implementations must not call back into the ledger synchronously.
pub trait PersistRequester: Send + Sync {
    fn request_persist(&self);
}

impl<F> PersistRequester for F
where
    F: Fn() + Send + Sync,
{
    fn request_persist(&self) {
        self()
    }
}

/// Counts persist requests. Useful for offline tools and tests.
#[derive(Debug, Default)]
pub struct RecordingPersist {
    requests: AtomicUsize,
}

impl RecordingPersist {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn count(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }

    /// Returns the count and resets it to zero.
    pub fn take(&self) -> usize {
        self.requests.swap(0, Ordering::SeqCst)
    }
}

impl PersistRequester for RecordingPersist {
    fn request_persist(&self) {
        self.requests.fetch_add(1, Ordering::SeqCst);
    }
}
