//! Keys connected over Wi-Fi, readable from any thread.

use std::collections::BTreeSet;
use tokio::sync::watch;

/// Read side of the Wi-Fi connected set.
///
/// Cloneable and cheap to query. Reads see the latest published snapshot and
/// never wait on the coordinator.
#[derive(Debug, Clone)]
pub struct WifiConnectedKeys {
    rx: watch::Receiver<BTreeSet<String>>,
}

impl WifiConnectedKeys {
    pub fn contains(&self, key: &str) -> bool {
        self.rx.borrow().contains(key)
    }

    pub fn is_empty(&self) -> bool {
        self.rx.borrow().is_empty()
    }

    pub fn len(&self) -> usize {
        self.rx.borrow().len()
    }

    pub fn snapshot(&self) -> BTreeSet<String> {
        self.rx.borrow().clone()
    }
}

/// Write side, owned by the coordinator.
#[derive(Debug)]
pub(crate) struct WifiConnectedKeysWriter {
    tx: watch::Sender<BTreeSet<String>>,
}

impl WifiConnectedKeysWriter {
    pub(crate) fn new() -> Self {
        let (tx, _rx) = watch::channel(BTreeSet::new());
        Self { tx }
    }

    pub(crate) fn reader(&self) -> WifiConnectedKeys {
        WifiConnectedKeys {
            rx: self.tx.subscribe(),
        }
    }

    /// Returns whether the key was newly added.
    pub(crate) fn insert(&self, key: &str) -> bool {
        self.tx.send_if_modified(|keys| keys.insert(key.to_string()))
    }

    /// Returns whether the key was present.
    pub(crate) fn remove(&self, key: &str) -> bool {
        self.tx.send_if_modified(|keys| keys.remove(key))
    }

    pub(crate) fn clear(&self) {
        self.tx.send_if_modified(|keys| {
            let had_any = !keys.is_empty();
            keys.clear();
            had_any
        });
    }

    pub(crate) fn contains(&self, key: &str) -> bool {
        self.tx.borrow().contains(key)
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.tx.borrow().is_empty()
    }
}
