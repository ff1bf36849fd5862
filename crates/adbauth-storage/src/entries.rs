use std::collections::{BTreeMap, BTreeSet};

/// Grants and trusted networks as persisted in the ledger.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuthorizationEntries {
    /// Public key to last connection time in epoch milliseconds.
    pub grants: BTreeMap<String, i64>,
    /// Trusted access point BSSIDs.
    pub trusted_networks: BTreeSet<String>,
}

impl AuthorizationEntries {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.grants.is_empty() && self.trusted_networks.is_empty()
    }

    pub fn clear(&mut self) {
        self.grants.clear();
        self.trusted_networks.clear();
    }
}
