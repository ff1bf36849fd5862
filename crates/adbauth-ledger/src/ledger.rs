//! Grant bookkeeping and expiration.

use crate::PersistRequester;
use adbauth_config_and_utils::{Clock, Paths, SettingsProvider};
use adbauth_storage::{AuthorizationEntries, AuthorizationLedgerStorage, TrustedKeyStorage};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, info};

/// Returned by [`AuthorizationLedger::last_connection_time`] for unknown keys.
pub const NO_PREVIOUS_CONNECTION: i64 = 0;

/// Returned by [`AuthorizationLedger::next_expiration_time`] when nothing
/// will ever expire.
pub const NO_EXPIRATION: i64 = -1;

/// The three on-disk stores the ledger reads and writes.
#[derive(Debug, Clone)]
pub struct LedgerStores {
    pub ledger: AuthorizationLedgerStorage,
    pub user_keys: TrustedKeyStorage,
    /// Read only.
    pub system_keys: TrustedKeyStorage,
}

impl LedgerStores {
    pub fn from_paths(paths: &Paths) -> Self {
        Self {
            ledger: AuthorizationLedgerStorage::new(paths.ledger_file()),
            user_keys: TrustedKeyStorage::new(paths.user_keys_file()),
            system_keys: TrustedKeyStorage::new(paths.system_keys_file()),
        }
    }
}

/// In-memory authoritative trust state.
///
/// Owned by a single execution context. Mutations that need to reach disk
/// go through the [`PersistRequester`]; the owner later calls
/// [`persist`](Self::persist).
pub struct AuthorizationLedger {
    entries: AuthorizationEntries,
    system_keys: BTreeSet<String>,
    stores: LedgerStores,
    clock: Arc<dyn Clock>,
    settings: Arc<dyn SettingsProvider>,
    persist: Arc<dyn PersistRequester>,
}

impl AuthorizationLedger {
    /// Load the ledger, the system keys, and fold in keys adbd already trusts.
    pub fn open(
        stores: LedgerStores,
        clock: Arc<dyn Clock>,
        settings: Arc<dyn SettingsProvider>,
        persist: Arc<dyn PersistRequester>,
    ) -> Self {
        let entries = stores.ledger.load();
        let system_keys = stores.system_keys.load_keys();

        let mut ledger = Self {
            entries,
            system_keys,
            stores,
            clock,
            settings,
            persist,
        };
        ledger.adopt_user_keys();

        info!(
            grants = ledger.entries.grants.len(),
            trusted_networks = ledger.entries.trusted_networks.len(),
            system_keys = ledger.system_keys.len(),
            "Authorization ledger loaded"
        );
        ledger
    }

    /// Keys listed in the user key file but unknown to the ledger were
    /// trusted before the ledger existed. Start their window now. System
    /// keys never get a grant.
    fn adopt_user_keys(&mut self) {
        let now = self.clock.now_millis();
        let mut changed = false;
        for key in self.stores.user_keys.load_keys() {
            if !self.entries.grants.contains_key(&key) && !self.system_keys.contains(&key) {
                self.entries.grants.insert(key, now);
                changed = true;
            }
        }
        if changed {
            self.persist.request_persist();
        }
    }

    // ========================================================================
    // Queries
    // ========================================================================

    pub fn allowed_connection_window(&self) -> i64 {
        self.settings.allowed_connection_window_ms()
    }

    pub fn is_key_authorized(&self, key: &str) -> bool {
        if self.system_keys.contains(key) {
            return true;
        }
        let Some(&last_connection) = self.entries.grants.get(key) else {
            return false;
        };
        let window = self.allowed_connection_window();
        window == 0 || self.clock.now_millis() < last_connection.saturating_add(window)
    }

    pub fn is_trusted_network(&self, bssid: &str) -> bool {
        self.entries.trusted_networks.contains(bssid)
    }

    pub fn last_connection_time(&self, key: &str) -> i64 {
        self.entries
            .grants
            .get(key)
            .copied()
            .unwrap_or(NO_PREVIOUS_CONNECTION)
    }

    /// Milliseconds until the earliest grant expires, `0` if one already
    /// has, or [`NO_EXPIRATION`].
    pub fn next_expiration_time(&self) -> i64 {
        let window = self.allowed_connection_window();
        if window == 0 {
            return NO_EXPIRATION;
        }
        let now = self.clock.now_millis();
        self.entries
            .grants
            .values()
            .map(|&last| last.saturating_add(window).saturating_sub(now).max(0))
            .min()
            .unwrap_or(NO_EXPIRATION)
    }

    pub fn find_key_from_fingerprint(&self, fingerprint: &str) -> Option<String> {
        if fingerprint.is_empty() {
            return None;
        }
        self.entries
            .grants
            .keys()
            .find(|key| key_fingerprint::fingerprint(key) == fingerprint)
            .cloned()
    }

    /// Keys holding a grant.
    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.entries.grants.keys()
    }

    /// Whether no grants exist. Trusted networks are not counted.
    pub fn is_empty(&self) -> bool {
        self.entries.grants.is_empty()
    }

    pub fn system_keys(&self) -> &BTreeSet<String> {
        &self.system_keys
    }

    pub fn entries(&self) -> &AuthorizationEntries {
        &self.entries
    }

    // ========================================================================
    // Mutations
    // ========================================================================

    /// Record a connection. Older timestamps are ignored unless `force`.
    pub fn set_last_connection_time(&mut self, key: &str, time: i64, force: bool) {
        if let Some(&stored) = self.entries.grants.get(key) {
            if stored >= time && !force {
                return;
            }
        }
        if self.system_keys.contains(key) {
            return;
        }
        self.entries.grants.insert(key.to_string(), time);
    }

    pub fn add_trusted_network(&mut self, bssid: &str) {
        self.entries.trusted_networks.insert(bssid.to_string());
        self.persist.request_persist();
    }

    pub fn remove_key(&mut self, key: &str) {
        if self.entries.grants.remove(key).is_some() {
            self.persist.request_persist();
        }
    }

    /// Drop expired grants. Rewrites the user key file when anything went.
    pub fn sweep_expired(&mut self) -> bool {
        let window = self.allowed_connection_window();
        if window == 0 {
            return false;
        }
        let now = self.clock.now_millis();
        let before = self.entries.grants.len();
        self.entries
            .grants
            .retain(|_, last| now <= last.saturating_add(window));
        let removed = before - self.entries.grants.len();
        if removed == 0 {
            return false;
        }

        info!(removed, "Expired adb grants removed");
        self.stores.user_keys.save_keys(self.entries.grants.keys());
        true
    }

    /// Sweep and ask for a persist if anything expired.
    pub fn update(&mut self) {
        if self.sweep_expired() {
            self.persist.request_persist();
        }
    }

    /// Write both stores, or delete them when nothing is left.
    pub fn persist(&mut self) {
        self.sweep_expired();
        if self.entries.is_empty() {
            self.delete_all();
            return;
        }
        self.stores.ledger.save(&self.entries);
        self.stores.user_keys.save_keys(self.entries.grants.keys());
        debug!(grants = self.entries.grants.len(), "Authorization ledger persisted");
    }

    pub fn delete_all(&mut self) {
        self.entries.clear();
        self.stores.ledger.delete();
        self.stores.user_keys.delete();
    }

    /// Replace in-memory entries with what is on disk.
    pub fn reload_from_disk(&mut self) {
        self.entries = self.stores.ledger.load();
        debug!(grants = self.entries.grants.len(), "Authorization ledger reloaded");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::RecordingPersist;
    use adbauth_config_and_utils::{LiveSettings, ManualClock};
    use std::fs;
    use tempfile::TempDir;

    const WINDOW: i64 = 5_000;

    struct Fixture {
        _dir: TempDir,
        paths: Paths,
        clock: Arc<ManualClock>,
        settings: Arc<LiveSettings>,
        persist: Arc<RecordingPersist>,
    }

    impl Fixture {
        fn new(now: i64, window: i64) -> Self {
            let dir = tempfile::tempdir().expect("tempdir");
            let paths = Paths::with_base_dir(dir.path().to_path_buf());
            Self {
                _dir: dir,
                paths,
                clock: Arc::new(ManualClock::new(now)),
                settings: Arc::new(LiveSettings::new(window, true)),
                persist: Arc::new(RecordingPersist::new()),
            }
        }

        fn open(&self) -> AuthorizationLedger {
            AuthorizationLedger::open(
                LedgerStores::from_paths(&self.paths),
                self.clock.clone(),
                self.settings.clone(),
                self.persist.clone(),
            )
        }

        fn ledger_storage(&self) -> AuthorizationLedgerStorage {
            AuthorizationLedgerStorage::new(self.paths.ledger_file())
        }

        fn user_keys(&self) -> BTreeSet<String> {
            TrustedKeyStorage::new(self.paths.user_keys_file()).load_keys()
        }
    }

    // ========================================================================
    // Bootstrap
    // ========================================================================

    #[test]
    fn user_keys_are_adopted_with_current_time() {
        let fx = Fixture::new(9_000, WINDOW);
        fs::write(fx.paths.user_keys_file(), "AAAA alice@host\n").unwrap();

        let ledger = fx.open();

        assert_eq!(ledger.last_connection_time("AAAA alice@host"), 9_000);
        assert_eq!(fx.persist.count(), 1);
    }

    #[test]
    fn adopting_known_keys_requests_nothing() {
        let fx = Fixture::new(9_000, WINDOW);
        let mut entries = AuthorizationEntries::new();
        entries.grants.insert("AAAA".to_string(), 100);
        fx.ledger_storage().save(&entries);
        fs::write(fx.paths.user_keys_file(), "AAAA\n").unwrap();

        let ledger = fx.open();

        assert_eq!(ledger.last_connection_time("AAAA"), 100);
        assert_eq!(fx.persist.count(), 0);
    }

    #[test]
    fn system_keys_in_user_file_are_not_adopted() {
        let fx = Fixture::new(9_000, WINDOW);
        fs::write(fx.paths.system_keys_file(), "SYSKEY device@factory\n").unwrap();
        fs::write(
            fx.paths.user_keys_file(),
            "SYSKEY device@factory\nAAAA alice@host\n",
        )
        .unwrap();

        let ledger = fx.open();

        let keys: Vec<_> = ledger.keys().cloned().collect();
        assert_eq!(keys, vec!["AAAA alice@host".to_string()]);
        assert!(ledger.is_key_authorized("SYSKEY device@factory"));
        assert_eq!(fx.persist.count(), 1);
    }

    // ========================================================================
    // Authorization
    // ========================================================================

    #[test]
    fn monotonic_connection_time_without_force() {
        let fx = Fixture::new(0, WINDOW);
        let mut ledger = fx.open();

        ledger.set_last_connection_time("k", 10_000, false);
        ledger.set_last_connection_time("k", 5_000, false);
        assert_eq!(ledger.last_connection_time("k"), 10_000);

        ledger.set_last_connection_time("k", 5_000, true);
        assert_eq!(ledger.last_connection_time("k"), 5_000);
    }

    #[test]
    fn system_keys_are_always_authorized_and_never_recorded() {
        let fx = Fixture::new(1_000_000, WINDOW);
        fs::write(fx.paths.system_keys_file(), "SYSKEY device@factory\n").unwrap();
        let mut ledger = fx.open();

        ledger.set_last_connection_time("SYSKEY device@factory", 5, true);

        assert!(ledger.is_key_authorized("SYSKEY device@factory"));
        assert_eq!(
            ledger.last_connection_time("SYSKEY device@factory"),
            NO_PREVIOUS_CONNECTION
        );
        ledger.persist();
        assert!(!fx.user_keys().contains("SYSKEY device@factory"));
    }

    #[test]
    fn expired_grant_is_not_authorized() {
        let fx = Fixture::new(7_000, WINDOW);
        let mut ledger = fx.open();
        ledger.set_last_connection_time("keyB", 1_000, false);

        assert!(!ledger.is_key_authorized("keyB"));
        assert_eq!(ledger.next_expiration_time(), 0);
    }

    #[test]
    fn grant_inside_window_is_authorized() {
        let fx = Fixture::new(3_000, WINDOW);
        let mut ledger = fx.open();
        ledger.set_last_connection_time("k", 1_000, false);

        assert!(ledger.is_key_authorized("k"));
        assert!(!ledger.is_key_authorized("unknown"));
        assert_eq!(ledger.next_expiration_time(), 3_000);
    }

    #[test]
    fn zero_window_never_expires() {
        let fx = Fixture::new(i64::MAX / 2, 0);
        let mut ledger = fx.open();
        ledger.set_last_connection_time("ancient", 1, false);

        assert!(ledger.is_key_authorized("ancient"));
        assert_eq!(ledger.next_expiration_time(), NO_EXPIRATION);
        assert!(!ledger.sweep_expired());
    }

    #[test]
    fn next_expiration_is_minimum_over_grants() {
        let fx = Fixture::new(10_000, WINDOW);
        let mut ledger = fx.open();
        assert_eq!(ledger.next_expiration_time(), NO_EXPIRATION);

        ledger.set_last_connection_time("a", 9_000, false);
        ledger.set_last_connection_time("b", 7_000, false);
        assert_eq!(ledger.next_expiration_time(), 2_000);
    }

    // ========================================================================
    // Sweep and persistence
    // ========================================================================

    #[test]
    fn sweep_keeps_only_recent_grants() {
        let fx = Fixture::new(100_000, WINDOW);
        let mut ledger = fx.open();
        ledger.set_last_connection_time("k1", 10_000, false);
        ledger.set_last_connection_time("k2", 20_000, false);
        ledger.set_last_connection_time("k3", 99_000, false);

        assert!(ledger.sweep_expired());
        let survivors: Vec<_> = ledger.keys().cloned().collect();
        assert_eq!(survivors, vec!["k3".to_string()]);
        assert!(!ledger.sweep_expired());

        ledger.persist();
        let on_disk = fx.ledger_storage().load();
        assert_eq!(on_disk.grants.len(), 1);
        assert_eq!(on_disk.grants.get("k3"), Some(&99_000));
        assert_eq!(fx.user_keys(), ["k3".to_string()].into_iter().collect());
    }

    #[test]
    fn sweep_boundary_is_inclusive() {
        let fx = Fixture::new(6_000, WINDOW);
        let mut ledger = fx.open();
        ledger.set_last_connection_time("edge", 1_000, false);

        // now == last + window: expired for authorization, kept by the sweep.
        assert!(!ledger.is_key_authorized("edge"));
        assert!(!ledger.sweep_expired());

        fx.clock.advance(1);
        assert!(ledger.sweep_expired());
    }

    #[test]
    fn persist_then_reload_roundtrip() {
        let fx = Fixture::new(1_000, WINDOW);
        let mut ledger = fx.open();
        ledger.set_last_connection_time("keyA", 1_000, false);
        ledger.persist();

        let entries = fx.ledger_storage().load();
        assert_eq!(entries.grants.len(), 1);
        assert_eq!(entries.grants.get("keyA"), Some(&1_000));
    }

    #[test]
    fn persist_with_nothing_left_deletes_both_files() {
        let fx = Fixture::new(1_000, WINDOW);
        let mut ledger = fx.open();
        ledger.set_last_connection_time("k", 1_000, false);
        ledger.persist();
        assert!(fx.paths.ledger_file().exists());
        assert!(fx.paths.user_keys_file().exists());

        ledger.remove_key("k");
        ledger.persist();

        assert!(!fx.paths.ledger_file().exists());
        assert!(!fx.paths.user_keys_file().exists());
    }

    #[test]
    fn update_requests_persist_only_when_something_expired() {
        let fx = Fixture::new(1_000, WINDOW);
        let mut ledger = fx.open();
        ledger.set_last_connection_time("k", 1_000, false);

        ledger.update();
        assert_eq!(fx.persist.take(), 0);

        fx.clock.set(10_000);
        ledger.update();
        assert_eq!(fx.persist.take(), 1);
        assert!(ledger.is_empty());
    }

    #[test]
    fn remove_key_requests_persist_only_when_present() {
        let fx = Fixture::new(1_000, WINDOW);
        let mut ledger = fx.open();
        ledger.set_last_connection_time("k", 1_000, false);

        ledger.remove_key("missing");
        assert_eq!(fx.persist.take(), 0);

        ledger.remove_key("k");
        assert_eq!(fx.persist.take(), 1);
    }

    #[test]
    fn trusted_networks_survive_without_grants() {
        let fx = Fixture::new(1_000, WINDOW);
        let mut ledger = fx.open();
        ledger.add_trusted_network("aa:bb:cc:dd:ee:ff");
        assert_eq!(fx.persist.take(), 1);
        ledger.persist();

        let reopened = fx.open();
        assert!(reopened.is_trusted_network("aa:bb:cc:dd:ee:ff"));
        assert!(reopened.is_empty());
    }

    #[test]
    fn delete_all_clears_memory_and_disk() {
        let fx = Fixture::new(1_000, WINDOW);
        let mut ledger = fx.open();
        ledger.set_last_connection_time("k", 1_000, false);
        ledger.add_trusted_network("net");
        ledger.persist();

        ledger.delete_all();

        assert!(ledger.entries().is_empty());
        assert!(!fx.paths.ledger_file().exists());
        assert!(!fx.paths.user_keys_file().exists());
    }

    #[test]
    fn reload_from_disk_discards_memory() {
        let fx = Fixture::new(1_000, WINDOW);
        let mut ledger = fx.open();
        ledger.set_last_connection_time("persisted", 1_000, false);
        ledger.persist();
        ledger.set_last_connection_time("memory-only", 1_000, false);

        ledger.reload_from_disk();

        assert_eq!(ledger.last_connection_time("persisted"), 1_000);
        assert_eq!(ledger.last_connection_time("memory-only"), NO_PREVIOUS_CONNECTION);
    }

    #[test]
    fn find_key_by_fingerprint() {
        let fx = Fixture::new(1_000, WINDOW);
        let mut ledger = fx.open();
        ledger.set_last_connection_time("aGVsbG8= alice@host", 1_000, false);

        let fp = key_fingerprint::fingerprint("aGVsbG8= alice@host");
        assert_eq!(
            ledger.find_key_from_fingerprint(&fp).as_deref(),
            Some("aGVsbG8= alice@host")
        );
        assert_eq!(ledger.find_key_from_fingerprint("00:11"), None);
        assert_eq!(ledger.find_key_from_fingerprint(""), None);
    }
}
