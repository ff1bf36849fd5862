//! Runtime settings consumed by the ledger and the coordinator.

use crate::{Config, CoreError, CoreResult};
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};

/// Settings that may change while the daemon runs.
pub trait SettingsProvider: Send + Sync {
    /// Grant lifetime in milliseconds; `0` means grants never expire.
    fn allowed_connection_window_ms(&self) -> i64;

    /// Whether clearing grants also cycles adbd to drop live sessions.
    fn disconnect_sessions_on_revoke(&self) -> bool {
        true
    }
}

impl SettingsProvider for Config {
    fn allowed_connection_window_ms(&self) -> i64 {
        self.allowed_connection_window_ms
    }

    fn disconnect_sessions_on_revoke(&self) -> bool {
        self.disconnect_sessions_on_revoke
    }
}

/// Mutable settings snapshot, seeded from [`Config`].
///
/// Writers update values in place; readers always see the latest store.
#[derive(Debug)]
pub struct LiveSettings {
    allowed_connection_window_ms: AtomicI64,
    disconnect_sessions_on_revoke: AtomicBool,
}

impl LiveSettings {
    pub fn new(allowed_connection_window_ms: i64, disconnect_sessions_on_revoke: bool) -> Self {
        Self {
            allowed_connection_window_ms: AtomicI64::new(allowed_connection_window_ms),
            disconnect_sessions_on_revoke: AtomicBool::new(disconnect_sessions_on_revoke),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            config.allowed_connection_window_ms,
            config.disconnect_sessions_on_revoke,
        )
    }

    /// Negative windows are rejected and the current window is kept; `0`
    /// already means "never expire".
    pub fn set_allowed_connection_window_ms(&self, window_ms: i64) -> CoreResult<()> {
        if window_ms < 0 {
            return Err(CoreError::Config(format!(
                "allowed_connection_window_ms must be >= 0, got {window_ms}"
            )));
        }
        self.allowed_connection_window_ms
            .store(window_ms, Ordering::SeqCst);
        Ok(())
    }

    pub fn set_disconnect_sessions_on_revoke(&self, enabled: bool) {
        self.disconnect_sessions_on_revoke
            .store(enabled, Ordering::SeqCst);
    }
}

impl SettingsProvider for LiveSettings {
    fn allowed_connection_window_ms(&self) -> i64 {
        self.allowed_connection_window_ms.load(Ordering::SeqCst)
    }

    fn disconnect_sessions_on_revoke(&self) -> bool {
        self.disconnect_sessions_on_revoke.load(Ordering::SeqCst)
    }
}
