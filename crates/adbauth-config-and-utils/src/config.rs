//! Configuration management for the daemon.

use crate::{CoreError, CoreResult, Paths};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Default log level.
pub const DEFAULT_LOG_LEVEL: &str = "info";

/// Default lifetime of an "always allow" grant: seven days.
pub const DEFAULT_ALLOWED_CONNECTION_WINDOW_MS: i64 = 7 * 24 * 60 * 60 * 1000;

/// How long to wait for adbd to stop or start when cycling it.
pub const DEFAULT_DAEMON_STATE_CHANGE_TIMEOUT_MS: u64 = 5_000;

/// How long a pairing advertisement stays up without a result.
pub const DEFAULT_PAIRING_TIMEOUT_MS: u64 = 120_000;

/// Main daemon configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Log level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Grant lifetime in milliseconds. `0` means grants never expire.
    #[serde(default = "default_allowed_connection_window_ms")]
    pub allowed_connection_window_ms: i64,
    /// Cycle adbd after clearing grants so live sessions drop.
    #[serde(default = "default_disconnect_sessions_on_revoke")]
    pub disconnect_sessions_on_revoke: bool,
    #[serde(default = "default_daemon_state_change_timeout_ms")]
    pub daemon_state_change_timeout_ms: u64,
    #[serde(default = "default_pairing_timeout_ms")]
    pub pairing_timeout_ms: u64,
}

fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}

fn default_allowed_connection_window_ms() -> i64 {
    DEFAULT_ALLOWED_CONNECTION_WINDOW_MS
}

fn default_disconnect_sessions_on_revoke() -> bool {
    true
}

fn default_daemon_state_change_timeout_ms() -> u64 {
    DEFAULT_DAEMON_STATE_CHANGE_TIMEOUT_MS
}

fn default_pairing_timeout_ms() -> u64 {
    DEFAULT_PAIRING_TIMEOUT_MS
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            allowed_connection_window_ms: DEFAULT_ALLOWED_CONNECTION_WINDOW_MS,
            disconnect_sessions_on_revoke: true,
            daemon_state_change_timeout_ms: DEFAULT_DAEMON_STATE_CHANGE_TIMEOUT_MS,
            pairing_timeout_ms: DEFAULT_PAIRING_TIMEOUT_MS,
        }
    }
}

impl Config {
    /// Load configuration from the data directory, falling back to defaults.
    ///
    /// Environment variables are applied last and win over the file.
    pub fn load(paths: &Paths) -> CoreResult<Self> {
        let config_path = paths.config_file();

        let mut config = if config_path.exists() {
            Self::load_from_file(&config_path)?
        } else {
            Self::default()
        };

        config.load_from_env();
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file.
    pub fn load_from_file(path: &Path) -> CoreResult<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to the data directory.
    pub fn save(&self, paths: &Paths) -> CoreResult<()> {
        paths.ensure_dirs()?;
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(paths.config_file(), content)?;
        Ok(())
    }

    fn load_from_env(&mut self) {
        if let Ok(log_level) = std::env::var("ADBAUTH_LOG_LEVEL") {
            self.log_level = log_level;
        }
        if let Some(window) = std::env::var("ADBAUTH_ALLOWED_CONNECTION_WINDOW_MS")
            .ok()
            .and_then(|raw| raw.trim().parse::<i64>().ok())
        {
            self.allowed_connection_window_ms = window;
        }
    }

    fn validate(&self) -> CoreResult<()> {
        if self.allowed_connection_window_ms < 0 {
            return Err(CoreError::Config(format!(
                "allowed_connection_window_ms must be >= 0, got {}",
                self.allowed_connection_window_ms
            )));
        }
        Ok(())
    }
}
