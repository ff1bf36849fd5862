//! Core types, configuration, and utilities for the adb authorization daemon.

mod clock;
mod config;
mod error;
mod logging;
mod paths;
mod settings;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{
    Config, DEFAULT_ALLOWED_CONNECTION_WINDOW_MS, DEFAULT_DAEMON_STATE_CHANGE_TIMEOUT_MS,
    DEFAULT_LOG_LEVEL, DEFAULT_PAIRING_TIMEOUT_MS,
};
pub use error::{CoreError, CoreResult};
pub use logging::{init_logging, parse_level};
pub use paths::Paths;
pub use settings::{LiveSettings, SettingsProvider};
