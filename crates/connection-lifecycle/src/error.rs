//! Lifecycle error types.

use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum LifecycleError {
    /// An event arrived that the current state does not accept.
    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("adbd did not reach {state} within {timeout:?}")]
    DaemonTimeout {
        state: &'static str,
        timeout: Duration,
    },

    #[error("Daemon control failed: {0}")]
    Daemon(String),

    #[error("Event queue closed")]
    QueueClosed,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type LifecycleResult<T> = Result<T, LifecycleError>;
