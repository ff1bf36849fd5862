//! Subcommand implementations. Each returns the text printed to stdout.

use adbauth_config_and_utils::{Clock, Config, Paths};
use adbauth_ledger::{AuthorizationLedger, LedgerStores, RecordingPersist};
use adbauth_storage::TrustedKeyStorage;
use chrono::{DateTime, Utc};
use connection_lifecycle::PairedDevice;
use serde::Serialize;
use std::fmt::Write as _;
use std::sync::Arc;
use thiserror::Error;
use tracing::info;

#[derive(Error, Debug)]
pub enum CommandError {
    #[error("Not a valid adb public key")]
    InvalidKey,

    #[error("No grant with fingerprint {0}")]
    UnknownFingerprint(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type CommandResult<T> = Result<T, CommandError>;

pub struct Context {
    paths: Paths,
    config: Config,
    clock: Arc<dyn Clock>,
}

impl Context {
    pub fn new(paths: Paths, config: Config, clock: Arc<dyn Clock>) -> Self {
        Self {
            paths,
            config,
            clock,
        }
    }

    /// Open the ledger. Persist requests are only counted; commands that
    /// change anything write the stores themselves.
    fn open_ledger(&self) -> AuthorizationLedger {
        AuthorizationLedger::open(
            LedgerStores::from_paths(&self.paths),
            self.clock.clone(),
            Arc::new(self.config.clone()),
            Arc::new(RecordingPersist::new()),
        )
    }
}

/// One row of `list`.
#[derive(Debug, Serialize)]
pub struct DeviceRow {
    #[serde(flatten)]
    pub device: PairedDevice,
    pub system: bool,
    pub authorized: bool,
    pub last_connection_ms: i64,
    pub last_connection: Option<String>,
}

pub fn dump(ctx: &Context) -> String {
    let mut out = String::new();

    for (label, path) in [
        ("user keys", ctx.paths.user_keys_file()),
        ("system keys", ctx.paths.system_keys_file().to_path_buf()),
    ] {
        let keys = TrustedKeyStorage::new(&path).load_keys();
        let _ = writeln!(out, "# {label} ({})", path.display());
        for key in &keys {
            let _ = writeln!(out, "{}  {key}", key_fingerprint::fingerprint(key));
        }
        out.push('\n');
    }

    let ledger_path = ctx.paths.ledger_file();
    let _ = writeln!(out, "# ledger ({})", ledger_path.display());
    match std::fs::read_to_string(&ledger_path) {
        Ok(content) => out.push_str(&content),
        Err(e) => {
            let _ = writeln!(out, "<unavailable: {e}>");
        }
    }
    out.trim_end().to_string()
}

pub fn list(ctx: &Context) -> CommandResult<String> {
    let ledger = ctx.open_ledger();

    let grants = ledger.keys().map(|key| (key, false));
    let system = ledger.system_keys().iter().map(|key| (key, true));
    let rows: Vec<DeviceRow> = grants
        .chain(system)
        .map(|(key, system)| {
            let last_connection_ms = ledger.last_connection_time(key);
            DeviceRow {
                device: PairedDevice::from_key(key, false),
                system,
                authorized: ledger.is_key_authorized(key),
                last_connection_ms,
                last_connection: (!system)
                    .then(|| DateTime::<Utc>::from_timestamp_millis(last_connection_ms))
                    .flatten()
                    .map(|time| time.to_rfc3339()),
            }
        })
        .collect();

    Ok(serde_json::to_string_pretty(&rows)?)
}

pub fn fingerprint(key: &str) -> CommandResult<String> {
    let fp = key_fingerprint::fingerprint(key);
    if fp.is_empty() {
        return Err(CommandError::InvalidKey);
    }
    Ok(fp)
}

pub fn revoke(ctx: &Context, fp: &str) -> CommandResult<String> {
    let mut ledger = ctx.open_ledger();
    let key = ledger
        .find_key_from_fingerprint(fp)
        .ok_or_else(|| CommandError::UnknownFingerprint(fp.to_string()))?;

    ledger.remove_key(&key);
    ledger.persist();
    info!(key_fingerprint = %fp, "Grant revoked");
    Ok(format!(
        "Revoked {fp} ({})",
        key_fingerprint::hostname_label(&key)
    ))
}

pub fn sweep(ctx: &Context) -> String {
    let mut ledger = ctx.open_ledger();
    let before = ledger.entries().grants.len();

    ledger.update();
    ledger.persist();

    let removed = before - ledger.entries().grants.len();
    format!(
        "Removed {removed} expired grant(s), {} remaining",
        ledger.entries().grants.len()
    )
}

pub fn clear(ctx: &Context) -> String {
    let mut ledger = ctx.open_ledger();
    let grants = ledger.entries().grants.len();
    let networks = ledger.entries().trusted_networks.len();

    ledger.delete_all();
    info!(grants, networks, "Authorizations cleared");
    format!("Cleared {grants} grant(s) and {networks} trusted network(s)")
}
