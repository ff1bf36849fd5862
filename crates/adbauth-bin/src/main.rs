//! adbauthctl - inspect and maintain adb host authorization stores.

mod commands;

use std::path::PathBuf;

use adbauth_config_and_utils::{init_logging, Config, Paths, SystemClock};
use clap::{Parser, Subcommand};
use commands::Context;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "adbauthctl")]
#[command(about = "Inspect and maintain adb host authorization stores")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log level (trace, debug, info, warn, error). Defaults to the configured level
    #[arg(short, long, global = true)]
    log_level: Option<String>,

    /// Directory holding adb_keys, the ledger and adbauth.json. Defaults to /data/misc/adb
    #[arg(long, global = true)]
    base_dir: Option<PathBuf>,

    /// Read-only system key file
    #[arg(long, global = true)]
    system_keys: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the key files and the raw ledger
    Dump,
    /// List paired hosts with last connection and authorization state
    List,
    /// Print the fingerprint of a public key
    Fingerprint {
        /// Key line, `<base64> [user@host]`
        key: String,
    },
    /// Remove the grant for a fingerprint
    Revoke { fingerprint: String },
    /// Drop expired grants and write the stores
    Sweep,
    /// Delete every grant and trusted network
    Clear,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let mut paths = match cli.base_dir {
        Some(base) => Paths::with_base_dir(base),
        None => Paths::new(),
    };
    if let Some(system_keys) = cli.system_keys {
        paths = paths.with_system_keys_file(system_keys);
    }
    let config = Config::load(&paths)?;

    init_logging(cli.log_level.as_deref().unwrap_or(&config.log_level));
    tracing::debug!(data_dir = %paths.data_dir().display(), "adbauthctl starting");

    let ctx = Context::new(paths, config, Arc::new(SystemClock));
    let output = match cli.command {
        Commands::Dump => commands::dump(&ctx),
        Commands::List => commands::list(&ctx)?,
        Commands::Fingerprint { key } => commands::fingerprint(&key)?,
        Commands::Revoke { fingerprint } => commands::revoke(&ctx, &fingerprint)?,
        Commands::Sweep => commands::sweep(&ctx),
        Commands::Clear => commands::clear(&ctx),
    };
    println!("{output}");

    Ok(())
}
