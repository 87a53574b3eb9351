//! Offline maintenance tool
//!
//! Loads the daemon's snapshot, runs migrations or user maintenance and
//! writes the snapshot back. Run it while the daemon is stopped.
//!
//! Examples:
//! - `moira-cli --update --from-version 2.8`
//! - `moira-cli --downgrade --to-version 2.11`
//! - `moira-cli --cleanup`
//! - `moira-cli --user-del alice,bob`
//! - `moira-cli --from-user alice --to-user bob`

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use moira::config::Config;
use moira::database::Database;
use moira::migrations::{Migrator, UserMaintenance, Version};
use moira::runtime::open_store;
use moira::store::{Clock, Store, SystemClock};

#[derive(Debug, Parser)]
#[command(name = "moira-cli", version, about = "Moira data maintenance")]
struct Args {
    /// YAML configuration file; defaults are used when omitted
    #[arg(long)]
    config: Option<PathBuf>,

    /// Print the default configuration and exit
    #[arg(long)]
    default_config: bool,

    /// Apply forward migrations
    #[arg(long, requires = "from_version", conflicts_with = "downgrade")]
    update: bool,

    /// Release the data was written by
    #[arg(long, value_name = "VERSION")]
    from_version: Option<String>,

    /// Apply reverse migrations
    #[arg(long, requires = "to_version")]
    downgrade: bool,

    /// Release to bring the data back to
    #[arg(long, value_name = "VERSION")]
    to_version: Option<String>,

    /// Enable plotting on every subscription
    #[arg(long)]
    plotting: bool,

    /// Disable or delete users missing from the cleanup whitelist
    #[arg(long)]
    cleanup: bool,

    /// Delete the contacts and subscriptions of these users
    #[arg(long, value_delimiter = ',', value_name = "USERS")]
    user_del: Vec<String>,

    /// Move contacts and subscriptions from this user
    #[arg(long, requires = "to_user")]
    from_user: Option<String>,

    /// Move contacts and subscriptions to this user
    #[arg(long, requires = "from_user")]
    to_user: Option<String>,
}

fn main() -> ExitCode {
    let args = Args::parse();
    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("moira-cli: {}", e);
            tracing::error!(error = %e, "Maintenance failed");
            ExitCode::FAILURE
        }
    }
}

fn run(args: Args) -> Result<(), Box<dyn std::error::Error>> {
    if args.default_config {
        print!("{}", Config::default_yaml()?);
        return Ok(());
    }

    let config = match &args.config {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };
    moira::logging::init(&config.log.level);
    maintain(&args, &config)
}

/// Apply the requested operations to the snapshot named by `config`
fn maintain(args: &Args, config: &Config) -> Result<(), Box<dyn std::error::Error>> {
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let (memory, snapshots) = open_store(&config.store, clock.clone())?;
    let store: Arc<dyn Store> = memory.clone();
    let database = Arc::new(Database::with_options(store, clock, config.database_options()));

    let migrator = Migrator::new(database.clone());
    let users = UserMaintenance::new(database);

    if let Some(version) = args.from_version.as_deref().filter(|_| args.update) {
        let from: Version = version.parse()?;
        let applied = migrator.update(from)?;
        tracing::info!(from = %from, applied = applied.len(), "Update finished");
    }
    if let Some(version) = args.to_version.as_deref().filter(|_| args.downgrade) {
        let to: Version = version.parse()?;
        let reverted = migrator.downgrade(to)?;
        tracing::info!(to = %to, reverted = reverted.len(), "Downgrade finished");
    }
    if args.plotting {
        users.enable_plotting()?;
    }
    if args.cleanup {
        users.cleanup(&config.cleanup.whitelist, config.cleanup.delete)?;
    }
    if !args.user_del.is_empty() {
        let removed = users.delete_users(&args.user_del)?;
        tracing::info!(users = args.user_del.len(), removed, "Users deleted");
    }
    if let (Some(from), Some(to)) = (&args.from_user, &args.to_user) {
        users.transfer(from, to)?;
    }

    if let Some(manager) = snapshots {
        let meta = manager.save(&memory)?;
        tracing::info!(keys = meta.keys, path = %manager.path().display(), "Snapshot written");
    }
    Ok(())
}
