//! Moira daemon
//!
//! Run with: cargo run -- --config moira.yml
//!
//! Runs the filter, checker, notifier, search index and cleanup services
//! over one in-memory store, snapshotting it periodically and on shutdown.
//! RUST_LOG overrides the configured log level.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use moira::checker::{CheckerService, DataCleaner, LocalSource, MetricSources};
use moira::config::Config;
use moira::filter::FilterService;
use moira::index::TriggerIndex;
use moira::notifier::NotifierService;
use moira::runtime::{open_store, Runtime};
use moira::store::{Clock, ExpiryWorker, SnapshotWorker, Store, SystemClock};

#[derive(Debug, Parser)]
#[command(name = "moira", version, about = "Time-series alerting daemon")]
struct Args {
    /// YAML configuration file; defaults are used when omitted
    #[arg(long)]
    config: Option<PathBuf>,

    /// Print the default configuration and exit
    #[arg(long)]
    default_config: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    if args.default_config {
        print!("{}", Config::default_yaml()?);
        return Ok(());
    }

    let config = match &args.config {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };
    moira::logging::init(&config.log.level);

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let (memory, snapshots) = open_store(&config.store, clock.clone())?;

    let expiry = Arc::new(ExpiryWorker::new(
        memory.clone(),
        Duration::from_millis(config.store.expiry_interval_ms.max(1)),
    ));
    expiry.clone().start();
    let snapshot_worker = snapshots.map(|manager| {
        let worker = Arc::new(SnapshotWorker::new(
            memory.clone(),
            manager,
            Duration::from_secs(config.store.snapshot_interval_secs.max(1)),
        ));
        worker.clone().start();
        worker
    });

    let store: Arc<dyn Store> = memory.clone();
    let runtime = Runtime::new(store, clock, config.database_options());
    let database = runtime.database().clone();
    let mut handles = Vec::new();

    if config.filter.enabled {
        let filter = Arc::new(FilterService::new(&config.filter, database.clone())?);
        let listener = filter.bind().await?;
        tracing::info!(listen = %config.filter.listen, "Filter listening");
        handles.push(filter.start(listener, runtime.shutdown_signal()));
    }

    if config.checker.enabled {
        let sources = MetricSources::new(Arc::new(LocalSource::new(database.clone())));
        let checker = Arc::new(CheckerService::new(&config.checker, database.clone(), sources));
        handles.push(checker.start(runtime.shutdown_signal()));
    }

    if config.notifier.enabled {
        let notifier = Arc::new(NotifierService::new(&config.notifier, database.clone())?);
        handles.push(notifier.start(runtime.shutdown_signal()));
    }

    if config.search.enabled {
        let index = Arc::new(TriggerIndex::new(database.clone()));
        handles.push(index.start(
            Duration::from_secs(config.search.reindex_interval_secs.max(1)),
            runtime.shutdown_signal(),
        ));
    }

    if config.cleanup.enabled {
        let cleaner = Arc::new(DataCleaner::new(&config.cleanup, database.clone()));
        handles.push(cleaner.start(runtime.shutdown_signal()));
    }

    println!(
        r#"
  __  __       _
 |  \/  | ___ (_)_ __ __ _
 | |\/| |/ _ \| | '__/ _` |
 | |  | | (_) | | | | (_| |
 |_|  |_|\___/|_|_|  \__,_|

 Time-Series Alerting
 Version: {}
"#,
        env!("CARGO_PKG_VERSION")
    );
    tracing::info!(
        shards = config.store.shards,
        services = handles.len(),
        "Moira started"
    );

    tokio::signal::ctrl_c().await?;
    runtime.shutdown();
    for handle in handles {
        if let Err(e) = handle.await {
            tracing::error!(error = %e, "Service task failed");
        }
    }

    expiry.stop();
    if let Some(worker) = snapshot_worker {
        worker.stop();
        worker.snapshot_once();
    }
    tracing::info!("Moira stopped");
    Ok(())
}
