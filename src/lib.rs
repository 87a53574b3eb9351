//! Moira: distributed time-series alerting core
//!
//! Graphite metrics are matched against trigger patterns, triggers are
//! checked when their metrics change or stop reporting, and state changes
//! are turned into notifications for the contacts subscribed to the
//! trigger's tags.
//!
//! # Components
//!
//! - **Store**: sharded in-memory key-value engine with TTLs, atomic
//!   batches, optimistic transactions, scans, pub/sub and snapshots
//! - **Database**: entity operations and indexes over the store
//! - **Filter**: graphite plaintext intake and pattern matching
//! - **Checker**: trigger evaluation, NODATA detection, worker pool
//! - **Notifier**: subscription fan-out, scheduling, throttling, delivery
//! - **Index**: searchable trigger index with saved result pages
//! - **Migrations**: versioned, reversible data rewrites
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use moira::database::Database;
//! use moira::model::Trigger;
//! use moira::store::{Clock, MemoryStore, SystemClock};
//!
//! let clock: Arc<dyn Clock> = Arc::new(SystemClock);
//! let store = Arc::new(MemoryStore::with_clock(clock.clone()));
//! let database = Database::new(store, clock);
//!
//! let trigger = Trigger::new("cpu", "CPU load", "servers.*.cpu")
//!     .with_thresholds(Some(80.0), Some(95.0))
//!     .with_tags(["prod"]);
//! database.save_trigger(trigger).unwrap();
//! ```

pub mod checker;
pub mod cluster;
pub mod config;
pub mod database;
pub mod filter;
pub mod index;
pub mod logging;
pub mod migrations;
pub mod model;
pub mod notifier;
pub mod runtime;
pub mod store;

// Re-export commonly used types
pub use config::{Config, ConfigError};
pub use database::{Database, DbError};
pub use runtime::{Runtime, Shutdown};
pub use store::{MemoryStore, Store, StoreError};
