//! Notifier
//!
//! Events raised by the checker are fanned out to subscribed contacts as
//! scheduled notifications. Due notifications are taken off the queue,
//! grouped into packages and handed to the sender of the contact's type.

pub mod dispatch;
pub mod events;
pub mod scheduler;
pub mod sender;
pub mod worker;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;

use crate::config::{ConfigError, NotifierConfig};
use crate::database::{Database, FetchLimit};
use crate::runtime::Shutdown;

pub use dispatch::{DispatchReport, Dispatcher};
pub use events::EventProcessor;
pub use scheduler::{NotificationScheduler, ThrottlingLevel, THROTTLING_LEVELS};
pub use sender::{LogSender, NotificationPackage, SendError, Sender, SenderRegistry, WebhookSender};

#[derive(Debug, Default)]
pub struct NotifierStats {
    pub events: AtomicU64,
    pub scheduled: AtomicU64,
    pub sent: AtomicU64,
    pub failed: AtomicU64,
}

impl NotifierStats {
    pub fn sent(&self) -> u64 {
        self.sent.load(Ordering::Relaxed)
    }
}

pub struct NotifierService {
    database: Arc<Database>,
    processor: Arc<EventProcessor>,
    dispatcher: Arc<Dispatcher>,
    limit: FetchLimit,
    interval: Duration,
    stats: Arc<NotifierStats>,
}

impl NotifierService {
    /// Create a new notifier with senders built from the configuration
    pub fn new(config: &NotifierConfig, database: Arc<Database>) -> Result<Self, ConfigError> {
        let senders = SenderRegistry::from_config(&config.senders)?;
        Ok(Self::with_senders(config, database, senders))
    }

    pub fn with_senders(config: &NotifierConfig, database: Arc<Database>, senders: SenderRegistry) -> Self {
        Self {
            processor: Arc::new(EventProcessor::new(database.clone())),
            dispatcher: Arc::new(Dispatcher::new(
                database.clone(),
                senders,
                config.max_fail_attempts,
                config.resend_delay_secs,
                config.front_uri.as_str(),
            )),
            database,
            limit: FetchLimit::from_config(config.fetch_limit),
            interval: Duration::from_millis(config.fetch_interval_ms.max(1)),
            stats: Arc::new(NotifierStats::default()),
        }
    }

    pub fn stats(&self) -> &Arc<NotifierStats> {
        &self.stats
    }

    /// Run the event processor and the delivery loop until shutdown
    pub fn start(self: Arc<Self>, shutdown: Shutdown) -> JoinHandle<()> {
        tokio::spawn(async move {
            let events = tokio::spawn(worker::event_loop(
                self.database.clone(),
                self.processor.clone(),
                self.stats.clone(),
                self.interval,
                shutdown.clone(),
            ));
            let fetcher = tokio::spawn(worker::fetch_loop(
                self.database.clone(),
                self.dispatcher.clone(),
                self.stats.clone(),
                self.limit,
                self.interval,
                shutdown,
            ));
            tracing::info!(limit = ?self.limit, "Notifier started");

            let _ = events.await;
            let _ = fetcher.await;
            tracing::info!(sent = self.stats.sent(), "Notifier stopped");
        })
    }
}
