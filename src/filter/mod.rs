//! Metric intake
//!
//! Points arrive over the graphite plaintext protocol, are matched against
//! the pattern set of all triggers and written in batches. Points matching
//! nothing are dropped.

pub mod listener;
pub mod matcher;
pub mod parser;
pub mod patterns;
pub mod retention;
pub mod writer;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::config::{ConfigError, FilterConfig};
use crate::database::{Database, DbError};
use crate::runtime::Shutdown;

pub use matcher::MetricMatcher;
pub use parser::{parse_line, ParseError, ParsedMetric};
pub use patterns::PatternIndex;
pub use retention::RetentionRules;

/// Points buffered between the listener and the writer
const POINTS_BUFFER: usize = 16384;

/// Intake counters
#[derive(Debug, Default)]
pub struct FilterStats {
    pub received: AtomicU64,
    pub invalid: AtomicU64,
    pub matched: AtomicU64,
    pub errors: AtomicU64,
}

impl FilterStats {
    pub fn matched(&self) -> u64 {
        self.matched.load(Ordering::Relaxed)
    }
}

pub struct FilterService {
    config: FilterConfig,
    database: Arc<Database>,
    matcher: Arc<MetricMatcher>,
    stats: Arc<FilterStats>,
}

impl FilterService {
    /// Create a new filter service
    pub fn new(config: &FilterConfig, database: Arc<Database>) -> Result<Self, ConfigError> {
        let retentions = RetentionRules::new(&config.retentions, config.default_retention_secs)?;
        Ok(Self {
            matcher: Arc::new(MetricMatcher::new(
                retentions,
                Duration::from_secs(config.unknown_metric_ttl_secs),
            )),
            config: config.clone(),
            database,
            stats: Arc::new(FilterStats::default()),
        })
    }

    pub fn stats(&self) -> &Arc<FilterStats> {
        &self.stats
    }

    /// Reload the pattern set from the store
    pub fn refresh_patterns(&self) -> Result<bool, DbError> {
        Ok(self.matcher.refresh(self.database.patterns()?))
    }

    pub async fn bind(&self) -> std::io::Result<TcpListener> {
        TcpListener::bind(&self.config.listen).await
    }

    /// Run the listener, the writer and the pattern refresher until shutdown
    pub fn start(self: Arc<Self>, listener: TcpListener, shutdown: Shutdown) -> JoinHandle<()> {
        tokio::spawn(async move {
            if let Err(e) = self.refresh_patterns() {
                tracing::error!(error = %e, "Initial pattern load failed");
            }

            let (tx, rx) = mpsc::channel(POINTS_BUFFER);
            let writer = writer::BatchWriter::new(
                self.database.clone(),
                self.matcher.clone(),
                self.stats.clone(),
                self.config.batch_size,
                Duration::from_millis(self.config.batch_timeout_ms.max(1)),
            );
            let writer = tokio::spawn(writer.run(rx));
            let refresher = tokio::spawn(self.clone().refresh_loop(shutdown.clone()));

            listener::serve(
                listener,
                tx,
                self.database.clock().clone(),
                self.stats.clone(),
                shutdown,
            )
            .await;

            let _ = refresher.await;
            let _ = writer.await;
            tracing::info!(
                received = self.stats.received.load(Ordering::Relaxed),
                matched = self.stats.matched(),
                "Filter stopped"
            );
        })
    }

    async fn refresh_loop(self: Arc<Self>, mut shutdown: Shutdown) {
        let mut ticker =
            tokio::time::interval(Duration::from_secs(self.config.patterns_refresh_secs.max(1)));
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.refresh_patterns() {
                        tracing::error!(error = %e, "Pattern refresh failed");
                    }
                }
                _ = shutdown.wait() => break,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::testing::database;
    use crate::model::Trigger;
    use crate::runtime::shutdown_channel;
    use tokio::io::AsyncWriteExt;

    #[tokio::test]
    async fn test_points_flow_to_store() {
        let (_store, db) = database(1_000);
        db.save_trigger(
            Trigger::new("t1", "cpu", "servers.*.cpu")
                .with_thresholds(Some(1.0), Some(2.0))
                .with_patterns(["servers.*.cpu"]),
        )
        .unwrap();
        let db = Arc::new(db);

        let config = FilterConfig {
            listen: "127.0.0.1:0".into(),
            batch_timeout_ms: 10,
            ..Default::default()
        };
        let service = Arc::new(FilterService::new(&config, db.clone()).unwrap());
        let listener = service.bind().await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (trigger, shutdown) = shutdown_channel();
        let handle = service.clone().start(listener, shutdown);

        let mut stream = tokio::net::TcpStream::connect(addr).await.unwrap();
        stream
            .write_all(b"servers.a.cpu 5 970\nservers.a.mem 1 970\ngarbage\nservers.b.cpu 7 -1\n")
            .await
            .unwrap();
        stream.flush().await.unwrap();

        tokio::time::timeout(Duration::from_secs(5), async {
            while service.stats().matched() < 2 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();

        let values = db
            .values(&["servers.a.cpu".into(), "servers.b.cpu".into()], 0, 2_000)
            .unwrap();
        assert_eq!(values["servers.a.cpu"][0].value, 5.0);
        assert_eq!(values["servers.b.cpu"][0].timestamp, 1_000);
        assert_eq!(service.stats().invalid.load(Ordering::Relaxed), 1);

        trigger.trigger();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
