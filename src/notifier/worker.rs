//! Notifier loops: event fan-out and queue delivery

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use super::dispatch::Dispatcher;
use super::events::EventProcessor;
use super::NotifierStats;
use crate::database::{Database, DbError, FetchLimit};
use crate::runtime::Shutdown;

/// Drain the event queue every `interval`
pub async fn event_loop(
    database: Arc<Database>,
    processor: Arc<EventProcessor>,
    stats: Arc<NotifierStats>,
    interval: Duration,
    mut shutdown: Shutdown,
) {
    let mut ticker = tokio::time::interval(interval);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if let Err(e) = drain_events(&database, &processor, &stats) {
                    tracing::error!(error = %e, "Failed to process events");
                }
            }
            _ = shutdown.wait() => {
                tracing::info!("Event processor shutting down");
                break;
            }
        }
    }
}

fn drain_events(database: &Database, processor: &EventProcessor, stats: &NotifierStats) -> Result<(), DbError> {
    while let Some(event) = database.fetch_event()? {
        stats.events.fetch_add(1, Ordering::Relaxed);
        match processor.process(&event) {
            Ok(scheduled) => {
                stats.scheduled.fetch_add(scheduled as u64, Ordering::Relaxed);
            }
            Err(e) => {
                tracing::error!(trigger_id = %event.trigger_id, error = %e, "Failed to schedule event");
            }
        }
    }
    Ok(())
}

/// Fetch due notifications every `interval` and deliver them
pub async fn fetch_loop(
    database: Arc<Database>,
    dispatcher: Arc<Dispatcher>,
    stats: Arc<NotifierStats>,
    limit: FetchLimit,
    interval: Duration,
    mut shutdown: Shutdown,
) {
    let mut ticker = tokio::time::interval(interval);
    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = shutdown.wait() => {
                tracing::info!("Notification fetcher shutting down");
                break;
            }
        }

        // the bounded fetch sleeps between conflicting attempts
        let db = database.clone();
        let fetched = match tokio::task::spawn_blocking(move || db.fetch_notifications(limit)).await {
            Ok(Ok(fetched)) => fetched,
            Ok(Err(e)) => {
                tracing::error!(error = %e, "Failed to fetch notifications");
                continue;
            }
            Err(e) => {
                tracing::error!(error = %e, "Notification fetch task failed");
                continue;
            }
        };
        if fetched.is_empty() {
            continue;
        }

        match dispatcher.dispatch(fetched).await {
            Ok(report) => {
                stats.sent.fetch_add(report.sent as u64, Ordering::Relaxed);
                stats.failed.fetch_add(report.failed as u64, Ordering::Relaxed);
                tracing::debug!(
                    sent = report.sent,
                    resent = report.resent,
                    failed = report.failed,
                    "Notifications dispatched"
                );
            }
            Err(e) => tracing::error!(error = %e, "Failed to record delivery results"),
        }
    }
}
