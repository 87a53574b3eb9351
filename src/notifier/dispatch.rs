//! Delivery of fetched notifications

use std::collections::BTreeMap;
use std::sync::Arc;

use futures::future::join_all;

use super::sender::{NotificationPackage, SendError, SenderRegistry};
use crate::database::{Database, DbError};
use crate::model::{NotificationEventHistoryItem, ScheduledNotification};

/// Outcome counts of one dispatch round
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DispatchReport {
    pub sent: usize,
    pub resent: usize,
    pub failed: usize,
}

pub struct Dispatcher {
    database: Arc<Database>,
    senders: SenderRegistry,
    max_fail_attempts: u32,
    resend_delay: i64,
    front_uri: String,
}

impl Dispatcher {
    /// Create a new dispatcher
    pub fn new(
        database: Arc<Database>,
        senders: SenderRegistry,
        max_fail_attempts: u32,
        resend_delay: i64,
        front_uri: impl Into<String>,
    ) -> Self {
        Self {
            database,
            senders,
            max_fail_attempts,
            resend_delay,
            front_uri: front_uri.into(),
        }
    }

    /// Send notifications grouped by contact, trigger and throttling flag.
    /// Packages are delivered concurrently.
    pub async fn dispatch(&self, notifications: Vec<ScheduledNotification>) -> Result<DispatchReport, DbError> {
        let mut packages: BTreeMap<(String, String, bool), Vec<ScheduledNotification>> = BTreeMap::new();
        for notification in notifications {
            let key = (
                notification.contact.id.clone(),
                notification.trigger.id.clone(),
                notification.throttled,
            );
            packages.entry(key).or_default().push(notification);
        }

        let outcomes = join_all(
            packages
                .into_values()
                .map(|group| async move {
                    let result = self.send_package(&group).await;
                    (group, result)
                }),
        )
        .await;

        let mut report = DispatchReport::default();
        let mut first_error = None;
        for (group, result) in outcomes {
            if let Err(e) = self.settle(group, result, &mut report) {
                tracing::error!(error = %e, "Failed to record delivery outcome");
                first_error.get_or_insert(e);
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(report),
        }
    }

    /// Record the outcome of one package. Every notification of the group
    /// is handled even when an earlier store write failed.
    fn settle(
        &self,
        group: Vec<ScheduledNotification>,
        result: Result<(), SendError>,
        report: &mut DispatchReport,
    ) -> Result<(), DbError> {
        match result {
            Ok(()) => {
                report.sent += group.len();
                let history: Vec<NotificationEventHistoryItem> = group
                    .iter()
                    .map(|n| NotificationEventHistoryItem::from_event(&n.event, n.contact.id.as_str()))
                    .collect();
                self.database.push_history(&history)
            }
            Err(SendError::BrokenContact(reason)) => {
                tracing::warn!(
                    contact_id = %group[0].contact.id,
                    reason = %reason,
                    "Contact is broken, dropping notifications"
                );
                report.failed += group.len();
                let mut outcome = Ok(());
                for notification in &group {
                    if let Err(e) = self.database.record_failed_notification(notification) {
                        outcome = Err(e);
                    }
                }
                outcome
            }
            Err(SendError::Failed(reason)) => self.reschedule(group, &reason, report),
        }
    }

    async fn send_package(&self, group: &[ScheduledNotification]) -> Result<(), SendError> {
        let first = &group[0];
        let Some(sender) = self.senders.get(&first.contact.contact_type) else {
            return Err(SendError::Failed(format!(
                "no sender for contact type {}",
                first.contact.contact_type
            )));
        };
        let package = NotificationPackage {
            contact: first.contact.clone(),
            trigger: first.trigger.clone(),
            events: group.iter().map(|n| n.event.clone()).collect(),
            throttled: first.throttled,
            plotting: first.plotting.clone(),
            trigger_uri: format!("{}/trigger/{}", self.front_uri.trim_end_matches('/'), first.trigger.id),
        };
        sender.send(&package).await
    }

    /// Requeue failed notifications after the resend delay, giving up on
    /// those that failed too often
    fn reschedule(
        &self,
        group: Vec<ScheduledNotification>,
        reason: &str,
        report: &mut DispatchReport,
    ) -> Result<(), DbError> {
        let now = self.database.now();
        let mut retry = Vec::new();
        let mut outcome = Ok(());
        for mut notification in group {
            notification.send_fail += 1;
            if notification.send_fail >= self.max_fail_attempts {
                tracing::error!(
                    contact_id = %notification.contact.id,
                    trigger_id = %notification.trigger.id,
                    attempts = notification.send_fail,
                    reason = %reason,
                    "Giving up on notification"
                );
                report.failed += 1;
                if let Err(e) = self.database.record_failed_notification(&notification) {
                    outcome = Err(e);
                }
            } else {
                notification.timestamp = now + self.resend_delay;
                retry.push(notification);
            }
        }
        if !retry.is_empty() {
            tracing::warn!(
                contact_id = %retry[0].contact.id,
                notifications = retry.len(),
                reason = %reason,
                "Send failed, rescheduling"
            );
            self.database.add_notifications(&retry)?;
            report.resent += retry.len();
        }
        outcome
    }
}
