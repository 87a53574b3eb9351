//! Evaluation of a single trigger

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use super::expression::{Expression, ExpressionContext, ExpressionError};
use super::source::{FetchResult, MetricSources, SourceError};
use crate::database::{Database, DbError};
use crate::model::trigger::DEFAULT_TTL;
use crate::model::{CheckData, MetricState, NotificationEvent, State, Trigger};

/// Check errors
#[derive(Debug, thiserror::Error)]
pub enum CheckError {
    #[error("trigger {0} not found")]
    TriggerNotFound(String),

    #[error("database error: {0}")]
    Database(#[from] DbError),

    #[error(transparent)]
    Source(#[from] SourceError),

    #[error(transparent)]
    Expression(#[from] ExpressionError),

    #[error("target t{index} resolved to {count} series, expected one")]
    AmbiguousTarget { index: usize, count: usize },
}

impl CheckError {
    /// Errors caused by the trigger itself rather than the infrastructure.
    /// These put the trigger into EXCEPTION instead of failing the check.
    pub fn is_evaluation_error(&self) -> bool {
        match self {
            CheckError::Source(SourceError::Database(_)) => false,
            CheckError::Source(_) | CheckError::Expression(_) | CheckError::AmbiguousTarget { .. } => true,
            CheckError::TriggerNotFound(_) | CheckError::Database(_) => false,
        }
    }
}

struct Evaluation {
    metrics: BTreeMap<String, MetricState>,
    events: Vec<NotificationEvent>,
}

/// Evaluates triggers against their metric source
pub struct TriggerChecker {
    database: Arc<Database>,
    sources: MetricSources,
}

impl TriggerChecker {
    /// Create a new trigger checker
    pub fn new(database: Arc<Database>, sources: MetricSources) -> Self {
        Self { database, sources }
    }

    /// Evaluate a trigger, raise events for state changes and store the new
    /// check data. The caller holds the trigger's check lock.
    pub async fn check(&self, trigger_id: &str) -> Result<CheckData, CheckError> {
        let now = self.database.now();
        let trigger = match self.database.get_trigger(trigger_id) {
            Ok(trigger) => trigger,
            Err(DbError::Nil) => return Err(CheckError::TriggerNotFound(trigger_id.to_string())),
            Err(e) => return Err(e.into()),
        };
        let (last, had_prior) = match self.database.get_last_check(trigger_id) {
            Ok(check) => (check, true),
            Err(DbError::Nil) => (CheckData::initial(now), false),
            Err(e) => return Err(e.into()),
        };

        let mut check = last.clone();
        check.timestamp = now;
        check.message = None;
        let mut events = Vec::new();

        let state = match self.evaluate(&trigger, &last, now).await {
            Ok(evaluation) => {
                check.metrics = evaluation.metrics;
                check.last_successful_check_timestamp = now;
                events = evaluation.events;
                trigger_state(&trigger, &check)
            }
            Err(e) if e.is_evaluation_error() => {
                tracing::warn!(trigger_id = %trigger.id, error = %e, "Trigger evaluation failed");
                check.message = Some(e.to_string());
                State::Exception
            }
            Err(e) => return Err(e),
        };

        if state != last.state {
            check.event_timestamp = now;
            if had_prior && !trigger_suppressed(&trigger, &last, now) {
                let mut event = NotificationEvent::new(trigger.id.as_str(), "", state, last.state, now);
                event.is_trigger_event = true;
                event.message = check.message.clone();
                events.push(event);
            }
        }
        check.state = state;
        check.update_score();

        for event in &events {
            self.database.push_event(event)?;
        }
        self.database.set_last_check(&trigger.id, &check)?;

        tracing::debug!(
            trigger_id = %trigger.id,
            state = %check.state,
            score = check.score,
            events = events.len(),
            "Trigger checked"
        );
        Ok(check)
    }

    async fn fetch_targets(&self, trigger: &Trigger, from: i64, now: i64) -> Result<Vec<FetchResult>, CheckError> {
        let source = self.sources.get(trigger.trigger_source)?;
        let mut fetched = Vec::with_capacity(trigger.targets.len());
        for target in &trigger.targets {
            fetched.push(source.fetch(target, from, now, true).await?);
        }
        Ok(fetched)
    }

    async fn evaluate(&self, trigger: &Trigger, last: &CheckData, now: i64) -> Result<Evaluation, CheckError> {
        let expression = Expression::for_trigger(trigger)?;
        let window = if trigger.ttl > 0 { trigger.ttl } else { DEFAULT_TTL };
        let mut fetched = self.fetch_targets(trigger, now - window, now).await?.into_iter();

        let main = fetched.next().unwrap_or_default();
        let mut extra = BTreeMap::new();
        for (offset, result) in fetched.enumerate() {
            let index = offset + 2;
            if result.series.len() > 1 {
                return Err(CheckError::AmbiguousTarget {
                    index,
                    count: result.series.len(),
                });
            }
            if let Some(point) = result.series.first().and_then(|s| s.last()) {
                extra.insert(format!("t{}", index), point.value);
            }
        }

        let mut points = BTreeMap::new();
        for series in &main.series {
            points.insert(series.name.as_str(), series.last().copied());
        }
        let names: BTreeSet<&str> = points
            .keys()
            .copied()
            .chain(last.metrics.keys().map(String::as_str))
            .collect();

        let schedule_blocks = trigger.schedule.as_ref().map(|s| !s.allows(now)).unwrap_or(false);
        let mut evaluation = Evaluation {
            metrics: BTreeMap::new(),
            events: Vec::new(),
        };

        for name in names {
            let old = last.metrics.get(name);
            let old_state = old.map(|m| m.state).unwrap_or(State::NoData);
            let mut metric = old.cloned().unwrap_or_default();

            match points.get(name).copied().flatten() {
                Some(point) => {
                    let mut values = extra.clone();
                    values.insert("t1".to_string(), point.value);
                    let ctx = ExpressionContext {
                        values,
                        warn_value: trigger.warn_value,
                        error_value: trigger.error_value,
                        prev_state: old_state,
                    };
                    metric.state = expression.evaluate(&ctx)?;
                    metric.timestamp = point.timestamp;
                    metric.values = ctx.values;
                }
                None if trigger.ttl == 0 => {
                    if let Some(old) = old {
                        evaluation.metrics.insert(name.to_string(), old.clone());
                    }
                    continue;
                }
                None => match trigger.ttl_state.to_state() {
                    Some(state) => metric.state = state,
                    None => {
                        tracing::debug!(trigger_id = %trigger.id, metric = %name, "Removing metric without data");
                        continue;
                    }
                },
            }

            if metric.state != old_state {
                metric.event_timestamp = now;
                let is_new = old.is_none();
                if is_new && metric.state == State::Ok {
                    metric.suppressed = false;
                } else {
                    metric.suppressed = schedule_blocks
                        || last.metric_in_maintenance(name, now)
                        || (is_new && trigger.mute_new_metrics);
                    if !metric.suppressed {
                        let mut event = NotificationEvent::new(trigger.id.as_str(), name, metric.state, old_state, now);
                        event.values = metric.values.clone();
                        evaluation.events.push(event);
                    }
                }
            }
            evaluation.metrics.insert(name.to_string(), metric);
        }
        Ok(evaluation)
    }
}

/// Trigger-level state after a successful evaluation
fn trigger_state(trigger: &Trigger, check: &CheckData) -> State {
    if check.metrics.is_empty() && trigger.ttl > 0 {
        return trigger.ttl_state.to_state().unwrap_or(State::Ok);
    }
    State::Ok
}

fn trigger_suppressed(trigger: &Trigger, last: &CheckData, now: i64) -> bool {
    last.in_maintenance(now) || trigger.schedule.as_ref().map(|s| !s.allows(now)).unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checker::source::LocalSource;
    use crate::database::testing::database;
    use crate::model::{MatchedMetric, TtlState};
    use crate::store::testing::RecordingStore;
    use std::collections::HashMap;
    use std::time::Duration;

    const PATTERN: &str = "servers.*.cpu";

    fn setup() -> (Arc<RecordingStore>, Arc<Database>, TriggerChecker) {
        let (store, db) = database(1_000);
        let db = Arc::new(db);
        let sources = MetricSources::new(Arc::new(LocalSource::new(db.clone())));
        let checker = TriggerChecker::new(db.clone(), sources);
        (store, db, checker)
    }

    fn point(metric: &str, value: f64, ts: i64) -> MatchedMetric {
        MatchedMetric::new(metric, value, ts, 60).with_patterns([PATTERN])
    }

    fn drain_events(db: &Database) -> Vec<NotificationEvent> {
        std::iter::from_fn(|| db.fetch_event().unwrap()).collect()
    }

    fn rising() -> Trigger {
        Trigger::new("t1", "cpu", PATTERN)
            .with_thresholds(Some(10.0), Some(20.0))
            .with_patterns([PATTERN])
    }

    #[tokio::test]
    async fn test_transitions_and_nodata() {
        let (store, db, checker) = setup();
        db.save_trigger(rising()).unwrap();
        db.save_points(&[point("servers.a.cpu", 5.0, 990), point("servers.b.cpu", 25.0, 990)])
            .unwrap();

        let check = checker.check("t1").await.unwrap();
        assert_eq!(check.state, State::Ok);
        assert_eq!(check.metrics["servers.a.cpu"].state, State::Ok);
        assert_eq!(check.metrics["servers.b.cpu"].state, State::Error);
        assert_eq!(check.metrics["servers.b.cpu"].values["t1"], 25.0);
        assert_eq!(check.score, 100);
        assert_eq!(check.last_successful_check_timestamp, 1_000);

        let events = drain_events(&db);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].metric, "servers.b.cpu");
        assert_eq!(events[0].old_state, State::NoData);
        assert_eq!(events[0].state, State::Error);
        assert_eq!(db.bad_state_trigger_ids().unwrap(), vec!["t1"]);

        store.clock().advance(Duration::from_secs(700));
        let check = checker.check("t1").await.unwrap();
        assert!(check.metrics.values().all(|m| m.state == State::NoData));
        let events = drain_events(&db);
        assert_eq!(events.len(), 2);
        assert!(events.iter().all(|e| e.state == State::NoData));

        // no repeated event while the metric stays without data
        checker.check("t1").await.unwrap();
        assert!(drain_events(&db).is_empty());
    }

    #[tokio::test]
    async fn test_maintenance_suppresses_events() {
        let (_store, db, checker) = setup();
        db.save_trigger(rising()).unwrap();
        db.save_points(&[point("servers.a.cpu", 5.0, 990)]).unwrap();
        checker.check("t1").await.unwrap();

        let mut maintenance = HashMap::new();
        maintenance.insert("servers.a.cpu".to_string(), 5_000);
        db.set_metrics_maintenance("t1", &maintenance).unwrap();
        db.save_points(&[point("servers.a.cpu", 15.0, 1_000)]).unwrap();

        let check = checker.check("t1").await.unwrap();
        let metric = &check.metrics["servers.a.cpu"];
        assert_eq!(metric.state, State::Warn);
        assert!(metric.suppressed);
        assert_eq!(metric.maintenance, 5_000);
        assert!(drain_events(&db).is_empty());
    }

    #[tokio::test]
    async fn test_mute_new_metrics() {
        let (_store, db, checker) = setup();
        let mut trigger = rising();
        trigger.mute_new_metrics = true;
        db.save_trigger(trigger).unwrap();
        db.save_points(&[point("servers.a.cpu", 50.0, 990)]).unwrap();

        let check = checker.check("t1").await.unwrap();
        assert_eq!(check.metrics["servers.a.cpu"].state, State::Error);
        assert!(drain_events(&db).is_empty());
    }

    #[tokio::test]
    async fn test_deleted_metrics_and_trigger_nodata() {
        let (store, db, checker) = setup();
        db.save_trigger(rising().with_ttl(600, TtlState::Del)).unwrap();
        db.save_points(&[point("servers.a.cpu", 5.0, 990)]).unwrap();
        checker.check("t1").await.unwrap();

        store.clock().advance(Duration::from_secs(700));
        let check = checker.check("t1").await.unwrap();
        assert!(check.metrics.is_empty());
        assert_eq!(check.state, State::Ok);
    }

    #[tokio::test]
    async fn test_expression_failure_is_exception() {
        let (_store, db, checker) = setup();
        db.save_trigger(
            Trigger::new("t1", "cpu", PATTERN)
                .with_expression("t1 > ")
                .with_patterns([PATTERN]),
        )
        .unwrap();
        db.save_points(&[point("servers.a.cpu", 5.0, 990)]).unwrap();

        let check = checker.check("t1").await.unwrap();
        assert_eq!(check.state, State::Exception);
        assert!(check.message.is_some());
        assert!(check.score >= State::Exception.score());
        assert_eq!(check.last_successful_check_timestamp, 0);

        // the trigger is fixed and recovers with a trigger-level event
        db.save_trigger(
            Trigger::new("t1", "cpu", PATTERN)
                .with_expression("t1 > 1 ? WARN : OK")
                .with_patterns([PATTERN]),
        )
        .unwrap();
        let check = checker.check("t1").await.unwrap();
        assert_eq!(check.state, State::Ok);
        let events = drain_events(&db);
        let trigger_event = events.iter().find(|e| e.is_trigger_event).unwrap();
        assert_eq!(trigger_event.old_state, State::Exception);
        assert_eq!(trigger_event.state, State::Ok);
    }

    #[tokio::test]
    async fn test_missing_trigger() {
        let (_store, _db, checker) = setup();
        assert!(matches!(
            checker.check("nope").await,
            Err(CheckError::TriggerNotFound(_))
        ));
    }
}
