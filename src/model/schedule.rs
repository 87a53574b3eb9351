//! Weekly delivery schedule

use chrono::{DateTime, Datelike, Timelike, Utc};
use serde::{Deserialize, Serialize};

const MINUTES_PER_DAY: i64 = 24 * 60;
const SEARCH_LIMIT_MINUTES: i64 = 7 * MINUTES_PER_DAY;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleDay {
    pub enabled: bool,
    #[serde(default)]
    pub name: String,
}

/// Weekly mask plus a daily window in minutes. `tz_offset` is the minute
/// offset subtracted from UTC, so UTC+3 is `-180`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleData {
    /// Monday first
    pub days: Vec<ScheduleDay>,
    #[serde(default)]
    pub tz_offset: i64,
    #[serde(default)]
    pub start_offset: i64,
    #[serde(default = "default_end_offset")]
    pub end_offset: i64,
}

fn default_end_offset() -> i64 {
    MINUTES_PER_DAY - 1
}

impl Default for ScheduleData {
    fn default() -> Self {
        const NAMES: [&str; 7] = ["Mon", "Tue", "Wed", "Thu", "Fri", "Sat", "Sun"];
        Self {
            days: NAMES
                .iter()
                .map(|n| ScheduleDay {
                    enabled: true,
                    name: n.to_string(),
                })
                .collect(),
            tz_offset: 0,
            start_offset: 0,
            end_offset: default_end_offset(),
        }
    }
}

impl ScheduleData {
    fn day_enabled(&self, weekday: usize) -> bool {
        self.days.get(weekday).map(|d| d.enabled).unwrap_or(true)
    }

    /// Whether delivery is allowed at Unix second `ts`
    pub fn allows(&self, ts: i64) -> bool {
        let start = self.start_offset;
        let mut end = self.end_offset;
        if end < start {
            end += MINUTES_PER_DAY;
        }

        let local = ts - ts.rem_euclid(60) - self.tz_offset * 60;
        let Some(date) = DateTime::<Utc>::from_timestamp(local, 0) else {
            return false;
        };
        if !self.day_enabled(date.weekday().num_days_from_monday() as usize) {
            return false;
        }

        let minute = i64::from(date.hour() * 60 + date.minute());
        if end < MINUTES_PER_DAY {
            start <= minute && minute <= end
        } else {
            minute <= end - MINUTES_PER_DAY || minute >= start
        }
    }

    /// First allowed instant at or after `ts`, searching up to a week ahead
    pub fn next_allowed(&self, ts: i64) -> Option<i64> {
        if self.allows(ts) {
            return Some(ts);
        }
        let first_minute = ts - ts.rem_euclid(60) + 60;
        (0..SEARCH_LIMIT_MINUTES)
            .map(|m| first_minute + m * 60)
            .find(|&candidate| self.allows(candidate))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // 2024-01-01 00:00:00 UTC, a Monday
    const MONDAY: i64 = 1_704_067_200;

    fn workday_hours() -> ScheduleData {
        let mut schedule = ScheduleData::default();
        schedule.start_offset = 9 * 60;
        schedule.end_offset = 18 * 60;
        schedule.days[5].enabled = false;
        schedule.days[6].enabled = false;
        schedule
    }

    #[test]
    fn test_window_bounds() {
        let schedule = workday_hours();
        assert!(!schedule.allows(MONDAY + 8 * 3600 + 59 * 60));
        assert!(schedule.allows(MONDAY + 9 * 3600));
        assert!(schedule.allows(MONDAY + 18 * 3600));
        assert!(!schedule.allows(MONDAY + 18 * 3600 + 60));
    }

    #[test]
    fn test_weekend_is_skipped() {
        let schedule = workday_hours();
        let saturday_noon = MONDAY + 5 * 86_400 + 12 * 3600;
        assert!(!schedule.allows(saturday_noon));
        // Next Monday 09:00
        assert_eq!(
            schedule.next_allowed(saturday_noon),
            Some(MONDAY + 7 * 86_400 + 9 * 3600)
        );
    }

    #[test]
    fn test_timezone_offset() {
        let mut schedule = workday_hours();
        // UTC+3: 09:00 local is 06:00 UTC
        schedule.tz_offset = -180;
        assert!(schedule.allows(MONDAY + 6 * 3600));
        assert!(!schedule.allows(MONDAY + 5 * 3600));
    }

    #[test]
    fn test_overnight_window() {
        let mut schedule = ScheduleData::default();
        schedule.start_offset = 22 * 60;
        schedule.end_offset = 2 * 60;
        assert!(schedule.allows(MONDAY + 23 * 3600));
        assert!(schedule.allows(MONDAY + 3600));
        assert!(!schedule.allows(MONDAY + 12 * 3600));
    }

    #[test]
    fn test_no_enabled_days() {
        let mut schedule = ScheduleData::default();
        for day in &mut schedule.days {
            day.enabled = false;
        }
        assert_eq!(schedule.next_allowed(MONDAY), None);
    }

    #[test]
    fn test_wire_format() {
        let json = r#"{"days":[{"enabled":true,"name":"Mon"}],"tzOffset":-60,"startOffset":10,"endOffset":20}"#;
        let schedule: ScheduleData = serde_json::from_str(json).unwrap();
        assert_eq!(schedule.tz_offset, -60);
        assert_eq!(schedule.end_offset, 20);
    }
}
