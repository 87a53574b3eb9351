//! Sorted set: members ordered by `(score, member)` with a member index.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{BTreeSet, HashMap};
use std::ops::Bound;

use super::command::{Limit, ScoreRange};

/// Totally ordered score
#[derive(Debug, Clone, Copy)]
struct Score(f64);

impl PartialEq for Score {
    fn eq(&self, other: &Self) -> bool {
        self.0.total_cmp(&other.0) == Ordering::Equal
    }
}

impl Eq for Score {}

impl PartialOrd for Score {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Score {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.total_cmp(&other.0)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(from = "Vec<(String, f64)>", into = "Vec<(String, f64)>")]
pub struct SortedSet {
    scores: HashMap<String, f64>,
    ordered: BTreeSet<(Score, String)>,
}

impl SortedSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or update a member. Returns true when the member is new.
    pub fn insert(&mut self, score: f64, member: impl Into<String>) -> bool {
        let member = member.into();
        let is_new = match self.scores.insert(member.clone(), score) {
            Some(old) => {
                self.ordered.remove(&(Score(old), member.clone()));
                false
            }
            None => true,
        };
        self.ordered.insert((Score(score), member));
        is_new
    }

    pub fn remove(&mut self, member: &str) -> bool {
        match self.scores.remove(member) {
            Some(score) => {
                self.ordered.remove(&(Score(score), member.to_string()));
                true
            }
            None => false,
        }
    }

    pub fn score(&self, member: &str) -> Option<f64> {
        self.scores.get(member).copied()
    }

    pub fn len(&self) -> usize {
        self.scores.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scores.is_empty()
    }

    /// Members in ascending score order
    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.ordered.iter().map(|(s, m)| (m.as_str(), s.0))
    }

    /// Members within `range`, seeking to the lower bound in the ordered
    /// index. Only members equal to an excluded minimum are stepped over.
    fn in_range<'a>(&'a self, range: &'a ScoreRange) -> impl Iterator<Item = (&'a str, f64)> + 'a {
        let start = match range.min {
            Bound::Unbounded => Bound::Unbounded,
            // -0.0 sorts below 0.0 but compares equal to it
            Bound::Included(min) | Bound::Excluded(min) if min == 0.0 => {
                Bound::Included((Score(-0.0), String::new()))
            }
            Bound::Included(min) | Bound::Excluded(min) => Bound::Included((Score(min), String::new())),
        };
        self.ordered
            .range((start, Bound::Unbounded))
            .map(|(s, m)| (m.as_str(), s.0))
            .skip_while(move |(_, s)| !range.above_min(*s))
            .take_while(move |(_, s)| range.below_max(*s))
    }

    pub fn range_by_score(&self, range: &ScoreRange, limit: Option<Limit>) -> Vec<(String, f64)> {
        let iter = self.in_range(range).map(|(m, s)| (m.to_string(), s));
        match limit {
            Some(limit) => iter.skip(limit.offset).take(limit.count).collect(),
            None => iter.collect(),
        }
    }

    pub fn count(&self, range: &ScoreRange) -> usize {
        self.in_range(range).count()
    }

    pub fn remove_range_by_score(&mut self, range: &ScoreRange) -> usize {
        let doomed: Vec<String> = self.in_range(range).map(|(m, _)| m.to_string()).collect();
        for member in &doomed {
            self.remove(member);
        }
        doomed.len()
    }

    /// Rank range, both ends inclusive. Negative ranks count from the end.
    pub fn range_by_rank(&self, start: i64, stop: i64) -> Vec<(String, f64)> {
        let len = self.len() as i64;
        let start = if start < 0 { (len + start).max(0) } else { start };
        let stop = if stop < 0 { len + stop } else { stop.min(len - 1) };
        if len == 0 || start > stop || start >= len {
            return Vec::new();
        }
        self.iter()
            .skip(start as usize)
            .take((stop - start + 1) as usize)
            .map(|(m, s)| (m.to_string(), s))
            .collect()
    }
}

impl From<Vec<(String, f64)>> for SortedSet {
    fn from(entries: Vec<(String, f64)>) -> Self {
        let mut set = SortedSet::new();
        for (member, score) in entries {
            set.insert(score, member);
        }
        set
    }
}

impl From<SortedSet> for Vec<(String, f64)> {
    fn from(set: SortedSet) -> Self {
        set.ordered.into_iter().map(|(s, m)| (m, s.0)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> SortedSet {
        let mut set = SortedSet::new();
        set.insert(1.0, "a");
        set.insert(2.0, "b");
        set.insert(3.0, "c1");
        set.insert(3.0, "c2");
        set.insert(3.0, "c3");
        set
    }

    #[test]
    fn test_insert_updates_score() {
        let mut set = SortedSet::new();
        assert!(set.insert(5.0, "m"));
        assert!(!set.insert(1.0, "m"));
        assert_eq!(set.len(), 1);
        assert_eq!(set.score("m"), Some(1.0));
    }

    #[test]
    fn test_range_by_score_with_limit() {
        let set = sample();
        let got = set.range_by_score(&ScoreRange::up_to(3.0), Some(Limit::first(3)));
        let members: Vec<&str> = got.iter().map(|(m, _)| m.as_str()).collect();
        assert_eq!(members, vec!["a", "b", "c1"]);
    }

    #[test]
    fn test_range_seeks_to_lower_bound() {
        let mut set = SortedSet::new();
        for i in 0..10_000 {
            set.insert(i as f64, format!("m{}", i));
        }
        set.insert(0.0, "zero");
        set.insert(-0.0, "negative-zero");

        let got = set.range_by_score(&ScoreRange::between(9_998.0, 20_000.0), None);
        assert_eq!(got, vec![("m9998".to_string(), 9_998.0), ("m9999".to_string(), 9_999.0)]);

        let above = ScoreRange {
            min: Bound::Excluded(9_998.0),
            max: Bound::Unbounded,
        };
        assert_eq!(set.count(&above), 1);
        assert_eq!(set.count(&ScoreRange::between(0.0, 0.0)), 3);
        assert_eq!(set.count(&ScoreRange::between(-5.0, 0.5)), 3);
    }

    #[test]
    fn test_remove_range() {
        let mut set = sample();
        assert_eq!(set.remove_range_by_score(&ScoreRange::up_to(2.0)), 2);
        assert_eq!(set.len(), 3);
        assert_eq!(set.count(&ScoreRange::all()), 3);
    }

    #[test]
    fn test_rank_range() {
        let set = sample();
        let last_two: Vec<String> = set.range_by_rank(-2, -1).into_iter().map(|(m, _)| m).collect();
        assert_eq!(last_two, vec!["c2", "c3"]);
        assert!(set.range_by_rank(10, 20).is_empty());
        assert_eq!(set.range_by_rank(0, 100).len(), 5);
    }

    #[test]
    fn test_serde_keeps_order() {
        let set = sample();
        let json = serde_json::to_string(&set).unwrap();
        let back: SortedSet = serde_json::from_str(&json).unwrap();
        let members: Vec<&str> = back.iter().map(|(m, _)| m).collect();
        assert_eq!(members, vec!["a", "b", "c1", "c2", "c3"]);
    }
}
