//! Graphite-style pattern index
//!
//! Patterns are dot-separated; a segment may use `*`, `?`, `[...]` and
//! `{a,b}`. Wildcards never cross a dot. Plain patterns are matched by a
//! hash lookup, the rest by regex, grouped by segment count.

use std::collections::{HashMap, HashSet};

use regex::Regex;

#[derive(Debug, thiserror::Error)]
#[error("bad pattern {pattern}: {reason}")]
pub struct PatternError {
    pub pattern: String,
    pub reason: String,
}

fn is_plain(pattern: &str) -> bool {
    !pattern.contains(['*', '?', '[', '{'])
}

/// Translate a graphite glob into an anchored regex
pub fn glob_to_regex(pattern: &str) -> Result<Regex, PatternError> {
    let err = |reason: &str| PatternError {
        pattern: pattern.to_string(),
        reason: reason.to_string(),
    };

    let mut out = String::with_capacity(pattern.len() * 2 + 2);
    out.push('^');
    let mut in_braces = false;
    let mut chars = pattern.chars();
    while let Some(c) = chars.next() {
        match c {
            '*' => out.push_str("[^.]*"),
            '?' => out.push_str("[^.]"),
            '{' if !in_braces => {
                in_braces = true;
                out.push_str("(?:");
            }
            '}' if in_braces => {
                in_braces = false;
                out.push(')');
            }
            ',' if in_braces => out.push('|'),
            '[' => {
                out.push('[');
                let mut closed = false;
                for c in chars.by_ref() {
                    if c == ']' {
                        closed = true;
                        break;
                    }
                    if c == '\\' || c == '[' {
                        out.push('\\');
                    }
                    out.push(c);
                }
                if !closed {
                    return Err(err("unclosed ["));
                }
                out.push(']');
            }
            c => out.push_str(&regex::escape(&c.to_string())),
        }
    }
    if in_braces {
        return Err(err("unclosed {"));
    }
    out.push('$');
    Regex::new(&out).map_err(|e| err(&e.to_string()))
}

fn segments(name: &str) -> usize {
    name.split('.').count()
}

/// Immutable set of compiled patterns
#[derive(Debug, Default)]
pub struct PatternIndex {
    plain: HashSet<String>,
    globs: HashMap<usize, Vec<(String, Regex)>>,
}

impl PatternIndex {
    /// Build an index. Patterns that fail to compile are logged and skipped.
    pub fn new<I, S>(patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut index = Self::default();
        for pattern in patterns {
            let pattern = pattern.as_ref();
            if is_plain(pattern) {
                index.plain.insert(pattern.to_string());
                continue;
            }
            match glob_to_regex(pattern) {
                Ok(regex) => index
                    .globs
                    .entry(segments(pattern))
                    .or_default()
                    .push((pattern.to_string(), regex)),
                Err(e) => tracing::warn!(error = %e, "Skipping pattern"),
            }
        }
        index
    }

    pub fn len(&self) -> usize {
        self.plain.len() + self.globs.values().map(Vec::len).sum::<usize>()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Every pattern matching the metric name
    pub fn matches(&self, metric: &str) -> Vec<String> {
        let mut found = Vec::new();
        if self.plain.contains(metric) {
            found.push(metric.to_string());
        }
        if let Some(globs) = self.globs.get(&segments(metric)) {
            found.extend(
                globs
                    .iter()
                    .filter(|(_, regex)| regex.is_match(metric))
                    .map(|(pattern, _)| pattern.clone()),
            );
        }
        found
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_glob_translation() {
        let re = glob_to_regex("servers.*.cpu").unwrap();
        assert!(re.is_match("servers.a.cpu"));
        assert!(!re.is_match("servers.a.b.cpu"));

        let re = glob_to_regex("servers.{web,db}[0-9].load?").unwrap();
        assert!(re.is_match("servers.web1.load1"));
        assert!(re.is_match("servers.db7.loadx"));
        assert!(!re.is_match("servers.cache1.load1"));

        let re = glob_to_regex("a+b.c").unwrap();
        assert!(re.is_match("a+b.c"));
        assert!(!re.is_match("aab.c"));
    }

    #[test]
    fn test_bad_globs() {
        assert!(glob_to_regex("a.[bc").is_err());
        assert!(glob_to_regex("a.{b,c").is_err());
    }

    #[test]
    fn test_index_matches() {
        let index = PatternIndex::new(["servers.a.cpu", "servers.*.cpu", "servers.*", "db.[", "*.*.cpu"]);
        assert_eq!(index.len(), 4);

        let mut found = index.matches("servers.a.cpu");
        found.sort();
        assert_eq!(found, vec!["*.*.cpu", "servers.*.cpu", "servers.a.cpu"]);
        assert_eq!(index.matches("servers.b"), vec!["servers.*"]);
        assert!(index.matches("other").is_empty());
    }
}
