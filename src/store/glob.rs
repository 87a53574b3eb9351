//! Key glob matching with the same syntax as SCAN MATCH:
//! `*`, `?`, `[abc]`, `[^abc]`, `[a-z]` and `\` escapes.

/// Check whether `key` matches `pattern`
pub fn glob_match(pattern: &str, key: &str) -> bool {
    let pattern: Vec<char> = pattern.chars().collect();
    let key: Vec<char> = key.chars().collect();
    match_from(&pattern, &key)
}

fn match_from(pattern: &[char], key: &[char]) -> bool {
    let mut p = 0;
    let mut k = 0;

    while p < pattern.len() {
        match pattern[p] {
            '*' => {
                // Collapse consecutive stars
                while p + 1 < pattern.len() && pattern[p + 1] == '*' {
                    p += 1;
                }
                if p + 1 == pattern.len() {
                    return true;
                }
                for start in k..=key.len() {
                    if match_from(&pattern[p + 1..], &key[start..]) {
                        return true;
                    }
                }
                return false;
            }
            '?' => {
                if k >= key.len() {
                    return false;
                }
                k += 1;
                p += 1;
            }
            '[' => {
                if k >= key.len() {
                    return false;
                }
                let (matched, next) = match_class(pattern, p + 1, key[k]);
                if !matched {
                    return false;
                }
                p = next;
                k += 1;
            }
            '\\' if p + 1 < pattern.len() => {
                if k >= key.len() || key[k] != pattern[p + 1] {
                    return false;
                }
                p += 2;
                k += 1;
            }
            c => {
                if k >= key.len() || key[k] != c {
                    return false;
                }
                p += 1;
                k += 1;
            }
        }
    }

    k == key.len()
}

/// Match a bracket class starting right after `[`. Returns whether `c`
/// matched and the pattern index just past the closing `]`.
fn match_class(pattern: &[char], mut p: usize, c: char) -> (bool, usize) {
    let negate = p < pattern.len() && pattern[p] == '^';
    if negate {
        p += 1;
    }

    let mut matched = false;
    while p < pattern.len() && pattern[p] != ']' {
        if pattern[p] == '\\' && p + 1 < pattern.len() {
            if pattern[p + 1] == c {
                matched = true;
            }
            p += 2;
        } else if p + 2 < pattern.len() && pattern[p + 1] == '-' && pattern[p + 2] != ']' {
            let (lo, hi) = if pattern[p] <= pattern[p + 2] {
                (pattern[p], pattern[p + 2])
            } else {
                (pattern[p + 2], pattern[p])
            };
            if c >= lo && c <= hi {
                matched = true;
            }
            p += 3;
        } else {
            if pattern[p] == c {
                matched = true;
            }
            p += 1;
        }
    }

    // Skip the closing bracket (unterminated classes run to the end)
    let next = if p < pattern.len() { p + 1 } else { p };
    (matched != negate, next)
}
