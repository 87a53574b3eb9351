//! Graphite plaintext protocol: `<metric> <value> <timestamp>`

/// A point as received, before pattern matching
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedMetric {
    pub name: String,
    pub value: f64,
    pub timestamp: i64,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ParseError {
    #[error("expected 3 fields, got {0}")]
    FieldCount(usize),

    #[error("empty metric name")]
    EmptyName,

    #[error("bad value {0:?}")]
    Value(String),

    #[error("bad timestamp {0:?}")]
    Timestamp(String),
}

/// Parse one line. A timestamp of `-1` means "now".
pub fn parse_line(line: &str, now: i64) -> Result<ParsedMetric, ParseError> {
    let fields: Vec<&str> = line.split_whitespace().collect();
    if fields.len() != 3 {
        return Err(ParseError::FieldCount(fields.len()));
    }
    let name = fields[0].trim_matches('.');
    if name.is_empty() {
        return Err(ParseError::EmptyName);
    }

    let value: f64 = fields[1]
        .parse()
        .map_err(|_| ParseError::Value(fields[1].to_string()))?;
    if !value.is_finite() {
        return Err(ParseError::Value(fields[1].to_string()));
    }

    let timestamp = match fields[2] {
        "-1" => now,
        raw => raw
            .parse::<f64>()
            .ok()
            .filter(|ts| ts.is_finite() && *ts >= 0.0)
            .map(|ts| ts as i64)
            .ok_or_else(|| ParseError::Timestamp(raw.to_string()))?,
    };

    Ok(ParsedMetric {
        name: name.to_string(),
        value,
        timestamp,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_lines() {
        assert_eq!(
            parse_line("servers.a.cpu 12.5 1700000000", 0).unwrap(),
            ParsedMetric {
                name: "servers.a.cpu".into(),
                value: 12.5,
                timestamp: 1_700_000_000
            }
        );
        assert_eq!(parse_line("m 1 1700000000.9", 0).unwrap().timestamp, 1_700_000_000);
        assert_eq!(parse_line("m 1 -1", 42).unwrap().timestamp, 42);
        assert_eq!(parse_line("  m\t-3e2   5 ", 0).unwrap().value, -300.0);
    }

    #[test]
    fn test_invalid_lines() {
        assert_eq!(parse_line("m 1", 0), Err(ParseError::FieldCount(2)));
        assert_eq!(parse_line(". 1 1", 0), Err(ParseError::EmptyName));
        assert!(matches!(parse_line("m x 1", 0), Err(ParseError::Value(_))));
        assert!(matches!(parse_line("m NaN 1", 0), Err(ParseError::Value(_))));
        assert!(matches!(parse_line("m 1 yesterday", 0), Err(ParseError::Timestamp(_))));
        assert!(matches!(parse_line("m 1 -5", 0), Err(ParseError::Timestamp(_))));
    }
}
