//! API handlers, grouped per resource.

pub mod agents;
pub mod dashboard;
pub mod profiles;
pub mod provision;
pub mod tasks;

use chrono::{DateTime, Utc};

/// RFC3339 query timestamp with a fallback.
pub(crate) fn parse_time(s: Option<&str>, default: DateTime<Utc>) -> DateTime<Utc> {
    s.and_then(|v| DateTime::parse_from_rfc3339(v).ok())
        .map(|t| t.with_timezone(&Utc))
        .unwrap_or(default)
}

/// `step` accepts `1m`, `5m` or plain integer seconds.
pub(crate) fn parse_step(s: Option<&str>) -> i64 {
    match s {
        Some("1m") => 60,
        Some("5m") => 300,
        Some(v) => v.parse().unwrap_or(60),
        None => 60,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn step_parsing() {
        assert_eq!(parse_step(Some("1m")), 60);
        assert_eq!(parse_step(Some("5m")), 300);
        assert_eq!(parse_step(Some("120")), 120);
        assert_eq!(parse_step(Some("bogus")), 60);
        assert_eq!(parse_step(None), 60);
    }

    #[test]
    fn time_parsing_falls_back() {
        let def = Utc::now();
        assert_eq!(parse_time(None, def), def);
        assert_eq!(parse_time(Some("not a time"), def), def);
        let parsed = parse_time(Some("2025-06-01T12:00:00Z"), def);
        assert_eq!(parsed.to_rfc3339(), "2025-06-01T12:00:00+00:00");
    }
}
