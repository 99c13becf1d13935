//! Scheduling and time parsing utilities
//!
//! Turns the `--at` argument of the command-line tools into an absolute time.

use chrono::{DateTime, Duration, Utc};

use crate::error::{CastError, Result};

/// Parse a schedule string into a DateTime
///
/// Supports multiple formats:
/// - RFC 3339 timestamps: "2026-11-20T15:00:00Z"
/// - Relative durations: "1h", "30m", "2d 4h"
/// - Natural language: "tomorrow", "next monday 10am"
///
/// # Errors
///
/// Returns `CastError::Validation` if the input matches none of the formats.
/// Whether the time is in the future is checked by the queue, not here.
pub fn parse_schedule(input: &str) -> Result<DateTime<Utc>> {
    let input = input.trim();
    if input.is_empty() {
        return Err(CastError::Validation(
            "Schedule string cannot be empty".to_string(),
        ));
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(input) {
        return Ok(dt.with_timezone(&Utc));
    }

    if let Ok(duration) = parse_duration(input) {
        return Ok(Utc::now() + duration);
    }

    if let Ok(dt) = parse_natural_language(input) {
        return Ok(dt);
    }

    Err(CastError::Validation(format!(
        "Could not parse schedule string: {}",
        input
    )))
}

/// Parse a duration string into a chrono::Duration
fn parse_duration(input: &str) -> Result<Duration> {
    let std_duration = humantime::parse_duration(input)
        .map_err(|e| CastError::Validation(format!("Could not parse duration: {}", e)))?;

    Duration::from_std(std_duration)
        .map_err(|_| CastError::Validation("Duration out of range".to_string()))
}

/// Parse natural language time expression
fn parse_natural_language(input: &str) -> Result<DateTime<Utc>> {
    chrono_english::parse_date_string(input, Utc::now(), chrono_english::Dialect::Us)
        .map_err(|e| CastError::Validation(format!("Could not parse time: {}", e)))
}

/// Human-readable time until a unix timestamp ("in 2h 5m", "overdue")
pub fn format_time_until(timestamp: i64) -> String {
    let seconds = timestamp - Utc::now().timestamp();
    if seconds <= 0 {
        return "overdue".to_string();
    }

    let days = seconds / 86_400;
    let hours = (seconds % 86_400) / 3_600;
    let minutes = (seconds % 3_600) / 60;

    if days > 0 {
        format!("in {}d {}h", days, hours)
    } else if hours > 0 {
        format!("in {}h {}m", hours, minutes)
    } else if minutes > 0 {
        format!("in {}m", minutes)
    } else {
        format!("in {}s", seconds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_duration_formats() {
        let before = Utc::now();
        let dt = parse_schedule("2h").unwrap();
        let delta = dt - before;
        assert!(delta >= Duration::hours(2));
        assert!(delta < Duration::hours(2) + Duration::seconds(5));

        assert!(parse_schedule("30m").unwrap() > Utc::now());
        assert!(parse_schedule("1day 2h").unwrap() > Utc::now() + Duration::hours(25));
    }

    #[test]
    fn test_parse_rfc3339() {
        let dt = parse_schedule("2030-01-02T03:04:05Z").unwrap();
        assert_eq!(dt.to_rfc3339(), "2030-01-02T03:04:05+00:00");

        let offset = parse_schedule("2030-01-02T05:04:05+02:00").unwrap();
        assert_eq!(offset, dt);
    }

    #[test]
    fn test_parse_natural_language() {
        let dt = parse_schedule("tomorrow").unwrap();
        assert!(dt > Utc::now());
    }

    #[test]
    fn test_parse_invalid() {
        assert!(matches!(parse_schedule(""), Err(CastError::Validation(_))));
        assert!(matches!(
            parse_schedule("notatime"),
            Err(CastError::Validation(_))
        ));
    }

    #[test]
    fn test_format_time_until() {
        let now = Utc::now().timestamp();
        assert_eq!(format_time_until(now - 10), "overdue");
        assert_eq!(format_time_until(now + 3 * 86_400 + 3_700), "in 3d 1h");
        assert!(format_time_until(now + 7_260).starts_with("in 2h"));
        assert!(format_time_until(now + 150).starts_with("in 2m"));
    }
}
