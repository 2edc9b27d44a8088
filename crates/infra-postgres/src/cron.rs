// Cron expression handling for schedules

use chrono::{DateTime, Utc};
use croner::Cron;
use queue_sdk_core::port::EngineError;

const MAX_CRON_EXPRESSION_LENGTH: usize = 256;

/// Timezones the engine evaluates schedules in
const SUPPORTED_TIMEZONES: &[&str] = &["UTC", "Etc/UTC", "GMT"];

/// Parse a 5-field (or 6-field, with seconds) cron expression
pub fn parse_cron(expression: &str) -> Result<Cron, EngineError> {
    let invalid = |reason: String| EngineError::InvalidCron {
        expression: expression.to_string(),
        reason,
    };

    if expression.len() > MAX_CRON_EXPRESSION_LENGTH {
        return Err(invalid(format!(
            "expression too long ({} chars, max {})",
            expression.len(),
            MAX_CRON_EXPRESSION_LENGTH
        )));
    }

    Cron::new(expression)
        .with_seconds_optional()
        .parse()
        .map_err(|e| invalid(e.to_string()))
}

/// Schedules run in UTC only
pub fn validate_timezone(tz: Option<&str>) -> Result<&'static str, EngineError> {
    match tz {
        None => Ok("UTC"),
        Some(name) => SUPPORTED_TIMEZONES
            .iter()
            .find(|supported| supported.eq_ignore_ascii_case(name))
            .copied()
            .ok_or_else(|| {
                EngineError::Validation(format!(
                    "Unsupported schedule timezone '{}': only UTC is supported",
                    name
                ))
            }),
    }
}

/// First occurrence strictly after `after`
pub fn next_occurrence(cron: &Cron, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
    cron.find_next_occurrence(&after, false).ok()
}

/// When a schedule should fire at `now`, if at all.
///
/// Missed occurrences collapse into a single run stamped `now`, so a
/// schedule that was not evaluated for a while fires once and then waits
/// for the next occurrence after `now`.
pub fn due_run(
    cron: &Cron,
    last_run: DateTime<Utc>,
    now: DateTime<Utc>,
) -> Option<DateTime<Utc>> {
    next_occurrence(cron, last_run)
        .filter(|next| *next <= now)
        .map(|_| now)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, min, 0).unwrap()
    }

    #[test]
    fn test_daily_cleanup_schedule() {
        let cron = parse_cron("0 2 * * *").unwrap();
        assert_eq!(
            next_occurrence(&cron, at(2024, 5, 1, 12, 0)),
            Some(at(2024, 5, 2, 2, 0))
        );
    }

    #[test]
    fn test_weekly_backup_schedule() {
        // 2024-05-01 is a Wednesday; next Sunday is 2024-05-05
        let cron = parse_cron("0 3 * * 0").unwrap();
        assert_eq!(
            next_occurrence(&cron, at(2024, 5, 1, 0, 0)),
            Some(at(2024, 5, 5, 3, 0))
        );
    }

    #[test]
    fn test_occurrence_is_exclusive() {
        let cron = parse_cron("0 2 * * *").unwrap();
        assert_eq!(
            next_occurrence(&cron, at(2024, 5, 2, 2, 0)),
            Some(at(2024, 5, 3, 2, 0))
        );
    }

    #[test]
    fn test_due_run() {
        let cron = parse_cron("*/5 * * * *").unwrap();
        let last = at(2024, 5, 1, 10, 0);

        assert_eq!(due_run(&cron, last, at(2024, 5, 1, 10, 4)), None);
        assert_eq!(
            due_run(&cron, last, at(2024, 5, 1, 10, 7)),
            Some(at(2024, 5, 1, 10, 7))
        );
    }

    #[test]
    fn test_outage_fires_once() {
        // Daily schedule, engine down for a week
        let cron = parse_cron("0 2 * * *").unwrap();
        let now = at(2024, 5, 8, 12, 0);
        let mut last = at(2024, 5, 1, 3, 0);
        let mut firings = 0;

        for _ in 0..10 {
            if let Some(fired_at) = due_run(&cron, last, now) {
                firings += 1;
                last = fired_at;
            }
        }

        assert_eq!(firings, 1);
        assert_eq!(last, now);
        assert_eq!(next_occurrence(&cron, last), Some(at(2024, 5, 9, 2, 0)));
    }

    #[test]
    fn test_invalid_expressions() {
        assert!(matches!(
            parse_cron("not a cron"),
            Err(EngineError::InvalidCron { .. })
        ));
        assert!(parse_cron(&"* ".repeat(200)).is_err());
    }

    #[test]
    fn test_timezones() {
        assert_eq!(validate_timezone(None).unwrap(), "UTC");
        assert_eq!(validate_timezone(Some("utc")).unwrap(), "UTC");
        assert!(validate_timezone(Some("Europe/Paris")).is_err());
    }
}
