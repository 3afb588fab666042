use crate::{error::Result, Error};
use chrono::{DateTime, Utc};
use cron::Schedule;
use std::str::FromStr;

/// A five-field cron expression (minute, hour, day-of-month, month,
/// day-of-week).
///
/// Malformed expressions and expressions with a seconds or year field are
/// rejected at construction. Fire times are evaluated in UTC.
#[derive(Debug, Clone)]
pub struct CronSchedule {
    expression: String,
    inner: Schedule,
}

impl CronSchedule {
    pub fn parse(expression: &str) -> Result<Self> {
        let fields: Vec<&str> = expression.split_whitespace().collect();
        if fields.len() != 5 {
            return Err(Error::validation(format!(
                "Cron expression must have exactly 5 fields, got {}: '{}'",
                fields.len(),
                expression
            )));
        }

        // The parser operates on six fields with leading seconds
        let with_seconds = format!("0 {}", fields.join(" "));
        let inner = Schedule::from_str(&with_seconds).map_err(|e| {
            Error::validation(format!("Invalid cron expression '{}': {}", expression, e))
        })?;

        Ok(Self {
            expression: expression.to_string(),
            inner,
        })
    }

    pub fn expression(&self) -> &str {
        &self.expression
    }

    /// Next fire time strictly after `after`.
    pub fn next_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.inner.after(&after).next()
    }

    /// Next fire time from now.
    pub fn upcoming(&self) -> Option<DateTime<Utc>> {
        self.inner.upcoming(Utc).next()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_parse_valid_expressions() {
        assert!(CronSchedule::parse("0 3 * * *").is_ok());
        assert!(CronSchedule::parse("*/15 * * * *").is_ok());
        assert!(CronSchedule::parse("30 2 1 * 0").is_ok());
    }

    #[test]
    fn test_reject_wrong_field_count() {
        assert!(CronSchedule::parse("* * * *").is_err());
        assert!(CronSchedule::parse("0 0 3 * * *").is_err());
        assert!(CronSchedule::parse("").is_err());
    }

    #[test]
    fn test_reject_malformed_fields() {
        assert!(CronSchedule::parse("99 * * * *").is_err());
        assert!(CronSchedule::parse("* 25 * * *").is_err());
        assert!(CronSchedule::parse("not a cron at all x").is_err());
    }

    #[test]
    fn test_next_fire_time() {
        let schedule = CronSchedule::parse("0 3 * * *").unwrap();
        let after = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        let next = schedule.next_after(after).unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2024, 3, 2, 3, 0, 0).unwrap());
    }
}
