//! Pure date arithmetic for recurring tasks.
//!
//! Month arithmetic clamps to the last valid day of the target month rather
//! than rolling into the following month: Jan 31 + 1 month is Feb 28 (Feb 29
//! in a leap year). Year arithmetic clamps Feb 29 to Feb 28 on non-leap
//! targets. The time-of-day component of the anchor is preserved.

use chrono::{DateTime, Datelike, Duration, NaiveDate, Utc};

use crate::error::{Error, Result};

use super::rule::{EndCondition, Frequency, RecurrenceRule};

/// Compute the next occurrence after `last` under `rule`.
///
/// Deterministic and total for every structurally valid rule; a malformed
/// rule fails with [`Error::InvalidRule`] before any arithmetic runs.
pub fn next_occurrence(last: DateTime<Utc>, rule: &RecurrenceRule) -> Result<DateTime<Utc>> {
    rule.validate()?;
    let interval = i64::from(rule.interval);

    match rule.frequency {
        Frequency::Daily => Ok(last + Duration::days(interval)),
        Frequency::Weekly => Ok(last + Duration::weeks(interval)),
        Frequency::Monthly => add_months(last, rule.interval),
        Frequency::Yearly => add_years(last, rule.interval),
    }
}

fn add_months(last: DateTime<Utc>, interval: u32) -> Result<DateTime<Utc>> {
    // month0 is 0-based, so the year/month split is a plain div/mod.
    let months = i64::from(last.month0()) + i64::from(interval);
    let target_year = last.year() + (months / 12) as i32;
    let target_month = (months % 12) as u32 + 1;
    let target_day = last.day().min(days_in_month(target_year, target_month));

    with_ymd(last, target_year, target_month, target_day)
}

fn add_years(last: DateTime<Utc>, interval: u32) -> Result<DateTime<Utc>> {
    let target_year = last.year() + interval as i32;
    let mut target_day = last.day();
    if last.month() == 2 && target_day == 29 && !is_leap_year(target_year) {
        target_day = 28;
    }

    with_ymd(last, target_year, last.month(), target_day)
}

fn with_ymd(last: DateTime<Utc>, year: i32, month: u32, day: u32) -> Result<DateTime<Utc>> {
    let date = NaiveDate::from_ymd_opt(year, month, day).ok_or_else(|| {
        Error::InvalidRule(format!("computed date {year}-{month:02}-{day:02} is out of range"))
    })?;
    Ok(DateTime::from_naive_utc_and_offset(
        date.and_time(last.time()),
        Utc,
    ))
}

/// Whether a recurring series has reached its end condition and should stop
/// spawning successors.
///
/// `occurrence_count` is the number of successors already spawned for the
/// series; `as_of` is the date of the occurrence about to be created.
/// An unparseable `on_date` value never terminates the series — the rule was
/// validated at the write boundary, so this only guards corrupt stored data.
pub fn series_complete(rule: &RecurrenceRule, occurrence_count: u32, as_of: DateTime<Utc>) -> bool {
    match &rule.end_condition {
        EndCondition::Never => false,
        EndCondition::AfterCount(count) => occurrence_count >= *count,
        EndCondition::OnDate(date) => match DateTime::parse_from_rfc3339(date) {
            Ok(end) => as_of.date_naive() >= end.date_naive(),
            Err(_) => false,
        },
    }
}

const fn is_leap_year(year: i32) -> bool {
    (year % 4 == 0 && year % 100 != 0) || year % 400 == 0
}

fn days_in_month(year: i32, month: u32) -> u32 {
    match month {
        4 | 6 | 9 | 11 => 30,
        2 => {
            if is_leap_year(year) {
                29
            } else {
                28
            }
        }
        _ => 31,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn utc(y: i32, m: u32, d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, 9, 30, 0).unwrap()
    }

    fn rule(frequency: Frequency, interval: u32) -> RecurrenceRule {
        RecurrenceRule::new(frequency, interval)
    }

    #[test]
    fn daily_adds_interval_days() {
        let next = next_occurrence(utc(2024, 3, 1), &rule(Frequency::Daily, 3)).unwrap();
        assert_eq!(next, utc(2024, 3, 4));
    }

    #[test]
    fn weekly_adds_interval_weeks() {
        let next = next_occurrence(utc(2024, 3, 1), &rule(Frequency::Weekly, 2)).unwrap();
        assert_eq!(next, utc(2024, 3, 15));
    }

    #[test]
    fn monthly_clamps_to_leap_february() {
        let next = next_occurrence(utc(2024, 1, 31), &rule(Frequency::Monthly, 1)).unwrap();
        assert_eq!(next, utc(2024, 2, 29));
    }

    #[test]
    fn monthly_clamps_to_plain_february() {
        let next = next_occurrence(utc(2023, 1, 31), &rule(Frequency::Monthly, 1)).unwrap();
        assert_eq!(next, utc(2023, 2, 28));
    }

    #[test]
    fn monthly_propagates_year_overflow() {
        let next = next_occurrence(utc(2024, 11, 15), &rule(Frequency::Monthly, 3)).unwrap();
        assert_eq!(next, utc(2025, 2, 15));
    }

    #[test]
    fn monthly_large_interval_spans_years() {
        let next = next_occurrence(utc(2024, 5, 31), &rule(Frequency::Monthly, 13)).unwrap();
        assert_eq!(next, utc(2025, 6, 30));
    }

    #[test]
    fn yearly_clamps_leap_day() {
        let next = next_occurrence(utc(2024, 2, 29), &rule(Frequency::Yearly, 1)).unwrap();
        assert_eq!(next, utc(2025, 2, 28));
    }

    #[test]
    fn yearly_keeps_leap_day_on_leap_target() {
        let next = next_occurrence(utc(2024, 2, 29), &rule(Frequency::Yearly, 4)).unwrap();
        assert_eq!(next, utc(2028, 2, 29));
    }

    #[test]
    fn time_of_day_preserved() {
        let last = Utc.with_ymd_and_hms(2024, 1, 31, 17, 45, 12).unwrap();
        let next = next_occurrence(last, &rule(Frequency::Monthly, 1)).unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2024, 2, 29, 17, 45, 12).unwrap());
    }

    #[test]
    fn invalid_interval_fails() {
        let mut r = rule(Frequency::Daily, 1);
        r.interval = 0;
        assert!(next_occurrence(utc(2024, 1, 1), &r).is_err());
    }

    #[test]
    fn never_ending_series_is_never_complete() {
        assert!(!series_complete(&rule(Frequency::Daily, 1), u32::MAX, utc(2100, 1, 1)));
    }

    #[test]
    fn after_count_stops_at_count() {
        let r = rule(Frequency::Daily, 1).with_end_condition(EndCondition::AfterCount(3));
        assert!(!series_complete(&r, 2, utc(2024, 1, 1)));
        assert!(series_complete(&r, 3, utc(2024, 1, 1)));
    }

    #[test]
    fn on_date_stops_on_and_after_date() {
        let r = rule(Frequency::Daily, 1)
            .with_end_condition(EndCondition::OnDate("2024-06-01T00:00:00Z".into()));
        assert!(!series_complete(&r, 0, utc(2024, 5, 31)));
        assert!(series_complete(&r, 0, utc(2024, 6, 1)));
        assert!(series_complete(&r, 0, utc(2024, 6, 2)));
    }
}
