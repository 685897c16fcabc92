//! Deadline arithmetic for the billing control loop.
//!
//! All functions are pure over a caller-supplied `now`, which keeps the
//! control loop testable without a clock abstraction. Monthly arithmetic is
//! calendar-correct: the bill lands on the same day of the next month,
//! clamped to month end (Jan 31 + 1 month = Feb 28/29).

use chrono::{DateTime, Duration, Months, Utc};

use crate::config::BillingPeriod;

/// Grace added on top of the query interval when computing `expire`; a
/// reader observing `expire < now` infers adapter failure.
pub const EXPIRE_SLACK_SECONDS: i64 = 30;

/// A timestamp `seconds` after `from`.
#[must_use]
pub fn date_delta(from: DateTime<Utc>, seconds: i64) -> DateTime<Utc> {
    from + Duration::seconds(seconds)
}

/// The bill deadline following `after`.
#[must_use]
pub fn next_bill_time(after: DateTime<Utc>, period: BillingPeriod) -> DateTime<Utc> {
    match period {
        BillingPeriod::Monthly => after
            .checked_add_months(Months::new(1))
            .unwrap_or(DateTime::<Utc>::MAX_UTC),
        BillingPeriod::Hourly => after + Duration::hours(1),
        BillingPeriod::Fixed(seconds) => date_delta(after, seconds.try_into().unwrap_or(i64::MAX)),
    }
}

/// The bill deadline preceding `before`; the start of the billing window
/// that ends at `before`.
#[must_use]
pub fn prev_bill_time(before: DateTime<Utc>, period: BillingPeriod) -> DateTime<Utc> {
    match period {
        BillingPeriod::Monthly => before
            .checked_sub_months(Months::new(1))
            .unwrap_or(DateTime::<Utc>::MIN_UTC),
        BillingPeriod::Hourly => before - Duration::hours(1),
        BillingPeriod::Fixed(seconds) => {
            before - Duration::seconds(seconds.try_into().unwrap_or(i64::MAX))
        }
    }
}

/// The `expire` stamp written into csp-config each cycle.
#[must_use]
pub fn config_expire(now: DateTime<Utc>, query_interval: u64) -> DateTime<Utc> {
    date_delta(
        now,
        i64::try_from(query_interval)
            .unwrap_or(i64::MAX)
            .saturating_add(EXPIRE_SLACK_SECONDS),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(year: i32, month: u32, day: u32, hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(year, month, day, hour, 0, 0).unwrap()
    }

    #[test]
    fn monthly_advances_same_day_of_month() {
        let next = next_bill_time(at(2024, 3, 15, 6), BillingPeriod::Monthly);
        assert_eq!(next, at(2024, 4, 15, 6));
    }

    #[test]
    fn monthly_clamps_to_month_end() {
        let next = next_bill_time(at(2024, 1, 31, 0), BillingPeriod::Monthly);
        assert_eq!(next, at(2024, 2, 29, 0)); // leap year
        let next = next_bill_time(at(2023, 1, 31, 0), BillingPeriod::Monthly);
        assert_eq!(next, at(2023, 2, 28, 0));
    }

    #[test]
    fn hourly_adds_one_hour() {
        let next = next_bill_time(at(2024, 3, 15, 23), BillingPeriod::Hourly);
        assert_eq!(next, at(2024, 3, 16, 0));
    }

    #[test]
    fn fixed_adds_the_configured_duration() {
        let next = next_bill_time(at(2024, 3, 15, 0), BillingPeriod::Fixed(86400));
        assert_eq!(next, at(2024, 3, 16, 0));
    }

    #[test]
    fn prev_bill_time_inverts_next_bill_time() {
        let now = at(2024, 3, 15, 6);
        for period in [
            BillingPeriod::Monthly,
            BillingPeriod::Hourly,
            BillingPeriod::Fixed(7200),
        ] {
            assert_eq!(prev_bill_time(next_bill_time(now, period), period), now);
        }
    }

    #[test]
    fn expire_is_query_interval_plus_slack() {
        let now = at(2024, 3, 15, 6);
        let expire = config_expire(now, 300);
        assert_eq!(expire, now + Duration::seconds(300 + EXPIRE_SLACK_SECONDS));
    }
}
