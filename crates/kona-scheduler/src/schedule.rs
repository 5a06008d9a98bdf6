use chrono::{DateTime, Datelike, Days, Duration, Months, NaiveDate, NaiveTime, TimeZone, Utc};

use crate::types::{RunModel, RunSpec};

/// Compute the activation time of `run` as seen from `now` (all UTC).
///
/// Calendar models resolve to the first occurrence at or after `now`. A
/// `Date` model returns its instant even if it has passed, so such a job is
/// due immediately.
pub fn next_activation(run: &RunSpec, now: DateTime<Utc>) -> DateTime<Utc> {
    let at = run.at.unwrap_or(NaiveTime::MIN);
    let today = now.date_naive();
    let at_or_after_now = |date: NaiveDate| {
        let candidate = Utc.from_utc_datetime(&date.and_time(at));
        (candidate >= now).then_some(candidate)
    };

    let next = match &run.model {
        RunModel::Now => Some(now),

        RunModel::Daily => {
            // Today's window may have passed; then tomorrow.
            at_or_after_now(today).or_else(|| Some(Utc.from_utc_datetime(&today.and_time(at)) + Duration::days(1)))
        }

        // A week plus a day always contains the next listed weekday.
        RunModel::Weekly(days) => (0..=7u64)
            .filter_map(|offset| today.checked_add_days(Days::new(offset)))
            .filter(|date| days.contains(&date.weekday()))
            .find_map(at_or_after_now),

        RunModel::DayOfMonth(day) => {
            // Four years covers every month with a 29th..31st.
            let first = today.with_day(1).unwrap_or(today);
            (0..48u32)
                .filter_map(|offset| first.checked_add_months(Months::new(offset)))
                .filter_map(|month| NaiveDate::from_ymd_opt(month.year(), month.month(), *day))
                .find_map(at_or_after_now)
        }

        RunModel::DayOfYear { day, month } => (today.year()..today.year() + 9)
            .filter_map(|year| NaiveDate::from_ymd_opt(year, *month, *day))
            .find_map(at_or_after_now),

        RunModel::Date(dt) => Some(Utc.from_utc_datetime(dt)),
    };

    // Only reachable for specs that bypassed validation.
    next.unwrap_or(now)
}
