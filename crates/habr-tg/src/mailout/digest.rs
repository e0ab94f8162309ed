use chrono::{DateTime, Duration, NaiveTime, Utc};

/// The nearest moment strictly after `now` when the UTC wall clock shows `at`.
pub(crate) fn next_occurrence(now: DateTime<Utc>, at: NaiveTime) -> DateTime<Utc> {
    let today = now.date_naive().and_time(at).and_utc();
    if today > now {
        today
    } else {
        today + Duration::days(1)
    }
}
