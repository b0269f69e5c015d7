use std::time::Duration;

use chrono::{DateTime, NaiveTime, TimeZone, Utc};

pub const ONE_HOUR: Duration = Duration::from_secs(60 * 60);
pub const FIVE_SECONDS: Duration = Duration::from_secs(5);

/// Midnight UTC at the end of the day containing `now`.
pub fn end_of_day(now: DateTime<Utc>) -> DateTime<Utc> {
    let today = now.date_naive();
    let tomorrow = today.succ_opt().unwrap_or(today);
    Utc.from_utc_datetime(&tomorrow.and_time(NaiveTime::MIN))
}
