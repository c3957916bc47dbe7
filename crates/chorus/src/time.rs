use std::time::{SystemTime, UNIX_EPOCH};

const ONE_MINUTE_IN_SECONDS: u64 = 60;
const ONE_HOUR_IN_SECONDS: u64 = 3600;
const ONE_DAY_IN_SECONDS: u64 = 86_400;
const ONE_WEEK_IN_SECONDS: u64 = 604_800;
const ONE_MONTH_IN_SECONDS: u64 = 2_592_000; // 30 days
const ONE_YEAR_IN_SECONDS: u64 = 31_536_000; // 365 days

const MAX_SECONDS: u64 = ONE_MINUTE_IN_SECONDS - 1;
const MAX_SECONDS_FOR_MINUTES: u64 = ONE_HOUR_IN_SECONDS - 1;
const MAX_SECONDS_FOR_HOURS: u64 = ONE_DAY_IN_SECONDS - 1;
const MAX_SECONDS_FOR_DAYS: u64 = ONE_WEEK_IN_SECONDS - 1;
const MAX_SECONDS_FOR_WEEKS: u64 = ONE_MONTH_IN_SECONDS - 1;
const MAX_SECONDS_FOR_MONTHS: u64 = ONE_YEAR_IN_SECONDS - 1;

pub fn unix_time_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}

/// Short relative age between two unix timestamps, `+`-prefixed when
/// `timestamp` is ahead of `now`
pub fn time_ago_between(timestamp: u64, now: u64) -> String {
    let duration = now.abs_diff(timestamp);

    let time_str = match duration {
        0..=2 => "now".to_owned(),
        3..=MAX_SECONDS => format!("{duration}s"),
        ONE_MINUTE_IN_SECONDS..=MAX_SECONDS_FOR_MINUTES => {
            format!("{}m", duration / ONE_MINUTE_IN_SECONDS)
        }
        ONE_HOUR_IN_SECONDS..=MAX_SECONDS_FOR_HOURS => {
            format!("{}h", duration / ONE_HOUR_IN_SECONDS)
        }
        ONE_DAY_IN_SECONDS..=MAX_SECONDS_FOR_DAYS => {
            format!("{}d", duration / ONE_DAY_IN_SECONDS)
        }
        ONE_WEEK_IN_SECONDS..=MAX_SECONDS_FOR_WEEKS => {
            format!("{}w", duration / ONE_WEEK_IN_SECONDS)
        }
        ONE_MONTH_IN_SECONDS..=MAX_SECONDS_FOR_MONTHS => {
            format!("{}mo", duration / ONE_MONTH_IN_SECONDS)
        }
        _ => format!("{}y", duration / ONE_YEAR_IN_SECONDS),
    };

    if timestamp > now {
        format!("+{time_str}")
    } else {
        time_str
    }
}

pub fn time_ago_since(timestamp: u64) -> String {
    time_ago_between(timestamp, unix_time_secs())
}
