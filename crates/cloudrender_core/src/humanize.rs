use chrono::{DateTime, TimeZone};

const MINUTE: i64 = 60;
const HOUR: i64 = 60 * MINUTE;
const DAY: i64 = 24 * HOUR;
const MONTH: i64 = 30 * DAY;
const YEAR: i64 = 365 * DAY;

/// Renders the distance between `then` and `now` the way a person would say
/// it: "now", "3 minutes ago", "a day from now".
pub fn humanize_elapsed<A: TimeZone, B: TimeZone>(then: &DateTime<A>, now: &DateTime<B>) -> String {
    let seconds = (now.timestamp_millis() - then.timestamp_millis()) / 1000;
    let (magnitude, suffix) = if seconds >= 0 {
        (seconds, "ago")
    } else {
        (-seconds, "from now")
    };

    if magnitude < 1 {
        return "now".to_string();
    }

    let phrase = match magnitude {
        s if s < MINUTE => counted(s, "a second", "seconds"),
        s if s < HOUR => counted(s / MINUTE, "a minute", "minutes"),
        s if s < DAY => counted(s / HOUR, "an hour", "hours"),
        s if s < MONTH => counted(s / DAY, "a day", "days"),
        s if s < YEAR => counted(s / MONTH, "a month", "months"),
        s => counted(s / YEAR, "a year", "years"),
    };
    format!("{phrase} {suffix}")
}

fn counted(count: i64, singular: &str, plural: &str) -> String {
    if count == 1 {
        singular.to_string()
    } else {
        format!("{count} {plural}")
    }
}
