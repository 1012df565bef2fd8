//! Calendar helpers. All calendar arithmetic in the engine is done in UTC.
use std::sync::OnceLock;

use chrono::{DateTime, Datelike, NaiveDate, TimeZone, Timelike, Utc};
use regex::Regex;

fn midnight(date: NaiveDate) -> DateTime<Utc> {
    Utc.from_utc_datetime(&date.and_time(chrono::NaiveTime::MIN))
}

pub fn start_of_day(dt: DateTime<Utc>) -> DateTime<Utc> {
    midnight(dt.date_naive())
}

pub fn start_of_month(dt: DateTime<Utc>) -> DateTime<Utc> {
    let date = dt.date_naive();
    midnight(date.with_day(1).unwrap_or(date))
}

pub fn start_of_year(dt: DateTime<Utc>) -> DateTime<Utc> {
    let date = dt.date_naive();
    midnight(NaiveDate::from_ymd_opt(date.year(), 1, 1).unwrap_or(date))
}

pub fn start_of_next_year(dt: DateTime<Utc>) -> DateTime<Utc> {
    let date = dt.date_naive();
    match NaiveDate::from_ymd_opt(date.year() + 1, 1, 1) {
        Some(next) => midnight(next),
        None => DateTime::<Utc>::MAX_UTC,
    }
}

pub fn day_key(dt: DateTime<Utc>) -> NaiveDate {
    dt.date_naive()
}

/// Number of whole days since 1970-01-01.
pub fn epoch_days(date: NaiveDate) -> i64 {
    midnight(date).timestamp().div_euclid(86_400)
}

/// `YYYY-MM`
pub fn month_key(dt: DateTime<Utc>) -> String {
    dt.format("%Y-%m").to_string()
}

/// `YYYYMMDD`
pub fn compact_date(dt: DateTime<Utc>) -> String {
    dt.format("%Y%m%d").to_string()
}

pub fn minutes_of_day(dt: DateTime<Utc>) -> u32 {
    dt.hour() * 60 + dt.minute()
}

/// Parses an `HH:mm` string into minutes after midnight.
pub fn parse_time_of_day(value: &str) -> Option<u32> {
    static HH_MM: OnceLock<Regex> = OnceLock::new();
    let re = HH_MM.get_or_init(|| Regex::new(r"^([01]\d|2[0-3]):([0-5]\d)$").unwrap());
    let caps = re.captures(value.trim())?;
    let hours = caps.get(1)?.as_str().parse::<u32>().ok()?;
    let minutes = caps.get(2)?.as_str().parse::<u32>().ok()?;
    Some(hours * 60 + minutes)
}

#[cfg(test)]
mod test {
    use super::*;

    fn at(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    #[test]
    fn window_starts() {
        let t = at("2024-07-19T15:42:10Z");
        assert_eq!(start_of_day(t), at("2024-07-19T00:00:00Z"));
        assert_eq!(start_of_month(t), at("2024-07-01T00:00:00Z"));
        assert_eq!(start_of_year(t), at("2024-01-01T00:00:00Z"));
        assert_eq!(start_of_next_year(t), at("2025-01-01T00:00:00Z"));
        assert_eq!(month_key(t), "2024-07");
        assert_eq!(compact_date(t), "20240719");
        assert_eq!(minutes_of_day(t), 15 * 60 + 42);
    }

    #[test]
    fn epoch_day_numbers() {
        assert_eq!(epoch_days(NaiveDate::from_ymd_opt(1970, 1, 1).unwrap()), 0);
        assert_eq!(epoch_days(NaiveDate::from_ymd_opt(1970, 2, 1).unwrap()), 31);
    }

    #[test]
    fn time_of_day() {
        assert_eq!(parse_time_of_day("09:30"), Some(570));
        assert_eq!(parse_time_of_day("23:59"), Some(1439));
        assert_eq!(parse_time_of_day("24:00"), None);
        assert_eq!(parse_time_of_day("9:30"), None);
        assert_eq!(parse_time_of_day("noon"), None);
    }
}
