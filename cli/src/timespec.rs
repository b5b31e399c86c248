use chrono::{Local, NaiveDate, NaiveDateTime, TimeZone};
use serac_core::{Error, Result};

/// Parse a `--at` value into epoch seconds.
///
/// Accepted forms: integer epoch seconds, `YYYY-MM-DD` (local midnight),
/// `YYYY-MM-DD HH:MM:SS` and `YYYY-MM-DDTHH:MM:SS` (local time).
pub fn parse(value: &str) -> Result<i64> {
    let value = value.trim();

    if !value.is_empty() && value.bytes().all(|b| b.is_ascii_digit()) {
        return value
            .parse()
            .map_err(|_| bad_timespec(value));
    }

    let datetime = NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S")
        .or_else(|_| NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S"))
        .or_else(|_| {
            NaiveDate::parse_from_str(value, "%Y-%m-%d")
                .map(|date| date.and_hms_opt(0, 0, 0).expect("midnight is valid"))
        })
        .map_err(|_| bad_timespec(value))?;

    Local
        .from_local_datetime(&datetime)
        .earliest()
        .map(|local| local.timestamp())
        .ok_or_else(|| bad_timespec(value))
}

fn bad_timespec(value: &str) -> Error {
    Error::Config(format!(
        "invalid date {value:?} (expected epoch seconds, YYYY-MM-DD, \
         YYYY-MM-DD HH:MM:SS or YYYY-MM-DDTHH:MM:SS)"
    ))
}
