//! Time and duration primitives.
//!
//! Calendar payloads carry date/time values in three textual forms and
//! alarm offsets as signed ISO-8601 durations. Everything is normalized
//! to absolute UTC instants here; rendering back into a zone happens at
//! the edges.

use std::str::FromStr;

use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, TimeZone, Utc};
use chrono_tz::Tz;

use crate::error::{CoreError, CoreResult};

const DATE_FORMAT: &str = "%Y%m%d";
const DATETIME_FORMAT: &str = "%Y%m%dT%H%M%S";

/// Look up an IANA zone by name.
pub fn load_zone(name: &str) -> CoreResult<Tz> {
    Tz::from_str(name).map_err(|_| CoreError::UnknownTimezone(name.to_string()))
}

/// Convert a textual iCalendar date/datetime to an absolute instant.
///
/// Three forms are accepted, dispatched on length:
/// - 8: `YYYYMMDD`, midnight wall time in `zone`
/// - 15: `YYYYMMDDTHHMMSS`, wall time in `zone`
/// - 16: `YYYYMMDDTHHMMSSZ`, UTC
pub fn to_instant(value: &str, zone: Tz) -> CoreResult<DateTime<Utc>> {
    match value.len() {
        8 => {
            let date = NaiveDate::parse_from_str(value, DATE_FORMAT)
                .map_err(|_| CoreError::MalformedTime(value.to_string()))?;
            let naive = date
                .and_hms_opt(0, 0, 0)
                .ok_or_else(|| CoreError::MalformedTime(value.to_string()))?;
            localize(naive, zone, value)
        }
        15 => {
            let naive = NaiveDateTime::parse_from_str(value, DATETIME_FORMAT)
                .map_err(|_| CoreError::MalformedTime(value.to_string()))?;
            localize(naive, zone, value)
        }
        16 => {
            let stripped = value
                .strip_suffix('Z')
                .ok_or_else(|| CoreError::MalformedTime(value.to_string()))?;
            let naive = NaiveDateTime::parse_from_str(stripped, DATETIME_FORMAT)
                .map_err(|_| CoreError::MalformedTime(value.to_string()))?;
            Ok(naive.and_utc())
        }
        _ => Err(CoreError::MalformedTime(value.to_string())),
    }
}

/// DST folds resolve to the earliest valid instant; times that fall in
/// a gap have no valid mapping and fail.
fn localize(naive: NaiveDateTime, zone: Tz, original: &str) -> CoreResult<DateTime<Utc>> {
    zone.from_local_datetime(&naive)
        .earliest()
        .map(|dt| dt.with_timezone(&Utc))
        .ok_or_else(|| CoreError::MalformedTime(original.to_string()))
}

/// Parse a signed ISO-8601 duration (`PT30M`, `-P1D`, `-P6DT9H`, ...).
pub fn parse_duration(value: &str) -> CoreResult<Duration> {
    let negative = value.starts_with('-');
    let body = if negative { &value[1..] } else { value };
    let parsed =
        iso8601::duration(body).map_err(|_| CoreError::MalformedDuration(value.to_string()))?;
    let std_duration: std::time::Duration = parsed.into();
    let duration = Duration::from_std(std_duration)
        .map_err(|_| CoreError::MalformedDuration(value.to_string()))?;
    Ok(if negative { -duration } else { duration })
}

/// True for duration-valued trigger strings (`P...`/`-P...`), false for
/// absolute instants.
pub fn is_relative(value: &str) -> bool {
    value.starts_with('P') || value.starts_with("-P")
}

/// Render an instant in the 16-character UTC form.
pub fn format_utc(instant: DateTime<Utc>) -> String {
    instant.format("%Y%m%dT%H%M%SZ").to_string()
}
