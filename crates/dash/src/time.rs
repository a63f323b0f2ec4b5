//! Clock arithmetic shared by the manifest model and the navigator.
//!
//! Presentation positions are unsigned [`Duration`]s measured from the zero point of the
//! MPD timeline. Wall clock instants are [`DateTime<Utc>`].

use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};

/// Difference `t2 - t1` in microseconds.
pub fn calculate_time_difference(t1: &DateTime<Utc>, t2: &DateTime<Utc>) -> i64 {
    (*t2 - *t1).num_microseconds().unwrap_or_else(|| {
        if t2 >= t1 {
            i64::MAX
        } else {
            i64::MIN
        }
    })
}

/// Adds a signed microsecond offset to a wall clock instant.
pub fn add_time_difference(t: &DateTime<Utc>, usecs: i64) -> DateTime<Utc> {
    *t + TimeDelta::microseconds(usecs)
}

/// Parses an ISO 8601 duration such as `PT1H2M3.5S`.
pub fn parse_duration(value: &str) -> Option<Duration> {
    iso8601_duration::Duration::parse(value.trim()).ok()?.to_std()
}

/// Parses a presentation delay expressed as a number followed by a unit:
/// `s` (seconds), `ms` (milliseconds) or `f` (fragments of `max_segment_duration`).
pub fn parse_default_presentation_delay(
    value: &str,
    max_segment_duration: Option<Duration>,
) -> Option<Duration> {
    let value = value.trim();
    let split = value
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(value.len());
    let (number, unit) = value.split_at(split);
    let number = number.parse::<f64>().ok()?;
    if !number.is_finite() || number < 0.0 {
        return None;
    }

    match unit.trim() {
        "s" => Duration::try_from_secs_f64(number).ok(),
        "ms" => Duration::try_from_secs_f64(number / 1000.0).ok(),
        "f" => max_segment_duration?.checked_mul_f64(number),
        _ => None,
    }
}

/// Converts a value in `timescale` units into a duration.
pub fn units_to_duration(value: u64, timescale: u64) -> Duration {
    let timescale = timescale.max(1);
    let secs = value / timescale;
    let rem = value % timescale;
    Duration::from_secs(secs) + Duration::from_nanos((rem as u128 * 1_000_000_000 / timescale as u128) as u64)
}

/// Converts a duration into `timescale` units, rounding to the nearest unit so that
/// `units_to_duration` values map back onto the same boundary.
pub fn duration_to_units(duration: Duration, timescale: u64) -> u64 {
    let units = (duration.as_nanos() * timescale.max(1) as u128 + 500_000_000) / 1_000_000_000;
    u64::try_from(units).unwrap_or(u64::MAX)
}

/// Converts an unsigned presentation offset into a signed chrono delta.
pub fn to_time_delta(duration: Duration) -> TimeDelta {
    TimeDelta::from_std(duration).unwrap_or(TimeDelta::MAX)
}

trait DurationExt {
    fn checked_mul_f64(self, rhs: f64) -> Option<Duration>;
}

impl DurationExt for Duration {
    fn checked_mul_f64(self, rhs: f64) -> Option<Duration> {
        Duration::try_from_secs_f64(self.as_secs_f64() * rhs).ok()
    }
}
