/// Shared unit and time conversion helpers for the weather archiver
///
use chrono::{DateTime, FixedOffset, TimeZone, Utc};

pub const SECONDS_PER_DAY: i64 = 86_400;

/// Convert a temperature in Celsius to Fahrenheit.
///
/// # Examples
///
/// ```
/// use weather_archiver::units::celsius_to_fahrenheit;
///
/// assert_eq!(celsius_to_fahrenheit(0.0), 32.0);
/// assert_eq!(celsius_to_fahrenheit(100.0), 212.0);
/// ```
pub fn celsius_to_fahrenheit(celsius: f64) -> f64 {
    celsius * 9.0 / 5.0 + 32.0
}

/// Convert a Unix timestamp to a timezone-aware timestamp at the given
/// UTC offset in seconds.
///
/// The provider also sends a tz *label* (e.g. "America/New_York") alongside
/// the numeric offset; the label is descriptive metadata only and never
/// enters this arithmetic.
///
/// Returns `None` if the offset is out of range (beyond +/- 24h) or the
/// timestamp is unrepresentable.
pub fn unix_to_tz_timestamp(ts: i64, tzoff: i32) -> Option<DateTime<FixedOffset>> {
    let offset = FixedOffset::east_opt(tzoff)?;
    let utc = Utc.timestamp_opt(ts, 0).single()?;
    Some(utc.with_timezone(&offset))
}

/// Floor a Unix timestamp to 00:00:00 UTC of its day, discarding time-of-day.
///
/// # Examples
///
/// ```
/// use weather_archiver::units::truncate_to_day;
///
/// assert_eq!(truncate_to_day(86_461), 86_400);
/// ```
pub fn truncate_to_day(ts: i64) -> i64 {
    ts - ts.rem_euclid(SECONDS_PER_DAY)
}

/// Parse a "+HH:MM" / "-HH:MM" timezone offset label into seconds.
///
/// The day-summary endpoint reports its offset in this form rather than as
/// an integer. A missing sign is treated as positive.
pub fn tz_label_to_seconds(label: &str) -> Option<i32> {
    let (sign, rest) = match label.as_bytes().first()? {
        b'-' => (-1, &label[1..]),
        b'+' => (1, &label[1..]),
        _ => (1, label),
    };

    let (hours, minutes) = rest.split_once(':')?;
    let hours: i32 = hours.parse().ok()?;
    let minutes: i32 = minutes.parse().ok()?;
    if !(0..60).contains(&minutes) {
        return None;
    }

    Some(sign * (hours * 3600 + minutes * 60))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_celsius_to_fahrenheit_freezing() {
        assert_eq!(celsius_to_fahrenheit(0.0), 32.0);
    }

    #[test]
    fn test_celsius_to_fahrenheit_boiling() {
        assert_eq!(celsius_to_fahrenheit(100.0), 212.0);
    }

    #[test]
    fn test_celsius_to_fahrenheit_negative() {
        assert_eq!(celsius_to_fahrenheit(-40.0), -40.0);
    }

    #[test]
    fn test_unix_to_tz_timestamp_shifts_by_offset() {
        let ts = 1_700_000_000;
        let tzoff = -14_400; // -04:00
        let shifted = unix_to_tz_timestamp(ts, tzoff).unwrap();

        // The instant is unchanged; only the displayed offset moves.
        assert_eq!(shifted.timestamp(), ts);
        assert_eq!(shifted.offset().local_minus_utc(), tzoff);

        let utc = unix_to_tz_timestamp(ts, 0).unwrap();
        assert_eq!(
            shifted.naive_local() - utc.naive_local(),
            chrono::Duration::seconds(tzoff as i64)
        );
    }

    #[test]
    fn test_unix_to_tz_timestamp_monotonic() {
        let tzoff = 3_600;
        let a = unix_to_tz_timestamp(1_000, tzoff).unwrap();
        let b = unix_to_tz_timestamp(2_000, tzoff).unwrap();
        assert!(a < b);
    }

    #[test]
    fn test_unix_to_tz_timestamp_rejects_bad_offset() {
        assert!(unix_to_tz_timestamp(0, 90_000).is_none());
    }

    #[test]
    fn test_truncate_to_day_discards_time() {
        assert_eq!(truncate_to_day(0), 0);
        assert_eq!(truncate_to_day(86_399), 0);
        assert_eq!(truncate_to_day(86_400), 86_400);
        assert_eq!(truncate_to_day(1_700_000_000), 1_699_920_000);
    }

    #[test]
    fn test_truncate_to_day_pre_epoch() {
        assert_eq!(truncate_to_day(-1), -86_400);
    }

    #[test]
    fn test_tz_label_to_seconds() {
        assert_eq!(tz_label_to_seconds("-04:00"), Some(-14_400));
        assert_eq!(tz_label_to_seconds("+05:30"), Some(19_800));
        assert_eq!(tz_label_to_seconds("00:00"), Some(0));
        assert_eq!(tz_label_to_seconds("bogus"), None);
    }
}
