//! Day-count arithmetic for access records.
//!
//! Access dates are stored as whole days since 1970-01-01, so records written on
//! different machines (or by different tools) compare with plain integer math.

use time::{Date, OffsetDateTime};

/// Julian day number of 1970-01-01.
const UNIX_EPOCH_JULIAN_DAY: i32 = 2_440_588;

/// Returns the current calendar date in the local timezone.
///
/// Falls back to UTC on platforms where `time` cannot determine the local offset.
pub fn today() -> Date {
    match OffsetDateTime::now_local() {
        Ok(now) => now.date(),
        Err(err) => {
            tracing::trace!(
                target = "nova.dir_expiry",
                error = %err,
                "local UTC offset unavailable; using UTC date"
            );
            OffsetDateTime::now_utc().date()
        }
    }
}

/// Number of days between 1970-01-01 and `date`.
pub fn day_count(date: Date) -> i64 {
    i64::from(date.to_julian_day() - UNIX_EPOCH_JULIAN_DAY)
}

/// Inverse of [`day_count`]. Returns `None` for counts outside the range `time` supports.
pub fn date_from_day_count(days: i64) -> Option<Date> {
    let julian = days.checked_add(i64::from(UNIX_EPOCH_JULIAN_DAY))?;
    let julian = i32::try_from(julian).ok()?;
    Date::from_julian_day(julian).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::{Duration, Month};

    #[test]
    fn epoch_is_day_zero() {
        let epoch = Date::from_calendar_date(1970, Month::January, 1).unwrap();
        assert_eq!(day_count(epoch), 0);
    }

    #[test]
    fn known_date_matches_unix_days() {
        // 2000-01-01T00:00:00Z is 946_684_800 seconds after the epoch.
        let date = Date::from_calendar_date(2000, Month::January, 1).unwrap();
        assert_eq!(day_count(date), 946_684_800 / 86_400);
    }

    #[test]
    fn day_count_tracks_date_subtraction() {
        let date = Date::from_calendar_date(2024, Month::March, 1).unwrap();
        assert_eq!(day_count(date) - day_count(date - Duration::days(100)), 100);
    }

    #[test]
    fn date_from_day_count_inverts_day_count() {
        let date = Date::from_calendar_date(2031, Month::July, 14).unwrap();
        assert_eq!(date_from_day_count(day_count(date)), Some(date));
        assert_eq!(date_from_day_count(i64::MAX), None);
    }
}
