// src/day_window.rs
//! Day bucketing in the roster's reference timezone.
//!
//! Every day-bucketed query goes through [`DayWindow`] so that "a day" means the
//! same closed instant range for the roster and for the field events, no matter
//! which timezone the process itself runs in.

use chrono::{DateTime, Duration, FixedOffset, NaiveDate, TimeZone, Utc};
use serde::Serialize;

/// Closed `[start, end]` instant range covering one civil day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DayRange {
    pub day: NaiveDate,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl DayRange {
    pub fn contains(&self, instant: DateTime<Utc>) -> bool {
        instant >= self.start && instant <= self.end
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DayWindow {
    timezone: FixedOffset,
}

impl DayWindow {
    pub fn new(timezone: FixedOffset) -> Self {
        Self { timezone }
    }

    pub fn timezone(&self) -> FixedOffset {
        self.timezone
    }

    /// Civil date of `instant` in the reference timezone.
    pub fn local_date(&self, instant: DateTime<Utc>) -> NaiveDate {
        instant.with_timezone(&self.timezone).date_naive()
    }

    /// `[local midnight, local midnight + 24h - 1ns]` of the day containing `instant`.
    pub fn day_range(&self, instant: DateTime<Utc>) -> DayRange {
        self.range_for_date(self.local_date(instant))
    }

    pub fn range_for_date(&self, day: NaiveDate) -> DayRange {
        let midnight = day.and_hms_opt(0, 0, 0).unwrap_or_default();
        // Fixed offsets have no gaps or folds: local midnight is exactly one instant.
        let start = Utc.from_utc_datetime(&midnight) - self.offset_duration();
        let end = start + Duration::hours(24) - Duration::nanoseconds(1);
        DayRange { day, start, end }
    }

    /// Inclusive list of days `[first, first + count - 1]`.
    pub fn days(first: NaiveDate, count: u32) -> Vec<NaiveDate> {
        first.iter_days().take(count as usize).collect()
    }

    fn offset_duration(&self) -> Duration {
        Duration::seconds(i64::from(self.timezone.local_minus_utc()))
    }
}

/// Parses `+HH:MM` / `-HH:MM` (also `Z` and `UTC`).
pub fn parse_offset(value: &str) -> Option<FixedOffset> {
    let value = value.trim();
    if value.eq_ignore_ascii_case("z") || value.eq_ignore_ascii_case("utc") {
        return FixedOffset::east_opt(0);
    }
    let (sign, rest) = match value.as_bytes().first()? {
        b'+' => (1, &value[1..]),
        b'-' => (-1, &value[1..]),
        _ => return None,
    };
    let (hours, minutes) = rest.split_once(':')?;
    let hours: i32 = hours.parse().ok()?;
    let minutes: i32 = minutes.parse().ok()?;
    if hours > 14 || minutes > 59 {
        return None;
    }
    FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60))
}
