// src/hours.rs
use chrono::{DateTime, Duration, NaiveTime, Timelike, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use crate::day_window::DayWindow;
use crate::model::{PlannedSlot, ShiftOpening};

pub const DEFAULT_DELAY_GRACE_MINUTES: i64 = 30;

const MINUTES_PER_DAY: i64 = 24 * 60;

/// Hours between opening and closing; ongoing shifts are measured against `now`.
pub fn worked_hours(opening: &ShiftOpening, now: DateTime<Utc>) -> Decimal {
    let until = opening.closed_at.unwrap_or(now);
    let seconds = (until - opening.opened_at).num_seconds().max(0);
    (Decimal::from(seconds) / dec!(3600)).round_dp(2)
}

/// Planned hours of a slot from its clock times; zero when either is unset.
/// An end before the start is an overnight shift and wraps past midnight.
pub fn scheduled_hours(start: Option<NaiveTime>, end: Option<NaiveTime>) -> Decimal {
    let (Some(start), Some(end)) = (start, end) else {
        return Decimal::ZERO;
    };
    let mut minutes = minute_of_day(end) - minute_of_day(start);
    if minutes < 0 {
        minutes += MINUTES_PER_DAY;
    }
    (Decimal::from(minutes) / dec!(60)).round_dp(2)
}

fn minute_of_day(time: NaiveTime) -> i64 {
    i64::from(time.hour()) * 60 + i64::from(time.minute())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DelayAssessment {
    /// The slot has no expected start; nothing to compare against.
    NotApplicable,
    OnTime,
    /// Late start made up by staying longer; `delta >= 0`.
    Compensated {
        expected: Decimal,
        actual: Decimal,
        delta: Decimal,
    },
    /// Late start not made up; `delta < 0`. No fact is recorded for this yet.
    Uncompensated {
        expected: Decimal,
        actual: Decimal,
        delta: Decimal,
    },
}

/// Compares an opening with its slot's expected start plus `grace`.
pub fn assess_delay(
    slot: &PlannedSlot,
    opening: &ShiftOpening,
    window: &DayWindow,
    grace: Duration,
    now: DateTime<Utc>,
) -> DelayAssessment {
    let Some(expected_start) = slot.expected_start else {
        return DelayAssessment::NotApplicable;
    };
    let day_start = window.range_for_date(slot.day).start;
    let expected_at = day_start + Duration::minutes(minute_of_day(expected_start));

    if opening.opened_at <= expected_at + grace {
        return DelayAssessment::OnTime;
    }

    let expected = scheduled_hours(slot.expected_start, slot.expected_end);
    let actual = worked_hours(opening, now);
    let delta = actual - expected;
    if delta >= Decimal::ZERO {
        DelayAssessment::Compensated {
            expected,
            actual,
            delta,
        }
    } else {
        DelayAssessment::Uncompensated {
            expected,
            actual,
            delta,
        }
    }
}
