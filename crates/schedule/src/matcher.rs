//! Due-subscription predicate.
//!
//! Timed frequencies (once/daily/weekly/monthly) match when the current UTC
//! minute-of-day is within [`MATCH_WINDOW_MINUTES`] of the configured time, and
//! are then suppressed for [`REPEAT_GUARD_MINUTES`] after the last fire so two
//! overlapping trigger invocations inside one window send only once. Interval
//! schedules ignore the clock and gate purely on elapsed time.

use chrono::{DateTime, Datelike, Duration, Timelike, Utc};
use tracing::trace;

use crate::spec::{Frequency, ScheduleSpec};
use crate::subscription::DispatchState;

/// Half-width of the time-of-day match window, inclusive.
pub const MATCH_WINDOW_MINUTES: i64 = 5;

/// Minimum gap between fires of a timed schedule.
pub const REPEAT_GUARD_MINUTES: i64 = 60;

/// Decide whether a schedule fires at `now`.
///
/// Never errors: an unrecognized frequency, an inactive subscription, or a
/// spec missing the fields its frequency needs is simply not due.
pub fn is_due(spec: &ScheduleSpec, state: &DispatchState, now: DateTime<Utc>) -> bool {
    if !state.is_active {
        return false;
    }

    let matched = match spec.frequency {
        Frequency::Once => state.last_fired_at.is_none() && within_window(spec, now),
        Frequency::Daily => within_window(spec, now),
        Frequency::Weekly => {
            within_window(spec, now) && spec.days_of_week.contains(&weekday_index(now))
        }
        Frequency::Monthly => within_window(spec, now) && spec.day_of_month == Some(now.day()),
        Frequency::Interval => return interval_elapsed(spec, state, now),
        Frequency::Unrecognized => {
            trace!("unrecognized frequency, skipping");
            return false;
        }
    };

    matched && !fired_recently(state, now)
}

/// Day of week with Sunday = 0.
fn weekday_index(now: DateTime<Utc>) -> u8 {
    now.weekday().num_days_from_sunday() as u8
}

fn within_window(spec: &ScheduleSpec, now: DateTime<Utc>) -> bool {
    let Some(at) = spec.time_of_day else {
        return false;
    };
    let current = i64::from(now.hour()) * 60 + i64::from(now.minute());
    (current - at.minutes_of_day()).abs() <= MATCH_WINDOW_MINUTES
}

fn fired_recently(state: &DispatchState, now: DateTime<Utc>) -> bool {
    state
        .last_fired_at
        .is_some_and(|last| now.signed_duration_since(last) < Duration::minutes(REPEAT_GUARD_MINUTES))
}

fn interval_elapsed(spec: &ScheduleSpec, state: &DispatchState, now: DateTime<Utc>) -> bool {
    let hours = match spec.interval_hours {
        Some(h) if h > 0 => h,
        _ => return false,
    };
    match state.last_fired_at {
        None => true,
        Some(last) => now.signed_duration_since(last) >= Duration::hours(i64::from(hours)),
    }
}
