//! Declarative "when to fire" descriptor attached to a report subscription.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Highest day-of-month the subscription form accepts.
pub const MAX_DAY_OF_MONTH: u32 = 28;

/// How often a subscription fires.
///
/// Values outside the five known kinds deserialize to [`Frequency::Unrecognized`]
/// instead of failing, so a bad row is skipped by the matcher rather than
/// aborting the whole cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Frequency {
    Once,
    Daily,
    Weekly,
    Monthly,
    Interval,
    #[serde(other)]
    Unrecognized,
}

impl Frequency {
    pub fn as_str(&self) -> &'static str {
        match self {
            Frequency::Once => "once",
            Frequency::Daily => "daily",
            Frequency::Weekly => "weekly",
            Frequency::Monthly => "monthly",
            Frequency::Interval => "interval",
            Frequency::Unrecognized => "unrecognized",
        }
    }

    /// Parse a stored frequency value. Never fails.
    pub fn parse_lenient(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "once" => Frequency::Once,
            "daily" => Frequency::Daily,
            "weekly" => Frequency::Weekly,
            "monthly" => Frequency::Monthly,
            "interval" => Frequency::Interval,
            _ => Frequency::Unrecognized,
        }
    }

    /// Whether this frequency is gated on a time-of-day window.
    pub fn uses_time_of_day(&self) -> bool {
        matches!(
            self,
            Frequency::Once | Frequency::Daily | Frequency::Weekly | Frequency::Monthly
        )
    }
}

impl fmt::Display for Frequency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Hour and minute on a 24h UTC clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimeOfDay {
    hour: u8,
    minute: u8,
}

impl TimeOfDay {
    /// Returns `None` when hour > 23 or minute > 59.
    pub fn new(hour: u8, minute: u8) -> Option<Self> {
        (hour < 24 && minute < 60).then_some(Self { hour, minute })
    }

    pub fn hour(&self) -> u8 {
        self.hour
    }

    pub fn minute(&self) -> u8 {
        self.minute
    }

    /// Minutes elapsed since midnight.
    pub fn minutes_of_day(&self) -> i64 {
        i64::from(self.hour) * 60 + i64::from(self.minute)
    }
}

impl fmt::Display for TimeOfDay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:02}", self.hour, self.minute)
    }
}

impl FromStr for TimeOfDay {
    type Err = String;

    /// Accepts `HH:MM` and `HH:MM:SS` (seconds are ignored).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.trim().split(':');
        let hour = parts.next().and_then(|h| h.parse::<u8>().ok());
        let minute = parts.next().and_then(|m| m.parse::<u8>().ok());
        if let Some(sec) = parts.next() {
            if sec.parse::<u8>().is_err() {
                return Err(format!("invalid time of day '{s}'"));
            }
        }
        if parts.next().is_some() {
            return Err(format!("invalid time of day '{s}'"));
        }
        match (hour, minute) {
            (Some(h), Some(m)) => TimeOfDay::new(h, m).ok_or_else(|| format!("time of day out of range '{s}'")),
            _ => Err(format!("invalid time of day '{s}'")),
        }
    }
}

impl Serialize for TimeOfDay {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for TimeOfDay {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// Malformed time strings become `None` instead of a deserialization error.
fn lenient_time_of_day<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<Option<TimeOfDay>, D::Error> {
    let raw: Option<String> = Option::deserialize(deserializer)?;
    Ok(raw.and_then(|s| s.parse().ok()))
}

/// Form-level problems with a schedule. Only raised by create/update handling;
/// the matcher never validates.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SpecError {
    #[error("unrecognized frequency")]
    UnrecognizedFrequency,
    #[error("{0} schedules require a time of day")]
    MissingTimeOfDay(Frequency),
    #[error("weekly schedules require at least one day of week")]
    MissingDaysOfWeek,
    #[error("monthly schedules require a day of month")]
    MissingDayOfMonth,
    #[error("interval schedules require a positive number of hours")]
    MissingIntervalHours,
}

/// Immutable schedule descriptor.
///
/// Only the fields relevant to `frequency` are consulted; a weekly schedule
/// may still carry a stale `day_of_month` with no effect.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleSpec {
    pub frequency: Frequency,
    #[serde(
        default,
        deserialize_with = "lenient_time_of_day",
        skip_serializing_if = "Option::is_none"
    )]
    pub time_of_day: Option<TimeOfDay>,
    /// 0-6, Sunday = 0.
    #[serde(default)]
    pub days_of_week: Vec<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub day_of_month: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interval_hours: Option<u32>,
}

impl ScheduleSpec {
    fn timed(frequency: Frequency, at: TimeOfDay) -> Self {
        Self {
            frequency,
            time_of_day: Some(at),
            days_of_week: Vec::new(),
            day_of_month: None,
            interval_hours: None,
        }
    }

    pub fn once(at: TimeOfDay) -> Self {
        Self::timed(Frequency::Once, at)
    }

    pub fn daily(at: TimeOfDay) -> Self {
        Self::timed(Frequency::Daily, at)
    }

    pub fn weekly(at: TimeOfDay, days: impl IntoIterator<Item = u8>) -> Self {
        Self {
            days_of_week: days.into_iter().collect(),
            ..Self::timed(Frequency::Weekly, at)
        }
    }

    pub fn monthly(at: TimeOfDay, day_of_month: u32) -> Self {
        Self {
            day_of_month: Some(day_of_month),
            ..Self::timed(Frequency::Monthly, at)
        }
    }

    pub fn every_hours(hours: u32) -> Self {
        Self {
            frequency: Frequency::Interval,
            time_of_day: None,
            days_of_week: Vec::new(),
            day_of_month: None,
            interval_hours: Some(hours),
        }
    }

    /// Normalize form input: clamp `day_of_month` into 1..=28, drop weekdays
    /// outside 0..=6, sort and de-duplicate the weekday set.
    pub fn normalized(mut self) -> Self {
        self.day_of_month = self.day_of_month.map(|d| d.clamp(1, MAX_DAY_OF_MONTH));
        self.days_of_week.retain(|d| *d <= 6);
        self.days_of_week.sort_unstable();
        self.days_of_week.dedup();
        self
    }

    /// Check that the fields required by `frequency` are present.
    pub fn validate(&self) -> Result<(), SpecError> {
        if self.frequency == Frequency::Unrecognized {
            return Err(SpecError::UnrecognizedFrequency);
        }
        if self.frequency.uses_time_of_day() && self.time_of_day.is_none() {
            return Err(SpecError::MissingTimeOfDay(self.frequency));
        }
        match self.frequency {
            Frequency::Weekly if self.days_of_week.is_empty() => Err(SpecError::MissingDaysOfWeek),
            Frequency::Monthly if self.day_of_month.is_none() => Err(SpecError::MissingDayOfMonth),
            Frequency::Interval if self.interval_hours.unwrap_or(0) == 0 => {
                Err(SpecError::MissingIntervalHours)
            }
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t(h: u8, m: u8) -> TimeOfDay {
        TimeOfDay::new(h, m).unwrap()
    }

    #[test]
    fn frequency_parses_known_kinds_case_insensitively() {
        assert_eq!(Frequency::parse_lenient("Weekly"), Frequency::Weekly);
        assert_eq!(Frequency::parse_lenient(" interval "), Frequency::Interval);
        assert_eq!(Frequency::parse_lenient("hourly"), Frequency::Unrecognized);
    }

    #[test]
    fn unknown_frequency_deserializes_without_error() {
        let spec: ScheduleSpec =
            serde_json::from_str(r#"{"frequency":"fortnightly","time_of_day":"08:00"}"#).unwrap();
        assert_eq!(spec.frequency, Frequency::Unrecognized);
        assert_eq!(spec.time_of_day, Some(t(8, 0)));
    }

    #[test]
    fn time_of_day_accepts_seconds_suffix() {
        assert_eq!("08:30:00".parse::<TimeOfDay>(), Ok(t(8, 30)));
        assert_eq!("23:59".parse::<TimeOfDay>(), Ok(t(23, 59)));
        assert!("24:00".parse::<TimeOfDay>().is_err());
        assert!("8h30".parse::<TimeOfDay>().is_err());
        assert!("08:30:00:00".parse::<TimeOfDay>().is_err());
    }

    #[test]
    fn malformed_time_of_day_becomes_none() {
        let spec: ScheduleSpec =
            serde_json::from_str(r#"{"frequency":"daily","time_of_day":"noon"}"#).unwrap();
        assert_eq!(spec.time_of_day, None);
    }

    #[test]
    fn time_of_day_serializes_zero_padded() {
        let json = serde_json::to_string(&ScheduleSpec::daily(t(7, 5))).unwrap();
        assert!(json.contains(r#""time_of_day":"07:05""#), "got {json}");
    }

    #[test]
    fn normalized_clamps_and_sorts() {
        let spec = ScheduleSpec {
            day_of_month: Some(31),
            ..ScheduleSpec::weekly(t(9, 0), [5, 1, 9, 1, 3])
        }
        .normalized();
        assert_eq!(spec.days_of_week, vec![1, 3, 5]);
        assert_eq!(spec.day_of_month, Some(28));

        let spec = ScheduleSpec::monthly(t(9, 0), 0).normalized();
        assert_eq!(spec.day_of_month, Some(1));
    }

    #[test]
    fn validate_reports_missing_fields() {
        assert_eq!(
            ScheduleSpec::weekly(t(9, 0), []).validate(),
            Err(SpecError::MissingDaysOfWeek)
        );
        assert_eq!(
            ScheduleSpec::every_hours(0).validate(),
            Err(SpecError::MissingIntervalHours)
        );
        let no_time = ScheduleSpec {
            time_of_day: None,
            ..ScheduleSpec::daily(t(9, 0))
        };
        assert_eq!(
            no_time.validate(),
            Err(SpecError::MissingTimeOfDay(Frequency::Daily))
        );
        assert!(ScheduleSpec::every_hours(6).validate().is_ok());
        assert!(ScheduleSpec::monthly(t(6, 0), 15).validate().is_ok());
    }

    #[test]
    fn stale_fields_do_not_fail_validation() {
        let spec = ScheduleSpec {
            day_of_month: Some(12),
            interval_hours: Some(3),
            ..ScheduleSpec::weekly(t(9, 0), [2])
        };
        assert!(spec.validate().is_ok());
    }
}
