use std::{
    fmt::Display,
    ops::{Add, AddAssign, Sub},
};

use chrono::{DateTime, Timelike, Utc};
use serde::{Deserialize, Serialize};

/// 9999-12-31T23:59:59.999Z, the last instant with a four digit year.
const LATEST_MILLIS: i64 = 253_402_300_799_999;

/// Milliseconds since the unix epoch.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Timestamp(i64);

impl From<i64> for Timestamp {
    fn from(value: i64) -> Self {
        Self(value)
    }
}

impl Sub<Timestamp> for Timestamp {
    type Output = Duration;

    fn sub(self, rhs: Self) -> Self::Output {
        Duration(self.0.saturating_sub(rhs.0))
    }
}

impl Add<Duration> for Timestamp {
    type Output = Self;

    fn add(self, rhs: Duration) -> Self::Output {
        Self(self.0.saturating_add(rhs.0))
    }
}

impl AddAssign<Duration> for Timestamp {
    fn add_assign(&mut self, rhs: Duration) {
        self.0 = self.0.saturating_add(rhs.0)
    }
}

impl Sub<Duration> for Timestamp {
    type Output = Self;

    fn sub(self, rhs: Duration) -> Self::Output {
        Self(self.0.saturating_sub(rhs.0))
    }
}

impl Display for Timestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.to_datetime() {
            Some(datetime) => write!(f, "{}", datetime.to_rfc3339()),
            None => write!(f, "{}ms", self.0),
        }
    }
}

impl Timestamp {
    pub fn now() -> Self {
        Self(Utc::now().timestamp_millis())
    }

    pub const fn from_millis(millis: i64) -> Self {
        Self(millis)
    }

    pub const fn from_seconds(secs: i64) -> Self {
        Self(secs.saturating_mul(1000))
    }

    pub const fn as_millis(&self) -> i64 {
        self.0
    }

    /// Between the epoch and the end of year 9999.
    pub fn is_valid(&self) -> bool {
        (0..=LATEST_MILLIS).contains(&self.0)
    }

    pub fn to_datetime(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp_millis(self.0)
    }

    /// Hour of the day in UTC, used to bucket historical speeds.
    pub fn hour_of_day(&self) -> u8 {
        self.to_datetime()
            .map(|datetime| datetime.hour() as u8)
            .unwrap_or_default()
    }
}

/// Signed span of time with millisecond resolution.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Duration(i64);

impl From<i64> for Duration {
    fn from(value: i64) -> Self {
        Self(value)
    }
}

impl Duration {
    pub const ZERO: Duration = Duration(0);

    pub const fn from_millis(millis: i64) -> Self {
        Self(millis)
    }

    pub const fn from_seconds(secs: i64) -> Self {
        Self(secs.saturating_mul(1000))
    }

    pub const fn from_minutes(minutes: i64) -> Self {
        Self(minutes.saturating_mul(60_000))
    }

    /// Rounds to the nearest millisecond.
    pub fn from_seconds_f64(secs: f64) -> Self {
        Self((secs * 1000.0).round() as i64)
    }

    pub const fn as_millis(&self) -> i64 {
        self.0
    }

    pub fn as_seconds_f64(&self) -> f64 {
        self.0 as f64 / 1000.0
    }
}

impl Add for Duration {
    type Output = Self;

    fn add(self, rhs: Self) -> Self::Output {
        Self(self.0.saturating_add(rhs.0))
    }
}

impl Sub for Duration {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self::Output {
        Self(self.0.saturating_sub(rhs.0))
    }
}

#[test]
fn timestamp_arithmetic_test() {
    let start = Timestamp::from_seconds(10);
    let end = start + Duration::from_seconds(5);
    assert_eq!(end.as_millis(), 15_000);
    assert_eq!((end - start).as_seconds_f64(), 5.0);
    assert_eq!((start - end).as_millis(), -5_000);
}

#[test]
fn arithmetic_saturates_test() {
    let end = Timestamp::from_millis(i64::MAX - 1) + Duration::from_minutes(5);
    assert_eq!(end.as_millis(), i64::MAX);
    let span = Timestamp::from_millis(i64::MIN) - Timestamp::from_seconds(1);
    assert_eq!(span.as_millis(), i64::MIN);
}

#[test]
fn timestamp_range_test() {
    assert!(Timestamp::from_seconds(1_704_116_700).is_valid());
    assert!(Timestamp::from_millis(0).is_valid());
    assert!(!Timestamp::from_millis(-1).is_valid());
    assert!(!Timestamp::from_millis(i64::MAX - 1).is_valid());
}

#[test]
fn hour_of_day_test() {
    // 2024-01-01T13:45:00Z
    let timestamp = Timestamp::from_seconds(1_704_116_700);
    assert_eq!(timestamp.hour_of_day(), 13);
}

#[test]
fn duration_from_fractional_seconds_test() {
    assert_eq!(Duration::from_seconds_f64(0.8).as_millis(), 800);
    assert_eq!(Duration::from_seconds_f64(29.5082).as_millis(), 29_508);
}
