//! Nanosecond-precision absolute and relative time.
//!
//! `Timestamp` and `Timedelta` are thin, total-order wrappers around `i64`
//! nanoseconds. Duration strings from configuration ("30s", "3min", "1 day")
//! are parsed with [`humantime`].

use std::fmt;
use std::ops::{Add, Sub};
use std::time::SystemTime;

use serde::{de::Error as DeError, Deserialize, Deserializer, Serialize};

/// An absolute point in time, nanoseconds since the Unix epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Timestamp(i64);

impl Timestamp {
    pub const fn from_posix_ns(ns: i64) -> Self {
        Timestamp(ns)
    }

    pub fn posix_ns(self) -> i64 {
        self.0
    }

    pub fn now() -> Self {
        let dur = SystemTime::now()
            .duration_since(SystemTime::UNIX_EPOCH)
            .unwrap_or_default();
        Timestamp(dur.as_nanos() as i64)
    }

    /// Render as an ISO-8601 timestamp with second precision, UTC.
    pub fn to_iso_seconds(self) -> String {
        let secs = self.0.div_euclid(1_000_000_000);
        let nanos = self.0.rem_euclid(1_000_000_000) as u32;
        chrono::DateTime::from_timestamp(secs, nanos)
            .unwrap_or_default()
            .format("%Y-%m-%dT%H:%M:%S")
            .to_string()
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}ns", self.0)
    }
}

impl Sub for Timestamp {
    type Output = Timedelta;
    fn sub(self, rhs: Timestamp) -> Timedelta {
        Timedelta(self.0 - rhs.0)
    }
}

impl Sub<Timedelta> for Timestamp {
    type Output = Timestamp;
    fn sub(self, rhs: Timedelta) -> Timestamp {
        Timestamp(self.0 - rhs.0)
    }
}

impl Add<Timedelta> for Timestamp {
    type Output = Timestamp;
    fn add(self, rhs: Timedelta) -> Timestamp {
        Timestamp(self.0 + rhs.0)
    }
}

/// A relative duration, nanoseconds. May be negative (used for deltas).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Timedelta(i64);

impl Timedelta {
    pub const ZERO: Timedelta = Timedelta(0);

    pub const fn from_ns(ns: i64) -> Self {
        Timedelta(ns)
    }

    pub fn from_s(secs: f64) -> Self {
        Timedelta((secs * 1_000_000_000.0) as i64)
    }

    pub fn ns(self) -> i64 {
        self.0
    }

    pub fn as_std(self) -> std::time::Duration {
        std::time::Duration::from_nanos(self.0.max(0) as u64)
    }

    /// Parse a human-readable duration string such as `"30s"`, `"3min"`,
    /// `"1 day"`.
    pub fn parse(s: &str) -> Result<Self, humantime::DurationError> {
        let std_dur = humantime::parse_duration(s)?;
        Ok(Timedelta(std_dur.as_nanos() as i64))
    }
}

impl fmt::Display for Timedelta {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", humantime::format_duration(self.as_std()))
    }
}

impl Add for Timedelta {
    type Output = Timedelta;
    fn add(self, rhs: Timedelta) -> Timedelta {
        Timedelta(self.0 + rhs.0)
    }
}

impl Sub for Timedelta {
    type Output = Timedelta;
    fn sub(self, rhs: Timedelta) -> Timedelta {
        Timedelta(self.0 - rhs.0)
    }
}

impl std::iter::Sum for Timedelta {
    fn sum<I: Iterator<Item = Timedelta>>(iter: I) -> Self {
        iter.fold(Timedelta::ZERO, Add::add)
    }
}

/// Deserialize a duration string (config field) into a [`Timedelta`].
pub fn deserialize_timedelta<'de, D>(deserializer: D) -> Result<Timedelta, D::Error>
where
    D: Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    Timedelta::parse(&s).map_err(DeError::custom)
}

/// Same as [`deserialize_timedelta`] but for an `Option<String>` field.
pub fn deserialize_opt_timedelta<'de, D>(
    deserializer: D,
) -> Result<Option<Timedelta>, D::Error>
where
    D: Deserializer<'de>,
{
    let opt = Option::<String>::deserialize(deserializer)?;
    opt.map(|s| Timedelta::parse(&s).map_err(DeError::custom))
        .transpose()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_human_durations() {
        assert_eq!(Timedelta::parse("30s").unwrap(), Timedelta::from_s(30.0));
        assert_eq!(Timedelta::parse("3min").unwrap(), Timedelta::from_s(180.0));
    }

    #[test]
    fn timestamp_ordering_is_total() {
        let a = Timestamp::from_posix_ns(1);
        let b = Timestamp::from_posix_ns(2);
        assert!(a < b);
        assert_eq!(b - a, Timedelta::from_ns(1));
    }
}
