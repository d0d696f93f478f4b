use std::fmt;
use std::str::FromStr;
use std::sync::RwLock;

use chrono::{DateTime, Duration, Local, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Timelike, Utc};
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};

/// Source of "now" for the whole server. Session expiry runs on UTC,
/// attendance on local wall-clock time.
pub trait Clock: Send + Sync {
    fn now_utc(&self) -> DateTime<Utc>;
    fn local_now(&self) -> NaiveDateTime;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_utc(&self) -> DateTime<Utc> {
        Utc::now()
    }

    fn local_now(&self) -> NaiveDateTime {
        Local::now().naive_local()
    }
}

/// Settable clock. The stored instant is treated as both UTC and local time.
#[derive(Debug)]
pub struct FixedClock(RwLock<NaiveDateTime>);

impl FixedClock {
    pub fn new(at: NaiveDateTime) -> Self {
        Self(RwLock::new(at))
    }

    pub fn at(date: NaiveDate, time: WallTime) -> Self {
        Self::new(date.and_time(time.into()))
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.0.write().unwrap_or_else(|e| e.into_inner());
        *now = *now + by;
    }
}

impl Clock for FixedClock {
    fn now_utc(&self) -> DateTime<Utc> {
        Utc.from_utc_datetime(&self.local_now())
    }

    fn local_now(&self) -> NaiveDateTime {
        *self.0.read().unwrap_or_else(|e| e.into_inner())
    }
}

/// Minute-resolution time of day, exchanged as `HH:MM` (24-hour).
///
/// Ordering matches the lexical ordering of the `HH:MM` form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct WallTime(NaiveTime);

impl WallTime {
    pub fn from_hm(hour: u32, minute: u32) -> Option<Self> {
        NaiveTime::from_hms_opt(hour, minute, 0).map(WallTime)
    }

    /// Drops seconds and sub-second precision.
    pub fn truncate(time: NaiveTime) -> Self {
        WallTime(NaiveTime::from_hms_opt(time.hour(), time.minute(), 0).unwrap_or(time))
    }

    pub fn hour(&self) -> u32 {
        self.0.hour()
    }

    pub fn minute(&self) -> u32 {
        self.0.minute()
    }
}

impl From<WallTime> for NaiveTime {
    fn from(time: WallTime) -> Self {
        time.0
    }
}

impl fmt::Display for WallTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:02}", self.hour(), self.minute())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidWallTime(pub String);

impl fmt::Display for InvalidWallTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "`{}` is not a HH:MM time", self.0)
    }
}

impl std::error::Error for InvalidWallTime {}

impl FromStr for WallTime {
    type Err = InvalidWallTime;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || InvalidWallTime(s.to_string());
        let bytes = s.as_bytes();
        let digits = [0, 1, 3, 4].iter().all(|&i| bytes.get(i).map_or(false, u8::is_ascii_digit));
        if bytes.len() != 5 || bytes[2] != b':' || !digits {
            return Err(invalid());
        }
        let hour = s[..2].parse::<u32>().map_err(|_| invalid())?;
        let minute = s[3..].parse::<u32>().map_err(|_| invalid())?;
        WallTime::from_hm(hour, minute).ok_or_else(invalid)
    }
}

impl Serialize for WallTime {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for WallTime {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(de::Error::custom)
    }
}

/// Parses a `YYYY-MM-DD` calendar date.
pub fn parse_date(s: &str) -> Option<NaiveDate> {
    if s.len() != 10 {
        return None;
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d").ok()
}
