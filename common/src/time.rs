use std::fmt;
use std::str::FromStr;

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// A wall-clock time of day, stored as minutes since midnight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct ClockTime(u16);

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid time {0:?}, expected HH:MM (00:00-23:59)")]
pub struct ClockTimeParseError(pub String);

impl ClockTime {
    pub fn from_hm(hour: u8, minute: u8) -> Option<Self> {
        if hour > 23 || minute > 59 {
            return None;
        }
        Some(Self(u16::from(hour) * 60 + u16::from(minute)))
    }

    pub fn hour(self) -> u8 {
        (self.0 / 60) as u8
    }

    pub fn minute(self) -> u8 {
        (self.0 % 60) as u8
    }

    /// Minutes since midnight, 0..1440.
    pub fn minutes(self) -> u16 {
        self.0
    }
}

impl FromStr for ClockTime {
    type Err = ClockTimeParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || ClockTimeParseError(s.to_string());
        let (hour, minute) = s.trim().split_once(':').ok_or_else(err)?;
        let hour: u8 = hour.parse().map_err(|_| err())?;
        let minute: u8 = minute.parse().map_err(|_| err())?;
        ClockTime::from_hm(hour, minute).ok_or_else(err)
    }
}

impl fmt::Display for ClockTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:02}", self.hour(), self.minute())
    }
}

/// A window boundary: either a fixed clock time or a symbolic marker
/// resolved against the sun-time table on every tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeMarker {
    Clock(ClockTime),
    Sunrise,
    Sunset,
}

impl FromStr for TimeMarker {
    type Err = ClockTimeParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sunrise" => Ok(Self::Sunrise),
            "sunset" => Ok(Self::Sunset),
            _ => s.parse::<ClockTime>().map(Self::Clock),
        }
    }
}

impl fmt::Display for TimeMarker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Clock(time) => time.fmt(f),
            Self::Sunrise => f.write_str("sunrise"),
            Self::Sunset => f.write_str("sunset"),
        }
    }
}

impl<'de> Deserialize<'de> for ClockTime {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(D::Error::custom)
    }
}

impl Serialize for ClockTime {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for TimeMarker {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(D::Error::custom)
    }
}

impl Serialize for TimeMarker {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn parses_and_formats_clock_time() {
        let time: ClockTime = "06:05".parse().unwrap();
        assert_eq!(time.hour(), 6);
        assert_eq!(time.minute(), 5);
        assert_eq!(time.minutes(), 365);
        assert_eq!(time.to_string(), "06:05");
    }

    #[test]
    fn rejects_out_of_range_times() {
        for bad in ["24:00", "12:60", "7", "ab:cd", "12:3:4", ""] {
            assert!(bad.parse::<ClockTime>().is_err(), "accepted {bad:?}");
        }
    }

    #[test]
    fn markers_are_case_insensitive() {
        assert_eq!("Sunrise".parse::<TimeMarker>().unwrap(), TimeMarker::Sunrise);
        assert_eq!(" SUNSET ".parse::<TimeMarker>().unwrap(), TimeMarker::Sunset);
        assert_eq!(
            "22:00".parse::<TimeMarker>().unwrap(),
            TimeMarker::Clock(ClockTime::from_hm(22, 0).unwrap())
        );
    }

    #[test]
    fn serde_round_trip() {
        let marker: TimeMarker = serde_json::from_str("\"sunset\"").unwrap();
        assert_eq!(serde_json::to_string(&marker).unwrap(), "\"sunset\"");

        let clock: TimeMarker = serde_json::from_str("\"07:30\"").unwrap();
        assert_eq!(serde_json::to_string(&clock).unwrap(), "\"07:30\"");
    }
}
