use std::collections::BTreeMap;
use std::fmt;

use serde::de::{Error as _, MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::time::ClockTime;

/// Sunrise and sunset for one calendar day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SunTimes {
    pub sunrise: ClockTime,
    pub sunset: ClockTime,
}

/// Immutable sunrise/sunset lookup for each day of year, loaded from the
/// `sun_times.json` artifact. Keys are exact `(month, day)` pairs; a date
/// with no entry is a lookup miss, reported to the caller as such.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SunTimeTable {
    pub version: String,
    #[serde(
        default,
        deserialize_with = "deserialize_days",
        serialize_with = "serialize_days"
    )]
    days: BTreeMap<(u8, u8), SunTimes>,
}

impl SunTimeTable {
    pub fn lookup(&self, month: u8, day: u8) -> Option<SunTimes> {
        self.days.get(&(month, day)).copied()
    }

    pub fn len(&self) -> usize {
        self.days.len()
    }

    pub fn is_empty(&self) -> bool {
        self.days.is_empty()
    }
}

impl Default for SunTimeTable {
    fn default() -> Self {
        Self {
            version: crate::DEFAULT_ARTIFACT_VERSION.to_string(),
            days: BTreeMap::new(),
        }
    }
}

fn parse_day_key(key: &str) -> Option<(u8, u8)> {
    let (month, day) = key.split_once('-')?;
    let month: u8 = month.parse().ok()?;
    let day: u8 = day.parse().ok()?;
    if (1..=12).contains(&month) && (1..=31).contains(&day) {
        Some((month, day))
    } else {
        None
    }
}

fn deserialize_days<'de, D>(deserializer: D) -> Result<BTreeMap<(u8, u8), SunTimes>, D::Error>
where
    D: Deserializer<'de>,
{
    struct DaysVisitor;

    impl<'de> Visitor<'de> for DaysVisitor {
        type Value = BTreeMap<(u8, u8), SunTimes>;

        fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("a map of MM-DD keys to sunrise/sunset entries")
        }

        fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Self::Value, A::Error> {
            let mut days = BTreeMap::new();
            while let Some(key) = access.next_key::<String>()? {
                if key.starts_with('_') {
                    access.next_value::<serde::de::IgnoredAny>()?;
                    continue;
                }
                let date = parse_day_key(&key).ok_or_else(|| {
                    A::Error::custom(format!("invalid day key {key:?}, expected MM-DD"))
                })?;
                days.insert(date, access.next_value()?);
            }
            Ok(days)
        }
    }

    deserializer.deserialize_map(DaysVisitor)
}

fn serialize_days<S: Serializer>(
    days: &BTreeMap<(u8, u8), SunTimes>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    let mut map = serializer.serialize_map(Some(days.len()))?;
    for ((month, day), times) in days {
        map.serialize_entry(&format!("{month:02}-{day:02}"), times)?;
    }
    map.end()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn sample() -> SunTimeTable {
        serde_json::from_str(
            r#"{
                "version": "1.0.0",
                "days": {
                    "_comment": "sorted by date",
                    "01-15": {"sunrise": "07:42", "sunset": "17:10"},
                    "06-21": {"sunrise": "05:01", "sunset": "21:12"}
                }
            }"#,
        )
        .unwrap()
    }

    #[test]
    fn looks_up_exact_dates() {
        let table = sample();
        let times = table.lookup(6, 21).unwrap();
        assert_eq!(times.sunrise.to_string(), "05:01");
        assert_eq!(times.sunset.to_string(), "21:12");
    }

    #[test]
    fn missing_date_is_a_miss_not_a_fallback() {
        let table = sample();
        assert_eq!(table.lookup(2, 29), None);
        assert_eq!(table.lookup(6, 22), None);
    }

    #[test]
    fn underscore_keys_are_display_hints() {
        assert_eq!(sample().len(), 2);
    }

    #[test]
    fn rejects_malformed_day_keys() {
        let result = serde_json::from_str::<SunTimeTable>(
            r#"{"version": "1.0.0", "days": {"13-01": {"sunrise": "06:00", "sunset": "18:00"}}}"#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn serializes_back_to_day_keys() {
        let table = sample();
        let json = serde_json::to_value(&table).unwrap();
        assert!(json["days"]["01-15"].is_object());
    }
}
