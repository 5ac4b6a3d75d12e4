use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Datelike, FixedOffset, Timelike};

use crate::config::{Channel, Configuration};
use crate::sun::{SunTimeTable, SunTimes};
use crate::time::TimeMarker;

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ResolveError {
    /// The sun-time table has no entry for today, and at least one enabled
    /// channel uses a sunrise/sunset marker. Recoverable: hold the
    /// last-applied duty cycles and retry next tick.
    #[error("no sunrise/sunset entry for {month:02}-{day:02}")]
    SunTimesMissing { month: u8, day: u8 },
}

/// Outcome of window resolution for one enabled channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedChannel {
    pub duty_cycle: u8,
    /// Name of the matched window, or `None` when the prior duty cycle is
    /// being held because no window matched.
    pub window: Option<String>,
}

/// Maps the current timestamp to a target duty cycle for every enabled
/// channel.
///
/// Sunrise/sunset markers are resolved against `sun` for today's date; a
/// missing entry fails the whole resolution. Windows are evaluated
/// first-match-wins in their declared order. A channel with no matching
/// window holds its value from `prior` (and is omitted if it has never been
/// applied). Disabled channels are omitted entirely.
pub fn resolve(
    now: DateTime<FixedOffset>,
    config: &Configuration,
    sun: &SunTimeTable,
    prior: &HashMap<String, u8>,
) -> Result<BTreeMap<String, ResolvedChannel>, ResolveError> {
    let month = now.month() as u8;
    let day = now.day() as u8;
    let now_minutes = (now.hour() * 60 + now.minute()) as u16;
    let sun_today = sun.lookup(month, day);

    let mut resolved = BTreeMap::new();
    for channel in config.channels.iter().filter(|channel| channel.enabled) {
        match first_matching_window(channel, now_minutes, sun_today, month, day)? {
            Some(window) => {
                resolved.insert(
                    channel.name.clone(),
                    ResolvedChannel {
                        // Validation clamps duty cycles into 0..=100; clamp
                        // again so an unvalidated document cannot emit an
                        // out-of-range value.
                        duty_cycle: window.1.clamp(0, 100) as u8,
                        window: Some(window.0),
                    },
                );
            }
            None => {
                if let Some(&held) = prior.get(&channel.name) {
                    resolved.insert(
                        channel.name.clone(),
                        ResolvedChannel {
                            duty_cycle: held,
                            window: None,
                        },
                    );
                }
            }
        }
    }

    Ok(resolved)
}

fn first_matching_window(
    channel: &Channel,
    now_minutes: u16,
    sun_today: Option<SunTimes>,
    month: u8,
    day: u8,
) -> Result<Option<(String, i32)>, ResolveError> {
    for window in &channel.windows {
        let start = marker_minutes(window.start, sun_today, month, day)?;
        let end = marker_minutes(window.end, sun_today, month, day)?;
        if window_matches(start, end, now_minutes) {
            return Ok(Some((window.name.clone(), window.duty_cycle)));
        }
    }
    Ok(None)
}

fn marker_minutes(
    marker: TimeMarker,
    sun_today: Option<SunTimes>,
    month: u8,
    day: u8,
) -> Result<u16, ResolveError> {
    let missing = ResolveError::SunTimesMissing { month, day };
    match marker {
        TimeMarker::Clock(time) => Ok(time.minutes()),
        TimeMarker::Sunrise => Ok(sun_today.ok_or(missing)?.sunrise.minutes()),
        TimeMarker::Sunset => Ok(sun_today.ok_or(missing)?.sunset.minutes()),
    }
}

/// Membership in `[start, end)` minutes since midnight. `end < start` wraps
/// through midnight; `start == end` is a legitimate all-day window.
fn window_matches(start: u16, end: u16, now: u16) -> bool {
    if start == end {
        true
    } else if start < end {
        start <= now && now < end
    } else {
        now >= start || now < end
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;

    use crate::config::tests::sample;

    fn sun_table() -> SunTimeTable {
        serde_json::from_str(
            r#"{
                "version": "1.0.0",
                "days": {
                    "06-21": {"sunrise": "06:00", "sunset": "18:30"}
                }
            }"#,
        )
        .unwrap()
    }

    fn at(month: u32, day: u32, hour: u32, minute: u32) -> DateTime<FixedOffset> {
        FixedOffset::east_opt(0)
            .unwrap()
            .with_ymd_and_hms(2025, month, day, hour, minute, 0)
            .unwrap()
    }

    #[test]
    fn wrapping_window_membership() {
        // start=22:00, end=06:00
        assert!(window_matches(22 * 60, 6 * 60, 23 * 60));
        assert!(window_matches(22 * 60, 6 * 60, 0));
        assert!(window_matches(22 * 60, 6 * 60, 5 * 60 + 59));
        assert!(!window_matches(22 * 60, 6 * 60, 6 * 60));
        assert!(!window_matches(22 * 60, 6 * 60, 21 * 60 + 59));
    }

    #[test]
    fn boundaries_belong_to_the_starting_window() {
        assert!(window_matches(8 * 60, 10 * 60, 8 * 60));
        assert!(!window_matches(8 * 60, 10 * 60, 10 * 60));
    }

    #[test]
    fn equal_start_and_end_is_an_all_day_window() {
        for minutes in [0, 12 * 60, 23 * 60 + 59] {
            assert!(window_matches(540, 540, minutes));
        }
    }

    #[test]
    fn porch_scenario_first_match_wins() {
        let mut config = sample();
        config.validate().unwrap();
        let sun = sun_table();
        let prior = HashMap::new();

        // sunrise=06:00, sunset=18:30 on 06-21
        let evening = resolve(at(6, 21, 19, 0), &config, &sun, &prior).unwrap();
        assert_eq!(evening["porch"].duty_cycle, 60);
        assert_eq!(evening["porch"].window.as_deref(), Some("evening"));

        let night = resolve(at(6, 21, 23, 0), &config, &sun, &prior).unwrap();
        assert_eq!(night["porch"].duty_cycle, 20);

        // 05:00 is before sunrise: the night window wraps through midnight.
        let early = resolve(at(6, 21, 5, 0), &config, &sun, &prior).unwrap();
        assert_eq!(early["porch"].duty_cycle, 20);
        assert_eq!(early["porch"].window.as_deref(), Some("night"));

        let day = resolve(at(6, 21, 12, 0), &config, &sun, &prior).unwrap();
        assert_eq!(day["porch"].duty_cycle, 0);
        assert_eq!(day["porch"].window.as_deref(), Some("day"));
    }

    #[test]
    fn out_of_range_duty_is_clamped_even_without_validation() {
        // Deliberately skip validate(): a document that slipped past the
        // validation clamp must still resolve to an in-range duty cycle,
        // not a wrapped cast.
        let mut config = sample();
        config.channels[0].windows[0].duty_cycle = -10;
        let resolved = resolve(at(6, 21, 12, 0), &config, &sun_table(), &HashMap::new()).unwrap();
        assert_eq!(resolved["porch"].duty_cycle, 0);

        config.channels[0].windows[0].duty_cycle = 250;
        let resolved = resolve(at(6, 21, 12, 0), &config, &sun_table(), &HashMap::new()).unwrap();
        assert_eq!(resolved["porch"].duty_cycle, 100);
    }

    #[test]
    fn disabled_channels_are_omitted() {
        let mut config = sample();
        config.validate().unwrap();
        let resolved = resolve(at(6, 21, 12, 0), &config, &sun_table(), &HashMap::new()).unwrap();
        assert!(!resolved.contains_key("path"));

        config.channels[1].enabled = true;
        let resolved = resolve(at(6, 21, 12, 0), &config, &sun_table(), &HashMap::new()).unwrap();
        assert_eq!(resolved["path"].duty_cycle, 35);
    }

    #[test]
    fn missing_sun_entry_fails_resolution() {
        let mut config = sample();
        config.validate().unwrap();
        let err = resolve(at(2, 28, 12, 0), &config, &sun_table(), &HashMap::new()).unwrap_err();
        assert_eq!(err, ResolveError::SunTimesMissing { month: 2, day: 28 });
    }

    #[test]
    fn zero_matches_holds_the_prior_duty_cycle() {
        let mut config = sample();
        config.validate().unwrap();
        // Strip porch down to one narrow window so midday matches nothing.
        config.channels[0].windows.truncate(1);
        config.channels[0].windows[0].start = "01:00".parse().unwrap();
        config.channels[0].windows[0].end = "02:00".parse().unwrap();

        let mut prior = HashMap::new();
        prior.insert("porch".to_string(), 42u8);

        let resolved = resolve(at(6, 21, 12, 0), &config, &sun_table(), &prior).unwrap();
        assert_eq!(resolved["porch"].duty_cycle, 42);
        assert_eq!(resolved["porch"].window, None);

        // Never applied before: nothing to hold, channel is absent.
        let resolved = resolve(at(6, 21, 12, 0), &config, &sun_table(), &HashMap::new()).unwrap();
        assert!(!resolved.contains_key("porch"));
    }
}
