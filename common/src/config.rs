use std::collections::HashSet;
use std::fmt;

use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::time::TimeMarker;

/// Highest GPIO number the PWM collaborator accepts (RP2040 user pins).
pub const MAX_GPIO_PIN: u8 = 28;

/// Upper bound the PWM peripheral supports, in Hz.
pub const MAX_PWM_FREQUENCY: u32 = 40_000_000;

const LOG_LEVELS: [&str; 5] = ["FATAL", "ERROR", "WARN", "INFO", "DEBUG"];

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WifiConfig {
    pub ssid: String,
    pub password: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimezoneConfig {
    pub name: String,
    /// Fallback UTC offset in hours when `name` is not a known tz id.
    pub offset: f32,
}

impl Default for TimezoneConfig {
    fn default() -> Self {
        Self {
            name: "UTC".to_string(),
            offset: 0.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HardwareConfig {
    pub rtc_i2c_sda_pin: u8,
    pub rtc_i2c_scl_pin: u8,
}

impl Default for HardwareConfig {
    fn default() -> Self {
        Self {
            rtc_i2c_sda_pin: 20,
            rtc_i2c_scl_pin: 21,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemConfig {
    pub log_level: String,
    /// Schedule tick cadence in seconds.
    pub update_interval: u64,
    #[serde(default = "default_web_title")]
    pub web_title: String,
}

fn default_web_title() -> String {
    "Lantern".to_string()
}

impl Default for SystemConfig {
    fn default() -> Self {
        Self {
            log_level: "INFO".to_string(),
            update_interval: 60,
            web_title: default_web_title(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationConfig {
    pub enabled: bool,
    pub mqtt_broker: String,
    pub mqtt_port: u16,
    pub mqtt_client_id: String,
    pub notify_on_window_change: bool,
    pub notify_on_errors: bool,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            mqtt_broker: "broker.hivemq.com".to_string(),
            mqtt_port: 1883,
            mqtt_client_id: "lantern".to_string(),
            notify_on_window_change: true,
            notify_on_errors: true,
        }
    }
}

/// A named interval of the day with a target duty cycle. The duty cycle is
/// stored wide and clamped into 0..=100 during validation, never at apply
/// time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimeWindow {
    pub name: String,
    pub start: TimeMarker,
    pub end: TimeMarker,
    pub duty_cycle: i32,
}

#[derive(Debug, Serialize, Deserialize)]
struct TimeWindowBody {
    start: TimeMarker,
    end: TimeMarker,
    duty_cycle: i32,
}

/// One physical PWM output and its ordered set of time windows. Window
/// order is the JSON declaration order; resolution is first-match-wins over
/// that order, so it must survive (de)serialization.
#[derive(Debug, Clone, PartialEq)]
pub struct Channel {
    pub name: String,
    pub gpio_pin: u8,
    pub enabled: bool,
    pub pwm_frequency: u32,
    pub display_name: Option<String>,
    pub windows: Vec<TimeWindow>,
}

fn default_pwm_frequency() -> u32 {
    1000
}

#[derive(Debug, Serialize, Deserialize)]
struct ChannelBody {
    gpio_pin: u8,
    #[serde(default)]
    enabled: bool,
    #[serde(default = "default_pwm_frequency")]
    pwm_frequency: u32,
    #[serde(rename = "name", default, skip_serializing_if = "Option::is_none")]
    display_name: Option<String>,
    #[serde(
        rename = "time_windows",
        default,
        deserialize_with = "deserialize_windows",
        serialize_with = "serialize_windows"
    )]
    windows: Vec<TimeWindow>,
}

/// The root configuration document. Sub-objects the scheduler does not
/// interpret (wifi, timezone, hardware, notifications) are carried through
/// typed so uploads can be validated as a whole.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Configuration {
    pub version: String,
    pub wifi: WifiConfig,
    #[serde(default)]
    pub timezone: TimezoneConfig,
    pub hardware: HardwareConfig,
    pub system: SystemConfig,
    #[serde(default)]
    pub notifications: NotificationConfig,
    #[serde(
        default,
        deserialize_with = "deserialize_channels",
        serialize_with = "serialize_channels"
    )]
    pub channels: Vec<Channel>,
}

impl Default for Configuration {
    fn default() -> Self {
        Self {
            version: crate::DEFAULT_ARTIFACT_VERSION.to_string(),
            wifi: WifiConfig::default(),
            timezone: TimezoneConfig::default(),
            hardware: HardwareConfig::default(),
            system: SystemConfig::default(),
            notifications: NotificationConfig::default(),
            channels: Vec::new(),
        }
    }
}

/// Field-level violations collected over the whole document, joined so the
/// uploader sees every problem at once.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{}", issues.join("; "))]
pub struct ValidationErrors {
    pub issues: Vec<String>,
}

impl Configuration {
    pub fn channel(&self, name: &str) -> Option<&Channel> {
        self.channels.iter().find(|channel| channel.name == name)
    }

    /// Validates field-level constraints and clamps duty cycles into
    /// 0..=100. Version parsing and compatibility are the store's concern.
    pub fn validate(&mut self) -> Result<(), ValidationErrors> {
        let mut issues = Vec::new();

        if self.wifi.ssid.is_empty() {
            issues.push("wifi.ssid is required".to_string());
        }
        if self.wifi.password.is_empty() {
            issues.push("wifi.password is required".to_string());
        }

        if !(-12.0..=14.0).contains(&self.timezone.offset) {
            issues.push("timezone.offset must be between -12 and +14 hours".to_string());
        }

        for (label, pin) in [
            ("hardware.rtc_i2c_sda_pin", self.hardware.rtc_i2c_sda_pin),
            ("hardware.rtc_i2c_scl_pin", self.hardware.rtc_i2c_scl_pin),
        ] {
            if pin > MAX_GPIO_PIN {
                issues.push(format!("{label} must be between 0 and {MAX_GPIO_PIN}"));
            }
        }

        if !LOG_LEVELS.contains(&self.system.log_level.as_str()) {
            issues.push(format!(
                "system.log_level must be one of: {}",
                LOG_LEVELS.join(", ")
            ));
        }
        if self.system.update_interval < 1 {
            issues.push("system.update_interval must be a positive number of seconds".to_string());
        }

        let mut used_pins = HashSet::new();
        let mut channel_names = HashSet::new();
        for channel in &mut self.channels {
            let name = &channel.name;
            if !channel_names.insert(name.clone()) {
                issues.push(format!("channel {name}: declared more than once"));
            }
            if channel.gpio_pin > MAX_GPIO_PIN {
                issues.push(format!(
                    "channel {name}: gpio_pin must be between 0 and {MAX_GPIO_PIN}"
                ));
            }
            if channel.gpio_pin == self.hardware.rtc_i2c_sda_pin
                || channel.gpio_pin == self.hardware.rtc_i2c_scl_pin
            {
                issues.push(format!(
                    "channel {name}: gpio_pin {} conflicts with the RTC I2C pins",
                    channel.gpio_pin
                ));
            }
            if !used_pins.insert(channel.gpio_pin) {
                issues.push(format!(
                    "channel {name}: gpio_pin {} is used by more than one channel",
                    channel.gpio_pin
                ));
            }
            if channel.pwm_frequency < 1 || channel.pwm_frequency > MAX_PWM_FREQUENCY {
                issues.push(format!(
                    "channel {name}: pwm_frequency must be between 1 Hz and {MAX_PWM_FREQUENCY} Hz"
                ));
            }
            let mut window_names = HashSet::new();
            for window in &mut channel.windows {
                if !window_names.insert(window.name.clone()) {
                    issues.push(format!(
                        "channel {name}: window {} is declared more than once",
                        window.name
                    ));
                }
                window.duty_cycle = window.duty_cycle.clamp(0, 100);
            }
        }

        if issues.is_empty() {
            Ok(())
        } else {
            Err(ValidationErrors { issues })
        }
    }
}

fn deserialize_windows<'de, D>(deserializer: D) -> Result<Vec<TimeWindow>, D::Error>
where
    D: Deserializer<'de>,
{
    struct WindowsVisitor;

    impl<'de> Visitor<'de> for WindowsVisitor {
        type Value = Vec<TimeWindow>;

        fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("a map of window names to time window objects")
        }

        fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Self::Value, A::Error> {
            let mut windows = Vec::new();
            while let Some(name) = access.next_key::<String>()? {
                if name.starts_with('_') {
                    access.next_value::<serde::de::IgnoredAny>()?;
                    continue;
                }
                let body: TimeWindowBody = access.next_value()?;
                windows.push(TimeWindow {
                    name,
                    start: body.start,
                    end: body.end,
                    duty_cycle: body.duty_cycle,
                });
            }
            Ok(windows)
        }
    }

    deserializer.deserialize_map(WindowsVisitor)
}

fn serialize_windows<S: Serializer>(
    windows: &[TimeWindow],
    serializer: S,
) -> Result<S::Ok, S::Error> {
    let mut map = serializer.serialize_map(Some(windows.len()))?;
    for window in windows {
        map.serialize_entry(
            &window.name,
            &TimeWindowBody {
                start: window.start,
                end: window.end,
                duty_cycle: window.duty_cycle,
            },
        )?;
    }
    map.end()
}

fn deserialize_channels<'de, D>(deserializer: D) -> Result<Vec<Channel>, D::Error>
where
    D: Deserializer<'de>,
{
    struct ChannelsVisitor;

    impl<'de> Visitor<'de> for ChannelsVisitor {
        type Value = Vec<Channel>;

        fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("a map of channel names to channel objects")
        }

        fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Self::Value, A::Error> {
            let mut channels = Vec::new();
            while let Some(name) = access.next_key::<String>()? {
                if name.starts_with('_') {
                    access.next_value::<serde::de::IgnoredAny>()?;
                    continue;
                }
                let body: ChannelBody = access.next_value()?;
                channels.push(Channel {
                    name,
                    gpio_pin: body.gpio_pin,
                    enabled: body.enabled,
                    pwm_frequency: body.pwm_frequency,
                    display_name: body.display_name,
                    windows: body.windows,
                });
            }
            Ok(channels)
        }
    }

    deserializer.deserialize_map(ChannelsVisitor)
}

fn serialize_channels<S: Serializer>(
    channels: &[Channel],
    serializer: S,
) -> Result<S::Ok, S::Error> {
    let mut map = serializer.serialize_map(Some(channels.len()))?;
    for channel in channels {
        map.serialize_entry(
            &channel.name,
            &ChannelBody {
                gpio_pin: channel.gpio_pin,
                enabled: channel.enabled,
                pwm_frequency: channel.pwm_frequency,
                display_name: channel.display_name.clone(),
                windows: channel.windows.clone(),
            },
        )?;
    }
    map.end()
}
