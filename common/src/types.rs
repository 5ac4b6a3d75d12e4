use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
pub struct ChannelStatus {
    pub name: String,
    #[serde(rename = "gpioPin")]
    pub gpio_pin: u8,
    pub enabled: bool,
    #[serde(rename = "dutyCycle")]
    pub duty_cycle: Option<u8>,
    #[serde(rename = "activeWindow")]
    pub active_window: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SystemStatus {
    pub version: String,
    #[serde(rename = "webTitle")]
    pub web_title: String,
    pub timezone: String,
    #[serde(rename = "nowEpoch")]
    pub now_epoch: i64,
    #[serde(rename = "localTime")]
    pub local_time: String,
    #[serde(rename = "updateInterval")]
    pub update_interval: u64,
    #[serde(rename = "sunTimesVersion")]
    pub sun_times_version: String,
    #[serde(rename = "sunTimesEntries")]
    pub sun_times_entries: usize,
    pub channels: Vec<ChannelStatus>,
}

/// MQTT payload published for each duty-cycle change.
#[derive(Debug, Clone, Serialize)]
pub struct DutyChangePayload {
    pub channel: String,
    pub window: Option<String>,
    #[serde(rename = "dutyCycle")]
    pub duty_cycle: u8,
    pub previous: Option<u8>,
    pub timestamp: i64,
}
