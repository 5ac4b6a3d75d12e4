pub const TOPIC_DUTY_CHANGES: &str = "lantern/channel/duty";
pub const TOPIC_SYSTEM_EVENTS: &str = "lantern/system/events";
