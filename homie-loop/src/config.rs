use serde::{Deserialize as _, Deserializer};
use serde_derive::Deserialize;
use std::time::Duration;

const DEFAULT_MQTT_PREFIX: &str = "homie";
const DEFAULT_DEVICE_ID: &str = "homie-loop";
const DEFAULT_DEVICE_NAME: &str = "Homie loop device";
const DEFAULT_INITIAL_PUBLISHING_THROTTLE: Duration = Duration::from_millis(200);

/// Options for a `HomieDevice`.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct DeviceConfig {
    /// The Homie device ID, used as a topic segment.
    pub device_id: String,
    /// The human-readable name of the device.
    pub device_name: String,
    /// The base topic under which the device is published.
    pub prefix: String,
    /// The minimum time between consecutive messages of the initial publishing walk.
    #[serde(
        deserialize_with = "de_duration_millis",
        rename = "initial_publishing_throttle_ms"
    )]
    pub initial_publishing_throttle: Duration,
    /// Report stats every 10 seconds rather than every minute.
    pub rapid_stats: bool,
    /// Whether to send any MQTT traffic at all.
    pub enable_mqtt: bool,
}

impl DeviceConfig {
    /// The base topic of the device, `<prefix>/<device_id>`.
    pub fn device_base(&self) -> String {
        format!("{}/{}", self.prefix, self.device_id)
    }
}

impl Default for DeviceConfig {
    fn default() -> DeviceConfig {
        DeviceConfig {
            device_id: DEFAULT_DEVICE_ID.to_owned(),
            device_name: DEFAULT_DEVICE_NAME.to_owned(),
            prefix: DEFAULT_MQTT_PREFIX.to_owned(),
            initial_publishing_throttle: DEFAULT_INITIAL_PUBLISHING_THROTTLE,
            rapid_stats: false,
            enable_mqtt: true,
        }
    }
}

pub fn de_duration_millis<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
    let millis = u64::deserialize(d)?;
    Ok(Duration::from_millis(millis))
}

/// Derive a valid Homie ID from a human-readable name, e.g. `"Living Room"` becomes
/// `"living-room"`.
pub fn device_id_from_name(name: &str) -> String {
    let mut id = String::with_capacity(name.len());
    for c in name.chars().flat_map(char::to_lowercase) {
        if c.is_ascii_lowercase() || c.is_ascii_digit() {
            id.push(c);
        } else if !id.is_empty() && !id.ends_with('-') {
            id.push('-');
        }
    }
    while id.ends_with('-') {
        id.pop();
    }
    id
}
