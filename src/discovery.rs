/// Home Assistant MQTT discovery announcements for configured sensors
use serde_json::json;

use crate::config::DeviceConfig;
use crate::models::{Attribute, MONITORED_ATTRIBUTES};
use crate::mqtt::{MqttMessage, Payload, TopicFormatter};

const DISCOVERY_PREFIX: &str = "homeassistant";
const MANUFACTURER: &str = "Xiaomi";
const MODEL: &str = "LYWSD2";

fn discovery_id(config: &DeviceConfig, attr: Option<Attribute>) -> String {
    let mac = config.mac.replace(':', "").to_lowercase();
    match attr {
        Some(attr) => format!("{}_{}_{}", mac, config.name, attr),
        None => format!("{}_{}", mac, config.name),
    }
}

fn discovery_name(config: &DeviceConfig, attr: Option<Attribute>) -> String {
    match attr {
        Some(attr) => format!("{} {}", config.name, attr),
        None => config.name.clone(),
    }
}

/// One sensor config announcement per monitored attribute, so a
/// home-automation hub can auto-register the device before any state
/// message arrives.
pub fn config_device(topics: &TopicFormatter, config: &DeviceConfig) -> Vec<MqttMessage> {
    let device = json!({
        "identifiers": [config.mac, discovery_id(config, None)],
        "manufacturer": MANUFACTURER,
        "model": MODEL,
        "name": discovery_name(config, None),
    });

    MONITORED_ATTRIBUTES
        .iter()
        .map(|attr| {
            let unique_id = discovery_id(config, Some(*attr));
            let payload = json!({
                "unique_id": unique_id,
                "name": discovery_name(config, Some(*attr)),
                "state_topic": topics.format_topic(&[&config.name, attr.as_str()]),
                "device_class": attr.as_str(),
                "unit_of_measurement": attr.unit(),
                "device": device,
            });
            MqttMessage::new(
                format!("{}/sensor/{}/config", DISCOVERY_PREFIX, unique_id),
                Payload::Json(payload),
            )
        })
        .collect()
}
