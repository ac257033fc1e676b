/// Device registry and multi-device polling orchestration
use std::collections::HashSet;

use bluer::Adapter;
use log::{debug, error, info, warn};
use serde::Serialize;

use crate::bluetooth::{AdvertisementReader, Lywsd02Client, ScanConfig};
use crate::config::DeviceConfig;
use crate::error::BridgeError;
use crate::models::{Attribute, DeviceReading, MONITORED_ATTRIBUTES};
use crate::mqtt::{MqttMessage, Payload, TopicFormatter};

/// Per-device read seam. The scan and connect variants both implement
/// this, and tests use scripted readers.
pub trait DeviceReader {
    fn read(
        &mut self,
    ) -> impl std::future::Future<Output = Result<DeviceReading, BridgeError>>;
}

/// Aggregated update for a Domoticz virtual temperature/humidity device.
/// `svalue` is "TEMP;HUM;HUM_STAT" with the humidity status fixed at 0.
#[derive(Debug, Serialize)]
struct DomoticzCommand {
    command: &'static str,
    idx: u32,
    nvalue: u8,
    svalue: String,
}

struct DeviceState<R> {
    config: DeviceConfig,
    reader: R,
}

/// Holds the registered devices and polls them in registration order.
pub struct Worker<R> {
    name: String,
    topics: TopicFormatter,
    devices: Vec<DeviceState<R>>,
}

impl<R: DeviceReader> Worker<R> {
    /// Build the registry. Registration order is preserved (it decides
    /// message order) and device names must be unique.
    pub fn register(
        name: &str,
        topics: TopicFormatter,
        devices: Vec<(DeviceConfig, R)>,
    ) -> Result<Self, BridgeError> {
        info!("Adding {} {} devices", devices.len(), name);

        let mut seen = HashSet::new();
        let devices = devices
            .into_iter()
            .map(|(config, reader)| {
                if !seen.insert(config.name.clone()) {
                    return Err(BridgeError::DuplicateDevice(config.name));
                }
                debug!("Adding {} device '{}' ({})", name, config.name, config.mac);
                Ok(DeviceState { config, reader })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Worker {
            name: name.to_string(),
            topics,
            devices,
        })
    }

    /// Poll every registered device once and collect outbound messages.
    ///
    /// A failed read is logged with the device identity and skipped;
    /// messages already collected for other devices are unaffected.
    pub async fn poll_all(&mut self) -> Vec<MqttMessage> {
        info!("Updating {} {} devices", self.devices.len(), self.name);
        let mut messages = Vec::new();

        for device in &mut self.devices {
            debug!(
                "Updating {} device '{}' ({})",
                self.name, device.config.name, device.config.mac
            );
            match device.reader.read().await {
                Ok(reading) => {
                    messages.extend(device_messages(&self.topics, &device.config, &reading));
                }
                Err(e) if e.is_recoverable() => {
                    warn!(
                        "Error during update of {} device '{}' ({}): {}",
                        self.name, device.config.name, device.config.mac, e
                    );
                }
                Err(e) => {
                    error!(
                        "Error during update of {} device '{}' ({}): {}",
                        self.name, device.config.name, device.config.mac, e
                    );
                }
            }
        }

        messages
    }

    /// Discovery announcements for every registered device.
    pub fn config_messages(&self) -> Vec<MqttMessage> {
        self.devices
            .iter()
            .flat_map(|device| crate::discovery::config_device(&self.topics, &device.config))
            .collect()
    }
}

impl Worker<AdvertisementReader> {
    /// Discovery-based variant: readings come from passive scans.
    pub fn with_scanner(
        name: &str,
        topics: TopicFormatter,
        configs: Vec<DeviceConfig>,
        scan: ScanConfig,
    ) -> Result<Self, BridgeError> {
        let devices = configs
            .into_iter()
            .map(|config| {
                let reader = AdvertisementReader::new(name, config.clone(), scan);
                (config, reader)
            })
            .collect();
        Worker::register(name, topics, devices)
    }
}

impl Worker<Lywsd02Client> {
    /// Connection-based variant: one persistent client per device,
    /// connected at registration time. A connection failure here is
    /// fatal and propagates to the caller.
    pub async fn with_clients(
        name: &str,
        topics: TopicFormatter,
        configs: Vec<DeviceConfig>,
        adapter: &Adapter,
    ) -> Result<Self, BridgeError> {
        let mut devices = Vec::with_capacity(configs.len());
        for config in configs {
            let client = Lywsd02Client::connect(adapter, &config).await?;
            devices.push((config, client));
        }
        Worker::register(name, topics, devices)
    }
}

/// Encode one device's reading into outbound messages.
///
/// With a configured Domoticz index the reading is collapsed into a
/// single `udevice` command on the worker base topic. Otherwise each
/// monitored attribute gets its own topic and scalar payload, taken
/// straight from the reading.
fn device_messages(
    topics: &TopicFormatter,
    config: &DeviceConfig,
    reading: &DeviceReading,
) -> Vec<MqttMessage> {
    if let Some(idx) = config.domoticz_idx {
        let command = DomoticzCommand {
            command: "udevice",
            idx,
            nvalue: 0,
            svalue: format!("{};{};0", reading.temperature, reading.humidity),
        };
        let payload = serde_json::to_value(&command)
            .expect("domoticz command serialization cannot fail");
        return vec![MqttMessage::new(topics.format_topic(&[]), Payload::Json(payload))];
    }

    MONITORED_ATTRIBUTES
        .iter()
        .filter_map(|attr| {
            let value = match attr {
                Attribute::Temperature => Some(reading.temperature),
                Attribute::Humidity => Some(reading.humidity),
                Attribute::Battery => reading.battery,
            }?;
            Some(MqttMessage::new(
                topics.format_topic(&[&config.name, attr.as_str()]),
                Payload::Value(value),
            ))
        })
        .collect()
}
