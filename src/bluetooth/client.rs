/// Persistent GATT client for the LYWSD02 clock/sensor
use bluer::gatt::remote::Characteristic;
use bluer::{Adapter, Address, Device, Uuid};
use log::debug;

use crate::config::DeviceConfig;
use crate::error::BridgeError;
use crate::models::DeviceReading;
use crate::utils::round2;
use crate::worker::DeviceReader;

// LYWSD02 vendor characteristics. The sensor characteristic packs the
// current temperature (i16 LE, 0.01 °C) and humidity (u8, %) into one
// value; battery level is a single percentage byte.
const SENSOR_CHARACTERISTIC: Uuid = Uuid::from_u128(0xEBE0CCC1_7A0A_4B0C_8A1A_6FF2997DA3A6);
const BATTERY_CHARACTERISTIC: Uuid = Uuid::from_u128(0xEBE0CCC4_7A0A_4B0C_8A1A_6FF2997DA3A6);

/// One open connection to a configured device, created at registration
/// and reused for every polling cycle.
pub struct Lywsd02Client {
    config: DeviceConfig,
    device: Device,
}

impl Lywsd02Client {
    /// Resolve the configured address and open the connection.
    ///
    /// Failure here means the device cannot be polled at all, so it
    /// propagates to the caller instead of being absorbed.
    pub async fn connect(adapter: &Adapter, config: &DeviceConfig) -> Result<Self, BridgeError> {
        let address: Address = config
            .mac
            .parse()
            .map_err(|_| BridgeError::InvalidAddress(config.mac.clone()))?;

        let device = adapter.device(address)?;
        if !device.is_connected().await? {
            device.connect().await?;
        }

        Ok(Lywsd02Client {
            config: config.clone(),
            device,
        })
    }

    fn comm_error(&self, message: impl Into<String>) -> BridgeError {
        BridgeError::DeviceCommunication {
            name: self.config.name.clone(),
            mac: self.config.mac.clone(),
            message: message.into(),
        }
    }

    async fn find_characteristic(&self, uuid: Uuid) -> Result<Option<Characteristic>, bluer::Error> {
        for service in self.device.services().await? {
            for characteristic in service.characteristics().await? {
                if characteristic.uuid().await? == uuid {
                    return Ok(Some(characteristic));
                }
            }
        }
        Ok(None)
    }

    async fn read_value(&self, uuid: Uuid) -> Result<Vec<u8>, BridgeError> {
        let characteristic = self
            .find_characteristic(uuid)
            .await
            .map_err(|e| self.comm_error(e.to_string()))?
            .ok_or_else(|| self.comm_error(format!("characteristic {} not found", uuid)))?;
        characteristic
            .read()
            .await
            .map_err(|e| self.comm_error(e.to_string()))
    }

    async fn read_state(&self) -> Result<DeviceReading, BridgeError> {
        let data = self.read_value(SENSOR_CHARACTERISTIC).await?;
        let (temperature, humidity) = decode_sensor_value(&data)
            .ok_or_else(|| self.comm_error(format!("sensor value too short ({} bytes)", data.len())))?;

        // Battery is best effort; some firmware revisions reject the read
        let battery = match self.read_value(BATTERY_CHARACTERISTIC).await {
            Ok(data) => data.first().map(|level| *level as f64),
            Err(e) => {
                debug!("Battery read failed: {}", e);
                None
            }
        };

        Ok(DeviceReading {
            temperature,
            humidity,
            battery,
        })
    }
}

/// Decode the combined sensor characteristic value: temperature i16 LE
/// in centidegrees, then the humidity percentage byte.
fn decode_sensor_value(data: &[u8]) -> Option<(f64, f64)> {
    if data.len() < 3 {
        return None;
    }
    let temperature = round2(i16::from_le_bytes([data[0], data[1]]) as f64 * 0.01);
    let humidity = data[2] as f64;
    Some((temperature, humidity))
}

impl DeviceReader for Lywsd02Client {
    async fn read(&mut self) -> Result<DeviceReading, BridgeError> {
        // The connection may have dropped since the last cycle
        let connected = self
            .device
            .is_connected()
            .await
            .map_err(|e| self.comm_error(e.to_string()))?;
        if !connected {
            debug!(
                "Reconnecting to '{}' ({})",
                self.config.name, self.config.mac
            );
            self.device
                .connect()
                .await
                .map_err(|e| self.comm_error(e.to_string()))?;
        }

        self.read_state().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_sensor_characteristic() {
        // 0x01a0 = 416 centidegrees, humidity 60 %
        assert_eq!(decode_sensor_value(&[0xA0, 0x01, 0x3C]), Some((4.16, 60.0)));
        // negative temperatures are signed
        assert_eq!(decode_sensor_value(&[0x18, 0xFC, 0x28]), Some((-10.0, 40.0)));
    }

    #[test]
    fn rejects_truncated_value() {
        assert_eq!(decode_sensor_value(&[0xA0, 0x01]), None);
        assert_eq!(decode_sensor_value(&[]), None);
    }
}
