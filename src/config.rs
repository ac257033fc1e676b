use std::env;

use crate::error::BridgeError;

const DEFAULT_TOPIC_PREFIX: &str = "mijialywsd";
const DEFAULT_SCAN_WINDOW_SECS: u64 = 20;
const DEFAULT_SCAN_TIMEOUT_SECS: u64 = 60;
const DEFAULT_UPDATE_INTERVAL_SECS: u64 = 300;

/// One configured sensor: display name, MAC address and the optional
/// Domoticz virtual-device index used to route an aggregated update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceConfig {
    pub name: String,
    pub mac: String,
    pub domoticz_idx: Option<u32>,
}

/// Which polling path the worker uses for every device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerMode {
    /// Passive advertisement scanning (no connection).
    Scan,
    /// Persistent per-device GATT client.
    Connect,
}

#[derive(Debug, Clone)]
pub struct BridgeConfig {
    pub devices: Vec<DeviceConfig>,
    pub mode: WorkerMode,
    pub topic_prefix: String,
    pub scan_window_secs: u64,
    pub scan_timeout_secs: u64,
    pub update_interval_secs: u64,
}

impl BridgeConfig {
    pub fn new() -> Result<Self, BridgeError> {
        // Load environment variables
        dotenv::dotenv().ok();

        // Try the combined MIJIA_DEVICES format first
        let devices = if let Ok(raw) = env::var("MIJIA_DEVICES") {
            parse_device_list(&raw)?
        } else {
            // Fallback to individual environment variables
            log::debug!("MIJIA_DEVICES not found, trying individual variables");
            devices_from_indexed_vars()
        };

        if devices.is_empty() {
            return Err(BridgeError::Config(
                "No Mijia sensors configured. Please set MIJIA_DEVICES or \
                 MIJIA_DEVICE_<N>_NAME/MIJIA_DEVICE_<N>_MAC environment variables"
                    .into(),
            ));
        }

        log::info!("Loaded {} configured devices", devices.len());
        for device in &devices {
            log::debug!(
                "Device: {} -> {} (domoticz_idx: {:?})",
                device.name,
                device.mac,
                device.domoticz_idx
            );
        }

        let mode = match env::var("MIJIA_MODE").as_deref() {
            Ok("connect") => WorkerMode::Connect,
            Ok("scan") | Err(_) => WorkerMode::Scan,
            Ok(other) => {
                return Err(BridgeError::Config(format!(
                    "unknown MIJIA_MODE '{}' (expected 'scan' or 'connect')",
                    other
                )))
            }
        };

        Ok(BridgeConfig {
            devices,
            mode,
            topic_prefix: env::var("MQTT_TOPIC_PREFIX")
                .unwrap_or_else(|_| DEFAULT_TOPIC_PREFIX.to_string()),
            scan_window_secs: env_u64("SCAN_WINDOW_SECS", DEFAULT_SCAN_WINDOW_SECS),
            scan_timeout_secs: env_u64("SCAN_TIMEOUT_SECS", DEFAULT_SCAN_TIMEOUT_SECS),
            update_interval_secs: env_u64("UPDATE_INTERVAL_SECS", DEFAULT_UPDATE_INTERVAL_SECS),
        })
    }
}

/// Parse the combined device list format:
/// `name=AA:BB:CC:DD:EE:FF,other=11:22:33:44:55:66@7`
///
/// The optional `@idx` suffix is the Domoticz virtual-device index.
/// Whitespace around names and addresses is trimmed; empty pairs are
/// skipped.
pub fn parse_device_list(raw: &str) -> Result<Vec<DeviceConfig>, BridgeError> {
    let mut devices = Vec::new();

    for pair in raw.split(',') {
        let pair = pair.trim();
        if pair.is_empty() {
            continue;
        }

        let (name, rest) = pair.split_once('=').ok_or_else(|| {
            BridgeError::Config(format!("invalid device entry '{}' (expected name=MAC)", pair))
        })?;

        let (mac, idx) = match rest.split_once('@') {
            Some((mac, idx)) => {
                let idx = idx.trim().parse::<u32>().map_err(|_| {
                    BridgeError::Config(format!("invalid domoticz index in '{}'", pair))
                })?;
                (mac, Some(idx))
            }
            None => (rest, None),
        };

        let name = name.trim();
        let mac = mac.trim();
        if name.is_empty() || mac.is_empty() {
            return Err(BridgeError::Config(format!(
                "invalid device entry '{}' (empty name or MAC)",
                pair
            )));
        }

        devices.push(DeviceConfig {
            name: name.to_string(),
            mac: mac.to_string(),
            domoticz_idx: idx,
        });
    }

    Ok(devices)
}

/// Collect devices from MIJIA_DEVICE_<N>_MAC / _NAME / _DOMOTICZ_IDX vars.
fn devices_from_indexed_vars() -> Vec<DeviceConfig> {
    let mut devices = Vec::new();

    for (key, mac) in env::vars() {
        if let Some(index) = key
            .strip_prefix("MIJIA_DEVICE_")
            .and_then(|s| s.strip_suffix("_MAC"))
        {
            let name_key = format!("MIJIA_DEVICE_{}_NAME", index);
            if let Ok(name) = env::var(&name_key) {
                let idx_key = format!("MIJIA_DEVICE_{}_DOMOTICZ_IDX", index);
                let domoticz_idx = env::var(&idx_key).ok().and_then(|v| v.parse().ok());
                devices.push(DeviceConfig {
                    name,
                    mac,
                    domoticz_idx,
                });
            }
        }
    }

    // Env iteration order is unspecified; keep registry order deterministic
    devices.sort_by(|a, b| a.name.cmp(&b.name));
    devices
}

fn env_u64(key: &str, default: u64) -> u64 {
    match env::var(key) {
        Ok(value) => match value.parse() {
            Ok(parsed) => parsed,
            Err(_) => {
                log::warn!("Invalid {} value '{}', using default {}", key, value, default);
                default
            }
        },
        Err(_) => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_plain_and_indexed_entries() {
        let devices =
            parse_device_list("living=AA:BB:CC:DD:EE:FF, bedroom=11:22:33:44:55:66@7").unwrap();
        assert_eq!(devices.len(), 2);
        assert_eq!(devices[0].name, "living");
        assert_eq!(devices[0].mac, "AA:BB:CC:DD:EE:FF");
        assert_eq!(devices[0].domoticz_idx, None);
        assert_eq!(devices[1].name, "bedroom");
        assert_eq!(devices[1].domoticz_idx, Some(7));
    }

    #[test]
    fn skips_empty_pairs() {
        let devices = parse_device_list("living=AA:BB:CC:DD:EE:FF,, ").unwrap();
        assert_eq!(devices.len(), 1);
    }

    #[test]
    fn rejects_malformed_entries() {
        assert!(parse_device_list("no-equals-sign").is_err());
        assert!(parse_device_list("name=MAC@notanumber").is_err());
        assert!(parse_device_list("=AA:BB:CC:DD:EE:FF").is_err());
    }

    #[test]
    fn empty_input_yields_no_devices() {
        assert!(parse_device_list("").unwrap().is_empty());
    }
}
