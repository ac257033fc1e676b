/// Mijia LYWSD advertisement filtering and service-data decoding
use std::fmt::Write;

use bluer::Uuid;
use log::debug;

use crate::models::SensorReading;
use crate::utils::round2;

// Mijia MiBeacon protocol constants. The service-data payload is handled
// as a hex string with the 16-bit service UUID (0xFE95, Xiaomi Inc.)
// little-endian at the front, so a valid payload starts with "95fe".
const XIAOMI_SERVICE_PREFIX: &str = "95fe";
const SERVICE_DATA_16BIT: u8 = 22; // AD structure type 0x16
const FIELD_TEMPERATURE: &str = "04";
const FIELD_HUMIDITY: &str = "06";

// Hex-character offsets within a MiBeacon payload
const FIELD_TYPE_RANGE: (usize, usize) = (28, 30);
const VALUE_LO_RANGE: (usize, usize) = (34, 36);
const VALUE_HI_RANGE: (usize, usize) = (36, 38);
const MIN_PAYLOAD_CHARS: usize = 38;

const BLUETOOTH_BASE_UUID: u128 = 0x00000000_0000_1000_8000_00805f9b34fb;

/// One service-data structure from a discovered advertisement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceDataEntry {
    pub structure_id: u8,
    pub description: String,
    pub payload: String,
}

/// One discovered-advertisement callback delivery from the BLE stack.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdvertisementEvent {
    pub address: String,
    pub entries: Vec<ServiceDataEntry>,
}

/// State of one bounded scan: the target address and the reading
/// assembled so far. Created per poll and dropped when the poll ends, so
/// no values leak between cycles.
#[derive(Debug)]
pub struct ScanSession {
    target: String,
    reading: SensorReading,
}

impl ScanSession {
    pub fn new(mac: &str) -> Self {
        ScanSession {
            target: mac.to_lowercase(),
            reading: SensorReading::default(),
        }
    }

    /// Feed one advertisement into the session.
    ///
    /// Events from other addresses, entries without the Xiaomi service
    /// prefix or the 16-bit service-data structure id, unknown field
    /// types, and payloads too short to carry a value are all ignored
    /// without error. Later matching events overwrite earlier values for
    /// the same field.
    pub fn handle_advertisement(&mut self, event: &AdvertisementEvent) {
        if !event.address.eq_ignore_ascii_case(&self.target) {
            return;
        }

        for entry in &event.entries {
            if entry.structure_id != SERVICE_DATA_16BIT
                || !entry.payload.starts_with(XIAOMI_SERVICE_PREFIX)
            {
                continue;
            }
            debug!(
                "Received message from {}: {} ({})",
                event.address, entry.payload, entry.description
            );

            if let Some((field, value)) = decode_entry(&entry.payload) {
                match field {
                    Field::Temperature => self.reading.temperature = Some(value),
                    Field::Humidity => self.reading.humidity = Some(value),
                }
            }
        }
    }

    pub fn reading(&self) -> &SensorReading {
        &self.reading
    }
}

enum Field {
    Temperature,
    Humidity,
}

/// Decode one matching service-data payload into a field and its value.
///
/// The measured value is a little-endian 16-bit word at byte offset 17;
/// the two hex chunks are swapped back to the raw integer and scaled by
/// 0.1. Returns None for payloads that are too short, carry an unknown
/// field-type code, or contain non-hex digits in the value position.
fn decode_entry(payload: &str) -> Option<(Field, f64)> {
    if payload.len() < MIN_PAYLOAD_CHARS {
        return None;
    }

    let field = match payload.get(FIELD_TYPE_RANGE.0..FIELD_TYPE_RANGE.1)? {
        FIELD_TEMPERATURE => Field::Temperature,
        FIELD_HUMIDITY => Field::Humidity,
        _ => return None,
    };

    let lo = payload.get(VALUE_LO_RANGE.0..VALUE_LO_RANGE.1)?;
    let hi = payload.get(VALUE_HI_RANGE.0..VALUE_HI_RANGE.1)?;
    let raw = u16::from_str_radix(&format!("{}{}", hi, lo), 16).ok()?;

    Some((field, round2(raw as f64 * 0.1)))
}

/// Extract the 16-bit short form of a full Bluetooth UUID, if it is one
/// of the base-UUID assigned numbers.
pub fn uuid_to_u16(uuid: Uuid) -> Option<u16> {
    let value = uuid.as_u128();
    let short = (value >> 96) as u32;
    if short <= u16::MAX as u32 && value == BLUETOOTH_BASE_UUID | ((short as u128) << 96) {
        Some(short as u16)
    } else {
        None
    }
}

/// Lowercase hex encoding of raw payload bytes.
pub fn to_hex(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        let _ = write!(out, "{:02x}", byte);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    const TARGET: &str = "AA:BB:CC:DD:EE:FF";

    fn mijia_payload(field: &str, lo: &str, hi: &str) -> String {
        // 95fe + 24 filler chars + field type + 4 filler chars + value word
        format!("95fe{}{}{}{}{}", "0".repeat(24), field, "0".repeat(4), lo, hi)
    }

    fn event(address: &str, structure_id: u8, payload: &str) -> AdvertisementEvent {
        AdvertisementEvent {
            address: address.to_string(),
            entries: vec![ServiceDataEntry {
                structure_id,
                description: "16b Service Data".to_string(),
                payload: payload.to_string(),
            }],
        }
    }

    #[test]
    fn decodes_temperature_from_swapped_word() {
        let mut session = ScanSession::new(TARGET);
        // chars[34..36] = "a0", chars[36..38] = "01" -> 0x01a0 = 416 -> 41.6
        session.handle_advertisement(&event(TARGET, 22, &mijia_payload("04", "a0", "01")));
        assert_eq!(session.reading().temperature, Some(41.6));
        assert_eq!(session.reading().humidity, None);
    }

    #[test]
    fn decodes_humidity() {
        let mut session = ScanSession::new(TARGET);
        // 0x0258 = 600 -> 60.0
        session.handle_advertisement(&event(TARGET, 22, &mijia_payload("06", "58", "02")));
        assert_eq!(session.reading().humidity, Some(60.0));
    }

    #[test]
    fn address_match_is_case_insensitive() {
        let mut session = ScanSession::new(TARGET);
        session.handle_advertisement(&event(
            "aa:bb:cc:dd:ee:ff",
            22,
            &mijia_payload("04", "a0", "01"),
        ));
        assert_eq!(session.reading().temperature, Some(41.6));
    }

    #[test]
    fn ignores_other_addresses() {
        let mut session = ScanSession::new(TARGET);
        session.handle_advertisement(&event(
            "11:22:33:44:55:66",
            22,
            &mijia_payload("04", "a0", "01"),
        ));
        assert_eq!(session.reading(), &SensorReading::default());
    }

    #[test]
    fn ignores_wrong_prefix_and_structure_id() {
        let mut session = ScanSession::new(TARGET);
        let payload = mijia_payload("04", "a0", "01");

        session.handle_advertisement(&event(TARGET, 21, &payload));
        session.handle_advertisement(&event(TARGET, 22, &payload.replacen("95fe", "1a18", 1)));
        assert_eq!(session.reading(), &SensorReading::default());
    }

    #[test]
    fn ignores_unknown_field_type() {
        let mut session = ScanSession::new(TARGET);
        session.handle_advertisement(&event(TARGET, 22, &mijia_payload("0a", "a0", "01")));
        assert_eq!(session.reading(), &SensorReading::default());
    }

    #[test]
    fn short_payload_is_ignored_without_panic() {
        let mut session = ScanSession::new(TARGET);
        session.handle_advertisement(&event(TARGET, 22, "95fe"));
        session.handle_advertisement(&event(TARGET, 22, "95fe0000000000000000000000000004"));
        assert_eq!(session.reading(), &SensorReading::default());
    }

    #[test]
    fn non_hex_value_is_ignored() {
        let mut session = ScanSession::new(TARGET);
        session.handle_advertisement(&event(TARGET, 22, &mijia_payload("04", "zz", "01")));
        assert_eq!(session.reading(), &SensorReading::default());
    }

    #[test]
    fn later_event_overwrites_earlier_value() {
        let mut session = ScanSession::new(TARGET);
        session.handle_advertisement(&event(TARGET, 22, &mijia_payload("04", "a0", "01")));
        session.handle_advertisement(&event(TARGET, 22, &mijia_payload("04", "d0", "00")));
        // 0x00d0 = 208 -> 20.8
        assert_eq!(session.reading().temperature, Some(20.8));
    }

    #[test]
    fn completes_after_both_fields() {
        let mut session = ScanSession::new(TARGET);
        session.handle_advertisement(&event(TARGET, 22, &mijia_payload("04", "a0", "01")));
        assert!(!session.reading().is_complete());
        session.handle_advertisement(&event(TARGET, 22, &mijia_payload("06", "58", "02")));
        assert!(session.reading().is_complete());
    }

    #[test]
    fn short_uuid_extraction() {
        let xiaomi = Uuid::from_u128(BLUETOOTH_BASE_UUID | (0xfe95u128 << 96));
        assert_eq!(uuid_to_u16(xiaomi), Some(0xfe95));

        let vendor = Uuid::from_u128(0xEBE0CCB0_7A0A_4B0C_8A1A_6FF2997DA3A6);
        assert_eq!(uuid_to_u16(vendor), None);
    }

    #[test]
    fn hex_encoding() {
        assert_eq!(to_hex(&[0x95, 0xfe, 0x00, 0x1a]), "95fe001a");
    }
}
