use std::fmt;

/// Partial reading assembled from advertisements during one scan session.
///
/// Both fields start unset; the decoder fills them in as matching
/// advertisements arrive. Within a session a later advertisement for the
/// same field overwrites the earlier value.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SensorReading {
    pub temperature: Option<f64>,
    pub humidity: Option<f64>,
}

impl SensorReading {
    /// A reading is complete once both temperature and humidity are set.
    pub fn is_complete(&self) -> bool {
        self.temperature.is_some() && self.humidity.is_some()
    }
}

/// The final result of one per-device read, shared by both polling variants.
///
/// Battery is only available on the connection-based path; the
/// advertisement payload does not carry it.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceReading {
    pub temperature: f64,
    pub humidity: f64,
    pub battery: Option<f64>,
}

/// Attributes the bridge monitors, in per-attribute publish order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Attribute {
    Temperature,
    Humidity,
    Battery,
}

impl Attribute {
    pub fn as_str(&self) -> &'static str {
        match self {
            Attribute::Temperature => "temperature",
            Attribute::Humidity => "humidity",
            Attribute::Battery => "battery",
        }
    }

    pub fn unit(&self) -> &'static str {
        match self {
            Attribute::Temperature => "°C",
            Attribute::Humidity | Attribute::Battery => "%",
        }
    }
}

impl fmt::Display for Attribute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// All monitored attributes in publish order.
pub const MONITORED_ATTRIBUTES: [Attribute; 3] = [
    Attribute::Temperature,
    Attribute::Humidity,
    Attribute::Battery,
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reading_completeness() {
        let mut reading = SensorReading::default();
        assert!(!reading.is_complete());

        reading.temperature = Some(21.5);
        assert!(!reading.is_complete());

        reading.humidity = Some(40.0);
        assert!(reading.is_complete());

        // Overwriting a field keeps the reading complete
        reading.temperature = Some(21.6);
        assert!(reading.is_complete());
    }
}
