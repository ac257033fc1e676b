use thiserror::Error;

/// Error taxonomy for the bridge.
///
/// Only a few of these are fatal: configuration and registration problems
/// abort startup, while scan timeouts and per-device communication failures
/// are handled by the caller and never take the process down.
#[derive(Debug, Error)]
pub enum BridgeError {
    /// A bounded scan ended without assembling a complete reading.
    #[error(
        "retrieving the temperature and humidity from {worker} device {mac} \
         timed out after {timeout_secs} seconds"
    )]
    ScanTimeout {
        worker: String,
        mac: String,
        timeout_secs: u64,
    },

    /// A connection-based read failed for one device.
    #[error("communication with device '{name}' ({mac}) failed: {message}")]
    DeviceCommunication {
        name: String,
        mac: String,
        message: String,
    },

    /// Adapter, session or registration-time Bluetooth failure.
    #[error("bluetooth error: {0}")]
    Bluetooth(#[from] bluer::Error),

    #[error("invalid MAC address '{0}'")]
    InvalidAddress(String),

    #[error("duplicate device name '{0}'")]
    DuplicateDevice(String),

    #[error("configuration error: {0}")]
    Config(String),
}

impl BridgeError {
    /// True for outcomes a polling cycle absorbs instead of propagating.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            BridgeError::ScanTimeout { .. } | BridgeError::DeviceCommunication { .. }
        )
    }
}
