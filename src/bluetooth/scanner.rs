/// Passive BLE scanning with a bounded wait for a complete reading
use std::sync::Arc;

use bluer::{Adapter, AdapterEvent, Device};
use futures_util::{Stream, StreamExt};
use log::{debug, warn};
use tokio::sync::Mutex;
use tokio::time::{sleep, Duration, Instant};

use crate::bluetooth::decoder::{to_hex, uuid_to_u16, AdvertisementEvent, ScanSession, ServiceDataEntry};
use crate::config::DeviceConfig;
use crate::error::BridgeError;
use crate::models::{DeviceReading, SensorReading};
use crate::worker::DeviceReader;

const POLL_TICK: Duration = Duration::from_secs(1);

/// Scan timing. The overall timeout is authoritative: a poll keeps
/// waiting for a complete reading even after the radio scan window has
/// closed.
#[derive(Debug, Clone, Copy)]
pub struct ScanConfig {
    pub scan_window: Duration,
    pub overall_timeout: Duration,
}

/// Run one bounded passive scan for the given device.
///
/// Starts LE discovery, feeds advertisements for `scan_window` into a
/// fresh scan session, and waits (checking once per second) until the
/// session holds both temperature and humidity. Returns the reading as
/// soon as it is complete, or `ScanTimeout` once `overall_timeout`
/// elapses; the wait deliberately continues past the end of the scan
/// window, only the overall timeout ends it.
pub async fn poll_reading(
    worker: &str,
    mac: &str,
    config: &ScanConfig,
) -> Result<SensorReading, BridgeError> {
    let session = bluer::Session::new().await?;
    let adapter = session.default_adapter().await?;
    adapter.set_powered(true).await?;

    // Listen-only discovery; duplicates are wanted because temperature
    // and humidity arrive in separate advertisement frames.
    let filter = bluer::DiscoveryFilter {
        transport: bluer::DiscoveryTransport::Le,
        duplicate_data: true,
        ..Default::default()
    };
    if let Err(e) = adapter.set_discovery_filter(filter).await {
        warn!("Failed to set discovery filter: {}", e);
    }

    let scan = Arc::new(Mutex::new(ScanSession::new(mac)));
    let discovery = adapter.discover_devices().await?;

    let feed = tokio::spawn(feed_advertisements(
        adapter.clone(),
        discovery,
        Arc::clone(&scan),
        config.scan_window,
    ));

    let result = wait_for_reading(&scan, config.overall_timeout, POLL_TICK).await;

    // Dropping the discovery stream ends bluezd discovery; the radio may
    // still drain its current scan interval in the background.
    feed.abort();

    result.ok_or_else(|| BridgeError::ScanTimeout {
        worker: worker.to_string(),
        mac: mac.to_string(),
        timeout_secs: config.overall_timeout.as_secs(),
    })
}

/// Forward discovered advertisements into the scan session until the
/// scan window closes.
///
/// Discovery events only fire once per device, so between events the
/// already-discovered devices are re-read once per tick to pick up
/// service-data updates from later advertisement frames.
async fn feed_advertisements(
    adapter: Adapter,
    discovery: impl Stream<Item = AdapterEvent> + Send,
    scan: Arc<Mutex<ScanSession>>,
    window: Duration,
) {
    let mut discovery = Box::pin(discovery);
    let mut seen = Vec::new();
    let closes_at = Instant::now() + window;

    loop {
        let remaining = closes_at.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            break;
        }

        tokio::select! {
            event = discovery.next() => {
                match event {
                    Some(AdapterEvent::DeviceAdded(addr)) => {
                        debug!("Discovery event: device added {}", addr);
                        seen.push(addr);
                        if let Ok(device) = adapter.device(addr) {
                            deliver_snapshot(&device, &scan).await;
                        }
                    }
                    Some(_) => {}
                    None => break,
                }
            }
            _ = sleep(remaining.min(POLL_TICK)) => {
                for addr in &seen {
                    if let Ok(device) = adapter.device(*addr) {
                        deliver_snapshot(&device, &scan).await;
                    }
                }
            }
        }
    }
}

/// Read a device's current service data and push it through the decoder.
async fn deliver_snapshot(device: &Device, scan: &Arc<Mutex<ScanSession>>) {
    let address = device.address().to_string();

    let service_data = match device.service_data().await {
        Ok(Some(data)) => data,
        Ok(None) => return,
        Err(e) => {
            debug!("Failed to get service data for {}: {}", address, e);
            return;
        }
    };

    let entries = service_data
        .iter()
        .filter_map(|(uuid, data)| {
            let short = uuid_to_u16(*uuid)?;
            // bluezd strips the UUID from the payload; restore the
            // little-endian prefix the decoder offsets are based on.
            Some(ServiceDataEntry {
                structure_id: 22,
                description: "16b Service Data".to_string(),
                payload: format!("{}{}", to_hex(&short.to_le_bytes()), to_hex(data)),
            })
        })
        .collect::<Vec<_>>();

    if entries.is_empty() {
        return;
    }

    let event = AdvertisementEvent { address, entries };
    scan.lock().await.handle_advertisement(&event);
}

/// Check the session once per tick until the reading is complete or the
/// deadline passes. Returns None on timeout.
async fn wait_for_reading(
    scan: &Arc<Mutex<ScanSession>>,
    overall_timeout: Duration,
    tick: Duration,
) -> Option<SensorReading> {
    let deadline = Instant::now() + overall_timeout;

    loop {
        {
            let session = scan.lock().await;
            if session.reading().is_complete() {
                return Some(session.reading().clone());
            }
        }

        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return None;
        }
        sleep(remaining.min(tick)).await;
    }
}

/// Discovery-based reader: every read runs one bounded scan.
pub struct AdvertisementReader {
    worker: String,
    config: DeviceConfig,
    scan: ScanConfig,
}

impl AdvertisementReader {
    pub fn new(worker: &str, config: DeviceConfig, scan: ScanConfig) -> Self {
        AdvertisementReader {
            worker: worker.to_string(),
            config,
            scan,
        }
    }
}

impl DeviceReader for AdvertisementReader {
    async fn read(&mut self) -> Result<DeviceReading, BridgeError> {
        let reading = poll_reading(&self.worker, &self.config.mac, &self.scan).await?;

        // poll_reading only returns complete readings
        let (temperature, humidity) = match (reading.temperature, reading.humidity) {
            (Some(t), Some(h)) => (t, h),
            _ => {
                return Err(BridgeError::ScanTimeout {
                    worker: self.worker.clone(),
                    mac: self.config.mac.clone(),
                    timeout_secs: self.scan.overall_timeout.as_secs(),
                })
            }
        };

        Ok(DeviceReading {
            temperature,
            humidity,
            battery: None,
        })
    }
}
