mod bluetooth;
mod config;
mod discovery;
mod error;
mod models;
mod mqtt;
mod utils;
mod worker;

use log::{error, info, warn};
use time::OffsetDateTime;
use tokio::time::{sleep, Duration};

use bluetooth::ScanConfig;
use config::{BridgeConfig, WorkerMode};
use error::BridgeError;
use mqtt::{LogSink, MessageSink, TopicFormatter};
use utils::format_datetime;
use worker::{DeviceReader, Worker};

const WORKER_NAME: &str = "mijialywsd";

/// Periodic polling cycle: announce the devices once, then poll all of
/// them each interval and push the resulting messages into the sink.
/// Cycles never overlap because the next sleep only starts after the
/// whole batch has been attempted.
async fn run_loop<R: DeviceReader>(
    mut worker: Worker<R>,
    mut sink: impl MessageSink,
    update_interval: Duration,
) -> Result<(), BridgeError> {
    for message in worker.config_messages() {
        sink.deliver(&message).await?;
    }

    loop {
        let cycle_start = OffsetDateTime::now_utc();
        info!("Starting update cycle at: {}", format_datetime(&cycle_start));

        let messages = worker.poll_all().await;
        if messages.is_empty() {
            warn!("No messages produced during this cycle!");
        }
        for message in &messages {
            sink.deliver(message).await?;
        }

        info!(
            "Update cycle complete, {} messages delivered; next cycle in {} seconds",
            messages.len(),
            update_interval.as_secs()
        );
        sleep(update_interval).await;
    }
}

async fn run(config: BridgeConfig) -> Result<(), BridgeError> {
    info!("Starting Mijia LYWSD bridge service");

    let topics = TopicFormatter::new(&config.topic_prefix);
    let update_interval = Duration::from_secs(config.update_interval_secs);

    match config.mode {
        WorkerMode::Scan => {
            let scan = ScanConfig {
                scan_window: Duration::from_secs(config.scan_window_secs),
                overall_timeout: Duration::from_secs(config.scan_timeout_secs),
            };
            let worker = Worker::with_scanner(WORKER_NAME, topics, config.devices, scan)?;
            run_loop(worker, LogSink, update_interval).await
        }
        WorkerMode::Connect => {
            let session = bluer::Session::new().await?;
            let adapter = session.default_adapter().await?;
            adapter.set_powered(true).await?;

            let worker =
                Worker::with_clients(WORKER_NAME, topics, config.devices, &adapter).await?;
            run_loop(worker, LogSink, update_interval).await
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), BridgeError> {
    // Initialize logging
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .format_timestamp_secs()
        .init();

    // Load configuration
    let config = match BridgeConfig::new() {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            return Err(e);
        }
    };

    // Handle Ctrl+C gracefully
    let (tx, mut rx) = tokio::sync::oneshot::channel();
    tokio::spawn(async move {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to listen for Ctrl+C");
        let _ = tx.send(());
    });

    // Run main loop or wait for shutdown signal
    tokio::select! {
        result = run(config) => {
            match result {
                Ok(_) => info!("Program completed successfully"),
                Err(e) => {
                    error!("Fatal error: {}", e);
                    return Err(e);
                }
            }
        }
        _ = &mut rx => {
            info!("Program terminated by user. Exiting gracefully.");
        }
    }

    Ok(())
}
