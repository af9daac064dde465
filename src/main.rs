mod bluetooth;
mod config;
mod dispatcher;
mod error;
mod models;
mod mqtt;
mod registry;
mod utils;

use log::{error, info, warn};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::{timeout, Duration};

use bluetooth::run_scanner;
use config::BridgeConfig;
use dispatcher::EventDispatcher;
use mqtt::{announce_offline, connect, maintain_connection, TelemetryPublisher};
use registry::DeviceRegistry;

const SHUTDOWN_FLUSH_SECS: u64 = 5;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
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

    info!("Starting TPMS to MQTT bridge");

    let registry = DeviceRegistry::new().shared();
    let (client, eventloop) = connect(&config.mqtt);
    let publisher = Arc::new(TelemetryPublisher::new(
        client.clone(),
        config.mqtt.client_id.clone(),
    ));

    let connection = tokio::spawn(maintain_connection(
        eventloop,
        publisher.clone(),
        registry.clone(),
    ));

    let (tx, rx) = mpsc::channel(config.channel_capacity);
    let dispatcher = EventDispatcher::new(registry.clone(), publisher.clone());

    // Handle Ctrl+C gracefully
    let (shutdown_tx, mut shutdown_rx) = tokio::sync::oneshot::channel();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            return;
        }
        let _ = shutdown_tx.send(());
    });

    // Run scanner and dispatcher or wait for shutdown signal
    tokio::select! {
        _ = run_scanner(&config.scan, tx) => {
            warn!("Scanner stopped");
        }
        _ = dispatcher.run(rx) => {
            warn!("Dispatcher stopped");
        }
        _ = &mut shutdown_rx => {
            info!("Program terminated by user. Exiting gracefully.");
        }
    }

    if registry.lock().await.is_empty() {
        warn!("No tyre sensors were seen during this run!");
    }

    announce_offline(&publisher, &registry).await;
    if let Err(e) = client.disconnect().await {
        error!("Failed to disconnect from MQTT broker: {}", e);
    }
    if timeout(Duration::from_secs(SHUTDOWN_FLUSH_SECS), connection)
        .await
        .is_err()
    {
        warn!("MQTT connection did not close within {} seconds", SHUTDOWN_FLUSH_SECS);
    }

    Ok(())
}
