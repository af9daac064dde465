//! Broker connection upkeep and availability announcements
use log::{debug, error, info, warn};
use rumqttc::{AsyncClient, Event, EventLoop, LastWill, MqttOptions, Outgoing, Packet, QoS};
use std::sync::Arc;
use tokio::time::{sleep, Duration};

use crate::config::MqttConfig;
use crate::mqtt::publisher::{availability_topic, TelemetryPublisher, Transport, PAYLOAD_OFFLINE};
use crate::registry::SharedRegistry;

const REQUEST_CAPACITY: usize = 64;
const RECONNECT_DELAY_SECS: u64 = 5;

/// Build client options with the bridge's last will
///
/// The broker publishes a retained `Offline` to `<client_id>/tele/LWT` if the
/// bridge drops off without disconnecting.
pub fn mqtt_options(config: &MqttConfig) -> MqttOptions {
    let mut options = MqttOptions::new(&config.client_id, &config.host, config.port);
    options.set_keep_alive(Duration::from_secs(config.keep_alive_secs));
    options.set_last_will(LastWill::new(
        availability_topic(&config.client_id),
        PAYLOAD_OFFLINE,
        QoS::AtMostOnce,
        true,
    ));
    options
}

/// Create the client handle and the event loop that services it.
pub fn connect(config: &MqttConfig) -> (AsyncClient, EventLoop) {
    info!(
        "Connecting to MQTT broker at {}:{} as '{}'",
        config.host, config.port, config.client_id
    );
    AsyncClient::new(mqtt_options(config), REQUEST_CAPACITY)
}

/// Announce the bridge and every known device as online.
pub async fn announce_online<T: Transport>(
    publisher: &TelemetryPublisher<T>,
    registry: &SharedRegistry,
) {
    if let Err(e) = publisher.publish_bridge_available() {
        error!("Failed to announce bridge availability: {}", e);
    }

    let devices = registry.lock().await.all();
    for device in &devices {
        if let Err(e) = publisher.publish_available(device) {
            error!("Failed to announce {} as online: {}", device.display_name, e);
        }
    }
    debug!("Announced {} devices as online", devices.len());
}

/// Announce every known device and the bridge as offline.
pub async fn announce_offline<T: Transport>(
    publisher: &TelemetryPublisher<T>,
    registry: &SharedRegistry,
) {
    let devices = registry.lock().await.all();
    for device in &devices {
        if let Err(e) = publisher.publish_unavailable(device) {
            error!("Failed to announce {} as offline: {}", device.display_name, e);
        }
    }

    if let Err(e) = publisher.publish_bridge_unavailable() {
        error!("Failed to announce bridge as offline: {}", e);
    }
}

/// Drive the MQTT event loop until the client disconnects
///
/// Every ConnAck, first connect or reconnect, re-announces availability
/// for the bridge and all registered devices. Connection errors are logged
/// and the loop retries after a short delay; rumqttc reconnects on the next
/// poll.
pub async fn maintain_connection<T: Transport>(
    mut eventloop: EventLoop,
    publisher: Arc<TelemetryPublisher<T>>,
    registry: SharedRegistry,
) {
    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                info!(
                    "Connected to MQTT broker ({:?}), announcing on {}",
                    ack.code,
                    publisher.bridge_availability_topic()
                );
                announce_online(&publisher, &registry).await;
            }
            Ok(Event::Outgoing(Outgoing::Disconnect)) => {
                info!("Disconnected from MQTT broker");
                return;
            }
            Ok(event) => debug!("MQTT event: {:?}", event),
            Err(e) => {
                warn!(
                    "MQTT connection error: {}. Retrying in {} seconds",
                    e, RECONNECT_DELAY_SECS
                );
                sleep(Duration::from_secs(RECONNECT_DELAY_SECS)).await;
            }
        }
    }
}
