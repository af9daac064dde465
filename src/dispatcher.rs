//! Per-event decision logic between the scanner and the bus
use log::{debug, error, info, warn};
use std::sync::Arc;
use time::OffsetDateTime;
use tokio::sync::mpsc;

use crate::bluetooth::decoder::{decode_tpms_data, TPMS_MANUFACTURER_ID};
use crate::error::{BridgeError, Result};
use crate::models::{BroadcastEvent, DeviceId};
use crate::mqtt::publisher::{TelemetryPublisher, Transport};
use crate::registry::SharedRegistry;
use crate::utils::{render_status, topic_safe_name};

/// What handling one event amounted to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// New device registered; discovery and telemetry published.
    Discovered(DeviceId),
    /// Reading replaced; telemetry published.
    Updated(DeviceId),
    /// Only `last_seen` refreshed; telemetry published.
    Touched(DeviceId),
    /// Removal or unrecognized event; nothing changed.
    Ignored,
}

pub struct EventDispatcher<T> {
    registry: SharedRegistry,
    publisher: Arc<TelemetryPublisher<T>>,
}

impl<T: Transport> EventDispatcher<T> {
    pub fn new(registry: SharedRegistry, publisher: Arc<TelemetryPublisher<T>>) -> Self {
        EventDispatcher {
            registry,
            publisher,
        }
    }

    /// Consume events one at a time until every sender is dropped.
    pub async fn run(&self, mut rx: mpsc::Receiver<BroadcastEvent>) {
        while let Some(event) = rx.recv().await {
            match self.handle_event(event, OffsetDateTime::now_utc()).await {
                Ok(outcome) => debug!("Event handled: {:?}", outcome),
                Err(e @ BridgeError::MalformedPayload { .. }) => warn!("Dropping event: {}", e),
                Err(e @ (BridgeError::UnknownDevice(_) | BridgeError::MissingPayload(_))) => {
                    debug!("Dropping event: {}", e)
                }
                Err(e) => error!("Failed to publish: {}", e),
            }
        }
        info!("Event channel closed");
    }

    /// Apply one broadcast event
    ///
    /// | Event                          | Known device | Action                            |
    /// |--------------------------------|--------------|-----------------------------------|
    /// | `DeviceAdded`                  | no           | decode, register, discovery, telemetry |
    /// | `DeviceAdded`                  | yes          | decode, update, telemetry         |
    /// | `PropertiesChanged` w/ payload | yes          | decode, update, telemetry         |
    /// | `PropertiesChanged` w/o payload| yes          | touch, telemetry                  |
    /// | `PropertiesChanged`            | no           | `UnknownDevice`                   |
    /// | `DeviceRemoved`, `Other`       | -            | ignored                           |
    ///
    /// The status table is logged after every added/changed event whatever
    /// the result.
    pub async fn handle_event(&self, event: BroadcastEvent, now: OffsetDateTime) -> Result<Outcome> {
        let renders_status = event.renders_status();
        let outcome = self.apply(event, now).await;
        if renders_status {
            let devices = self.registry.lock().await.all();
            info!("{}", render_status(&devices));
        }
        outcome
    }

    async fn apply(&self, event: BroadcastEvent, now: OffsetDateTime) -> Result<Outcome> {
        match event {
            BroadcastEvent::DeviceAdded {
                id,
                name,
                manufacturer_data,
            } => {
                let payload = manufacturer_data
                    .get(&TPMS_MANUFACTURER_ID)
                    .ok_or_else(|| BridgeError::MissingPayload(id.clone()))?;
                let reading = decode_tpms_data(payload)?;
                let display_name = name
                    .as_deref()
                    .map(topic_safe_name)
                    .filter(|name| !name.is_empty())
                    .unwrap_or_else(|| topic_safe_name(id.as_str()));

                let (device, is_new, tracked) = {
                    let mut registry = self.registry.lock().await;
                    let (device, is_new) =
                        registry.upsert_reading(&id, &display_name, reading, now);
                    (device, is_new, registry.len())
                };

                if is_new {
                    info!(
                        "New sensor {} registered as {} ({} tracked)",
                        id, device.display_name, tracked
                    );
                    self.publisher.publish_discovery(&device)?;
                }
                self.publisher.publish_telemetry(&device)?;

                Ok(if is_new {
                    Outcome::Discovered(id)
                } else {
                    Outcome::Updated(id)
                })
            }
            BroadcastEvent::PropertiesChanged {
                id,
                manufacturer_data: Some(payload),
                ..
            } => {
                let reading = decode_tpms_data(&payload)?;
                let device = {
                    let mut registry = self.registry.lock().await;
                    let display_name = registry
                        .get(&id)
                        .map(|device| device.display_name.clone())
                        .ok_or_else(|| BridgeError::UnknownDevice(id.clone()))?;
                    registry.upsert_reading(&id, &display_name, reading, now).0
                };
                self.publisher.publish_telemetry(&device)?;
                Ok(Outcome::Updated(id))
            }
            BroadcastEvent::PropertiesChanged {
                id,
                manufacturer_data: None,
                signal_only,
            } => {
                let device = self.registry.lock().await.touch(&id, now)?;
                debug!("{} seen (signal only: {})", device.display_name, signal_only);
                self.publisher.publish_telemetry(&device)?;
                Ok(Outcome::Touched(id))
            }
            BroadcastEvent::DeviceRemoved { id } => {
                debug!("Device {} removed by adapter, keeping it registered", id);
                Ok(Outcome::Ignored)
            }
            BroadcastEvent::Other { kind } => {
                debug!("Unhandled event: {}", kind);
                Ok(Outcome::Ignored)
            }
        }
    }
}
