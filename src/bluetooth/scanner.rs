//! Bluetooth Low Energy scanning for tyre pressure sensors
use bluer::{
    Adapter, AdapterEvent, Address, DeviceEvent, DeviceProperty, DiscoveryFilter,
    DiscoveryTransport,
};
use futures_util::{pin_mut, StreamExt};
use log::{debug, error, info, warn};
use std::collections::HashMap;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{sleep, Duration};

use crate::bluetooth::decoder::TPMS_MANUFACTURER_ID;
use crate::config::ScanConfig;
use crate::models::{BroadcastEvent, DeviceId};

const SCAN_RETRY_SECS: u64 = 10; // Wait before restarting a failed scan

/// Registry key for a BLE address.
pub fn device_id(addr: Address) -> DeviceId {
    DeviceId::new(addr.to_string().to_uppercase())
}

/// Pick the TPMS payload out of a device's manufacturer data.
pub fn tpms_payload(manufacturer_data: &HashMap<u16, Vec<u8>>) -> Option<Vec<u8>> {
    manufacturer_data.get(&TPMS_MANUFACTURER_ID).cloned()
}

/// Translate a device property change into a broadcast event
///
/// Manufacturer data under a foreign company id carries no reading and is
/// reported as a change without payload.
pub fn property_event(id: DeviceId, property: DeviceProperty) -> BroadcastEvent {
    match property {
        DeviceProperty::ManufacturerData(data) => BroadcastEvent::PropertiesChanged {
            id,
            manufacturer_data: tpms_payload(&data),
            signal_only: false,
        },
        DeviceProperty::Rssi(_) | DeviceProperty::TxPower(_) => {
            BroadcastEvent::PropertiesChanged {
                id,
                manufacturer_data: None,
                signal_only: true,
            }
        }
        other => BroadcastEvent::Other {
            kind: format!("{} property changed: {:?}", id, other),
        },
    }
}

/// Keep scanning forever, restarting after failures
///
/// A failed scan is logged and retried after `SCAN_RETRY_SECS`. Returns only
/// once the dispatcher side of `tx` is gone.
pub async fn run_scanner(config: &ScanConfig, tx: mpsc::Sender<BroadcastEvent>) {
    while !tx.is_closed() {
        match scan_for_tpms(config, &tx).await {
            Ok(()) => info!("Bluetooth discovery stream ended"),
            Err(e) => error!("Scan failed: {}", e),
        }
        if tx.is_closed() {
            break;
        }
        sleep(Duration::from_secs(SCAN_RETRY_SECS)).await;
    }
}

/// Discover TPMS sensors and forward their advertisements
///
/// Every new device is read once (name and manufacturer data) and reported
/// as `DeviceAdded`; a watcher task then forwards its property changes until
/// the adapter reports it removed.
///
/// # Arguments
/// * `config` - Scan filter and name aliases
/// * `tx` - Bounded channel into the dispatcher
///
/// # Returns
/// Ok when the discovery stream ends, or the BlueZ error that stopped it
pub async fn scan_for_tpms(
    config: &ScanConfig,
    tx: &mpsc::Sender<BroadcastEvent>,
) -> Result<(), Box<dyn std::error::Error>> {
    // Initialize Bluetooth session
    let session = match bluer::Session::new().await {
        Ok(session) => session,
        Err(e) => {
            error!("Failed to create Bluetooth session: {}", e);
            return Err(e.into());
        }
    };

    // Get the default Bluetooth adapter
    let adapter = match session.default_adapter().await {
        Ok(adapter) => adapter,
        Err(e) => {
            error!("Failed to get default Bluetooth adapter: {}", e);
            return Err(e.into());
        }
    };

    // Ensure Bluetooth adapter is powered on
    if let Err(e) = adapter.set_powered(true).await {
        error!("Failed to power on adapter: {}", e);
        return Err(e.into());
    }

    // Low Energy only, and keep duplicates so repeated advertisements show up
    // as property changes
    let filter = DiscoveryFilter {
        transport: DiscoveryTransport::Le,
        duplicate_data: true,
        uuids: config.service_uuid.into_iter().collect(),
        ..Default::default()
    };

    // Apply the discovery filter (warn if it fails, but continue)
    if let Err(e) = adapter.set_discovery_filter(filter).await {
        warn!("Failed to set discovery filter: {}", e);
    }

    let events = match adapter.discover_devices().await {
        Ok(events) => events,
        Err(e) => {
            error!("Failed to start device discovery: {}", e);
            return Err(e.into());
        }
    };
    pin_mut!(events);
    info!("Scan started on adapter {}", adapter.name());

    let mut watchers: HashMap<Address, JoinHandle<()>> = HashMap::new();

    while let Some(event) = events.next().await {
        let forwarded = match event {
            AdapterEvent::DeviceAdded(addr) => {
                let Some(added) = device_added(&adapter, addr, config).await else {
                    continue;
                };
                if let Some(previous) = watchers.insert(addr, watch_device(&adapter, addr, tx)) {
                    previous.abort();
                }
                added
            }
            AdapterEvent::DeviceRemoved(addr) => {
                if let Some(watcher) = watchers.remove(&addr) {
                    watcher.abort();
                }
                BroadcastEvent::DeviceRemoved {
                    id: device_id(addr),
                }
            }
            AdapterEvent::PropertyChanged(property) => BroadcastEvent::Other {
                kind: format!("adapter property changed: {:?}", property),
            },
        };

        if tx.send(forwarded).await.is_err() {
            debug!("Dispatcher gone, stopping scan");
            break;
        }
    }

    for (_, watcher) in watchers {
        watcher.abort();
    }

    Ok(())
}

async fn device_added(adapter: &Adapter, addr: Address, config: &ScanConfig) -> Option<BroadcastEvent> {
    let device = match adapter.device(addr) {
        Ok(device) => device,
        Err(e) => {
            debug!("Device {} vanished before it could be read: {}", addr, e);
            return None;
        }
    };

    let id = device_id(addr);
    let name = match config.aliases.get(id.as_str()) {
        Some(alias) => Some(alias.clone()),
        None => device.name().await.unwrap_or_else(|e| {
            debug!("Failed to read name of {}: {}", id, e);
            None
        }),
    };

    let manufacturer_data = match device.manufacturer_data().await {
        Ok(data) => data.unwrap_or_default(),
        Err(e) => {
            debug!("Failed to get manufacturer data for {}: {}", id, e);
            HashMap::new()
        }
    };

    Some(BroadcastEvent::DeviceAdded {
        id,
        name,
        manufacturer_data,
    })
}

fn watch_device(
    adapter: &Adapter,
    addr: Address,
    tx: &mpsc::Sender<BroadcastEvent>,
) -> JoinHandle<()> {
    let device = adapter.device(addr);
    let tx = tx.clone();

    tokio::spawn(async move {
        let device = match device {
            Ok(device) => device,
            Err(e) => {
                warn!("Cannot watch device {}: {}", addr, e);
                return;
            }
        };
        let events = match device.events().await {
            Ok(events) => events,
            Err(e) => {
                warn!("Cannot watch device {}: {}", addr, e);
                return;
            }
        };
        pin_mut!(events);

        while let Some(DeviceEvent::PropertyChanged(property)) = events.next().await {
            if tx.send(property_event(device_id(addr), property)).await.is_err() {
                break;
            }
        }
    })
}
