//! In-memory registry of every TPMS sensor seen since startup.
//!
//! Devices are never evicted; the registry lives as long as the process.

use std::collections::HashMap;
use std::sync::Arc;
use time::OffsetDateTime;
use tokio::sync::Mutex;

use crate::error::{BridgeError, Result};
use crate::models::{DeviceId, DeviceState, SensorReading};

/// Registry handle shared between the dispatcher and the connection task.
pub type SharedRegistry = Arc<Mutex<DeviceRegistry>>;

#[derive(Debug, Default)]
pub struct DeviceRegistry {
    devices: Vec<DeviceState>,
    index: HashMap<DeviceId, usize>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared(self) -> SharedRegistry {
        Arc::new(Mutex::new(self))
    }

    /// Record a decoded reading for a device
    ///
    /// Unknown devices are registered under `display_name`. Known devices keep
    /// the name they were registered with; only the reading and `last_seen`
    /// change.
    ///
    /// # Returns
    /// A snapshot of the device after the update and whether it was newly created
    pub fn upsert_reading(
        &mut self,
        id: &DeviceId,
        display_name: &str,
        reading: SensorReading,
        now: OffsetDateTime,
    ) -> (DeviceState, bool) {
        if let Some(&slot) = self.index.get(id) {
            let device = &mut self.devices[slot];
            device.latest_reading = reading;
            device.last_seen = now;
            return (device.clone(), false);
        }

        let device = DeviceState {
            id: id.clone(),
            display_name: display_name.to_string(),
            latest_reading: reading,
            last_seen: now,
        };
        self.index.insert(id.clone(), self.devices.len());
        self.devices.push(device.clone());
        (device, true)
    }

    /// Refresh `last_seen` without touching the reading.
    pub fn touch(&mut self, id: &DeviceId, now: OffsetDateTime) -> Result<DeviceState> {
        let slot = *self
            .index
            .get(id)
            .ok_or_else(|| BridgeError::UnknownDevice(id.clone()))?;
        let device = &mut self.devices[slot];
        device.last_seen = now;
        Ok(device.clone())
    }

    pub fn get(&self, id: &DeviceId) -> Option<&DeviceState> {
        self.index.get(id).map(|&slot| &self.devices[slot])
    }

    /// Snapshot of all devices in first-seen order.
    pub fn all(&self) -> Vec<DeviceState> {
        self.devices.clone()
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }
}
