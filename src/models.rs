use std::collections::HashMap;
use std::fmt;
use time::OffsetDateTime;

/// Stable key of a BLE device, the upper-case link-layer address.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DeviceId(String);

impl DeviceId {
    pub fn new(id: impl Into<String>) -> Self {
        DeviceId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One decoded tyre sensor advertisement.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SensorReading {
    pub pressure_bar: f64,
    pub temperature_celsius: i32,
    pub battery_percent: u8,
}

impl SensorReading {
    /// Pressure in whole millibar, truncated.
    pub fn pressure_mbar(&self) -> u32 {
        (self.pressure_bar * 1000.0) as u32
    }
}

/// Everything the bridge knows about one sensor.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceState {
    pub id: DeviceId,
    pub display_name: String,
    pub latest_reading: SensorReading,
    pub last_seen: OffsetDateTime,
}

/// Observation handed from the scanner to the dispatcher.
#[derive(Debug, Clone, PartialEq)]
pub enum BroadcastEvent {
    /// First sighting of a device, with everything it advertised.
    DeviceAdded {
        id: DeviceId,
        name: Option<String>,
        manufacturer_data: HashMap<u16, Vec<u8>>,
    },
    /// A known device changed a property. `manufacturer_data` holds the TPMS
    /// payload if the change carried one.
    PropertiesChanged {
        id: DeviceId,
        manufacturer_data: Option<Vec<u8>>,
        signal_only: bool,
    },
    DeviceRemoved {
        id: DeviceId,
    },
    /// Anything else the adapter reports; logged only.
    Other {
        kind: String,
    },
}

impl BroadcastEvent {
    /// Whether handling this event ends with a status table render.
    pub fn renders_status(&self) -> bool {
        matches!(
            self,
            BroadcastEvent::DeviceAdded { .. } | BroadcastEvent::PropertiesChanged { .. }
        )
    }
}
