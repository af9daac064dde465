//! Home Assistant telemetry, discovery and availability publishing
use log::{debug, info};
use rumqttc::{AsyncClient, QoS};
use serde::Serialize;

use crate::error::{BridgeError, Result};
use crate::models::DeviceState;
use crate::utils::iso_timestamp;

pub const DISCOVERY_PREFIX: &str = "homeassistant";
pub const PAYLOAD_ONLINE: &str = "Online";
pub const PAYLOAD_OFFLINE: &str = "Offline";

const DEVICE_MODEL: &str = "Pressure";
const DEVICE_MANUFACTURER: &str = "RipCup";

/// Something that can put a message on the bus without blocking.
pub trait Transport: Send + Sync {
    fn publish(&self, topic: &str, payload: Vec<u8>, retain: bool) -> Result<()>;
}

impl Transport for AsyncClient {
    fn publish(&self, topic: &str, payload: Vec<u8>, retain: bool) -> Result<()> {
        self.try_publish(topic, QoS::AtMostOnce, retain, payload)
            .map_err(|e| BridgeError::Transport {
                topic: topic.to_string(),
                reason: e.to_string(),
            })
    }
}

/// One of the three values every sensor reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Metric {
    Temperature,
    Pressure,
    Battery,
}

impl Metric {
    /// Discovery order.
    pub const ALL: [Metric; 3] = [Metric::Temperature, Metric::Pressure, Metric::Battery];

    /// Lower-case key used in topics and unique ids.
    pub fn key(self) -> &'static str {
        match self {
            Metric::Temperature => "temperature",
            Metric::Pressure => "pressure",
            Metric::Battery => "battery",
        }
    }

    /// Field name in the telemetry JSON.
    pub fn field(self) -> &'static str {
        match self {
            Metric::Temperature => "Temperature",
            Metric::Pressure => "Pressure",
            Metric::Battery => "Battery",
        }
    }

    pub fn unit(self) -> &'static str {
        match self {
            Metric::Temperature => "°C",
            Metric::Pressure => "mbar",
            Metric::Battery => "%",
        }
    }

    /// Home Assistant device class; identical to the key for these metrics.
    pub fn device_class(self) -> &'static str {
        self.key()
    }
}

#[derive(Debug, Serialize)]
pub struct TelemetryPayload<'a> {
    pub name: &'a str,
    #[serde(rename = "Pressure")]
    pub pressure: u32,
    #[serde(rename = "Temperature")]
    pub temperature: i32,
    #[serde(rename = "Battery")]
    pub battery: u8,
    pub updated: String,
}

impl<'a> TelemetryPayload<'a> {
    pub fn from_device(device: &'a DeviceState) -> Self {
        let reading = &device.latest_reading;
        TelemetryPayload {
            name: &device.display_name,
            pressure: reading.pressure_mbar(),
            temperature: reading.temperature_celsius,
            battery: reading.battery_percent,
            updated: iso_timestamp(&device.last_seen),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct DiscoveryDevice {
    pub identifiers: Vec<String>,
    pub name: String,
    pub model: &'static str,
    pub sw_version: &'static str,
    pub manufacturer: &'static str,
}

/// Home Assistant MQTT discovery config for one metric of one sensor.
#[derive(Debug, Serialize)]
pub struct DiscoveryDescriptor {
    pub name: String,
    pub stat_t: &'static str,
    pub avty_t: String,
    pub pl_avail: &'static str,
    pub pl_not_avail: &'static str,
    pub unit_of_meas: &'static str,
    pub dev_cla: &'static str,
    pub val_tpl: String,
    pub uniq_id: String,
    pub device: DiscoveryDevice,
    #[serde(rename = "~")]
    pub topic_prefix: String,
}

impl DiscoveryDescriptor {
    /// Build a fresh descriptor; nothing is shared between calls.
    pub fn new(device: &DeviceState, metric: Metric) -> Self {
        let name = &device.display_name;
        DiscoveryDescriptor {
            name: format!("{} {}", name, metric.field()),
            stat_t: "~SENSOR",
            avty_t: availability_topic(name),
            pl_avail: PAYLOAD_ONLINE,
            pl_not_avail: PAYLOAD_OFFLINE,
            unit_of_meas: metric.unit(),
            dev_cla: metric.device_class(),
            val_tpl: format!("{{{{value_json.{}}}}}", metric.field()),
            uniq_id: format!("{}_{}", name, metric.key()),
            device: DiscoveryDevice {
                identifiers: vec![name.clone()],
                name: name.clone(),
                model: DEVICE_MODEL,
                sw_version: env!("CARGO_PKG_VERSION"),
                manufacturer: DEVICE_MANUFACTURER,
            },
            topic_prefix: format!("{}/tele/", name),
        }
    }
}

pub fn telemetry_topic(name: &str) -> String {
    format!("{}/tele/SENSOR", name)
}

pub fn availability_topic(name: &str) -> String {
    format!("{}/tele/LWT", name)
}

pub fn discovery_topic(name: &str, metric: Metric) -> String {
    format!("{}/sensor/{}_{}/config", DISCOVERY_PREFIX, name, metric.key())
}

/// Renders device state onto the bus
///
/// Holds no state besides the transport and the bridge's own name, so every
/// call is idempotent for the same `DeviceState`.
pub struct TelemetryPublisher<T> {
    transport: T,
    bridge_name: String,
}

impl<T: Transport> TelemetryPublisher<T> {
    pub fn new(transport: T, bridge_name: impl Into<String>) -> Self {
        TelemetryPublisher {
            transport,
            bridge_name: bridge_name.into(),
        }
    }

    /// Topic the broker's last will is registered on.
    pub fn bridge_availability_topic(&self) -> String {
        availability_topic(&self.bridge_name)
    }

    /// Publish the latest reading to `<name>/tele/SENSOR` (not retained).
    pub fn publish_telemetry(&self, device: &DeviceState) -> Result<()> {
        let topic = telemetry_topic(&device.display_name);
        let payload = encode(&topic, &TelemetryPayload::from_device(device))?;
        debug!("Publishing telemetry for {} to {}", device.id, topic);
        self.transport.publish(&topic, payload, false)
    }

    /// Publish the retained discovery config for every metric
    ///
    /// Each config is followed by an availability announcement before the
    /// next metric goes out.
    pub fn publish_discovery(&self, device: &DeviceState) -> Result<()> {
        info!("Publishing discovery config for {}", device.display_name);
        for metric in Metric::ALL {
            let topic = discovery_topic(&device.display_name, metric);
            let payload = encode(&topic, &DiscoveryDescriptor::new(device, metric))?;
            self.transport.publish(&topic, payload, true)?;
            self.publish_available(device)?;
        }
        Ok(())
    }

    pub fn publish_available(&self, device: &DeviceState) -> Result<()> {
        self.publish_availability(&device.display_name, PAYLOAD_ONLINE)
    }

    pub fn publish_unavailable(&self, device: &DeviceState) -> Result<()> {
        self.publish_availability(&device.display_name, PAYLOAD_OFFLINE)
    }

    pub fn publish_bridge_available(&self) -> Result<()> {
        self.publish_availability(&self.bridge_name, PAYLOAD_ONLINE)
    }

    pub fn publish_bridge_unavailable(&self) -> Result<()> {
        self.publish_availability(&self.bridge_name, PAYLOAD_OFFLINE)
    }

    fn publish_availability(&self, name: &str, state: &str) -> Result<()> {
        self.transport
            .publish(&availability_topic(name), state.as_bytes().to_vec(), true)
    }
}

fn encode<P: Serialize>(topic: &str, payload: &P) -> Result<Vec<u8>> {
    serde_json::to_vec(payload).map_err(|source| BridgeError::Encode {
        topic: topic.to_string(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{DeviceId, SensorReading};
    use crate::mqtt::testing::RecordingTransport;
    use serde_json::Value;
    use time::macros::datetime;

    fn front_left() -> DeviceState {
        DeviceState {
            id: DeviceId::new("AA:BB:CC:DD:EE:01"),
            display_name: "Front-Left".into(),
            latest_reading: SensorReading {
                pressure_bar: 2.0,
                temperature_celsius: 55,
                battery_percent: 100,
            },
            last_seen: datetime!(2024-05-01 10:00:00 UTC),
        }
    }

    #[test]
    fn telemetry_is_scaled_and_not_retained() {
        let transport = RecordingTransport::default();
        let publisher = TelemetryPublisher::new(transport.clone(), "tpms-bridge");

        publisher.publish_telemetry(&front_left()).unwrap();

        let published = transport.published();
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].topic, "Front-Left/tele/SENSOR");
        assert!(!published[0].retain);
        let json: Value = serde_json::from_slice(&published[0].payload).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "name": "Front-Left",
                "Pressure": 2000,
                "Temperature": 55,
                "Battery": 100,
                "updated": "2024-05-01T10:00:00Z",
            })
        );
    }

    #[test]
    fn discovery_interleaves_availability_per_metric() {
        let transport = RecordingTransport::default();
        let publisher = TelemetryPublisher::new(transport.clone(), "tpms-bridge");

        publisher.publish_discovery(&front_left()).unwrap();

        let topics: Vec<_> = transport
            .published()
            .into_iter()
            .map(|m| (m.topic, m.retain))
            .collect();
        assert_eq!(
            topics,
            [
                ("homeassistant/sensor/Front-Left_temperature/config".to_string(), true),
                ("Front-Left/tele/LWT".to_string(), true),
                ("homeassistant/sensor/Front-Left_pressure/config".to_string(), true),
                ("Front-Left/tele/LWT".to_string(), true),
                ("homeassistant/sensor/Front-Left_battery/config".to_string(), true),
                ("Front-Left/tele/LWT".to_string(), true),
            ]
        );
        assert!(transport
            .published_to("Front-Left/tele/LWT")
            .iter()
            .all(|m| m.payload == b"Online"));
    }

    #[test]
    fn discovery_descriptor_fields() {
        let json = serde_json::to_value(DiscoveryDescriptor::new(&front_left(), Metric::Pressure))
            .unwrap();

        assert_eq!(json["name"], "Front-Left Pressure");
        assert_eq!(json["stat_t"], "~SENSOR");
        assert_eq!(json["~"], "Front-Left/tele/");
        assert_eq!(json["avty_t"], "Front-Left/tele/LWT");
        assert_eq!(json["pl_avail"], "Online");
        assert_eq!(json["pl_not_avail"], "Offline");
        assert_eq!(json["unit_of_meas"], "mbar");
        assert_eq!(json["dev_cla"], "pressure");
        assert_eq!(json["val_tpl"], "{{value_json.Pressure}}");
        assert_eq!(json["uniq_id"], "Front-Left_pressure");
        assert_eq!(json["device"]["identifiers"], serde_json::json!(["Front-Left"]));
        assert_eq!(json["device"]["name"], "Front-Left");
        assert_eq!(json["device"]["model"], "Pressure");
        assert_eq!(json["device"]["manufacturer"], "RipCup");
    }

    #[test]
    fn descriptors_are_independent_per_metric() {
        let device = front_left();
        let temperature = DiscoveryDescriptor::new(&device, Metric::Temperature);
        let battery = DiscoveryDescriptor::new(&device, Metric::Battery);

        assert_eq!(temperature.unit_of_meas, "°C");
        assert_eq!(temperature.val_tpl, "{{value_json.Temperature}}");
        assert_eq!(battery.unit_of_meas, "%");
        assert_eq!(battery.uniq_id, "Front-Left_battery");
    }

    #[test]
    fn transport_failure_stops_discovery() {
        let transport = RecordingTransport::failing();
        let publisher = TelemetryPublisher::new(transport.clone(), "tpms-bridge");

        let err = publisher.publish_discovery(&front_left()).unwrap_err();
        assert!(matches!(err, BridgeError::Transport { ref topic, .. }
            if topic == "homeassistant/sensor/Front-Left_temperature/config"));
        assert!(transport.published().is_empty());
    }

    #[test]
    fn bridge_availability_uses_client_name() {
        let transport = RecordingTransport::default();
        let publisher = TelemetryPublisher::new(transport.clone(), "tpms-bridge");

        publisher.publish_bridge_available().unwrap();
        publisher.publish_bridge_unavailable().unwrap();

        let lwt = transport.published_to("tpms-bridge/tele/LWT");
        assert_eq!(lwt.len(), 2);
        assert_eq!(lwt[0].payload, b"Online");
        assert_eq!(lwt[1].payload, b"Offline");
        assert_eq!(publisher.bridge_availability_topic(), "tpms-bridge/tele/LWT");
    }
}
