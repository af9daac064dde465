use bluer::Uuid;
use log::{debug, info, warn};
use std::collections::HashMap;
use std::env;
use url::Url;

const DEFAULT_MQTT_PORT: u16 = 1883;
const DEFAULT_CLIENT_ID: &str = "tpms-bridge";
const DEFAULT_KEEP_ALIVE_SECS: u64 = 60;
const DEFAULT_CHANNEL_CAPACITY: usize = 64;
/// Service UUID the tyre sensors advertise.
const DEFAULT_SERVICE_UUID: &str = "0000fbb0-0000-1000-8000-00805f9b34fb";

#[derive(Debug, Clone, PartialEq)]
pub struct MqttConfig {
    pub host: String,
    pub port: u16,
    pub client_id: String,
    pub keep_alive_secs: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScanConfig {
    /// Only devices advertising this service are reported; `None` reports all.
    pub service_uuid: Option<Uuid>,
    /// Upper-case MAC address -> display name overrides.
    pub aliases: HashMap<String, String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BridgeConfig {
    pub mqtt: MqttConfig,
    pub scan: ScanConfig,
    pub channel_capacity: usize,
}

impl BridgeConfig {
    pub fn new() -> Result<Self, Box<dyn std::error::Error>> {
        // Load environment variables
        dotenv::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build the configuration from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, Box<dyn std::error::Error>>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mqtt_url = lookup("MQTT_URL").ok_or("MQTT_URL environment variable not set")?;
        let (host, port) = parse_broker_url(&mqtt_url)?;

        let client_id = lookup("MQTT_CLIENT_ID")
            .map(|id| id.trim().to_string())
            .filter(|id| !id.is_empty())
            .unwrap_or_else(|| DEFAULT_CLIENT_ID.to_string());

        let keep_alive_secs = match lookup("MQTT_KEEP_ALIVE_SECS") {
            Some(value) => value
                .trim()
                .parse()
                .map_err(|e| format!("Invalid MQTT_KEEP_ALIVE_SECS '{}': {}", value, e))?,
            None => DEFAULT_KEEP_ALIVE_SECS,
        };

        let channel_capacity = match lookup("EVENT_CHANNEL_CAPACITY") {
            Some(value) => match value.trim().parse::<usize>() {
                Ok(capacity) if capacity > 0 => capacity,
                _ => return Err(format!("Invalid EVENT_CHANNEL_CAPACITY '{}'", value).into()),
            },
            None => DEFAULT_CHANNEL_CAPACITY,
        };

        let service_uuid = match lookup("TPMS_SERVICE_UUID") {
            Some(value) if value.trim().is_empty() => {
                warn!("TPMS_SERVICE_UUID is empty, reporting every LE device");
                None
            }
            Some(value) => Some(
                Uuid::parse_str(value.trim())
                    .map_err(|e| format!("Invalid TPMS_SERVICE_UUID '{}': {}", value, e))?,
            ),
            None => Some(Uuid::parse_str(DEFAULT_SERVICE_UUID)?),
        };

        let aliases = lookup("TPMS_NAMES")
            .map(|names| parse_aliases(&names))
            .unwrap_or_default();

        info!(
            "Broker {}:{} as '{}', {} name aliases",
            host,
            port,
            client_id,
            aliases.len()
        );

        Ok(BridgeConfig {
            mqtt: MqttConfig {
                host,
                port,
                client_id,
                keep_alive_secs,
            },
            scan: ScanConfig {
                service_uuid,
                aliases,
            },
            channel_capacity,
        })
    }
}

/// Split `mqtt://host:port` into host and port.
pub fn parse_broker_url(raw: &str) -> Result<(String, u16), Box<dyn std::error::Error>> {
    let url = Url::parse(raw.trim()).map_err(|e| format!("Invalid MQTT_URL '{}': {}", raw, e))?;

    if !matches!(url.scheme(), "mqtt" | "tcp") {
        return Err(format!(
            "Unsupported MQTT_URL scheme '{}', expected mqtt:// or tcp://",
            url.scheme()
        )
        .into());
    }

    let host = url
        .host_str()
        .filter(|host| !host.is_empty())
        .ok_or_else(|| format!("MQTT_URL '{}' has no host", raw))?;

    Ok((host.to_string(), url.port().unwrap_or(DEFAULT_MQTT_PORT)))
}

/// Parse `MAC=Name,MAC=Name` pairs; malformed pairs are skipped.
pub fn parse_aliases(raw: &str) -> HashMap<String, String> {
    let mut aliases = HashMap::new();

    for pair in raw.split(',') {
        let pair = pair.trim();
        if pair.is_empty() {
            continue;
        }
        match pair.split_once('=') {
            Some((mac, name)) if !mac.trim().is_empty() && !name.trim().is_empty() => {
                let mac = mac.trim().to_uppercase();
                debug!("Alias {} -> {}", mac, name.trim());
                aliases.insert(mac, name.trim().to_string());
            }
            _ => warn!("Ignoring malformed TPMS_NAMES entry '{}'", pair),
        }
    }

    aliases
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lookup_from(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn defaults_apply_with_only_broker_url() {
        let config = BridgeConfig::from_lookup(lookup_from(&[("MQTT_URL", "mqtt://192.168.1.10")]))
            .unwrap();

        assert_eq!(config.mqtt.host, "192.168.1.10");
        assert_eq!(config.mqtt.port, 1883);
        assert_eq!(config.mqtt.client_id, "tpms-bridge");
        assert_eq!(config.mqtt.keep_alive_secs, 60);
        assert_eq!(config.channel_capacity, 64);
        assert_eq!(
            config.scan.service_uuid,
            Some(Uuid::parse_str("0000fbb0-0000-1000-8000-00805f9b34fb").unwrap())
        );
        assert!(config.scan.aliases.is_empty());
    }

    #[test]
    fn missing_broker_url_is_an_error() {
        let err = BridgeConfig::from_lookup(lookup_from(&[])).unwrap_err();
        assert!(err.to_string().contains("MQTT_URL"));
    }

    #[test]
    fn overrides_are_read() {
        let config = BridgeConfig::from_lookup(lookup_from(&[
            ("MQTT_URL", "tcp://broker.local:11883"),
            ("MQTT_CLIENT_ID", "garage"),
            ("MQTT_KEEP_ALIVE_SECS", "15"),
            ("EVENT_CHANNEL_CAPACITY", "8"),
            ("TPMS_SERVICE_UUID", ""),
            ("TPMS_NAMES", "aa:bb:cc:dd:ee:01=Front-Left"),
        ]))
        .unwrap();

        assert_eq!(config.mqtt.host, "broker.local");
        assert_eq!(config.mqtt.port, 11883);
        assert_eq!(config.mqtt.client_id, "garage");
        assert_eq!(config.mqtt.keep_alive_secs, 15);
        assert_eq!(config.channel_capacity, 8);
        assert_eq!(config.scan.service_uuid, None);
        assert_eq!(
            config.scan.aliases.get("AA:BB:CC:DD:EE:01").map(String::as_str),
            Some("Front-Left")
        );
    }

    #[test]
    fn rejects_bad_values() {
        for vars in [
            vec![("MQTT_URL", "http://broker")],
            vec![("MQTT_URL", "not a url")],
            vec![("MQTT_URL", "mqtt://broker"), ("EVENT_CHANNEL_CAPACITY", "0")],
            vec![("MQTT_URL", "mqtt://broker"), ("TPMS_SERVICE_UUID", "fbb0")],
        ] {
            assert!(BridgeConfig::from_lookup(lookup_from(&vars)).is_err(), "{:?}", vars);
        }
    }

    #[test]
    fn aliases_skip_malformed_pairs() {
        let aliases = parse_aliases(" 11:22:33:44:55:66 = Rear-Left ,broken,=NoMac,77:88:99:AA:BB:CC=, ");
        assert_eq!(aliases.len(), 1);
        assert_eq!(aliases["11:22:33:44:55:66"], "Rear-Left");
    }
}
