//! Tyre pressure sensor manufacturer data decoding

use crate::error::{BridgeError, Result};
use crate::models::SensorReading;

/// Company identifier the TPMS transmitters advertise under.
pub const TPMS_MANUFACTURER_ID: u16 = 0xAC;

const PAYLOAD_LEN: usize = 3;
const BATTERY_FULL_VOLTS: f64 = 3.0; // 100%
const BATTERY_EMPTY_VOLTS: f64 = 2.6; // 0%
const BATTERY_SPAN_VOLTS: f64 = 0.4; // full - empty, kept as a literal

/// Decode TPMS manufacturer data into a sensor reading
///
/// The transmitter packs its measurement into three fixed-point bytes:
/// - Byte 0: Battery voltage (0.01 V resolution, +1.23 V offset)
/// - Byte 1: Pressure (1/32 bar resolution)
/// - Byte 2: Temperature (1 °C resolution, -55 °C offset)
///
/// Trailing bytes, if any, are ignored.
///
/// # Arguments
/// * `data` - Raw manufacturer data bytes from the BLE advertisement
///
/// # Returns
/// The decoded reading, or `MalformedPayload` if fewer than 3 bytes were given
pub fn decode_tpms_data(data: &[u8]) -> Result<SensorReading> {
    if data.len() < PAYLOAD_LEN {
        return Err(BridgeError::MalformedPayload {
            expected: PAYLOAD_LEN,
            actual: data.len(),
        });
    }

    let pressure_bar = f64::from(data[1]) / 32.0;
    let temperature_celsius = i32::from(data[2]) - 55;

    let volts = (f64::from(data[0]) * 0.01 + 1.23).min(BATTERY_FULL_VOLTS);
    let battery = (100.0 * (volts - BATTERY_EMPTY_VOLTS) / BATTERY_SPAN_VOLTS)
        .round()
        .clamp(0.0, 100.0);

    Ok(SensorReading {
        pressure_bar,
        temperature_celsius,
        battery_percent: battery as u8,
    })
}
