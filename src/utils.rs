//! Utility functions for formatting and naming
use time::format_description::well_known::Rfc3339;
use time::macros::format_description;
use time::OffsetDateTime;

use crate::models::DeviceState;

const TABLE_RULE: &str =
    "|====================================================================|";

/// Format a timestamp for human-readable logging
///
/// Converts an OffsetDateTime to DD.MM.YYYY - HH:MM:SS format
/// Falls back to default string representation if formatting fails.
pub fn format_datetime(dt: &OffsetDateTime) -> String {
    let format = format_description!("[day].[month].[year] - [hour]:[minute]:[second]");
    dt.format(format).unwrap_or_else(|_| dt.to_string())
}

/// RFC 3339 timestamp used in MQTT payloads.
pub fn iso_timestamp(dt: &OffsetDateTime) -> String {
    dt.format(&Rfc3339).unwrap_or_else(|_| dt.to_string())
}

/// Make a device name usable as an MQTT topic level
///
/// Topic separators, wildcards and whitespace are replaced with `_`.
pub fn topic_safe_name(name: &str) -> String {
    name.trim()
        .chars()
        .map(|c| match c {
            '/' | '+' | '#' => '_',
            c if c.is_whitespace() => '_',
            c => c,
        })
        .collect()
}

/// Render the registry as a fixed-width table for the log
///
/// One row per device, in the order given.
pub fn render_status(devices: &[DeviceState]) -> String {
    let mut buf = String::from("\n");
    buf.push_str(&format!("{}\n", "-".repeat(TABLE_RULE.len())));
    buf.push_str("| Name             | P (bar) | T (C) | B (%) | Updated               |\n");
    buf.push_str(TABLE_RULE);
    buf.push('\n');

    for device in devices {
        let reading = &device.latest_reading;
        buf.push_str(&format!(
            "| {:<16} | {:>7.2} | {:>5} | {:>5} | {:<21} |\n",
            device.display_name,
            reading.pressure_bar,
            reading.temperature_celsius,
            reading.battery_percent,
            format_datetime(&device.last_seen),
        ));
    }

    buf.push_str(TABLE_RULE);
    buf.push('\n');
    buf
}
