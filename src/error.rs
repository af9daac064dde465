//! Error types for the decode-and-track pipeline.
//!
//! None of these are fatal: every path that produces a [`BridgeError`] drops
//! the current event (or publish) and the stream continues.

use thiserror::Error;

use crate::models::DeviceId;

#[derive(Debug, Error)]
pub enum BridgeError {
    /// Manufacturer data was present but too short to hold a reading.
    #[error("Malformed TPMS payload: expected at least {expected} bytes, got {actual}")]
    MalformedPayload { expected: usize, actual: usize },

    /// The event referenced a device that has not been registered yet.
    #[error("Unknown device: {0}")]
    UnknownDevice(DeviceId),

    /// A device was announced without manufacturer data under the TPMS company id.
    #[error("No TPMS manufacturer data for {0}")]
    MissingPayload(DeviceId),

    #[error("Failed to encode payload for {topic}: {source}")]
    Encode {
        topic: String,
        #[source]
        source: serde_json::Error,
    },

    /// The transport refused the publish (queue full, client gone).
    #[error("Publish to {topic} failed: {reason}")]
    Transport { topic: String, reason: String },
}

pub type Result<T> = std::result::Result<T, BridgeError>;
