//! In-memory transport for publisher and dispatcher tests.
use std::sync::{Arc, Mutex};

use super::publisher::Transport;
use crate::error::{BridgeError, Result};

#[derive(Debug, Clone, PartialEq)]
pub struct Published {
    pub topic: String,
    pub payload: Vec<u8>,
    pub retain: bool,
}

#[derive(Debug, Clone, Default)]
pub struct RecordingTransport {
    messages: Arc<Mutex<Vec<Published>>>,
    fail: bool,
}

impl RecordingTransport {
    /// A transport that rejects every publish.
    pub fn failing() -> Self {
        RecordingTransport {
            fail: true,
            ..Default::default()
        }
    }

    pub fn published(&self) -> Vec<Published> {
        self.messages.lock().unwrap().clone()
    }

    pub fn published_to(&self, topic: &str) -> Vec<Published> {
        self.published()
            .into_iter()
            .filter(|m| m.topic == topic)
            .collect()
    }

    pub fn clear(&self) {
        self.messages.lock().unwrap().clear();
    }
}

impl Transport for RecordingTransport {
    fn publish(&self, topic: &str, payload: Vec<u8>, retain: bool) -> Result<()> {
        if self.fail {
            return Err(BridgeError::Transport {
                topic: topic.to_string(),
                reason: "request queue full".to_string(),
            });
        }
        self.messages.lock().unwrap().push(Published {
            topic: topic.to_string(),
            payload,
            retain,
        });
        Ok(())
    }
}
