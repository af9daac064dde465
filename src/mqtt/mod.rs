pub mod connection;
pub mod publisher;
#[cfg(test)]
pub mod testing;

pub use connection::{announce_offline, connect, maintain_connection};
pub use publisher::TelemetryPublisher;
