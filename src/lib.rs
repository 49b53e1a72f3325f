//! Tibber to FIMP bridge library
//!
//! Keeps a live measurement subscription to Tibber for a single home, turns the
//! measurements into FIMP meter reports and publishes them on MQTT, while a
//! poller publishes the current electricity price.

pub mod bootstrap;
pub mod bridge;
pub mod config;
pub mod error;
pub mod fimp;
pub mod lifecycle;
pub mod model;
pub mod poller;
pub mod publisher;
pub mod retry;
pub mod router;
pub mod stream;
pub mod tibber_api;

#[cfg(test)]
mod test_support;

// Re-export commonly used types for easier access
pub use bridge::{Bridge, BridgeHandle};
pub use config::BridgeConfig;
pub use error::BridgeError;
pub use publisher::{MqttTransport, Publisher};
pub use stream::TibberLiveFeed;
pub use tibber_api::TibberClient;
