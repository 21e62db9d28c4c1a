//! Transport adapters feeding the projection worker.
//!
//! ## Feature Flags
//!
//! | Feature | Description |
//! |---------|-------------|
//! | `mqtt` | MQTT transport (default) |

// MQTT transport (feature-gated)
#[cfg(feature = "mqtt")]
pub mod mqtt;
#[cfg(feature = "mqtt")]
pub use mqtt::{mqtt_options, qos_from_level, ConnectionStatus, MqttTransport};
