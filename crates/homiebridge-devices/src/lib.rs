//! Homie projection runtime.
//!
//! This crate turns Homie MQTT traffic into the projected device model.
//!
//! ## Features
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `mqtt` | ✅ | MQTT transport |
//!
//! ## Architecture
//!
//! - **classify**: maps a parsed topic and payload to a targeted `Update`
//! - **HomieProjector**: applies updates to the device cache and the durable store
//! - **ProjectionWorker**: single consumer task draining the inbound channel
//! - **MqttTransport**: broker connection forwarding publishes to the worker
//!
//! The transport and the worker are connected by a bounded channel and share
//! one stop signal.

pub mod adapters;
pub mod classify;
pub mod error;
pub mod projector;
pub mod worker;

pub use classify::{classify, AttributeField, DeviceField, Update};
pub use error::{BridgeError, BridgeResult};
pub use projector::{HomieProjector, ProcessOutcome, ProjectionEvent};
pub use worker::{InboundMessage, ProjectionWorker, WorkerStats};

#[cfg(feature = "mqtt")]
pub use adapters::{ConnectionStatus, MqttTransport};
