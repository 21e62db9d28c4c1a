//! Core types for HomieBridge.
//!
//! This crate defines the Homie topic grammar, the projected device model,
//! configuration and the shared error type.

pub mod config;
pub mod error;
pub mod model;
pub mod topic;

pub use config::{BridgeConfig, MqttSettings, StorageSettings, WorkerSettings};
pub use error::{Error, Result};
pub use model::{AttributeRecord, ClusterRecord, DevicePropertyRecord, DeviceRecord};
pub use topic::{PropertyKind, TopicDescriptor, TopicError, DEFAULT_BASE_TOPIC};

/// Re-exports commonly used types.
pub mod prelude {
    pub use crate::config::{defaults, env_vars, BridgeConfig};
    pub use crate::error::{Error, Result};
    pub use crate::model::{AttributeRecord, ClusterRecord, DeviceRecord};
    pub use crate::topic::{PropertyKind, TopicDescriptor, TopicError};
}
