//! Storage layer for HomieBridge.
//!
//! This crate provides the durable projection of the Homie device tree:
//! - Devices, clusters, attributes and reserved device properties in redb
//! - An in-memory device cache written ahead of the durable store
//!
//! ## Example
//!
//! ```no_run
//! use homiebridge_storage::ProjectionStore;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let store = ProjectionStore::open("data/homie_devices.redb")?;
//! store.save_attribute_value("dev1", "onoff", "on", "true")?;
//!
//! for device in store.list_devices()? {
//!     println!("{}", device.device_id);
//! }
//! # Ok(())
//! # }
//! ```

pub mod device_cache;
pub mod error;
pub mod projection;

pub use device_cache::DeviceCache;
pub use error::{Error, Result};
pub use projection::{AttributeField, DeviceField, ProjectionStore};
