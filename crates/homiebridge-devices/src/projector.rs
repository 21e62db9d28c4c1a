//! Homie projector: parses, classifies and applies messages.
//!
//! Each message goes through two write paths. The device cache is always
//! updated; the durable store is written best effort, and a failed durable
//! write is logged and dropped without touching the cache.

use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::{debug, error, warn};

use homiebridge_core::{
    AttributeRecord, BridgeConfig, ClusterRecord, DevicePropertyRecord, DeviceRecord,
    TopicDescriptor, TopicError, DEFAULT_BASE_TOPIC,
};
use homiebridge_storage::{AttributeField, DeviceCache, ProjectionStore};

use crate::classify::{classify, Update};
use crate::error::BridgeResult;

/// Capacity of the update event channel.
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Which path a processed message took.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessOutcome {
    /// Parsed, classified and written to the durable store.
    Applied,
    /// Parsed, but produced no store mutation.
    Ignored,
    /// Topic did not match the Homie grammar; nothing was written.
    Rejected(TopicError),
    /// Durable write failed; the cache was still updated.
    StoreFailed(String),
}

/// Emitted for every applied message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectionEvent {
    pub descriptor: TopicDescriptor,
    pub update: Update,
}

/// Owns the projection of Homie messages into the cache and durable store.
pub struct HomieProjector {
    store: Arc<ProjectionStore>,
    cache: DeviceCache,
    base_topic: String,
    event_tx: broadcast::Sender<ProjectionEvent>,
}

impl HomieProjector {
    pub fn new(store: Arc<ProjectionStore>) -> Self {
        let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            store,
            cache: DeviceCache::new(),
            base_topic: DEFAULT_BASE_TOPIC.to_string(),
            event_tx,
        }
    }

    /// Parse topics rooted at `base` instead of `homie`.
    pub fn with_base_topic(mut self, base: impl Into<String>) -> Self {
        self.base_topic = base.into();
        self
    }

    /// Open the configured store and build a projector for it.
    pub fn from_config(config: &BridgeConfig) -> BridgeResult<Self> {
        let store = ProjectionStore::open(&config.storage.db_path)?;
        Ok(Self::new(store).with_base_topic(config.mqtt.base_topic.clone()))
    }

    pub fn base_topic(&self) -> &str {
        &self.base_topic
    }

    pub fn store(&self) -> &Arc<ProjectionStore> {
        &self.store
    }

    /// Subscribe to applied updates.
    pub fn subscribe(&self) -> broadcast::Receiver<ProjectionEvent> {
        self.event_tx.subscribe()
    }

    /// Project one inbound message.
    pub fn process_message(&self, topic: &str, payload: &[u8]) -> ProcessOutcome {
        let descriptor = match TopicDescriptor::parse_with_base(topic, &self.base_topic) {
            Ok(descriptor) => descriptor,
            Err(e) => {
                warn!(topic = %topic, "Dropping message: {}", e);
                return ProcessOutcome::Rejected(e);
            }
        };
        let payload = String::from_utf8_lossy(payload);

        debug!(
            topic = %topic,
            device_id = %descriptor.device_id,
            property = ?descriptor.property_type,
            "Processing message"
        );

        self.cache.update(&descriptor, &payload);

        let update = classify(&descriptor, &payload);
        if let Update::Ignored { reason } = &update {
            debug!(topic = %topic, "No store mutation: {}", reason);
            return ProcessOutcome::Ignored;
        }

        if let Err(e) = self.apply(&update) {
            error!(
                topic = %topic,
                device_id = %descriptor.device_id,
                "Failed to write update: {}",
                e
            );
            return ProcessOutcome::StoreFailed(e.to_string());
        }

        let _ = self.event_tx.send(ProjectionEvent { descriptor, update });
        ProcessOutcome::Applied
    }

    /// Apply an update to the durable store, creating ancestors first.
    pub fn apply(&self, update: &Update) -> Result<(), homiebridge_storage::Error> {
        match update {
            Update::DeviceField { device_id, field } => {
                self.store.ensure_device(device_id)?;
                self.store.set_device_field(device_id, field.clone())?;
            }
            Update::EnsureCluster {
                device_id,
                cluster_name,
            } => {
                self.store.ensure_device(device_id)?;
                self.store.ensure_cluster(device_id, cluster_name)?;
            }
            Update::ClusterProperties {
                device_id,
                cluster_name,
                properties,
            } => {
                self.store.ensure_device(device_id)?;
                self.store.ensure_cluster(device_id, cluster_name)?;
                self.store
                    .set_cluster_properties(device_id, cluster_name, properties)?;
            }
            Update::EnsureAttribute {
                device_id,
                cluster_name,
                attribute_name,
            } => {
                self.ensure_attribute_path(device_id, cluster_name, attribute_name)?;
            }
            Update::AttributeField {
                device_id,
                cluster_name,
                attribute_name,
                field,
            } => {
                self.ensure_attribute_path(device_id, cluster_name, attribute_name)?;
                self.store
                    .set_attribute_field(device_id, cluster_name, attribute_name, field.clone())?;
            }
            Update::AttributeValue {
                device_id,
                cluster_name,
                attribute_name,
                value,
            } => {
                self.ensure_attribute_path(device_id, cluster_name, attribute_name)?;
                self.store.set_attribute_field(
                    device_id,
                    cluster_name,
                    attribute_name,
                    AttributeField::Value(value.clone()),
                )?;
            }
            Update::Ignored { .. } => {}
        }
        Ok(())
    }

    fn ensure_attribute_path(
        &self,
        device_id: &str,
        cluster_name: &str,
        attribute_name: &str,
    ) -> Result<(), homiebridge_storage::Error> {
        self.store.ensure_device(device_id)?;
        self.store.ensure_cluster(device_id, cluster_name)?;
        self.store
            .ensure_attribute(device_id, cluster_name, attribute_name)?;
        Ok(())
    }

    // ========== External upserts ==========

    pub fn save_device_info(&self, record: &DeviceRecord) -> BridgeResult<()> {
        self.store.save_device_info(record)?;
        debug!(device_id = %record.device_id, "Saved device info");
        Ok(())
    }

    pub fn save_attribute_value(
        &self,
        device_id: &str,
        cluster_name: &str,
        attribute_name: &str,
        value: &str,
    ) -> BridgeResult<()> {
        self.store
            .save_attribute_value(device_id, cluster_name, attribute_name, value)?;
        Ok(())
    }

    // ========== Reads ==========

    /// Durable devices, ordered by device id.
    pub fn list_devices(&self) -> BridgeResult<Vec<DeviceRecord>> {
        Ok(self.store.list_devices()?)
    }

    pub fn get_device(&self, device_id: &str) -> BridgeResult<Option<DeviceRecord>> {
        Ok(self.store.get_device(device_id)?)
    }

    pub fn get_cluster(
        &self,
        device_id: &str,
        cluster_name: &str,
    ) -> BridgeResult<Option<ClusterRecord>> {
        Ok(self.store.get_cluster(device_id, cluster_name)?)
    }

    pub fn list_clusters(&self, device_id: &str) -> BridgeResult<Vec<ClusterRecord>> {
        Ok(self.store.list_clusters(device_id)?)
    }

    pub fn get_attribute(
        &self,
        device_id: &str,
        cluster_name: &str,
        attribute_name: &str,
    ) -> BridgeResult<Option<AttributeRecord>> {
        Ok(self
            .store
            .get_attribute(device_id, cluster_name, attribute_name)?)
    }

    pub fn list_attributes(
        &self,
        device_id: &str,
        cluster_name: &str,
    ) -> BridgeResult<Vec<AttributeRecord>> {
        Ok(self.store.list_attributes(device_id, cluster_name)?)
    }

    pub fn get_device_property(
        &self,
        device_id: &str,
        property_name: &str,
    ) -> BridgeResult<Option<DevicePropertyRecord>> {
        Ok(self.store.get_device_property(device_id, property_name)?)
    }

    pub fn cached_device(&self, device_id: &str) -> Option<DeviceRecord> {
        self.cache.get(device_id)
    }

    /// Cache snapshot, ordered by device id.
    pub fn cached_devices(&self) -> Vec<DeviceRecord> {
        self.cache.snapshot()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_projector() -> (tempfile::TempDir, HomieProjector) {
        let dir = tempfile::tempdir().unwrap();
        let store = ProjectionStore::open(dir.path().join("homie.redb")).unwrap();
        (dir, HomieProjector::new(store))
    }

    #[test]
    fn test_outcomes() {
        let (_dir, projector) = create_projector();
        assert_eq!(
            projector.process_message("homie/dev1/$state", b"ready"),
            ProcessOutcome::Applied
        );
        assert_eq!(
            projector.process_message("homie/dev1/$stats", b"x"),
            ProcessOutcome::Ignored
        );
        assert!(matches!(
            projector.process_message("other/dev1/$state", b"ready"),
            ProcessOutcome::Rejected(TopicError::MissingPrefix { .. })
        ));
    }

    #[test]
    fn test_ignored_message_still_updates_cache() {
        let (_dir, projector) = create_projector();
        projector.process_message("homie/dev1/$stats", b"uptime");
        assert!(projector.cached_device("dev1").is_some());
        assert!(projector.get_device("dev1").unwrap().is_none());
    }

    #[test]
    fn test_custom_base_topic() {
        let (_dir, projector) = create_projector();
        let projector = projector.with_base_topic("devices");
        assert_eq!(projector.base_topic(), "devices");
        assert_eq!(
            projector.process_message("devices/dev1/$name", b"Lamp"),
            ProcessOutcome::Applied
        );
        assert!(matches!(
            projector.process_message("homie/dev1/$name", b"Lamp"),
            ProcessOutcome::Rejected(_)
        ));
        let device = projector.get_device("dev1").unwrap().unwrap();
        assert_eq!(device.device_name.as_deref(), Some("Lamp"));
    }

    #[test]
    fn test_non_utf8_payload_is_lossy() {
        let (_dir, projector) = create_projector();
        projector.process_message("homie/dev1/$name", &[0x4c, 0xff, 0x61]);
        let device = projector.get_device("dev1").unwrap().unwrap();
        assert_eq!(device.device_name.as_deref(), Some("L\u{fffd}a"));
    }

    #[tokio::test]
    async fn test_events_for_applied_messages() {
        let (_dir, projector) = create_projector();
        let mut rx = projector.subscribe();

        projector.process_message("homie/dev1/$stats", b"x");
        projector.process_message("homie/dev1/onoff/on", b"true");

        let event = rx.recv().await.unwrap();
        assert_eq!(event.descriptor.to_string(), "homie/dev1/onoff/on");
        assert!(matches!(event.update, Update::AttributeValue { ref value, .. } if value == "true"));
        assert!(rx.try_recv().is_err());
    }
}
