//! In-memory device cache.
//!
//! Written for every parsed message, before and independently of the
//! durable write, so it may run ahead of the projection store.

use dashmap::DashMap;

use homiebridge_core::{DeviceRecord, PropertyKind, TopicDescriptor};

/// Device records keyed by device id.
#[derive(Debug, Default)]
pub struct DeviceCache {
    devices: DashMap<String, DeviceRecord>,
}

impl DeviceCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply a parsed message to the cached device.
    ///
    /// A miss creates a blank record. Only device-level tokens change fields;
    /// `$name` counts as device-level when no cluster is present.
    pub fn update(&self, descriptor: &TopicDescriptor, payload: &str) {
        let timestamp = chrono::Utc::now().timestamp();
        let mut entry = self
            .devices
            .entry(descriptor.device_id.clone())
            .or_insert_with(|| DeviceRecord::new(descriptor.device_id.as_str(), timestamp));
        let device = entry.value_mut();

        match descriptor.property_kind() {
            PropertyKind::Version => device.protocol_version = Some(payload.to_string()),
            PropertyKind::Name if descriptor.cluster().is_none() => {
                device.device_name = Some(payload.to_string())
            }
            PropertyKind::State => device.state = Some(payload.to_string()),
            PropertyKind::Nodes => device.node_list = Some(payload.to_string()),
            _ => return,
        }
        device.updated_at = timestamp;
    }

    pub fn get(&self, device_id: &str) -> Option<DeviceRecord> {
        self.devices.get(device_id).map(|d| d.value().clone())
    }

    /// Snapshot of every cached device, ordered by device id.
    pub fn snapshot(&self) -> Vec<DeviceRecord> {
        let mut devices: Vec<DeviceRecord> =
            self.devices.iter().map(|d| d.value().clone()).collect();
        devices.sort_by(|a, b| a.device_id.cmp(&b.device_id));
        devices
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    pub fn clear(&self) {
        self.devices.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn apply(cache: &DeviceCache, topic: &str, payload: &str) {
        let descriptor = TopicDescriptor::parse(topic).unwrap();
        cache.update(&descriptor, payload);
    }

    #[test]
    fn test_miss_creates_blank_record() {
        let cache = DeviceCache::new();
        apply(&cache, "homie/dev1/onoff/on", "true");
        let device = cache.get("dev1").unwrap();
        assert_eq!(device.device_id, "dev1");
        assert_eq!(device.device_name, None);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_device_level_tokens() {
        let cache = DeviceCache::new();
        apply(&cache, "homie/dev1/$homie", "4.0.0");
        apply(&cache, "homie/dev1/$name", "Lamp");
        apply(&cache, "homie/dev1/$state", "ready");
        apply(&cache, "homie/dev1/$nodes", "onoff");

        let device = cache.get("dev1").unwrap();
        assert_eq!(device.protocol_version.as_deref(), Some("4.0.0"));
        assert_eq!(device.device_name.as_deref(), Some("Lamp"));
        assert_eq!(device.state.as_deref(), Some("ready"));
        assert_eq!(device.node_list.as_deref(), Some("onoff"));
    }

    #[test]
    fn test_cluster_name_does_not_rename_device() {
        let cache = DeviceCache::new();
        apply(&cache, "homie/dev1/$name", "Lamp");
        apply(&cache, "homie/dev1/onoff/$name", "On/Off");
        apply(&cache, "homie/dev1/onoff/on/$name", "Power");
        assert_eq!(cache.get("dev1").unwrap().device_name.as_deref(), Some("Lamp"));
    }

    #[test]
    fn test_snapshot_sorted() {
        let cache = DeviceCache::new();
        apply(&cache, "homie/b", "");
        apply(&cache, "homie/a/$state", "lost");
        let ids: Vec<String> = cache.snapshot().into_iter().map(|d| d.device_id).collect();
        assert_eq!(ids, vec!["a", "b"]);

        cache.clear();
        assert!(cache.is_empty());
    }
}
