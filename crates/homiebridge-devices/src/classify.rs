//! Classification of parsed Homie messages into store updates.

use homiebridge_core::{PropertyKind, TopicDescriptor};

pub use homiebridge_storage::{AttributeField, DeviceField};

/// Targeted mutation derived from one message.
///
/// Every mutating variant carries its full key path so ancestors can be
/// created before the field write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Update {
    /// Overwrite a device-level field.
    DeviceField { device_id: String, field: DeviceField },
    /// Make sure a cluster row exists.
    EnsureCluster {
        device_id: String,
        cluster_name: String,
    },
    /// Overwrite the cluster's `$properties` list.
    ClusterProperties {
        device_id: String,
        cluster_name: String,
        properties: String,
    },
    /// Make sure an attribute row exists.
    EnsureAttribute {
        device_id: String,
        cluster_name: String,
        attribute_name: String,
    },
    /// Overwrite attribute metadata.
    AttributeField {
        device_id: String,
        cluster_name: String,
        attribute_name: String,
        field: AttributeField,
    },
    /// Plain value write.
    AttributeValue {
        device_id: String,
        cluster_name: String,
        attribute_name: String,
        value: String,
    },
    /// Parsed fine, nothing to store.
    Ignored { reason: &'static str },
}

impl Update {
    pub fn device_id(&self) -> Option<&str> {
        match self {
            Update::DeviceField { device_id, .. }
            | Update::EnsureCluster { device_id, .. }
            | Update::ClusterProperties { device_id, .. }
            | Update::EnsureAttribute { device_id, .. }
            | Update::AttributeField { device_id, .. }
            | Update::AttributeValue { device_id, .. } => Some(device_id),
            Update::Ignored { .. } => None,
        }
    }

    pub fn is_ignored(&self) -> bool {
        matches!(self, Update::Ignored { .. })
    }
}

/// `$settable` is true only for the exact literal `"true"`.
pub fn parse_settable(payload: &str) -> bool {
    payload == "true"
}

/// Map a parsed descriptor and its payload to a store update.
pub fn classify(descriptor: &TopicDescriptor, payload: &str) -> Update {
    let device_id = descriptor.device_id.clone();
    let cluster = descriptor.cluster();
    let attribute = descriptor.attribute();

    let device_field = |field: DeviceField| Update::DeviceField {
        device_id: device_id.clone(),
        field,
    };
    let attribute_field = |field: AttributeField| match (cluster, attribute) {
        (Some(c), Some(a)) => Update::AttributeField {
            device_id: device_id.clone(),
            cluster_name: c.to_string(),
            attribute_name: a.to_string(),
            field,
        },
        _ => Update::Ignored {
            reason: "attribute metadata without cluster and attribute",
        },
    };

    match descriptor.property_kind() {
        PropertyKind::Version => device_field(DeviceField::ProtocolVersion(payload.to_string())),
        PropertyKind::State => device_field(DeviceField::State(payload.to_string())),
        PropertyKind::Nodes => device_field(DeviceField::NodeList(payload.to_string())),
        PropertyKind::Name => match (cluster, attribute) {
            (None, _) => device_field(DeviceField::Name(payload.to_string())),
            (Some(c), None) => Update::EnsureCluster {
                device_id: device_id.clone(),
                cluster_name: c.to_string(),
            },
            (Some(c), Some(a)) => Update::EnsureAttribute {
                device_id: device_id.clone(),
                cluster_name: c.to_string(),
                attribute_name: a.to_string(),
            },
        },
        PropertyKind::Properties => match cluster {
            Some(c) => Update::ClusterProperties {
                device_id: device_id.clone(),
                cluster_name: c.to_string(),
                properties: payload.to_string(),
            },
            None => Update::Ignored {
                reason: "properties without cluster",
            },
        },
        PropertyKind::Datatype => attribute_field(AttributeField::Datatype(payload.to_string())),
        PropertyKind::Settable => attribute_field(AttributeField::Settable(parse_settable(payload))),
        PropertyKind::Format => attribute_field(AttributeField::FormatInfo(payload.to_string())),
        PropertyKind::Value => match (cluster, attribute) {
            (Some(c), Some(a)) => Update::AttributeValue {
                device_id: device_id.clone(),
                cluster_name: c.to_string(),
                attribute_name: a.to_string(),
                value: payload.to_string(),
            },
            _ => Update::Ignored {
                reason: "value without cluster and attribute",
            },
        },
        PropertyKind::Unrecognized(_) => Update::Ignored {
            reason: "unrecognized property",
        },
    }
}
