//! Device model projected from Homie topics.
//!
//! Field names serialize to the column names of the durable schema
//! (`topic_id`, `homie_version`, `cluster_properties`, ...), so a stored row
//! reads the same as the relational layout it mirrors.

use serde::{Deserialize, Serialize};

/// A Homie device.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceRecord {
    /// Device id taken from the first topic segment.
    #[serde(rename = "topic_id")]
    pub device_id: String,
    #[serde(default)]
    pub device_name: Option<String>,
    #[serde(default)]
    pub state: Option<String>,
    /// Value of `$homie`.
    #[serde(rename = "homie_version", default)]
    pub protocol_version: Option<String>,
    /// Value of `$nodes`, kept verbatim.
    #[serde(rename = "nodes", default)]
    pub node_list: Option<String>,
    #[serde(default)]
    pub created_at: i64,
    #[serde(default)]
    pub updated_at: i64,
}

impl DeviceRecord {
    /// Blank record for `device_id`.
    pub fn new(device_id: impl Into<String>, timestamp: i64) -> Self {
        Self {
            device_id: device_id.into(),
            created_at: timestamp,
            updated_at: timestamp,
            ..Default::default()
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.device_name = Some(name.into());
        self
    }

    pub fn with_state(mut self, state: impl Into<String>) -> Self {
        self.state = Some(state.into());
        self
    }

    pub fn with_protocol_version(mut self, version: impl Into<String>) -> Self {
        self.protocol_version = Some(version.into());
        self
    }

    pub fn with_node_list(mut self, nodes: impl Into<String>) -> Self {
        self.node_list = Some(nodes.into());
        self
    }

    /// Cluster names announced in `$nodes`.
    pub fn nodes(&self) -> Vec<&str> {
        self.node_list
            .as_deref()
            .map(|list| {
                list.split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Compare the projected fields, ignoring bookkeeping timestamps.
    pub fn same_content(&self, other: &DeviceRecord) -> bool {
        self.device_id == other.device_id
            && self.device_name == other.device_name
            && self.state == other.state
            && self.protocol_version == other.protocol_version
            && self.node_list == other.node_list
    }
}

/// A Homie node, modelled as a cluster of attributes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterRecord {
    pub device_id: String,
    pub cluster_name: String,
    /// Value of `$properties`, kept verbatim.
    #[serde(rename = "cluster_properties", default)]
    pub properties: Option<String>,
    #[serde(default)]
    pub created_at: i64,
    #[serde(default)]
    pub updated_at: i64,
}

impl ClusterRecord {
    pub fn new(
        device_id: impl Into<String>,
        cluster_name: impl Into<String>,
        timestamp: i64,
    ) -> Self {
        Self {
            device_id: device_id.into(),
            cluster_name: cluster_name.into(),
            properties: None,
            created_at: timestamp,
            updated_at: timestamp,
        }
    }
}

/// A Homie property, modelled as a cluster attribute.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributeRecord {
    pub device_id: String,
    pub cluster_name: String,
    pub attribute_name: String,
    #[serde(rename = "attribute_value", default)]
    pub value: Option<String>,
    #[serde(default)]
    pub datatype: Option<String>,
    #[serde(default)]
    pub settable: bool,
    #[serde(default)]
    pub format_info: Option<String>,
    #[serde(default)]
    pub created_at: i64,
    #[serde(default)]
    pub updated_at: i64,
}

impl AttributeRecord {
    pub fn new(
        device_id: impl Into<String>,
        cluster_name: impl Into<String>,
        attribute_name: impl Into<String>,
        timestamp: i64,
    ) -> Self {
        Self {
            device_id: device_id.into(),
            cluster_name: cluster_name.into(),
            attribute_name: attribute_name.into(),
            created_at: timestamp,
            updated_at: timestamp,
            ..Default::default()
        }
    }
}

/// Free-form device property. Reserved; the message path never writes it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DevicePropertyRecord {
    pub device_id: String,
    pub property_name: String,
    #[serde(default)]
    pub property_value: Option<String>,
    #[serde(default)]
    pub created_at: i64,
    #[serde(default)]
    pub updated_at: i64,
}
