//! Homie topic grammar.
//!
//! A Homie topic has the shape
//!
//! ```text
//! homie/<device>[/<cluster_or_property>[/<attribute_or_property>[/<$property>]]]
//! ```
//!
//! The same shape carries different meanings depending on which segments are
//! present and whether they start with the reserved `$` prefix. Parsing
//! captures the raw segments and then canonicalizes them so that
//! [`TopicDescriptor::property_type`] always holds the metadata token and the
//! cluster/attribute fields hold only real hierarchy names.
//!
//! | Topic                          | device | cluster | attribute | property     |
//! |--------------------------------|--------|---------|-----------|--------------|
//! | `homie/dev1`                   | dev1   |         |           |              |
//! | `homie/dev1/$state`            | dev1   |         |           | `$state`     |
//! | `homie/dev1/onoff/$name`       | dev1   | onoff   |           | `$name`      |
//! | `homie/dev1/onoff/on`          | dev1   | onoff   | on        |              |
//! | `homie/dev1/onoff/on/$settable`| dev1   | onoff   | on        | `$settable`  |

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Default Homie root topic.
pub const DEFAULT_BASE_TOPIC: &str = "homie";

/// Prefix marking a metadata token (`$name`, `$state`, ...).
pub const RESERVED_PREFIX: char = '$';

/// Maximum number of segments after the base topic.
const MAX_SEGMENTS: usize = 4;

/// Reasons a topic is rejected by the parser.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TopicError {
    /// Topic is not rooted at the base topic.
    #[error("Topic is not under '{base}/': {topic}")]
    MissingPrefix { base: String, topic: String },

    /// Nothing follows the base topic.
    #[error("Topic has no device id: {0}")]
    MissingDevice(String),

    /// Two consecutive slashes or a trailing slash.
    #[error("Topic has an empty segment: {0}")]
    EmptySegment(String),

    /// Wildcards or control characters inside a segment.
    #[error("Topic contains an illegal character: {0}")]
    IllegalCharacter(String),

    /// More segments than the grammar allows.
    #[error("Topic has too many segments: {0}")]
    TooManySegments(String),

    /// The fourth segment is not a `$` token.
    #[error("Fourth topic segment must be a property token: {0}")]
    InvalidProperty(String),
}

/// Returns true when `segment` starts with the reserved `$` prefix.
pub fn is_reserved(segment: &str) -> bool {
    segment.starts_with(RESERVED_PREFIX)
}

/// A property slot token needs at least one character after the prefix.
fn is_property_token(segment: &str) -> bool {
    is_reserved(segment) && segment.len() > RESERVED_PREFIX.len_utf8()
}

fn has_illegal_char(segment: &str) -> bool {
    segment
        .chars()
        .any(|c| c == '+' || c == '#' || c == '\0')
}

/// Canonicalized description of a single Homie topic.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TopicDescriptor {
    /// First segment after the base topic. Never empty.
    pub device_id: String,
    /// Cluster (Homie node) name, if the topic addresses one.
    pub cluster_name: Option<String>,
    /// Attribute (Homie property) name, if the topic addresses one.
    pub attribute_name: Option<String>,
    /// Metadata token such as `$name`; `None` for plain values.
    pub property_type: Option<String>,
}

impl TopicDescriptor {
    /// Parse a topic rooted at [`DEFAULT_BASE_TOPIC`].
    pub fn parse(topic: &str) -> Result<Self, TopicError> {
        Self::parse_with_base(topic, DEFAULT_BASE_TOPIC)
    }

    /// Parse a topic rooted at `base`.
    pub fn parse_with_base(topic: &str, base: &str) -> Result<Self, TopicError> {
        let rest = topic
            .strip_prefix(base)
            .and_then(|r| r.strip_prefix('/'))
            .ok_or_else(|| TopicError::MissingPrefix {
                base: base.to_string(),
                topic: topic.to_string(),
            })?;

        if rest.is_empty() {
            return Err(TopicError::MissingDevice(topic.to_string()));
        }

        let segments: Vec<&str> = rest.split('/').collect();
        if segments.iter().any(|s| s.is_empty()) {
            return Err(TopicError::EmptySegment(topic.to_string()));
        }
        if segments.iter().any(|s| has_illegal_char(s)) {
            return Err(TopicError::IllegalCharacter(topic.to_string()));
        }
        if segments.len() > MAX_SEGMENTS {
            return Err(TopicError::TooManySegments(topic.to_string()));
        }

        let mut cluster_name = segments.get(1).map(|s| s.to_string());
        let mut attribute_name = segments.get(2).map(|s| s.to_string());
        let captured_property = segments.get(3).copied();

        let property_type = match captured_property {
            // Rule 1: an explicit property slot wins.
            Some(property) => {
                if !is_property_token(property) {
                    return Err(TopicError::InvalidProperty(topic.to_string()));
                }
                Some(property.to_string())
            }
            None => {
                if attribute_name.is_none() && cluster_name.as_deref().is_some_and(is_reserved) {
                    // Rule 2: device-level metadata, e.g. homie/dev1/$name
                    cluster_name.take()
                } else if attribute_name.as_deref().is_some_and(is_reserved) {
                    // Rule 3: cluster-level metadata, e.g. homie/dev1/node/$name
                    attribute_name.take()
                } else {
                    // Rule 4: plain hierarchy
                    None
                }
            }
        };

        Ok(Self {
            device_id: segments[0].to_string(),
            cluster_name,
            attribute_name,
            property_type,
        })
    }

    /// Classified property token.
    pub fn property_kind(&self) -> PropertyKind {
        PropertyKind::from_token(self.property_type.as_deref())
    }

    /// Cluster name, treating an empty string as absent.
    pub fn cluster(&self) -> Option<&str> {
        self.cluster_name.as_deref().filter(|s| !s.is_empty())
    }

    /// Attribute name, treating an empty string as absent.
    pub fn attribute(&self) -> Option<&str> {
        self.attribute_name.as_deref().filter(|s| !s.is_empty())
    }

    /// Render the canonical topic under `base`.
    pub fn to_topic(&self, base: &str) -> String {
        let mut topic = format!("{}/{}", base, self.device_id);
        for segment in [
            self.cluster_name.as_deref(),
            self.attribute_name.as_deref(),
            self.property_type.as_deref(),
        ]
        .into_iter()
        .flatten()
        {
            topic.push('/');
            topic.push_str(segment);
        }
        topic
    }
}

impl std::fmt::Display for TopicDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.to_topic(DEFAULT_BASE_TOPIC))
    }
}

/// Closed set of metadata tokens understood by the projector.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PropertyKind {
    /// `$homie`: convention version of the device.
    Version,
    /// `$name`: human-readable name of a device, cluster or attribute.
    Name,
    /// `$state`: device lifecycle state.
    State,
    /// `$nodes`: comma-separated cluster list.
    Nodes,
    /// `$properties`: comma-separated attribute list of a cluster.
    Properties,
    /// `$datatype`: attribute datatype.
    Datatype,
    /// `$settable`: whether the attribute accepts writes.
    Settable,
    /// `$format`: attribute format/range hint.
    Format,
    /// No token at all: the payload is an attribute value.
    Value,
    /// A `$` token outside the recognized set.
    Unrecognized(String),
}

impl PropertyKind {
    /// Map an optional token to its kind by exact string match.
    pub fn from_token(token: Option<&str>) -> Self {
        match token {
            None | Some("") => PropertyKind::Value,
            Some("$homie") => PropertyKind::Version,
            Some("$name") => PropertyKind::Name,
            Some("$state") => PropertyKind::State,
            Some("$nodes") => PropertyKind::Nodes,
            Some("$properties") => PropertyKind::Properties,
            Some("$datatype") => PropertyKind::Datatype,
            Some("$settable") => PropertyKind::Settable,
            Some("$format") => PropertyKind::Format,
            Some(other) => PropertyKind::Unrecognized(other.to_string()),
        }
    }

    /// Wire token for this kind, `None` for plain values.
    pub fn token(&self) -> Option<&str> {
        match self {
            PropertyKind::Version => Some("$homie"),
            PropertyKind::Name => Some("$name"),
            PropertyKind::State => Some("$state"),
            PropertyKind::Nodes => Some("$nodes"),
            PropertyKind::Properties => Some("$properties"),
            PropertyKind::Datatype => Some("$datatype"),
            PropertyKind::Settable => Some("$settable"),
            PropertyKind::Format => Some("$format"),
            PropertyKind::Value => None,
            PropertyKind::Unrecognized(token) => Some(token.as_str()),
        }
    }
}
