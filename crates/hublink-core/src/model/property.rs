// ── Property domain types ──

use serde::{Deserialize, Serialize};
use std::fmt;
use strum::{Display, EnumString};

use super::entity_id::{ChannelId, DeviceId, PropertyId};

/// Entity a property hangs off.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", content = "id", rename_all = "snake_case")]
pub enum PropertyOwner {
    Device(DeviceId),
    Channel(ChannelId),
}

/// Property variant.
///
/// Only `Dynamic` properties carry live state of their own. `Mapped`
/// properties derive from a parent and share its write intent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PropertyKind {
    Dynamic,
    Variable,
    Mapped { parent: PropertyId },
}

/// Kind filter without the mapped parent payload, for repository queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum PropertyKindTag {
    Dynamic,
    Variable,
    Mapped,
}

impl PropertyKind {
    pub fn tag(&self) -> PropertyKindTag {
        match self {
            Self::Dynamic => PropertyKindTag::Dynamic,
            Self::Variable => PropertyKindTag::Variable,
            Self::Mapped { .. } => PropertyKindTag::Mapped,
        }
    }
}

/// Value type a property carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, Serialize, Deserialize)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum DataType {
    Boolean,
    Integer,
    Float,
    String,
    Enum,
    Unknown,
}

/// A property value as exchanged with devices and stored in state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PropertyValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl fmt::Display for PropertyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(b) => write!(f, "{b}"),
            Self::Int(i) => write!(f, "{i}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::Text(s) => write!(f, "{s}"),
        }
    }
}

impl From<bool> for PropertyValue {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<i64> for PropertyValue {
    fn from(i: i64) -> Self {
        Self::Int(i)
    }
}

impl From<f64> for PropertyValue {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<&str> for PropertyValue {
    fn from(s: &str) -> Self {
        Self::Text(s.to_owned())
    }
}

impl From<String> for PropertyValue {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

/// Descriptor of a device or channel property.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Property {
    pub id: PropertyId,
    pub owner: PropertyOwner,
    pub identifier: String,
    pub kind: PropertyKind,
    pub data_type: DataType,
    #[serde(default)]
    pub settable: bool,
    #[serde(default)]
    pub queryable: bool,
    /// Stored value of a `Variable` property.
    #[serde(default)]
    pub value: Option<PropertyValue>,
}

impl Property {
    pub fn is_dynamic(&self) -> bool {
        matches!(self.kind, PropertyKind::Dynamic)
    }

    pub fn is_variable(&self) -> bool {
        matches!(self.kind, PropertyKind::Variable)
    }

    /// Parent property of a `Mapped` property.
    pub fn parent(&self) -> Option<PropertyId> {
        match self.kind {
            PropertyKind::Mapped { parent } => Some(parent),
            PropertyKind::Dynamic | PropertyKind::Variable => None,
        }
    }
}
