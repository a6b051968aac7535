//! Typed property values and properties.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::TypeError;
use crate::identity::NodeId;
use crate::path::{Path, Segment};

/// The kind of a [`PropertyValue`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PropertyType {
    String,
    Long,
    Double,
    Boolean,
    Uuid,
    Reference,
    Path,
    Name,
    Binary,
}

impl fmt::Display for PropertyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::String => "string",
            Self::Long => "long",
            Self::Double => "double",
            Self::Boolean => "boolean",
            Self::Uuid => "uuid",
            Self::Reference => "reference",
            Self::Path => "path",
            Self::Name => "name",
            Self::Binary => "binary",
        };
        f.write_str(s)
    }
}

/// A single typed scalar value.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum PropertyValue {
    String(String),
    Long(i64),
    Double(f64),
    Boolean(bool),
    Uuid(Uuid),
    /// A reference to another node in the same workspace.
    Reference(NodeId),
    Path(Path),
    Name(String),
    Binary(Vec<u8>),
}

impl PropertyValue {
    pub fn property_type(&self) -> PropertyType {
        match self {
            Self::String(_) => PropertyType::String,
            Self::Long(_) => PropertyType::Long,
            Self::Double(_) => PropertyType::Double,
            Self::Boolean(_) => PropertyType::Boolean,
            Self::Uuid(_) => PropertyType::Uuid,
            Self::Reference(_) => PropertyType::Reference,
            Self::Path(_) => PropertyType::Path,
            Self::Name(_) => PropertyType::Name,
            Self::Binary(_) => PropertyType::Binary,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) | Self::Name(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_reference(&self) -> Option<NodeId> {
        match self {
            Self::Reference(id) => Some(*id),
            _ => None,
        }
    }
}

impl fmt::Display for PropertyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::String(s) | Self::Name(s) => f.write_str(s),
            Self::Long(v) => write!(f, "{v}"),
            Self::Double(v) => write!(f, "{v}"),
            Self::Boolean(v) => write!(f, "{v}"),
            Self::Uuid(v) => write!(f, "{v}"),
            Self::Reference(id) => write!(f, "{id}"),
            Self::Path(p) => write!(f, "{p}"),
            Self::Binary(bytes) => write!(f, "<{} bytes>", bytes.len()),
        }
    }
}

impl From<&str> for PropertyValue {
    fn from(s: &str) -> Self {
        Self::String(s.to_string())
    }
}

impl From<String> for PropertyValue {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

impl From<i64> for PropertyValue {
    fn from(v: i64) -> Self {
        Self::Long(v)
    }
}

impl From<i32> for PropertyValue {
    fn from(v: i32) -> Self {
        Self::Long(v.into())
    }
}

impl From<f64> for PropertyValue {
    fn from(v: f64) -> Self {
        Self::Double(v)
    }
}

impl From<bool> for PropertyValue {
    fn from(v: bool) -> Self {
        Self::Boolean(v)
    }
}

impl From<Uuid> for PropertyValue {
    fn from(v: Uuid) -> Self {
        Self::Uuid(v)
    }
}

impl From<NodeId> for PropertyValue {
    fn from(id: NodeId) -> Self {
        Self::Reference(id)
    }
}

impl From<Path> for PropertyValue {
    fn from(p: Path) -> Self {
        Self::Path(p)
    }
}

impl From<Vec<u8>> for PropertyValue {
    fn from(bytes: Vec<u8>) -> Self {
        Self::Binary(bytes)
    }
}

/// A named property holding one or more values.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Property {
    pub name: String,
    pub values: Vec<PropertyValue>,
}

impl Property {
    pub fn single(name: impl Into<String>, value: impl Into<PropertyValue>) -> Self {
        Self {
            name: name.into(),
            values: vec![value.into()],
        }
    }

    pub fn multiple<V: Into<PropertyValue>>(
        name: impl Into<String>,
        values: impl IntoIterator<Item = V>,
    ) -> Self {
        Self {
            name: name.into(),
            values: values.into_iter().map(Into::into).collect(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn values(&self) -> &[PropertyValue] {
        &self.values
    }

    pub fn first(&self) -> Option<&PropertyValue> {
        self.values.first()
    }

    pub fn is_single(&self) -> bool {
        self.values.len() == 1
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Rewrite reference values whose target appears in `mapping`.
    ///
    /// Returns the number of values rewritten.
    pub fn remap_references(&mut self, mapping: &HashMap<NodeId, NodeId>) -> usize {
        let mut rewritten = 0;
        for value in &mut self.values {
            if let PropertyValue::Reference(target) = value {
                if let Some(new_target) = mapping.get(target) {
                    *target = *new_target;
                    rewritten += 1;
                }
            }
        }
        rewritten
    }
}

/// Builds typed values from their textual form.
#[derive(Clone, Copy, Debug, Default)]
pub struct ValueFactory;

impl ValueFactory {
    pub fn new() -> Self {
        Self
    }

    /// Parse `input` as a value of type `ty`.
    pub fn create(&self, ty: PropertyType, input: &str) -> Result<PropertyValue, TypeError> {
        let invalid = || TypeError::InvalidValue {
            input: input.to_string(),
            expected: ty.to_string(),
        };
        let value = match ty {
            PropertyType::String => PropertyValue::String(input.to_string()),
            PropertyType::Long => PropertyValue::Long(input.trim().parse().map_err(|_| invalid())?),
            PropertyType::Double => {
                PropertyValue::Double(input.trim().parse().map_err(|_| invalid())?)
            }
            PropertyType::Boolean => match input.trim().to_ascii_lowercase().as_str() {
                "true" => PropertyValue::Boolean(true),
                "false" => PropertyValue::Boolean(false),
                _ => return Err(invalid()),
            },
            PropertyType::Uuid => {
                PropertyValue::Uuid(Uuid::parse_str(input.trim()).map_err(|_| invalid())?)
            }
            PropertyType::Reference => {
                PropertyValue::Reference(input.parse().map_err(|_| invalid())?)
            }
            PropertyType::Path => PropertyValue::Path(input.parse().map_err(|_| invalid())?),
            PropertyType::Name => {
                Segment::validate_name(input).map_err(|_| invalid())?;
                PropertyValue::Name(input.to_string())
            }
            PropertyType::Binary => PropertyValue::Binary(input.as_bytes().to_vec()),
        };
        Ok(value)
    }

    /// The identifier value reported for a node.
    pub fn identity(&self, id: NodeId) -> PropertyValue {
        PropertyValue::Uuid(*id.as_uuid())
    }
}
