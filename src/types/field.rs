//! Field descriptors for the wire frame

use serde::{Deserialize, Serialize};

/// Wire encoding of a single frame field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldKind {
    /// One bit in the packed boolean region
    Bool,
    /// Little-endian IEEE-754 single precision in the float region
    Float,
}

impl FieldKind {
    /// Parse the textual type used in schema files (`bool` / `float`).
    pub fn parse(text: &str) -> Option<Self> {
        match text.trim().to_ascii_lowercase().as_str() {
            "bool" => Some(FieldKind::Bool),
            "float" => Some(FieldKind::Float),
            _ => None,
        }
    }
}

/// One named field of the frame, in wire order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldDescriptor {
    /// Column name in the output files
    pub name: String,
    /// Wire encoding
    #[serde(rename = "type")]
    pub kind: FieldKind,
}

impl FieldDescriptor {
    pub fn new(name: impl Into<String>, kind: FieldKind) -> Self {
        Self { name: name.into(), kind }
    }

    pub fn bool(name: impl Into<String>) -> Self {
        Self::new(name, FieldKind::Bool)
    }

    pub fn float(name: impl Into<String>) -> Self {
        Self::new(name, FieldKind::Float)
    }
}
