//! Frame schema and derived byte layout

use std::collections::HashSet;

use super::{FieldDescriptor, FieldKind};
use crate::{IngestError, Result};

/// Name of the synthetic leading column in every record.
pub const TIMESTAMP_COLUMN: &str = "timestamp";

/// Immutable description of the binary frame sent by every server.
///
/// Layout of a frame with `b` boolean and `f` float fields:
///
/// ```text
/// [ ceil(b/8) bytes: bit-packed booleans, bit i%8 of byte i/8 = bool i ]
/// float region starts at ceil(b/32) * 4 (boolean bit count aligned to 32 bits)
/// [ f * 4 bytes: f32 little-endian, in float-field order ]
/// ```
///
/// The required frame length is `ceil(b/8) + ceil(b/32)*4 + f*4`. Because the
/// float region already starts past the boolean bytes, the last `ceil(b/8)`
/// bytes of a full-length frame are never read. For `ready, fault, temp` the
/// frame is 9 bytes: byte 0 holds the booleans, bytes 1..4 are padding,
/// `temp` is bytes 4..8 and byte 8 is an unread trailer. Peers must place
/// the first float at `ceil(b/32)*4`, not directly after the boolean bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameSchema {
    fields: Vec<FieldDescriptor>,
    bool_count: usize,
    float_count: usize,
}

impl FrameSchema {
    /// Create a schema with validation.
    pub fn new(fields: Vec<FieldDescriptor>) -> Result<Self> {
        if fields.is_empty() {
            return Err(IngestError::schema("schema defines no fields"));
        }

        let mut seen = HashSet::new();
        for field in &fields {
            let name = field.name.trim();
            if name.is_empty() {
                return Err(IngestError::schema("field with empty name"));
            }
            if name == TIMESTAMP_COLUMN {
                return Err(IngestError::schema(format!(
                    "field name '{}' is reserved for the timestamp column",
                    TIMESTAMP_COLUMN
                )));
            }
            if !seen.insert(name) {
                return Err(IngestError::schema(format!("duplicate field name '{}'", name)));
            }
        }

        let bool_count = fields.iter().filter(|f| f.kind == FieldKind::Bool).count();
        let float_count = fields.len() - bool_count;

        Ok(Self { fields, bool_count, float_count })
    }

    /// Fields in wire order.
    pub fn fields(&self) -> &[FieldDescriptor] {
        &self.fields
    }

    pub fn bool_count(&self) -> usize {
        self.bool_count
    }

    pub fn float_count(&self) -> usize {
        self.float_count
    }

    /// Bytes occupied by the bit-packed boolean region.
    pub fn bool_region_len(&self) -> usize {
        self.bool_count.div_ceil(8)
    }

    /// Byte offset of the first float: boolean bits rounded up to 32.
    pub fn float_offset(&self) -> usize {
        self.bool_count.div_ceil(32) * 4
    }

    /// Minimum number of bytes a frame must carry to be decoded.
    pub fn frame_len(&self) -> usize {
        self.bool_region_len() + self.float_offset() + self.float_count * 4
    }

    /// Output header: the timestamp column followed by field names in schema order.
    pub fn header(&self) -> Vec<String> {
        std::iter::once(TIMESTAMP_COLUMN.to_string())
            .chain(self.fields.iter().map(|f| f.name.clone()))
            .collect()
    }
}
