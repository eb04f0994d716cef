//! Core types for frame decoding and persistence.
//!
//! ## Architecture
//!
//! - [`FrameSchema`] describes the binary frame and derives its byte layout
//! - [`FieldDescriptor`] / [`FieldKind`] name each field and its wire encoding
//! - [`SampleRecord`] is one decoded frame with its capture timestamp
//! - [`ServerTarget`] identifies a server and its output directory
//!
//! ## Usage Example
//!
//! ```rust
//! use sensorwire::types::{FieldDescriptor, FrameSchema};
//!
//! let schema = FrameSchema::new(vec![
//!     FieldDescriptor::bool("ready"),
//!     FieldDescriptor::bool("fault"),
//!     FieldDescriptor::float("temp"),
//! ])
//! .unwrap();
//!
//! assert_eq!(schema.bool_region_len(), 1);
//! assert_eq!(schema.float_offset(), 4);
//! assert_eq!(schema.frame_len(), 9);
//! assert_eq!(schema.header(), ["timestamp", "ready", "fault", "temp"]);
//! ```

mod field;
mod record;
mod schema;
mod target;

pub use field::{FieldDescriptor, FieldKind};
pub use record::{RECORD_TIMESTAMP_FORMAT, SampleRecord, SampleValue};
pub use schema::{FrameSchema, TIMESTAMP_COLUMN};
pub use target::{ServerAddress, ServerTarget};
