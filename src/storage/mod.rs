//! Buffered, rotating persistence of decoded records
//!
//! [`RecordBuffer`] accumulates records for one server and hands over a full
//! batch as soon as the cache size is reached. [`CsvSink`] appends batches to
//! the server's current CSV file and rotates files per [`RotationPolicy`].

mod buffer;
mod writer;

pub use buffer::RecordBuffer;
pub use writer::{
    CsvSink, FILE_TIMESTAMP_FORMAT, MAX_ROTATION_ROWS, MIN_ROTATION_ROWS, RotationPolicy,
    rotation_rows,
};
