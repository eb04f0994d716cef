//! Decoded sample records

use chrono::{DateTime, Local};

/// Timestamp format of the leading record column (millisecond precision).
pub const RECORD_TIMESTAMP_FORMAT: &str = "%Y-%m-%d_%H:%M:%S%.3f";

/// A single decoded field value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SampleValue {
    Bool(bool),
    /// Already rounded to two decimals
    Float(f64),
}

impl SampleValue {
    /// Text written to the output column: booleans as `0`/`1`, floats always
    /// with a decimal point (`1.0`, never `1` or `-0`).
    pub fn to_field(&self) -> String {
        match self {
            SampleValue::Bool(b) => u8::from(*b).to_string(),
            SampleValue::Float(v) if *v == 0.0 => "0.0".to_string(),
            SampleValue::Float(v) => format!("{:?}", v),
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            SampleValue::Bool(b) => Some(*b),
            SampleValue::Float(_) => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            SampleValue::Float(v) => Some(*v),
            SampleValue::Bool(_) => None,
        }
    }
}

/// One decoded frame: capture time plus values in schema order.
#[derive(Debug, Clone, PartialEq)]
pub struct SampleRecord {
    /// Wall-clock time the frame was decoded (not transmitted on the wire)
    pub timestamp: DateTime<Local>,
    pub values: Vec<SampleValue>,
}

impl SampleRecord {
    pub fn new(timestamp: DateTime<Local>, values: Vec<SampleValue>) -> Self {
        Self { timestamp, values }
    }

    /// `YYYY-MM-DD_HH:MM:SS.mmm` in local time.
    pub fn timestamp_string(&self) -> String {
        self.timestamp.format(RECORD_TIMESTAMP_FORMAT).to_string()
    }

    /// Output row: timestamp first, then each value.
    pub fn to_row(&self) -> Vec<String> {
        std::iter::once(self.timestamp_string())
            .chain(self.values.iter().map(SampleValue::to_field))
            .collect()
    }
}
