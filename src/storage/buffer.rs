//! In-memory record buffer

use crate::types::SampleRecord;

/// Ordered records awaiting persistence, bounded by the cache size.
///
/// The buffer never holds `capacity` records: the push that reaches the
/// threshold takes the whole batch out and leaves an empty buffer behind.
#[derive(Debug)]
pub struct RecordBuffer {
    records: Vec<SampleRecord>,
    capacity: usize,
}

impl RecordBuffer {
    /// Create a buffer flushing every `capacity` records (at least one).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self { records: Vec::with_capacity(capacity), capacity }
    }

    /// Append a record; returns the full batch once the threshold is reached.
    pub fn push(&mut self, record: SampleRecord) -> Option<Vec<SampleRecord>> {
        self.records.push(record);
        if self.records.len() >= self.capacity { Some(self.take()) } else { None }
    }

    /// Take every buffered record, replacing them with an empty buffer.
    pub fn take(&mut self) -> Vec<SampleRecord> {
        std::mem::replace(&mut self.records, Vec::with_capacity(self.capacity))
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
