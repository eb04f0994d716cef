//! Rotating CSV writer

use chrono::Local;
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::types::SampleRecord;
use crate::{IngestError, Result};

/// File name format for new output files (local time).
pub const FILE_TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H_%M_%S";

/// Lower bound on rows per file under [`RotationPolicy::Accumulate`].
pub const MIN_ROTATION_ROWS: usize = 100;

/// Upper bound on rows per file under [`RotationPolicy::Accumulate`].
pub const MAX_ROTATION_ROWS: usize = 10_000;

/// Rows written to one file before rotating, derived from the cache size.
pub fn rotation_rows(cache_size: usize) -> usize {
    cache_size.clamp(MIN_ROTATION_ROWS, MAX_ROTATION_ROWS)
}

/// When the sink starts a new output file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RotationPolicy {
    /// Keep appending until the file holds at least the rotation row count
    #[default]
    Accumulate,
    /// One file per flush
    EveryFlush,
}

struct OpenFile {
    path: PathBuf,
    writer: csv::Writer<File>,
    rows: usize,
}

/// Appends record batches to per-server CSV files.
///
/// Files live in `dir` and are named by their creation time. Each file starts
/// with the header row; a new file is created lazily on the first batch after
/// a rotation.
pub struct CsvSink {
    dir: PathBuf,
    header: Vec<String>,
    policy: RotationPolicy,
    rotation_rows: usize,
    current: Option<OpenFile>,
}

impl CsvSink {
    pub fn new(
        dir: impl Into<PathBuf>,
        header: Vec<String>,
        policy: RotationPolicy,
        rotation_rows: usize,
    ) -> Self {
        Self { dir: dir.into(), header, policy, rotation_rows: rotation_rows.max(1), current: None }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the file the next batch will be appended to, if one is open.
    pub fn current_path(&self) -> Option<&Path> {
        self.current.as_ref().map(|f| f.path.as_path())
    }

    /// Append `records` in order and return the file they were written to.
    ///
    /// On failure the current file is abandoned so the next batch starts a
    /// fresh file with its own header.
    pub fn write_batch(&mut self, records: &[SampleRecord]) -> Result<PathBuf> {
        let mut file = match self.current.take() {
            Some(file) => file,
            None => self.open_new()?,
        };

        for record in records {
            file.writer
                .write_record(record.to_row())
                .map_err(|e| IngestError::persistence(&file.path, e.into()))?;
        }
        file.writer.flush().map_err(|e| IngestError::persistence(&file.path, e))?;
        file.rows += records.len();

        let path = file.path.clone();
        if self.should_rotate(file.rows) {
            debug!(path = %path.display(), rows = file.rows, "Rotating output file");
        } else {
            self.current = Some(file);
        }
        Ok(path)
    }

    fn should_rotate(&self, rows: usize) -> bool {
        match self.policy {
            RotationPolicy::EveryFlush => true,
            RotationPolicy::Accumulate => rows >= self.rotation_rows,
        }
    }

    fn open_new(&self) -> Result<OpenFile> {
        fs::create_dir_all(&self.dir).map_err(|e| IngestError::persistence(&self.dir, e))?;

        let stem = Local::now().format(FILE_TIMESTAMP_FORMAT).to_string();
        let (path, handle) = create_unique(&self.dir, &stem)?;

        let mut writer = csv::Writer::from_writer(handle);
        writer.write_record(&self.header).map_err(|e| IngestError::persistence(&path, e.into()))?;

        info!(path = %path.display(), "Created output file");
        Ok(OpenFile { path, writer, rows: 0 })
    }
}

/// Create `<stem>.csv`, or `<stem> (n).csv` when that name is taken.
fn create_unique(dir: &Path, stem: &str) -> Result<(PathBuf, File)> {
    let mut attempt = 0u32;
    loop {
        let name = match attempt {
            0 => format!("{}.csv", stem),
            n => format!("{} ({}).csv", stem, n),
        };
        let path = dir.join(name);
        match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(handle) => return Ok((path, handle)),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => attempt += 1,
            Err(e) => return Err(IngestError::persistence(path, e)),
        }
    }
}
