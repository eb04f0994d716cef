//! Configuration loading and validation
//!
//! The primary format is a single YAML document (JSON is accepted too):
//!
//! ```yaml
//! output_dir: data
//! log: { level: info }
//! session: { cache_size: 20, io_timeout: 10s }
//! servers:
//!   - { name: plc-a, address: "10.0.0.5:9000" }
//!   - { name: plc-b, address: ["10.0.0.6", 9000] }
//! fields:
//!   - { name: ready, type: bool }
//!   - { name: temp, type: float }
//! ```
//!
//! The older two-file layout is also supported: a schema CSV with `name` and
//! `type` columns, plus a server list (JSON or YAML).
//!
//! Everything is validated once; the resulting [`IngestConfig`] is immutable.

use serde::Deserialize;
use std::collections::HashSet;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::logging::LogConfig;
use crate::session::SessionSettings;
use crate::types::{FieldDescriptor, FieldKind, FrameSchema, ServerTarget};
use crate::{IngestError, Result};

/// Default root directory for output files.
pub const DEFAULT_OUTPUT_DIR: &str = "data";

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ConfigFile {
    servers: Vec<ServerTarget>,
    fields: Vec<FieldDescriptor>,
    #[serde(default = "default_output_dir")]
    output_dir: PathBuf,
    #[serde(default)]
    log: LogConfig,
    #[serde(default)]
    session: SessionSettings,
}

fn default_output_dir() -> PathBuf {
    PathBuf::from(DEFAULT_OUTPUT_DIR)
}

/// Validated, immutable process configuration.
#[derive(Debug, Clone)]
pub struct IngestConfig {
    pub servers: Vec<ServerTarget>,
    pub schema: Arc<FrameSchema>,
    pub output_dir: PathBuf,
    pub log: LogConfig,
    pub session: SessionSettings,
}

impl IngestConfig {
    /// Build and validate a configuration from parts.
    pub fn new(
        servers: Vec<ServerTarget>,
        schema: FrameSchema,
        output_dir: impl Into<PathBuf>,
        log: LogConfig,
        session: SessionSettings,
    ) -> Result<Self> {
        let config =
            Self { servers, schema: Arc::new(schema), output_dir: output_dir.into(), log, session };
        config.validate()?;
        Ok(config)
    }

    /// Load a YAML (or JSON) configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = read_file(path)?;
        Self::from_yaml_str(&text)
            .map_err(|e| IngestError::config(path.display().to_string(), e.to_string()))
    }

    /// Parse a YAML (or JSON) configuration document.
    pub fn from_yaml_str(text: &str) -> Result<Self> {
        let file: ConfigFile = serde_yaml_ng::from_str(text)
            .map_err(|e| IngestError::config("configuration", e.to_string()))?;
        let schema = FrameSchema::new(file.fields)?;
        Self::new(file.servers, schema, file.output_dir, file.log, file.session)
    }

    /// Load the two-file layout: schema CSV plus server list.
    pub fn load_legacy(schema_csv: impl AsRef<Path>, servers: impl AsRef<Path>) -> Result<Self> {
        let schema_path = schema_csv.as_ref();
        let file = std::fs::File::open(schema_path).map_err(|e| {
            IngestError::config(schema_path.display().to_string(), e.to_string())
        })?;
        let schema = schema_from_csv(file)?;

        let servers_path = servers.as_ref();
        let servers = servers_from_str(&read_file(servers_path)?).map_err(|e| {
            IngestError::config(servers_path.display().to_string(), e.to_string())
        })?;

        Self::new(
            servers,
            schema,
            DEFAULT_OUTPUT_DIR,
            LogConfig::default(),
            SessionSettings::default(),
        )
    }

    /// Check cross-field constraints.
    pub fn validate(&self) -> Result<()> {
        if self.servers.is_empty() {
            return Err(IngestError::config("servers", "at least one server is required"));
        }

        let mut names = HashSet::new();
        for server in &self.servers {
            let name = server.name.trim();
            if name.is_empty() {
                return Err(IngestError::config("servers", "server with empty name"));
            }
            if name.contains(['/', '\\']) || name == "." || name == ".." {
                return Err(IngestError::config(
                    "servers",
                    format!("server name '{}' is not a valid directory name", name),
                ));
            }
            if !names.insert(name) {
                return Err(IngestError::config(
                    "servers",
                    format!("duplicate server name '{}'", name),
                ));
            }
        }

        if self.session.cache_size == 0 {
            return Err(IngestError::config("session.cache_size", "must be at least 1"));
        }

        let frame_len = self.schema.frame_len();
        if self.session.read_chunk_size < frame_len {
            return Err(IngestError::config(
                "session.read_chunk_size",
                format!(
                    "{} bytes cannot hold one {}-byte frame",
                    self.session.read_chunk_size, frame_len
                ),
            ));
        }

        Ok(())
    }
}

/// Parse a schema CSV with `name` and `type` columns (extra columns ignored).
pub fn schema_from_csv<R: Read>(reader: R) -> Result<FrameSchema> {
    let mut reader = csv::ReaderBuilder::new().trim(csv::Trim::All).from_reader(reader);

    let headers = reader.headers().map_err(|e| IngestError::config("schema", e.to_string()))?;
    let column = |wanted: &str| {
        headers
            .iter()
            .position(|h| h.eq_ignore_ascii_case(wanted))
            .ok_or_else(|| IngestError::config("schema", format!("missing '{}' column", wanted)))
    };
    let name_col = column("name")?;
    let type_col = column("type")?;

    let mut fields = Vec::new();
    for (line, row) in reader.records().enumerate() {
        let row = row.map_err(|e| IngestError::config("schema", e.to_string()))?;
        let name = row.get(name_col).unwrap_or_default();
        let kind_text = row.get(type_col).unwrap_or_default();
        let kind = FieldKind::parse(kind_text).ok_or_else(|| {
            IngestError::schema(format!(
                "row {}: unknown type '{}' for field '{}'",
                line + 2,
                kind_text,
                name
            ))
        })?;
        fields.push(FieldDescriptor::new(name, kind));
    }

    FrameSchema::new(fields)
}

/// Parse a server list: a JSON or YAML sequence of `{name, address}`.
pub fn servers_from_str(text: &str) -> Result<Vec<ServerTarget>> {
    serde_yaml_ng::from_str(text).map_err(|e| IngestError::config("servers", e.to_string()))
}

fn read_file(path: &Path) -> Result<String> {
    std::fs::read_to_string(path)
        .map_err(|e| IngestError::config(path.display().to_string(), e.to_string()))
}
