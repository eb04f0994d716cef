//! Error types for the ingestion pipeline.
//!
//! Every fallible operation in sensorwire returns [`IngestError`]. The variants
//! follow the way failures are handled at runtime:
//!
//! - **Configuration / schema errors** are fatal and stop the process before
//!   any connection is attempted.
//! - **Connection, timeout and I/O errors** are recoverable: the session logs
//!   them, backs off and reconnects.
//! - **Decode errors** mark a single malformed frame; the frame is skipped.
//! - **Persistence errors** lose one flush interval but never stop ingestion.
//!
//! ## Recovery and Retry
//!
//! ```rust
//! use sensorwire::IngestError;
//!
//! let error = IngestError::connection_failed("connection refused");
//! if error.is_retryable() {
//!     for suggestion in error.recovery_suggestions() {
//!         println!("  - {}", suggestion);
//!     }
//! }
//! ```

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Result type alias for ingestion operations.
pub type Result<T, E = IngestError> = std::result::Result<T, E>;

/// Main error type for ingestion operations.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum IngestError {
    #[error("Configuration error in {context}: {details}")]
    Config { context: String, details: String },

    #[error("Schema validation failed: {reason}")]
    Schema { reason: String },

    #[error("Failed to connect to {address}: {reason}")]
    Connection {
        address: String,
        reason: String,
        #[source]
        source: Option<std::io::Error>,
    },

    #[error("{operation} timed out after {duration:?}")]
    Timeout { operation: &'static str, duration: Duration },

    #[error("Peer closed the connection")]
    ConnectionClosed,

    #[error("I/O error during {context}")]
    Io {
        context: &'static str,
        #[source]
        source: std::io::Error,
    },

    #[error("Frame too short: expected at least {expected} bytes, got {actual}")]
    Decode { expected: usize, actual: usize },

    #[error("Failed to persist records to {path}")]
    Persistence {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl IngestError {
    /// Returns whether the session should discard its connection and reconnect.
    pub fn is_retryable(&self) -> bool {
        match self {
            IngestError::Connection { .. } => true,
            IngestError::Timeout { .. } => true,
            IngestError::ConnectionClosed => true,
            IngestError::Io { .. } => true,
            IngestError::Decode { .. } => false,
            IngestError::Persistence { .. } => false,
            IngestError::Config { .. } => false,
            IngestError::Schema { .. } => false,
        }
    }

    /// Returns whether the error aborts startup.
    pub fn is_fatal(&self) -> bool {
        matches!(self, IngestError::Config { .. } | IngestError::Schema { .. })
    }

    /// Returns suggested recovery actions for this error.
    pub fn recovery_suggestions(&self) -> Vec<&'static str> {
        match self {
            IngestError::Config { .. } => vec![
                "Check the configuration file path and syntax",
                "Verify every server has a name and an address",
            ],
            IngestError::Schema { .. } => vec![
                "Check that every field has a unique, non-empty name",
                "Use only `bool` or `float` as field types",
            ],
            IngestError::Connection { .. } => vec![
                "Ensure the telemetry server is running",
                "Check the configured host and port",
                "Verify firewall rules between client and server",
            ],
            IngestError::Timeout { .. } => vec![
                "Check that the server emits frames faster than the I/O timeout",
                "Increase the configured I/O timeout",
            ],
            IngestError::ConnectionClosed => vec![
                "Check the server logs for restarts",
                "Set `empty_read: ignore` if the server half-closes on purpose",
            ],
            IngestError::Io { .. } => vec![
                "Check network stability",
                "Verify the server is still reachable",
            ],
            IngestError::Decode { .. } => vec![
                "Verify the field schema matches the server's frame layout",
                "Check the server sends one complete frame per message",
            ],
            IngestError::Persistence { .. } => vec![
                "Ensure sufficient disk space",
                "Check write permissions on the output directory",
            ],
        }
    }

    /// Helper constructor for configuration errors.
    pub fn config(context: impl Into<String>, details: impl Into<String>) -> Self {
        IngestError::Config { context: context.into(), details: details.into() }
    }

    /// Helper constructor for schema errors.
    pub fn schema(reason: impl Into<String>) -> Self {
        IngestError::Schema { reason: reason.into() }
    }

    /// Helper constructor for connection errors without an underlying I/O error.
    pub fn connection_failed(reason: impl Into<String>) -> Self {
        IngestError::Connection { address: "<unknown>".to_string(), reason: reason.into(), source: None }
    }

    /// Helper constructor for connection errors with an I/O source.
    pub fn connect_error(address: impl Into<String>, source: std::io::Error) -> Self {
        IngestError::Connection { address: address.into(), reason: source.to_string(), source: Some(source) }
    }

    /// Helper constructor for I/O errors in a named context.
    pub fn io(context: &'static str, source: std::io::Error) -> Self {
        IngestError::Io { context, source }
    }

    /// Helper constructor for persistence errors with path context.
    pub fn persistence(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        IngestError::Persistence { path: path.into(), source }
    }
}
