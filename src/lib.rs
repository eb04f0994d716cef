//! TCP telemetry ingestion into rotating CSV files.
//!
//! Sensorwire keeps one long-running session per configured server. Each
//! session polls its server with a one-byte heartbeat, decodes the binary
//! frame that comes back, buffers the decoded records and appends them in
//! batches to timestamped CSV files under `<output_dir>/<server>/`.
//!
//! # Features
//!
//! - **Schema-driven decoding**: bit-packed booleans followed by 32-bit
//!   aligned little-endian floats, rounded to two decimals
//! - **Resilient sessions**: reconnect with backoff, buffered records survive
//! - **Rotating output**: one header per file, files named by creation time
//! - **Isolation**: servers never share tasks, buffers or files
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use sensorwire::{IngestConfig, Supervisor};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = IngestConfig::load("sensorwire.yaml")?;
//!     let mut handle = Supervisor::spawn(&config);
//!
//!     tokio::signal::ctrl_c().await?;
//!     handle.shutdown();
//!     handle.wait().await;
//!     Ok(())
//! }
//! ```

// Core types and error handling
mod error;
#[cfg_attr(any(test, feature = "benchmark"), path = "test_utils.rs")]
#[cfg(any(test, feature = "benchmark"))]
pub mod test_utils;
pub mod types;

// Wire and persistence
pub mod connection;
pub mod decoder;
pub mod storage;

// Runtime
pub mod config;
pub mod logging;
pub mod session;
pub mod supervisor;

// Core exports
pub use error::*;
pub use types::*;

pub use config::IngestConfig;
pub use decoder::decode;
pub use logging::LogConfig;
pub use session::{Session, SessionSettings, SessionState, SessionStats, SessionStatus};
pub use storage::{CsvSink, RecordBuffer, RotationPolicy};
pub use supervisor::{Supervisor, SupervisorHandle};
