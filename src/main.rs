//! CLI entry point for sensorwire
//!
//! # Usage
//!
//! Single configuration file:
//! ```bash
//! sensorwire --config sensorwire.yaml
//! ```
//!
//! Schema CSV plus server list:
//! ```bash
//! sensorwire --schema config.csv --servers servers.json --output-dir data
//! ```

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::info;

use sensorwire::{IngestConfig, Supervisor, logging};

#[derive(Parser, Debug)]
#[command(name = "sensorwire")]
#[command(about = "Poll TCP telemetry servers and record their frames to CSV", long_about = None)]
struct Cli {
    /// YAML or JSON configuration file
    #[arg(long, conflicts_with_all = ["schema", "servers"], required_unless_present = "schema")]
    config: Option<PathBuf>,

    /// Schema CSV with `name` and `type` columns
    #[arg(long, requires = "servers")]
    schema: Option<PathBuf>,

    /// Server list (JSON or YAML)
    #[arg(long, requires = "schema")]
    servers: Option<PathBuf>,

    /// Root directory for output files
    #[arg(long)]
    output_dir: Option<PathBuf>,

    /// Log filter directive, e.g. `debug` or `sensorwire=trace`
    #[arg(long)]
    log_level: Option<String>,

    /// Append logs to this file instead of stderr
    #[arg(long)]
    log_file: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> ExitCode {
    match run(Cli::parse()).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("sensorwire: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config = load_config(&cli)?;
    logging::init(&config.log).context("Failed to initialise logging")?;

    info!(servers = config.servers.len(), "Starting sensorwire");
    let mut handle = Supervisor::spawn(&config);
    let cancel = handle.cancel_token();

    tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            signal.context("Failed to listen for Ctrl-C")?;
            info!("Interrupt received, flushing and stopping sessions");
            cancel.cancel();
        }
        _ = handle.wait() => {}
    }

    handle.wait().await;
    Ok(())
}

fn load_config(cli: &Cli) -> Result<IngestConfig> {
    let mut config = match (&cli.config, &cli.schema, &cli.servers) {
        (Some(path), _, _) => IngestConfig::load(path)
            .with_context(|| format!("Failed to load configuration from {}", path.display()))?,
        (None, Some(schema), Some(servers)) => IngestConfig::load_legacy(schema, servers)
            .context("Failed to load schema and server list")?,
        _ => anyhow::bail!("either --config or both --schema and --servers are required"),
    };

    if let Some(dir) = &cli.output_dir {
        config.output_dir = dir.clone();
    }
    if let Some(level) = &cli.log_level {
        config.log.level = level.clone();
    }
    if let Some(file) = &cli.log_file {
        config.log.file = Some(file.clone());
    }

    config.validate().context("Invalid configuration")?;
    Ok(config)
}
