//! # JarvisCore Gateway Binary
//!
//! ```text
//! jarvis-gateway [gateway|auth|all]
//! ```
//!
//! Configuration comes from `JC_*` environment variables. Runs until Ctrl+C.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use jc_runtime::{Mode, Runtime};
use jc_telemetry::{init_telemetry, TelemetryConfig};
use tracing::info;

/// JarvisCore helper services
#[derive(Parser, Debug)]
#[command(name = "jarvis-gateway")]
#[command(about = "WebSocket event gateway and API-key auth service for JarvisCore")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone, Copy)]
enum Command {
    /// Event gateway only (/ws, /api/events, bridge routes)
    Gateway,
    /// Auth service only (/api/auth/*)
    Auth,
    /// Both services in one process, sharing key and limiter state
    All,
}

impl From<Command> for Mode {
    fn from(command: Command) -> Self {
        match command {
            Command::Gateway => Mode::Gateway,
            Command::Auth => Mode::Auth,
            Command::All => Mode::All,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let mode = cli.command.map(Mode::from).unwrap_or(Mode::All);

    init_telemetry(&TelemetryConfig::from_env()).context("Failed to initialize telemetry")?;

    let mut runtime = Runtime::from_env(mode)?;
    runtime.start().await?;

    info!("Running. Press Ctrl+C to stop.");
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl+C")?;

    runtime.shutdown().await
}
