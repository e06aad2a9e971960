//! # Pulse CLI
//!
//! Operator tool for the Pulse real-time client.
//!
//! This CLI provides commands for:
//! - Listening to live server events
//! - Emitting an event through the outbound queue
//! - Checking server health
//! - Inspecting the effective configuration

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

mod commands;
mod config;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use pulse_telemetry::logging::init_logging;
use pulse_telemetry::metrics::init_metrics;
use tracing::debug;

use commands::{config as config_cmd, emit, health, listen};
use config::PulseConfig;

/// Pulse - real-time sync client for the Pulse business platform
#[derive(Parser)]
#[command(name = "pulse")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Configuration file path
    #[arg(short, long, global = true, default_value = "pulse.yaml")]
    config: PathBuf,

    /// Subcommand to execute
    #[command(subcommand)]
    command: Commands,
}

/// Available CLI commands
#[derive(Subcommand)]
pub enum Commands {
    /// Connect and print inbound events as JSON lines
    Listen(listen::ListenArgs),

    /// Emit one event, queueing it until the connection is ready
    Emit(emit::EmitArgs),

    /// Probe the server health endpoint
    Health(health::HealthArgs),

    /// Validate and print the effective configuration
    Config(config_cmd::ConfigArgs),
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = PulseConfig::load(&cli.config)
        .with_context(|| format!("Failed to load configuration from {}", cli.config.display()))?;
    if cli.verbose {
        config.logging.level = "debug".to_string();
    }
    let _guards = init_logging(&config.logging).context("Failed to initialize logging")?;
    init_metrics(&config.metrics).context("Failed to initialize metrics")?;
    debug!(path = %cli.config.display(), origin = %config.realtime.origin, "Configuration loaded");

    match cli.command {
        Commands::Listen(args) => listen::run(args, &config.realtime).await?,
        Commands::Emit(args) => emit::run(args, &config.realtime).await?,
        Commands::Health(args) => health::run(args, &config.realtime).await?,
        Commands::Config(args) => config_cmd::run(&args, &config)?,
    }

    Ok(())
}
