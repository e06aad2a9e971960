//! `pulse health`: one-shot server health check.

use anyhow::Result;
use clap::Parser;
use pulse_realtime::RealtimeConfig;
use pulse_realtime::health::{HealthProbe, HttpHealthProbe};
use serde_json::json;
use tracing::debug;

/// Arguments for `pulse health`.
#[derive(Parser, Debug)]
pub struct HealthArgs {
    /// Exit non-zero when the server is unreachable
    #[arg(long)]
    pub strict: bool,
}

/// Probes the configured health endpoint and prints the result.
pub async fn run(args: HealthArgs, config: &RealtimeConfig) -> Result<()> {
    let probe = HttpHealthProbe::new(config)?;
    debug!(url = %probe.url(), "Probing server health");

    let result = probe.check().await;
    println!(
        "{}",
        json!({
            "url": probe.url().as_str(),
            "reachable": result.is_ok(),
            "error": result.as_ref().err().map(ToString::to_string),
        })
    );

    match result {
        Err(e) if args.strict => Err(e.into()),
        _ => Ok(()),
    }
}
