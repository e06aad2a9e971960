//! `pulse emit`: send one event and wait for it to leave the queue.

use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::Parser;
use pulse_realtime::{EmitOutcome, RealtimeConfig};
use serde_json::{Value, json};
use tracing::{info, warn};

use super::SessionArgs;

/// Arguments for `pulse emit`.
#[derive(Parser, Debug)]
pub struct EmitArgs {
    /// Session identity
    #[command(flatten)]
    pub session: SessionArgs,

    /// Event name
    pub event: String,

    /// JSON payload
    #[arg(default_value = "{}")]
    pub payload: String,

    /// Seconds to wait for a queued event to be delivered
    #[arg(long, default_value = "10")]
    pub wait: u64,
}

/// Parses the payload argument.
fn parse_payload(raw: &str) -> Result<Value> {
    serde_json::from_str(raw).with_context(|| format!("Payload is not valid JSON: {raw}"))
}

/// Connects, emits the event and waits for the outbound queue to drain.
pub async fn run(args: EmitArgs, config: &RealtimeConfig) -> Result<()> {
    let payload = parse_payload(&args.payload)?;
    let client = super::client(config)?;
    client.connect(args.session.credentials()).await;

    let mut outcome = client.emit(&args.event, payload).await;
    info!(event = %args.event, outcome = ?outcome, "Event emitted");

    if outcome == EmitOutcome::Queued {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(args.wait);
        while !client.queued_frames().is_empty() {
            if tokio::time::Instant::now() >= deadline {
                break;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
            client.flush().await;
        }
        if client.queued_frames().is_empty() && client.queue_stats().total_expired == 0 {
            outcome = EmitOutcome::Sent;
        }
    }

    let stats = client.queue_stats();
    println!(
        "{}",
        json!({
            "event": args.event,
            "outcome": outcome,
            "state": client.status().state,
            "expired": stats.total_expired,
        })
    );
    client.disconnect().await;

    if outcome == EmitOutcome::Queued {
        warn!(event = %args.event, "Event was not delivered before the deadline");
        bail!("event `{}` was not delivered within {}s", args.event, args.wait);
    }
    Ok(())
}
