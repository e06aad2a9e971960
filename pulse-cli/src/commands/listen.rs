//! `pulse listen`: stream inbound events to stdout.

use std::str::FromStr;

use anyhow::{Context, Result, bail};
use clap::Parser;
use pulse_realtime::{
    EntityId, EntityRef, EventHandler, InboundEvent, InvalidationRules, RealtimeConfig,
};
use pulse_realtime::transport::events;
use serde_json::json;
use tracing::info;

use super::SessionArgs;

/// Arguments for `pulse listen`.
#[derive(Parser, Debug)]
pub struct ListenArgs {
    /// Session identity
    #[command(flatten)]
    pub session: SessionArgs,

    /// Record to subscribe to, as `type:id` (repeatable)
    #[arg(short, long = "entity")]
    pub entities: Vec<EntitySpec>,

    /// Event to print (repeatable). Defaults to every event with a cache rule
    #[arg(long = "event")]
    pub events: Vec<String>,
}

/// A `type:id` entity reference given on the command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntitySpec(pub EntityRef);

impl FromStr for EntitySpec {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let Some((entity_type, id)) = s.split_once(':') else {
            bail!("expected `type:id`, got `{s}`");
        };
        if entity_type.is_empty() || id.is_empty() {
            bail!("expected `type:id`, got `{s}`");
        }
        let id = id
            .parse::<i64>()
            .map_or_else(|_| EntityId::from(id), EntityId::from);
        Ok(Self(EntityRef::new(entity_type, id)))
    }
}

/// Event names printed when none were requested.
fn default_events() -> Vec<String> {
    let mut names = InvalidationRules::standard().event_names();
    names.extend(
        [events::CONNECT, events::RECONNECT, events::DISCONNECT, events::ERROR]
            .iter()
            .map(ToString::to_string),
    );
    names
}

fn print_event(event: &InboundEvent) {
    let line = json!({
        "event": event.name,
        "data": event.data,
        "receivedAt": event.received_at,
    });
    println!("{line}");
}

/// Connects, subscribes and prints events until Ctrl+C.
pub async fn run(args: ListenArgs, config: &RealtimeConfig) -> Result<()> {
    let client = super::client(config)?;

    let names = if args.events.is_empty() {
        default_events()
    } else {
        args.events.clone()
    };
    let printer = EventHandler::new(print_event);
    let subscriptions: Vec<_> = names
        .iter()
        .map(|name| client.subscribe(name, printer.clone()))
        .collect();

    info!(
        user_id = %args.session.user,
        org_id = %args.session.org,
        token = ?args.session.masked_token(),
        events = subscriptions.len(),
        "Listening"
    );
    client.connect(args.session.credentials()).await;

    for EntitySpec(entity) in &args.entities {
        client
            .subscribe_to_entity(&entity.entity_type, entity.entity_id.clone())
            .await;
    }

    let mut status = client.subscribe_status();
    loop {
        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                result.context("Failed to listen for Ctrl+C")?;
                break;
            }
            changed = status.changed() => {
                if changed.is_err() {
                    break;
                }
                let snapshot = status.borrow_and_update().clone();
                info!(
                    state = %snapshot.state,
                    server = ?snapshot.server,
                    attempt = snapshot.reconnect_attempt,
                    error = ?snapshot.last_error,
                    "Status changed"
                );
            }
        }
    }

    info!("Shutting down");
    for subscription in &subscriptions {
        subscription.unsubscribe();
    }
    client.logout().await;
    Ok(())
}
