//! # Pulse Realtime
//!
//! Client-side real-time synchronization for the Pulse business platform.
//!
//! - [`RealtimeClient`]: one authenticated push connection per session, with
//!   exponential-backoff reconnects and a status stream
//! - [`SubscriptionRegistry`]: event handlers and entity subscriptions that
//!   survive reconnects
//! - [`OutboundQueue`]: bounded, TTL-limited buffer replayed in order once
//!   the connection is back
//! - [`CacheInvalidationBridge`]: turns server events into query-cache
//!   invalidations
//! - Health probing and user-facing transition notifications

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::module_name_repetitions)]

/// Connection manager
pub mod client;

/// Client configuration
pub mod config;

/// Server health probing
pub mod health;

/// Event-to-cache invalidation
pub mod invalidation;

/// Transition notifications
pub mod notify;

/// Outbound event queue
pub mod queue;

/// Handler and entity subscription registry
pub mod registry;

/// Connection state types
pub mod state;

/// Status broadcasting
pub mod status;

/// Transports and wire format
pub mod transport;

/// In-memory collaborators for tests
#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use client::{
    ConnectionInfo, Credentials, EmitOutcome, FlushReport, RealtimeClient, RealtimeClientBuilder,
};
pub use config::RealtimeConfig;
pub use invalidation::{CacheInvalidationBridge, InvalidationRules, QueryCache};
pub use queue::OutboundQueue;
pub use registry::{
    EntityId, EntityRef, EventHandler, InboundEvent, Subscription, SubscriptionRegistry,
};
pub use state::{ConnectionState, ConnectionStatus, ServerReachability};

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::client::{Credentials, EmitOutcome, RealtimeClient};
    pub use crate::config::RealtimeConfig;
    pub use crate::health::{HealthProbe, HttpHealthProbe};
    pub use crate::invalidation::{CacheInvalidationBridge, InvalidationRules, QueryCache};
    pub use crate::notify::{Notification, Notifier, Severity};
    pub use crate::registry::{EntityId, EventHandler, InboundEvent, Subscription};
    pub use crate::state::{ConnectionState, ConnectionStatus, ServerReachability};
    pub use crate::transport::{Connector, Frame, Transport, events};
}
