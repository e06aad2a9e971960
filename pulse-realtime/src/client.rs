//! The real-time connection manager.
//!
//! [`RealtimeClient`] owns at most one live transport. A per-session
//! supervisor task opens it, authenticates, replays queued events and entity
//! subscriptions, dispatches inbound frames through the registry and
//! reconnects with exponential backoff when the transport goes away.
//!
//! Background tasks hold the client's shared state; call
//! [`RealtimeClient::disconnect`] or [`RealtimeClient::logout`] to stop them.

#![allow(clippy::significant_drop_tightening)]

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use pulse_core::config::Validatable;
use pulse_core::error::{AuthError, PulseError};
use pulse_telemetry::masking::{Sensitive, SensitiveDataMasker};
use pulse_telemetry::metrics::PulseMetrics;
use pulse_telemetry::spans::{connection_span, flush_span, session_span};
use serde::Serialize;
use serde_json::{Value, json};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::{Notify, watch};
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval};
use tracing::{Instrument, debug, error, info, warn};

use crate::config::RealtimeConfig;
use crate::health::{HealthProbe, HttpHealthProbe};
use crate::notify::{Notifier, TracingNotifier, TransitionNotifier};
use crate::queue::{OutboundQueue, QueueStats};
use crate::registry::{
    EntityId, EntityRef, EventHandler, InboundEvent, Subscription, SubscriptionRegistry,
};
use crate::state::{ConnectionState, ConnectionStatus, ServerReachability};
use crate::status::StatusHandle;
use crate::transport::message::{
    AuthenticatePayload, AuthenticatedPayload, DisconnectPayload, EntityPayload,
    ReconnectAttemptPayload,
};
use crate::transport::{
    CloseCause, Connector, Frame, Transport, TransportEvent, TransportLink, WsConnector, events,
};

/// Upper bound on how often expired queue entries are swept while offline.
const PURGE_INTERVAL: Duration = Duration::from_secs(5);

/// Identity the session authenticates as.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    /// User identifier.
    pub user_id: String,
    /// Organisation identifier.
    pub org_id: String,
    /// Session token from the authentication provider.
    pub token: Option<Sensitive<String>>,
}

impl Credentials {
    /// Credentials without a token.
    #[must_use]
    pub fn new(user_id: impl Into<String>, org_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            org_id: org_id.into(),
            token: None,
        }
    }

    /// Attaches a session token.
    #[must_use]
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(Sensitive::new(token.into()));
        self
    }

    /// Returns true if both identify the same user.
    #[must_use]
    pub fn same_user(&self, other: &Self) -> bool {
        self.user_id == other.user_id
    }

    fn payload(&self) -> AuthenticatePayload {
        AuthenticatePayload {
            user_id: self.user_id.clone(),
            org_id: self.org_id.clone(),
            token: self.token.as_ref().map(|t| t.expose().clone()),
        }
    }
}

/// Snapshot of the current session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionInfo {
    /// Id of the live transport, if one is open.
    pub transport_id: Option<u64>,
    /// Whether a transport is open.
    pub connected: bool,
    /// Whether the server accepted the handshake.
    pub authenticated: bool,
    /// Identity of the session.
    pub credentials: Credentials,
    /// When the session was created.
    pub created_at: DateTime<Utc>,
}

/// What [`RealtimeClient::emit`] did with an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EmitOutcome {
    /// Written to the live transport.
    Sent,
    /// Buffered for replay on reconnect.
    Queued,
}

/// Result of one flush of the outbound queue.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FlushReport {
    /// Entries written to the transport.
    pub sent: usize,
    /// Entries dropped because they outlived the TTL.
    pub expired: usize,
    /// Entries still queued afterwards.
    pub remaining: usize,
}

struct Session {
    generation: u64,
    credentials: Credentials,
    created_at: DateTime<Utc>,
    transport: Option<Arc<dyn Transport>>,
    supervisor: Option<JoinHandle<()>>,
    health: Option<JoinHandle<()>>,
    wake: Arc<Notify>,
    auth_failures: u32,
}

impl Session {
    fn is_live(&self) -> bool {
        self.supervisor.as_ref().is_some_and(|h| !h.is_finished())
    }

    fn abort_tasks(&mut self) {
        if let Some(handle) = self.supervisor.take() {
            handle.abort();
        }
        if let Some(handle) = self.health.take() {
            handle.abort();
        }
    }
}

struct Inner {
    config: RealtimeConfig,
    connector: Arc<dyn Connector>,
    probe: Option<Arc<dyn HealthProbe>>,
    registry: SubscriptionRegistry,
    queue: OutboundQueue,
    status: StatusHandle,
    notifier: TransitionNotifier,
    session: Mutex<Option<Session>>,
    /// Serializes queue replay, entity subscription frames and the
    /// post-authentication resend.
    flush_lock: tokio::sync::Mutex<()>,
    next_generation: AtomicU64,
    masker: SensitiveDataMasker,
}

enum DriveEnd {
    /// Torn down on purpose; the supervisor exits.
    Stopped,
    /// Lost the transport; the supervisor reconnects.
    Lost {
        reason: String,
        server_initiated: bool,
        /// The server accepted the handshake on this link at least once.
        authenticated: bool,
    },
}

/// Builder for [`RealtimeClient`].
pub struct RealtimeClientBuilder {
    config: RealtimeConfig,
    connector: Option<Arc<dyn Connector>>,
    probe: Option<Arc<dyn HealthProbe>>,
    health_checks: bool,
    notifier: Option<Arc<dyn Notifier>>,
}

impl RealtimeClientBuilder {
    /// Uses `connector` instead of the WebSocket connector.
    #[must_use]
    pub fn connector(mut self, connector: Arc<dyn Connector>) -> Self {
        self.connector = Some(connector);
        self
    }

    /// Uses `probe` instead of the HTTP health probe.
    #[must_use]
    pub fn health_probe(mut self, probe: Arc<dyn HealthProbe>) -> Self {
        self.probe = Some(probe);
        self.health_checks = true;
        self
    }

    /// Disables periodic health checks.
    #[must_use]
    pub fn without_health_checks(mut self) -> Self {
        self.probe = None;
        self.health_checks = false;
        self
    }

    /// Sends transition notifications to `notifier` instead of the log.
    #[must_use]
    pub fn notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    /// Validates the configuration and builds the client.
    pub fn build(self) -> Result<RealtimeClient, PulseError> {
        self.config.validate()?;

        let connector: Arc<dyn Connector> = match self.connector {
            Some(connector) => connector,
            None => Arc::new(WsConnector::new(&self.config)),
        };
        let probe: Option<Arc<dyn HealthProbe>> = match (self.health_checks, self.probe) {
            (false, _) => None,
            (true, Some(probe)) => Some(probe),
            (true, None) => Some(Arc::new(HttpHealthProbe::new(&self.config)?)),
        };
        let notifier: Arc<dyn Notifier> = match self.notifier {
            Some(notifier) => notifier,
            None => Arc::new(TracingNotifier),
        };

        Ok(RealtimeClient {
            inner: Arc::new(Inner {
                queue: OutboundQueue::new(self.config.max_queue_size, self.config.queue_ttl()),
                config: self.config,
                connector,
                probe,
                registry: SubscriptionRegistry::new(),
                status: StatusHandle::new(),
                notifier: TransitionNotifier::new(notifier),
                session: Mutex::new(None),
                flush_lock: tokio::sync::Mutex::new(()),
                next_generation: AtomicU64::new(1),
                masker: SensitiveDataMasker::new(),
            }),
        })
    }
}

/// Real-time connection owner.
///
/// Create one at login and pass clones to whatever needs it; every clone
/// shares the same connection, registry and queue.
///
/// ```no_run
/// use pulse_realtime::{Credentials, RealtimeClient, RealtimeConfig};
///
/// # async fn run() -> Result<(), pulse_core::error::PulseError> {
/// let client = RealtimeClient::new(RealtimeConfig::default())?;
/// let _sub = client.on("lead:created", |event| println!("{}", event.data));
/// client.connect(Credentials::new("user-1", "org-1")).await;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct RealtimeClient {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for RealtimeClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RealtimeClient")
            .field("origin", &self.inner.config.origin)
            .field("state", &self.inner.status.state())
            .finish_non_exhaustive()
    }
}

impl RealtimeClient {
    /// Creates a client with the default connector, probe and notifier.
    pub fn new(config: RealtimeConfig) -> Result<Self, PulseError> {
        Self::builder(config).build()
    }

    /// Starts a builder.
    #[must_use]
    pub fn builder(config: RealtimeConfig) -> RealtimeClientBuilder {
        RealtimeClientBuilder {
            health_checks: config.health_check_enabled,
            config,
            connector: None,
            probe: None,
            notifier: None,
        }
    }

    /// Configuration in use.
    #[must_use]
    pub fn config(&self) -> &RealtimeConfig {
        &self.inner.config
    }

    /// Starts a session for `credentials`.
    ///
    /// A live session for the same user is reused (re-authenticating if the
    /// organisation changed); a session for another user is torn down first.
    /// Connection problems never surface here: they show up in the status
    /// and the supervisor keeps retrying.
    pub async fn connect(&self, credentials: Credentials) -> ConnectionInfo {
        enum Plan {
            Reuse { reauth: bool, wake: Option<Arc<Notify>> },
            Replace { previous: Option<Session>, status: ConnectionStatus },
        }

        let plan = {
            let mut guard = self.inner.session.lock();
            match guard.as_mut() {
                Some(session)
                    if session.is_live() && session.credentials.same_user(&credentials) =>
                {
                    let reauth = session.credentials != credentials;
                    session.credentials = credentials.clone();
                    let wake = (self.inner.status.state() == ConnectionState::Failed)
                        .then(|| Arc::clone(&session.wake));
                    Plan::Reuse { reauth, wake }
                }
                _ => {
                    let mut previous = guard.take();
                    if let Some(old) = previous.as_mut() {
                        old.abort_tasks();
                        if !old.credentials.same_user(&credentials) {
                            self.inner.queue.clear();
                        }
                    }
                    let (session, status) = self.start_session(credentials.clone());
                    *guard = Some(session);
                    Plan::Replace { previous, status }
                }
            }
        };

        match plan {
            Plan::Reuse { reauth, wake } => {
                debug!(user_id = %credentials.user_id, "Session already active, reusing it");
                if let Some(wake) = wake {
                    wake.notify_one();
                }
                if reauth {
                    self.authenticate(&credentials.user_id, &credentials.org_id)
                        .await;
                }
            }
            Plan::Replace { previous, status } => {
                self.inner.notifier.observe(&status);
                if let Some(transport) = previous.and_then(|old| old.transport) {
                    info!(transport_id = transport.id(), "Closing previous session transport");
                    transport.close().await;
                }
            }
        }

        self.connection_info().unwrap_or_else(|| ConnectionInfo {
            transport_id: None,
            connected: false,
            authenticated: false,
            credentials,
            created_at: Utc::now(),
        })
    }

    /// Spawns the session tasks. Runs under the session lock, so the status
    /// it moved to is returned for the caller to observe once unlocked.
    fn start_session(&self, credentials: Credentials) -> (Session, ConnectionStatus) {
        let generation = self.inner.next_generation.fetch_add(1, Ordering::Relaxed);
        let wake = Arc::new(Notify::new());
        let span = session_span(&credentials.user_id, &credentials.org_id);

        info!(
            user_id = %credentials.user_id,
            org_id = %credentials.org_id,
            generation,
            "Starting real-time session"
        );
        let (_, status) = self.inner.status.update(|s| {
            s.reset(ConnectionState::Connecting);
        });

        let supervisor = tokio::spawn(
            supervise(Arc::clone(&self.inner), generation, Arc::clone(&wake))
                .instrument(span.clone()),
        );
        let health = self.inner.probe.as_ref().map(|probe| {
            tokio::spawn(
                run_health_checks(Arc::clone(&self.inner), generation, Arc::clone(probe))
                    .instrument(span),
            )
        });

        let session = Session {
            generation,
            credentials,
            created_at: Utc::now(),
            transport: None,
            supervisor: Some(supervisor),
            health,
            wake,
            auth_failures: 0,
        };
        (session, status)
    }

    /// Sends `authenticate` for `user_id`/`org_id` on the live transport.
    ///
    /// The identity is remembered and used for every later reconnect.
    /// Returns false if there is no session or no open transport.
    pub async fn authenticate(&self, user_id: &str, org_id: &str) -> bool {
        let (transport, credentials) = {
            let mut guard = self.inner.session.lock();
            let Some(session) = guard.as_mut() else {
                warn!("authenticate called without a session");
                return false;
            };
            session.credentials.user_id = user_id.to_string();
            session.credentials.org_id = org_id.to_string();
            (session.transport.clone(), session.credentials.clone())
        };

        let Some(transport) = transport else {
            debug!("No transport yet; credentials will be sent on connect");
            return false;
        };
        self.inner.status.update(|s| {
            if s.connected {
                s.set_state(ConnectionState::Connected);
            }
        });
        self.inner.send_authenticate(&transport, &credentials).await
    }

    /// Tears the session down. Handlers and entity subscriptions are kept.
    pub async fn disconnect(&self) {
        self.teardown(ConnectionState::Disconnected).await;
    }

    /// Tears the session down and forgets everything belonging to the user:
    /// handlers, entity subscriptions and queued events.
    pub async fn logout(&self) {
        self.teardown(ConnectionState::Closed).await;
        self.inner.registry.clear();
        self.inner.queue.clear();
        info!("Logged out; registry and outbound queue cleared");
    }

    async fn teardown(&self, state: ConnectionState) {
        let previous = self.inner.session.lock().take();
        if let Some(mut session) = previous {
            session.abort_tasks();
            if let Some(transport) = session.transport.take() {
                transport.close().await;
            }
            info!(user_id = %session.credentials.user_id, "Real-time session closed");
        }
        self.inner.status.update(|s| {
            s.reset(state);
            s.server = ServerReachability::Unknown;
        });
        self.inner.notifier.reset();
    }

    /// Registers a closure for `event`. Works before and across connections.
    pub fn on<F>(&self, event: &str, f: F) -> Subscription
    where
        F: Fn(&InboundEvent) + Send + Sync + 'static,
    {
        self.subscribe(event, EventHandler::new(f))
    }

    /// Registers `handler` for `event`.
    pub fn subscribe(&self, event: &str, handler: EventHandler) -> Subscription {
        self.inner.registry.subscribe(event, handler)
    }

    /// The subscription registry.
    #[must_use]
    pub fn registry(&self) -> &SubscriptionRegistry {
        &self.inner.registry
    }

    /// Asks the server for push updates about one record.
    ///
    /// Reference counted: only the first caller causes a server message.
    /// Requests made before authentication are sent once it succeeds.
    pub async fn subscribe_to_entity(&self, entity_type: &str, entity_id: impl Into<EntityId>) {
        let entity = EntityRef::new(entity_type, entity_id);
        let _guard = self.inner.flush_lock.lock().await;
        if !self.inner.registry.retain_entity(entity.clone()) {
            return;
        }
        debug!(entity = %entity, "Entity subscription added");
        if self.is_authenticated() {
            self.inner
                .send_entity(events::SUBSCRIBE_ENTITY, &entity)
                .await;
        }
    }

    /// Releases one reference to a record subscription. The server is told
    /// when the last reference goes; unknown entities are ignored.
    pub async fn unsubscribe_from_entity(&self, entity_type: &str, entity_id: impl Into<EntityId>) {
        let entity = EntityRef::new(entity_type, entity_id);
        let _guard = self.inner.flush_lock.lock().await;
        if !self.inner.registry.release_entity(&entity) {
            return;
        }
        debug!(entity = %entity, "Entity subscription removed");
        if self.is_authenticated() {
            self.inner
                .send_entity(events::UNSUBSCRIBE_ENTITY, &entity)
                .await;
        }
    }

    /// Sends an event, or queues it for replay if it cannot be sent now.
    pub async fn emit(&self, event: &str, data: Value) -> EmitOutcome {
        let frame = Frame::new(event, data);
        let _guard = self.inner.flush_lock.lock().await;

        if !self.inner.queue.is_empty() {
            self.inner.queue.push(frame);
            let report = self.inner.flush_locked().await;
            return if report.remaining == 0 {
                EmitOutcome::Sent
            } else {
                EmitOutcome::Queued
            };
        }

        if let Some(transport) = self.inner.current_transport() {
            match transport.send(frame.clone()).await {
                Ok(()) => return EmitOutcome::Sent,
                Err(e) => debug!(event = %event, error = %e, "Send failed, queueing"),
            }
        }
        self.inner.queue.push(frame);
        EmitOutcome::Queued
    }

    /// Replays queued events on the live transport.
    pub async fn flush(&self) -> FlushReport {
        self.inner.flush().await
    }

    /// Drops queued events older than the TTL. Returns how many.
    pub fn purge_expired(&self) -> usize {
        self.inner.queue.purge_expired()
    }

    /// Queued frames in replay order.
    #[must_use]
    pub fn queued_frames(&self) -> Vec<Frame> {
        self.inner.queue.frames()
    }

    /// Outbound queue counters.
    #[must_use]
    pub fn queue_stats(&self) -> QueueStats {
        self.inner.queue.stats()
    }

    /// Whether a transport is open.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.inner.status.current().connected
    }

    /// Whether the server accepted the handshake on the open transport.
    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        self.inner.status.current().authenticated
    }

    /// Current status snapshot.
    #[must_use]
    pub fn status(&self) -> ConnectionStatus {
        self.inner.status.current()
    }

    /// Receiver woken on every status change.
    #[must_use]
    pub fn subscribe_status(&self) -> watch::Receiver<ConnectionStatus> {
        self.inner.status.subscribe()
    }

    /// Details of the current session, if any.
    #[must_use]
    pub fn connection_info(&self) -> Option<ConnectionInfo> {
        let status = self.inner.status.current();
        self.inner
            .session
            .lock()
            .as_ref()
            .map(|session| ConnectionInfo {
                transport_id: session.transport.as_ref().map(|t| t.id()),
                connected: status.connected,
                authenticated: status.authenticated,
                credentials: session.credentials.clone(),
                created_at: session.created_at,
            })
    }

    /// Skips the current backoff wait, or leaves the `Failed` state, and
    /// tries to connect immediately.
    pub fn reconnect_now(&self) {
        if let Some(session) = self.inner.session.lock().as_ref() {
            info!("Manual reconnect requested");
            session.wake.notify_one();
        }
    }

    /// Runs a health check now and, if the transport is down, retries it.
    pub async fn check_now(&self) -> ServerReachability {
        let reachability = match &self.inner.probe {
            Some(probe) => {
                let reachability = probe_reachability(probe.as_ref()).await;
                let after = self.inner.status.update(|s| s.server = reachability).1;
                self.inner.notifier.observe(&after);
                reachability
            }
            None => self.inner.status.current().server,
        };

        if matches!(
            self.inner.status.state(),
            ConnectionState::Reconnecting | ConnectionState::Failed
        ) {
            self.reconnect_now();
        }
        reachability
    }
}

impl Inner {
    fn current_transport(&self) -> Option<Arc<dyn Transport>> {
        self.session.lock().as_ref().and_then(|s| s.transport.clone())
    }

    fn is_current(&self, generation: u64) -> bool {
        self.session
            .lock()
            .as_ref()
            .is_some_and(|s| s.generation == generation)
    }

    /// Applies `f` to the status if `generation` is still the active session.
    fn update_status<F>(&self, generation: u64, f: F) -> bool
    where
        F: FnOnce(&mut ConnectionStatus),
    {
        let after = {
            let guard = self.session.lock();
            if guard.as_ref().map(|s| s.generation) != Some(generation) {
                return false;
            }
            self.status.update(f).1
        };
        self.notifier.observe(&after);
        true
    }

    fn with_session<R>(&self, generation: u64, f: impl FnOnce(&mut Session) -> R) -> Option<R> {
        let mut guard = self.session.lock();
        guard
            .as_mut()
            .filter(|s| s.generation == generation)
            .map(f)
    }

    fn dispatch_local(&self, generation: u64, name: &str, data: Value) {
        if self.is_current(generation) {
            self.registry.dispatch(&InboundEvent::new(name, data));
        }
    }

    async fn send_authenticate(
        &self,
        transport: &Arc<dyn Transport>,
        credentials: &Credentials,
    ) -> bool {
        let frame = match Frame::with_payload(events::AUTHENTICATE, &credentials.payload()) {
            Ok(frame) => frame,
            Err(e) => {
                error!(error = %e, "Failed to encode authenticate payload");
                return false;
            }
        };
        debug!(
            payload = %self.masker.mask_string(&frame.data.to_string()),
            "Sending authenticate"
        );
        match transport.send(frame).await {
            Ok(()) => {
                info!(
                    user_id = %credentials.user_id,
                    org_id = %credentials.org_id,
                    transport_id = transport.id(),
                    "Authentication requested"
                );
                true
            }
            Err(e) => {
                warn!(error = %e, "Failed to send authenticate");
                false
            }
        }
    }

    async fn send_entity(&self, event: &str, entity: &EntityRef) -> bool {
        let Some(transport) = self.current_transport() else {
            return false;
        };
        let payload = EntityPayload {
            entity_type: entity.entity_type.clone(),
            entity_id: entity.entity_id.clone(),
        };
        let frame = match Frame::with_payload(event, &payload) {
            Ok(frame) => frame,
            Err(e) => {
                error!(error = %e, "Failed to encode entity payload");
                return false;
            }
        };
        match transport.send(frame).await {
            Ok(()) => true,
            Err(e) => {
                warn!(
                    event = %event,
                    entity = %entity,
                    error = %e,
                    "Failed to send entity subscription"
                );
                false
            }
        }
    }

    async fn flush(&self) -> FlushReport {
        let _guard = self.flush_lock.lock().await;
        self.flush_locked().await
    }

    /// Replays the queue. The caller holds `flush_lock`.
    async fn flush_locked(&self) -> FlushReport {
        let Some(transport) = self.current_transport() else {
            let expired = self.queue.purge_expired();
            return FlushReport {
                sent: 0,
                expired,
                remaining: self.queue.len(),
            };
        };

        let span = flush_span(self.queue.len());
        async {
            let mut report = FlushReport::default();
            loop {
                let (entry, expired) = self.queue.pop_ready();
                report.expired += expired;
                let Some(entry) = entry else {
                    break;
                };
                match transport.send(entry.frame.clone()).await {
                    Ok(()) => report.sent += 1,
                    Err(e) => {
                        warn!(
                            event = %entry.frame.event,
                            error = %e,
                            "Flush interrupted by send failure"
                        );
                        self.queue.push_front(entry);
                        break;
                    }
                }
            }
            report.remaining = self.queue.len();
            if report.sent > 0 || report.expired > 0 {
                info!(
                    sent = report.sent,
                    expired = report.expired,
                    remaining = report.remaining,
                    "Outbound queue flushed"
                );
            }
            report
        }
        .instrument(span)
        .await
    }

    async fn on_authenticated(&self, generation: u64) {
        self.with_session(generation, |s| s.auth_failures = 0);
        let _guard = self.flush_lock.lock().await;
        if !self.update_status(generation, ConnectionStatus::mark_authenticated) {
            return;
        }
        PulseMetrics::authenticated(true);

        let entities = self.registry.entities();
        let mut resent = 0;
        for entity in &entities {
            if self.send_entity(events::SUBSCRIBE_ENTITY, entity).await {
                resent += 1;
            }
        }
        info!(entities = resent, "Authenticated; entity subscriptions restored");
    }

    /// Records a rejected handshake. Returns true when retrying should stop.
    fn on_auth_rejected(&self, generation: u64, reason: Option<&str>) -> bool {
        let failures = self
            .with_session(generation, |s| {
                s.auth_failures += 1;
                s.auth_failures
            })
            .unwrap_or(0);
        let error = AuthError::rejected(reason);
        error!(error = %error, failures, "Real-time authentication failed");
        PulseMetrics::auth_failure();
        let exhausted = failures >= self.config.max_auth_failures;
        self.update_status(generation, |s| {
            s.mark_auth_failed(error);
            if exhausted {
                s.last_error = Some(AuthError::TooManyFailures { attempts: failures }.to_string());
            }
        });
        exhausted
    }

    async fn drive(&self, generation: u64, link: TransportLink, reconnect: bool) -> DriveEnd {
        let TransportLink {
            transport,
            events: mut inbound,
        } = link;
        let transport_id = transport.id();

        let credentials = self.with_session(generation, |s| {
            s.transport = Some(Arc::clone(&transport));
            s.credentials.clone()
        });
        let Some(credentials) = credentials else {
            transport.close().await;
            return DriveEnd::Stopped;
        };

        self.update_status(generation, ConnectionStatus::mark_connected);
        PulseMetrics::connected(true);
        info!(
            transport_id,
            events = self.registry.event_names().len(),
            handlers = self.registry.handler_count(),
            "Transport open; dispatching through registry"
        );
        self.dispatch_local(
            generation,
            if reconnect { events::RECONNECT } else { events::CONNECT },
            json!({ "transportId": transport_id }),
        );

        self.send_authenticate(&transport, &credentials).await;
        self.flush().await;

        let mut authenticated = false;
        let end = loop {
            let Some(event) = inbound.recv().await else {
                break DriveEnd::Lost {
                    reason: "transport event stream ended".to_string(),
                    server_initiated: false,
                    authenticated,
                };
            };
            match event {
                TransportEvent::Frame(frame) => match frame.event.as_str() {
                    events::AUTHENTICATED => match frame.payload::<AuthenticatedPayload>() {
                        Ok(payload) if payload.success => {
                            authenticated = true;
                            self.on_authenticated(generation).await;
                            self.dispatch_frame(generation, frame);
                        }
                        Ok(payload) => {
                            let stop = self.on_auth_rejected(generation, payload.error.as_deref());
                            self.dispatch_frame(generation, frame);
                            if stop {
                                break DriveEnd::Stopped;
                            }
                        }
                        Err(e) => warn!(error = %e, "Ignoring malformed authenticated frame"),
                    },
                    events::DISCONNECT => {
                        let reason = frame
                            .payload::<DisconnectPayload>()
                            .ok()
                            .and_then(|p| p.reason)
                            .unwrap_or_else(|| "server disconnect".to_string());
                        self.dispatch_frame(generation, frame);
                        self.with_session(generation, |s| s.transport = None);
                        transport.close().await;
                        PulseMetrics::connected(false);
                        PulseMetrics::authenticated(false);
                        return DriveEnd::Lost {
                            reason,
                            server_initiated: true,
                            authenticated,
                        };
                    }
                    events::ERROR => {
                        warn!(payload = %frame.data, "Server reported an error");
                        self.dispatch_frame(generation, frame);
                    }
                    _ => self.dispatch_frame(generation, frame),
                },
                TransportEvent::Closed(cause) => {
                    break match cause {
                        CloseCause::Client => DriveEnd::Stopped,
                        CloseCause::Server { .. } => DriveEnd::Lost {
                            reason: cause.reason(),
                            server_initiated: true,
                            authenticated,
                        },
                        CloseCause::Network { reason } => DriveEnd::Lost {
                            reason,
                            server_initiated: false,
                            authenticated,
                        },
                    };
                }
            }
        };

        self.with_session(generation, |s| s.transport = None);
        transport.close().await;
        PulseMetrics::connected(false);
        PulseMetrics::authenticated(false);
        if let DriveEnd::Lost { reason, .. } = &end {
            self.dispatch_local(generation, events::DISCONNECT, json!({ "reason": reason }));
        }
        end
    }

    fn dispatch_frame(&self, generation: u64, frame: Frame) {
        if self.is_current(generation) {
            PulseMetrics::event_received();
            self.registry
                .dispatch(&InboundEvent::new(frame.event, frame.data));
        }
    }

    /// Waits for `delay` (forever if `None`) or a manual wake, sweeping
    /// expired queue entries meanwhile.
    async fn wait_offline(&self, delay: Option<Duration>, wake: &Notify) {
        let deadline = delay.map(|d| tokio::time::Instant::now() + d);
        let period = self
            .config
            .queue_ttl()
            .min(PURGE_INTERVAL)
            .max(Duration::from_millis(1));
        let mut sweep = interval(period);
        sweep.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            let until_deadline = async {
                match deadline {
                    Some(deadline) => tokio::time::sleep_until(deadline).await,
                    None => std::future::pending::<()>().await,
                }
            };
            tokio::select! {
                () = until_deadline => return,
                () = wake.notified() => return,
                _ = sweep.tick() => {
                    self.queue.purge_expired();
                }
            }
        }
    }
}

async fn supervise(inner: Arc<Inner>, generation: u64, wake: Arc<Notify>) {
    let url = match inner.config.socket_url() {
        Ok(url) => url,
        Err(e) => {
            error!(error = %e, "Cannot derive socket URL");
            inner.update_status(generation, |s| {
                s.set_state(ConnectionState::Failed);
                s.last_error = Some(e.to_string());
            });
            return;
        }
    };

    let mut attempt: u32 = 0;
    let mut opened_before = false;

    loop {
        if attempt > 0 {
            inner.dispatch_local(
                generation,
                events::RECONNECT_ATTEMPT,
                serde_json::to_value(ReconnectAttemptPayload {
                    attempt_number: attempt,
                })
                .unwrap_or(Value::Null),
            );
        }

        let opened = inner
            .connector
            .open(&url)
            .instrument(connection_span(url.as_str(), attempt))
            .await;

        let failure = match opened {
            Ok(link) => {
                let end = inner.drive(generation, link, opened_before).await;
                opened_before = true;
                match end {
                    DriveEnd::Stopped => {
                        inner.update_status(generation, |s| s.connected = false);
                        inner.with_session(generation, |s| {
                            if let Some(health) = s.health.take() {
                                health.abort();
                            }
                        });
                        info!("Supervisor stopped");
                        return;
                    }
                    DriveEnd::Lost {
                        reason,
                        server_initiated,
                        authenticated: true,
                    } if inner.config.should_reconnect(0) => {
                        attempt = 1;
                        warn!(reason = %reason, server_initiated, "Transport lost, reconnecting");
                        let cause = if server_initiated { "server" } else { "network" };
                        PulseMetrics::reconnection(cause);
                        inner.update_status(generation, |s| {
                            s.mark_reconnecting(attempt, Some(reason));
                        });
                        if !server_initiated {
                            let delay = inner.config.calculate_reconnect_delay(0);
                            inner.wait_offline(Some(delay), &wake).await;
                        }
                        continue;
                    }
                    DriveEnd::Lost {
                        reason,
                        authenticated,
                        ..
                    } => {
                        // A link that never authenticated counts as a failed attempt.
                        if authenticated {
                            attempt = 0;
                        }
                        reason
                    }
                }
            }
            Err(e) => {
                let message = e.to_string();
                inner.dispatch_local(generation, events::ERROR, json!({ "message": message }));
                message
            }
        };

        if inner.config.should_reconnect(attempt) {
            let delay = inner.config.calculate_reconnect_delay(attempt);
            attempt += 1;
            warn!(
                error = %failure,
                attempt,
                max_attempts = inner.config.max_reconnect_attempts,
                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                "Connection failed, retrying"
            );
            PulseMetrics::reconnection("failed");
            inner.update_status(generation, |s| {
                s.mark_reconnecting(attempt, Some(failure));
            });
            inner.wait_offline(Some(delay), &wake).await;
        } else {
            error!(
                error = %failure,
                attempts = attempt,
                reconnect_enabled = inner.config.reconnect_enabled,
                "Giving up on reconnecting"
            );
            inner.update_status(generation, |s| {
                s.set_state(ConnectionState::Failed);
                s.last_error = Some(failure);
            });
            inner.wait_offline(None, &wake).await;
            attempt = 0;
            inner.update_status(generation, |s| s.set_state(ConnectionState::Connecting));
        }
    }
}

async fn probe_reachability(probe: &dyn HealthProbe) -> ServerReachability {
    match probe.check().await {
        Ok(()) => ServerReachability::Reachable,
        Err(e) => {
            warn!(error = %e, "Health check failed");
            ServerReachability::Unreachable
        }
    }
}

async fn run_health_checks(inner: Arc<Inner>, generation: u64, probe: Arc<dyn HealthProbe>) {
    let mut ticker = interval(inner.config.health_check_interval());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        let reachability = probe_reachability(probe.as_ref()).await;
        if !inner.update_status(generation, |s| s.server = reachability) {
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{MockConnector, RecordingNotifier, StaticProbe, eventually};
    use std::sync::atomic::AtomicUsize;
    use tokio::time::sleep;

    fn fast_config() -> RealtimeConfig {
        RealtimeConfig::builder()
            .reconnect_delay(Duration::from_millis(10))
            .max_reconnect_delay(Duration::from_millis(50))
            .max_reconnect_attempts(3)
            .health_check_enabled(false)
            .build()
    }

    struct Harness {
        client: RealtimeClient,
        connector: Arc<MockConnector>,
        notifier: Arc<RecordingNotifier>,
    }

    fn harness(config: RealtimeConfig) -> Harness {
        let connector = MockConnector::new();
        let notifier = Arc::new(RecordingNotifier::default());
        let client = RealtimeClient::builder(config)
            .connector(connector.clone())
            .notifier(notifier.clone())
            .without_health_checks()
            .build()
            .unwrap();
        Harness {
            client,
            connector,
            notifier,
        }
    }

    fn counter(client: &RealtimeClient, event: &str) -> Arc<AtomicUsize> {
        let count = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&count);
        client.on(event, move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });
        count
    }

    async fn connected(h: &Harness) -> Arc<crate::testing::MockLink> {
        h.client.connect(Credentials::new("u1", "o1")).await;
        let link = h.connector.wait_for_link(1).await;
        link.authenticate_ok().await;
        eventually(|| h.client.is_authenticated()).await;
        link
    }

    #[tokio::test]
    async fn test_connect_authenticates() {
        let h = harness(fast_config());
        let credentials = Credentials::new("u1", "o1").with_token("tok-123456789");
        let info = h.client.connect(credentials).await;
        assert_eq!(info.credentials.user_id, "u1");

        let link = h.connector.wait_for_link(1).await;
        eventually(|| !link.sent().is_empty()).await;
        assert_eq!(
            link.sent_payloads(events::AUTHENTICATE),
            vec![json!({"userId": "u1", "orgId": "o1", "token": "tok-123456789"})]
        );
        assert!(h.client.is_connected());
        assert!(!h.client.is_authenticated());

        link.authenticate_ok().await;
        eventually(|| h.client.is_authenticated()).await;
        assert_eq!(h.client.status().state, ConnectionState::Authenticated);
        assert_eq!(h.client.connection_info().unwrap().transport_id, Some(link.id()));
    }

    #[tokio::test]
    async fn test_subscription_survives_reconnect() {
        let h = harness(fast_config());
        let count = counter(&h.client, "lead:created");
        let first = connected(&h).await;

        first.drop_connection("network reset").await;
        let second = h.connector.wait_for_link(2).await;
        second.authenticate_ok().await;
        second
            .push(Frame::new("lead:created", json!({"id": 1})))
            .await;

        eventually(|| count.load(Ordering::SeqCst) == 1).await;
        sleep(Duration::from_millis(20)).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_inbound_events_reach_handler() {
        let h = harness(fast_config());
        let count = counter(&h.client, "lead:created");
        let link = connected(&h).await;

        for id in 1..=3 {
            link.push(Frame::new("lead:created", json!({ "id": id })))
                .await;
        }
        eventually(|| count.load(Ordering::SeqCst) == 3).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_offline_emits_replay_in_order() {
        let config = RealtimeConfig::builder()
            .reconnect_delay(Duration::from_secs(10))
            .max_reconnect_delay(Duration::from_secs(10))
            .health_check_enabled(false)
            .build();
        let h = harness(config);
        let first = connected(&h).await;

        first.drop_connection("offline").await;
        eventually(|| !h.client.is_connected()).await;
        let started = tokio::time::Instant::now();

        assert_eq!(h.client.emit("ping", json!({"n": 1})).await, EmitOutcome::Queued);
        assert_eq!(h.client.emit("ping", json!({"n": 2})).await, EmitOutcome::Queued);

        let second = h.connector.wait_for_link(2).await;
        assert!(started.elapsed() >= Duration::from_secs(9));
        eventually(|| second.sent_payloads("ping").len() == 2).await;

        assert_eq!(
            second.sent_payloads("ping"),
            vec![json!({"n": 1}), json!({"n": 2})]
        );
        assert_eq!(second.sent_events()[0], events::AUTHENTICATE);
        assert!(first.sent_payloads("ping").is_empty());
        assert!(h.client.queued_frames().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_events_are_never_sent() {
        let config = RealtimeConfig::builder()
            .reconnect_delay(Duration::from_secs(31))
            .max_reconnect_delay(Duration::from_secs(60))
            .queue_ttl(Duration::from_secs(30))
            .health_check_enabled(false)
            .build();
        let h = harness(config);
        let first = connected(&h).await;

        first.drop_connection("offline").await;
        eventually(|| !h.client.is_connected()).await;
        assert_eq!(h.client.emit("ping", json!({"n": 1})).await, EmitOutcome::Queued);

        let second = h.connector.wait_for_link(2).await;
        second.authenticate_ok().await;
        eventually(|| h.client.is_authenticated()).await;

        assert!(second.sent_payloads("ping").is_empty());
        assert_eq!(h.client.queue_stats().total_expired, 1);
        assert!(h.client.queued_frames().is_empty());
    }

    #[tokio::test]
    async fn test_queue_bound_keeps_most_recent() {
        let h = harness(fast_config());
        for n in 0..51 {
            assert_eq!(
                h.client.emit("ping", json!({ "n": n })).await,
                EmitOutcome::Queued
            );
        }
        let expected: Vec<Value> = (1..51).map(|n| json!({ "n": n })).collect();
        let queued: Vec<Value> = h.client.queued_frames().into_iter().map(|f| f.data).collect();
        assert_eq!(queued, expected);

        h.client.connect(Credentials::new("u1", "o1")).await;
        let link = h.connector.wait_for_link(1).await;
        eventually(|| link.sent_payloads("ping").len() == 50).await;
        assert_eq!(link.sent_payloads("ping"), expected);
    }

    #[tokio::test]
    async fn test_connect_twice_same_user_opens_one_transport() {
        let h = harness(fast_config());
        h.client.connect(Credentials::new("u1", "o1")).await;
        h.client.connect(Credentials::new("u1", "o1")).await;

        let link = h.connector.wait_for_link(1).await;
        sleep(Duration::from_millis(50)).await;
        assert_eq!(h.connector.open_count(), 1);
        assert_eq!(h.connector.live_count(), 1);
        assert_eq!(link.sent_payloads(events::AUTHENTICATE).len(), 1);
    }

    #[tokio::test]
    async fn test_connect_as_other_user_replaces_transport() {
        let h = harness(fast_config());
        let first = connected(&h).await;
        h.client.emit("draft", json!({})).await;

        first.fail_sends(true);
        h.client.emit("pending", json!({})).await;
        assert_eq!(h.client.queued_frames().len(), 1);

        h.client.connect(Credentials::new("u2", "o1")).await;
        let second = h.connector.wait_for_link(2).await;
        eventually(|| first.is_closed()).await;
        assert_eq!(h.connector.live_count(), 1);

        eventually(|| !second.sent().is_empty()).await;
        assert_eq!(
            second.sent_payloads(events::AUTHENTICATE),
            vec![json!({"userId": "u2", "orgId": "o1"})]
        );
        assert!(second.sent_payloads("pending").is_empty());
    }

    #[tokio::test]
    async fn test_org_switch_reauthenticates_on_same_transport() {
        let h = harness(fast_config());
        let link = connected(&h).await;

        h.client.connect(Credentials::new("u1", "o2")).await;
        assert_eq!(h.connector.open_count(), 1);
        assert_eq!(
            link.sent_payloads(events::AUTHENTICATE),
            vec![
                json!({"userId": "u1", "orgId": "o1"}),
                json!({"userId": "u1", "orgId": "o2"})
            ]
        );
        assert!(!h.client.is_authenticated());
    }

    #[tokio::test]
    async fn test_auth_failure_is_observable() {
        let h = harness(fast_config());
        let mut status_rx = h.client.subscribe_status();
        h.client.connect(Credentials::new("u1", "o1")).await;
        let link = h.connector.wait_for_link(1).await;

        link.authenticate_fail("bad token").await;
        eventually(|| h.client.status().state == ConnectionState::AuthFailed).await;

        let status = status_rx.borrow_and_update().clone();
        assert!(!status.authenticated);
        assert_eq!(status.state, ConnectionState::AuthFailed);
        assert_ne!(status.state, ConnectionState::Disconnected);
        assert_eq!(
            status.auth_error,
            Some(AuthError::Rejected {
                reason: "bad token".to_string()
            })
        );
        assert_eq!(h.notifier.titles(), vec!["Real-time authentication failed"]);
    }

    #[tokio::test]
    async fn test_repeated_auth_failures_stop_reconnecting() {
        let config = RealtimeConfig::builder()
            .reconnect_delay(Duration::from_millis(10))
            .max_reconnect_delay(Duration::from_millis(10))
            .max_auth_failures(1)
            .health_check_enabled(false)
            .build();
        let h = harness(config);
        h.client.connect(Credentials::new("u1", "o1")).await;
        let link = h.connector.wait_for_link(1).await;

        link.authenticate_fail("revoked").await;
        eventually(|| link.is_closed()).await;
        eventually(|| !h.client.is_connected()).await;
        sleep(Duration::from_millis(50)).await;

        assert_eq!(h.connector.open_count(), 1);
        let status = h.client.status();
        assert_eq!(status.state, ConnectionState::AuthFailed);
        assert!(status.last_error.unwrap().contains("1 rejected"));

        h.client.connect(Credentials::new("u1", "o1")).await;
        h.connector.wait_for_link(2).await;
    }

    #[tokio::test]
    async fn test_entity_subscriptions_follow_authentication() {
        let h = harness(fast_config());
        h.client.connect(Credentials::new("u1", "o1")).await;
        let first = h.connector.wait_for_link(1).await;

        h.client.subscribe_to_entity("lead", 7_i64).await;
        h.client.subscribe_to_entity("lead", 7_i64).await;
        assert!(first.sent_payloads(events::SUBSCRIBE_ENTITY).is_empty());

        first.authenticate_ok().await;
        eventually(|| first.sent_payloads(events::SUBSCRIBE_ENTITY).len() == 1).await;

        first.drop_connection("blip").await;
        let second = h.connector.wait_for_link(2).await;
        second.authenticate_ok().await;
        eventually(|| second.sent_payloads(events::SUBSCRIBE_ENTITY).len() == 1).await;
        assert_eq!(
            second.sent_payloads(events::SUBSCRIBE_ENTITY),
            vec![json!({"entityType": "lead", "entityId": 7})]
        );

        h.client.unsubscribe_from_entity("lead", 7_i64).await;
        assert!(second.sent_payloads(events::UNSUBSCRIBE_ENTITY).is_empty());
        h.client.unsubscribe_from_entity("lead", 7_i64).await;
        h.client.unsubscribe_from_entity("lead", 7_i64).await;
        assert_eq!(second.sent_payloads(events::UNSUBSCRIBE_ENTITY).len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_server_disconnect_reconnects_immediately() {
        let config = RealtimeConfig::builder()
            .reconnect_delay(Duration::from_secs(10))
            .max_reconnect_delay(Duration::from_secs(10))
            .health_check_enabled(false)
            .build();
        let h = harness(config);
        let disconnects = counter(&h.client, events::DISCONNECT);
        let reconnects = counter(&h.client, events::RECONNECT);
        let first = connected(&h).await;

        let started = tokio::time::Instant::now();
        first
            .push(Frame::new(events::DISCONNECT, json!({"reason": "deploy"})))
            .await;
        h.connector.wait_for_link(2).await;

        assert!(started.elapsed() < Duration::from_secs(1));
        eventually(|| reconnects.load(Ordering::SeqCst) == 1).await;
        assert_eq!(disconnects.load(Ordering::SeqCst), 1);
        assert!(first.is_closed());
    }

    #[tokio::test]
    async fn test_exhausted_reconnects_fail_until_retried() {
        let h = harness(fast_config());
        let attempts = Arc::new(Mutex::new(Vec::new()));
        let seen = Arc::clone(&attempts);
        h.client.on(events::RECONNECT_ATTEMPT, move |event| {
            seen.lock().push(event.data["attemptNumber"].clone());
        });

        h.connector.fail_next_opens(100);
        h.client.connect(Credentials::new("u1", "o1")).await;
        eventually(|| h.client.status().state == ConnectionState::Failed).await;

        assert_eq!(h.connector.attempt_count(), 4);
        assert_eq!(*attempts.lock(), vec![json!(1), json!(2), json!(3)]);
        assert_eq!(h.notifier.titles(), vec!["Real-time updates unavailable"]);

        h.connector.fail_next_opens(0);
        h.client.reconnect_now();
        let link = h.connector.wait_for_link(1).await;
        link.authenticate_ok().await;
        eventually(|| h.client.is_authenticated()).await;
        assert_eq!(
            h.notifier.titles(),
            vec!["Real-time updates unavailable", "Real-time updates restored"]
        );
    }

    #[tokio::test]
    async fn test_disconnect_keeps_registry() {
        let h = harness(fast_config());
        let count = counter(&h.client, "deal:updated");
        let link = connected(&h).await;

        h.client.disconnect().await;
        assert!(link.is_closed());
        assert_eq!(h.client.status().state, ConnectionState::Disconnected);
        assert!(h.client.connection_info().is_none());
        assert_eq!(h.client.registry().listener_count("deal:updated"), 1);

        sleep(Duration::from_millis(50)).await;
        assert_eq!(h.connector.open_count(), 1);

        h.client.connect(Credentials::new("u1", "o1")).await;
        let second = h.connector.wait_for_link(2).await;
        second.push(Frame::new("deal:updated", json!({}))).await;
        eventually(|| count.load(Ordering::SeqCst) == 1).await;
    }

    #[tokio::test]
    async fn test_logout_clears_user_state() {
        let h = harness(fast_config());
        counter(&h.client, "deal:updated");
        h.client.emit("draft", json!({})).await;
        h.client.subscribe_to_entity("deal", 3_i64).await;

        h.client.logout().await;
        assert_eq!(h.client.status().state, ConnectionState::Closed);
        assert_eq!(h.client.registry().handler_count(), 0);
        assert!(h.client.registry().entities().is_empty());
        assert!(h.client.queued_frames().is_empty());
    }

    #[tokio::test]
    async fn test_emit_sends_when_connected() {
        let h = harness(fast_config());
        let link = connected(&h).await;

        assert_eq!(h.client.emit("ping", json!({"n": 1})).await, EmitOutcome::Sent);
        assert_eq!(link.sent_payloads("ping"), vec![json!({"n": 1})]);

        link.fail_sends(true);
        assert_eq!(h.client.emit("ping", json!({"n": 2})).await, EmitOutcome::Queued);

        link.fail_sends(false);
        let report = h.client.flush().await;
        assert_eq!(report, FlushReport { sent: 1, expired: 0, remaining: 0 });
        assert_eq!(
            link.sent_payloads("ping"),
            vec![json!({"n": 1}), json!({"n": 2})]
        );
    }

    #[tokio::test]
    async fn test_check_now_reports_reachability() {
        let connector = MockConnector::new();
        let notifier = Arc::new(RecordingNotifier::default());
        let probe = StaticProbe::new(false);
        let config = RealtimeConfig::builder()
            .health_check_interval(Duration::from_secs(3600))
            .build();
        let client = RealtimeClient::builder(config)
            .connector(connector.clone())
            .notifier(notifier.clone())
            .health_probe(probe.clone())
            .build()
            .unwrap();

        assert_eq!(client.check_now().await, ServerReachability::Unreachable);
        assert_eq!(client.status().server, ServerReachability::Unreachable);
        assert_eq!(notifier.titles(), vec!["Server unreachable"]);

        probe.set_healthy(true);
        assert_eq!(client.check_now().await, ServerReachability::Reachable);
        assert_eq!(
            notifier.titles(),
            vec!["Server unreachable", "Server connection restored"]
        );
    }

    #[tokio::test]
    async fn test_health_task_runs_with_session() {
        let connector = MockConnector::new();
        let probe = StaticProbe::new(true);
        let config = RealtimeConfig::builder()
            .health_check_interval(Duration::from_secs(3600))
            .build();
        let client = RealtimeClient::builder(config)
            .connector(connector.clone())
            .health_probe(probe.clone())
            .build()
            .unwrap();

        client.connect(Credentials::new("u1", "o1")).await;
        eventually(|| client.status().server == ServerReachability::Reachable).await;
        assert_eq!(probe.calls(), 1);
        client.disconnect().await;
    }

    #[tokio::test]
    async fn test_invalidation_bridge_receives_pushed_events() {
        use crate::invalidation::CacheInvalidationBridge;
        use crate::testing::RecordingCache;

        let h = harness(fast_config());
        let cache = Arc::new(RecordingCache::default());
        let subscriptions = CacheInvalidationBridge::standard(cache.clone()).install(&h.client);
        assert!(!subscriptions.is_empty());

        let link = connected(&h).await;
        link.push(Frame::new(
            events::DATA_UPDATED,
            json!({"entityType": "deal", "entityId": 12}),
        ))
        .await;
        eventually(|| cache.keys().len() == 2).await;
        assert_eq!(cache.keys(), vec!["/api/deals", "/api/deals/12"]);

        for subscription in &subscriptions {
            subscription.unsubscribe();
        }
        assert_eq!(h.client.registry().handler_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_links_closed_before_handshake_back_off_and_fail() {
        let config = RealtimeConfig::builder()
            .reconnect_delay(Duration::from_secs(1))
            .max_reconnect_delay(Duration::from_secs(10))
            .max_reconnect_attempts(3)
            .health_check_enabled(false)
            .build();
        let h = harness(config);
        h.connector.close_on_open(true);
        let started = tokio::time::Instant::now();

        h.client.connect(Credentials::new("u1", "o1")).await;
        eventually(|| h.client.status().state == ConnectionState::Failed).await;

        assert_eq!(h.connector.open_count(), 4);
        assert!(started.elapsed() >= Duration::from_secs(1 + 2 + 4));
        assert_eq!(h.notifier.titles(), vec!["Real-time updates unavailable"]);

        sleep(Duration::from_secs(60)).await;
        assert_eq!(h.connector.open_count(), 4);

        h.connector.close_on_open(false);
        h.client.reconnect_now();
        let link = h.connector.wait_for_link(5).await;
        link.authenticate_ok().await;
        eventually(|| h.client.is_authenticated()).await;
    }

    #[tokio::test]
    async fn test_disabled_reconnect_fails_after_drop() {
        let config = RealtimeConfig::builder()
            .reconnect_enabled(false)
            .reconnect_delay(Duration::from_millis(10))
            .max_reconnect_delay(Duration::from_millis(50))
            .health_check_enabled(false)
            .build();
        let h = harness(config);
        let link = connected(&h).await;

        link.drop_connection("network reset").await;
        eventually(|| h.client.status().state == ConnectionState::Failed).await;
        sleep(Duration::from_millis(50)).await;

        assert_eq!(h.connector.open_count(), 1);
        assert_eq!(h.notifier.titles(), vec!["Real-time updates unavailable"]);

        h.client.reconnect_now();
        h.connector.wait_for_link(2).await;
    }

    /// Reads client state from inside `notify`, like a toast UI would.
    #[derive(Default)]
    struct ReentrantNotifier {
        client: Mutex<Option<RealtimeClient>>,
        seen_users: Mutex<Vec<Option<String>>>,
    }

    impl Notifier for ReentrantNotifier {
        fn notify(&self, _notification: crate::notify::Notification) {
            let client = self.client.lock().clone();
            if let Some(client) = client {
                let user = client.connection_info().map(|info| info.credentials.user_id);
                client.reconnect_now();
                self.seen_users.lock().push(user);
            }
        }
    }

    #[tokio::test]
    async fn test_notifier_may_call_back_into_client() {
        let connector = MockConnector::new();
        let notifier = Arc::new(ReentrantNotifier::default());
        let client = RealtimeClient::builder(fast_config())
            .connector(connector.clone())
            .notifier(notifier.clone())
            .without_health_checks()
            .build()
            .unwrap();
        *notifier.client.lock() = Some(client.clone());
        client
            .inner
            .status
            .update(|s| s.server = ServerReachability::Unreachable);

        client.connect(Credentials::new("u1", "o1")).await;
        assert_eq!(*notifier.seen_users.lock(), vec![Some("u1".to_string())]);

        connector.wait_for_link(1).await;
        client.disconnect().await;
        notifier.client.lock().take();
    }

    #[tokio::test]
    async fn test_failed_send_stops_flush_and_keeps_order() {
        let h = harness(fast_config());
        let link = connected(&h).await;

        link.fail_sends(true);
        for n in 1..=3 {
            assert_eq!(
                h.client.emit("ping", json!({ "n": n })).await,
                EmitOutcome::Queued
            );
        }

        link.fail_sends_after(1);
        let report = h.client.flush().await;
        assert_eq!(report, FlushReport { sent: 1, expired: 0, remaining: 2 });
        assert_eq!(link.sent_payloads("ping"), vec![json!({"n": 1})]);

        link.fail_sends(false);
        let report = h.client.flush().await;
        assert_eq!(report, FlushReport { sent: 2, expired: 0, remaining: 0 });
        assert_eq!(
            link.sent_payloads("ping"),
            vec![json!({"n": 1}), json!({"n": 2}), json!({"n": 3})]
        );
    }

    #[tokio::test]
    async fn test_entities_subscribed_during_handshake_are_sent_once() {
        let h = harness(fast_config());
        h.client.connect(Credentials::new("u1", "o1")).await;
        let link = h.connector.wait_for_link(1).await;

        let subscribers: Vec<_> = (1..=20_i64)
            .map(|id| {
                let client = h.client.clone();
                tokio::spawn(async move { client.subscribe_to_entity("lead", id).await })
            })
            .collect();
        link.authenticate_ok().await;
        for subscriber in subscribers {
            subscriber.await.unwrap();
        }
        eventually(|| h.client.is_authenticated()).await;
        sleep(Duration::from_millis(20)).await;

        let mut ids: Vec<i64> = link
            .sent_payloads(events::SUBSCRIBE_ENTITY)
            .iter()
            .filter_map(|payload| payload["entityId"].as_i64())
            .collect();
        ids.sort_unstable();
        assert_eq!(ids, (1..=20).collect::<Vec<_>>());
    }

    #[test]
    fn test_invalid_origin_is_rejected_at_build() {
        let config = RealtimeConfig::builder().origin("not a url").build();
        let err = RealtimeClient::builder(config)
            .without_health_checks()
            .build()
            .unwrap_err();
        assert_eq!(err.category(), "config");
    }
}
