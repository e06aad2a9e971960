//! Durable subscription registry.
//!
//! The registry is the single source of truth for who listens to what. It
//! outlives any transport: after a reconnect the client dispatches through
//! the same registry, so handlers never need to subscribe again.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use pulse_telemetry::spans::dispatch_span;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tracing::{debug, error};

/// Identifier of a business record. Servers use both numeric and string ids.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EntityId {
    /// Numeric id.
    Int(i64),
    /// String id.
    Str(String),
}

impl EntityId {
    /// Reads an id from a JSON value, accepting numbers and non-empty strings.
    #[must_use]
    pub fn from_json(value: &Value) -> Option<Self> {
        match value {
            Value::Number(n) => n.as_i64().map(Self::Int),
            Value::String(s) if !s.is_empty() => Some(Self::Str(s.clone())),
            _ => None,
        }
    }
}

impl std::fmt::Display for EntityId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Int(id) => write!(f, "{id}"),
            Self::Str(id) => f.write_str(id),
        }
    }
}

impl From<i64> for EntityId {
    fn from(id: i64) -> Self {
        Self::Int(id)
    }
}

impl From<&str> for EntityId {
    fn from(id: &str) -> Self {
        Self::Str(id.to_string())
    }
}

impl From<String> for EntityId {
    fn from(id: String) -> Self {
        Self::Str(id)
    }
}

/// A specific record the client wants server push for.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntityRef {
    /// Entity type, e.g. `lead`.
    pub entity_type: String,
    /// Record identifier.
    pub entity_id: EntityId,
}

impl EntityRef {
    /// Creates an entity reference.
    #[must_use]
    pub fn new(entity_type: impl Into<String>, entity_id: impl Into<EntityId>) -> Self {
        Self {
            entity_type: entity_type.into(),
            entity_id: entity_id.into(),
        }
    }
}

impl std::fmt::Display for EntityRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.entity_type, self.entity_id)
    }
}

/// An event as delivered to handlers.
#[derive(Debug, Clone, PartialEq)]
pub struct InboundEvent {
    /// Event name.
    pub name: String,
    /// Event payload.
    pub data: Value,
    /// When the client received it.
    pub received_at: DateTime<Utc>,
}

impl InboundEvent {
    /// Creates an event stamped with the current time.
    #[must_use]
    pub fn new(name: impl Into<String>, data: Value) -> Self {
        Self {
            name: name.into(),
            data,
            received_at: Utc::now(),
        }
    }
}

/// Callable invoked for matching inbound events.
///
/// Two handlers are the same handler when they share the same allocation,
/// so clone an `EventHandler` to register it under several events.
#[derive(Clone)]
pub struct EventHandler(Arc<dyn Fn(&InboundEvent) + Send + Sync>);

impl EventHandler {
    /// Wraps a closure.
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(&InboundEvent) + Send + Sync + 'static,
    {
        Self(Arc::new(f))
    }

    /// Wraps an existing shared closure, keeping its identity.
    #[must_use]
    pub fn from_arc(f: Arc<dyn Fn(&InboundEvent) + Send + Sync>) -> Self {
        Self(f)
    }

    /// Returns true if both wrap the same closure.
    #[must_use]
    pub fn same_as(&self, other: &Self) -> bool {
        std::ptr::eq(
            Arc::as_ptr(&self.0).cast::<()>(),
            Arc::as_ptr(&other.0).cast::<()>(),
        )
    }

    fn call(&self, event: &InboundEvent) {
        (self.0)(event);
    }
}

impl std::fmt::Debug for EventHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("EventHandler")
            .field(&Arc::as_ptr(&self.0).cast::<()>())
            .finish()
    }
}

struct Listener {
    handler: EventHandler,
    refs: usize,
}

#[derive(Default)]
struct RegistryState {
    listeners: HashMap<String, Vec<Listener>>,
    /// Event names in first-registration order.
    order: Vec<String>,
    entities: Vec<(EntityRef, usize)>,
}

impl RegistryState {
    fn release(&mut self, event: &str, handler: &EventHandler) {
        let Some(listeners) = self.listeners.get_mut(event) else {
            return;
        };
        let Some(index) = listeners.iter().position(|l| l.handler.same_as(handler)) else {
            return;
        };

        listeners[index].refs -= 1;
        if listeners[index].refs == 0 {
            listeners.remove(index);
            debug!(event = %event, "Handler detached");
        }
        if listeners.is_empty() {
            self.listeners.remove(event);
            self.order.retain(|name| name != event);
        }
    }
}

/// Handle owning one registration.
///
/// Dropping a `Subscription` leaves the handler attached; call
/// [`Subscription::unsubscribe`] to detach.
#[derive(Debug)]
pub struct Subscription {
    registry: Weak<Mutex<RegistryState>>,
    event: String,
    handler: Option<EventHandler>,
    released: AtomicBool,
}

impl Subscription {
    /// A subscription that owns nothing. Unsubscribing it does nothing.
    #[must_use]
    pub fn noop() -> Self {
        Self {
            registry: Weak::new(),
            event: String::new(),
            handler: None,
            released: AtomicBool::new(true),
        }
    }

    /// Event this subscription listens to.
    #[must_use]
    pub fn event(&self) -> &str {
        &self.event
    }

    /// Returns false once unsubscribed.
    #[must_use]
    pub fn is_active(&self) -> bool {
        !self.released.load(Ordering::Acquire)
    }

    /// Releases this registration. Calling it again is a no-op.
    pub fn unsubscribe(&self) {
        if self.released.swap(true, Ordering::AcqRel) {
            return;
        }
        let (Some(registry), Some(handler)) = (self.registry.upgrade(), self.handler.as_ref())
        else {
            return;
        };
        registry.lock().release(&self.event, handler);
    }
}

/// Registry of event handlers and entity subscriptions.
#[derive(Clone, Default)]
pub struct SubscriptionRegistry {
    state: Arc<Mutex<RegistryState>>,
}

impl std::fmt::Debug for SubscriptionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("SubscriptionRegistry")
            .field("events", &state.order)
            .field("entities", &state.entities.len())
            .finish()
    }
}

impl SubscriptionRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `handler` for `event`.
    ///
    /// Registering a handler that is already attached to `event` does not
    /// add a second delivery; it adds a reference that the returned
    /// subscription owns.
    pub fn subscribe(&self, event: &str, handler: EventHandler) -> Subscription {
        let mut state = self.state.lock();

        if !state.listeners.contains_key(event) {
            state.order.push(event.to_string());
        }
        let listeners = state.listeners.entry(event.to_string()).or_default();
        match listeners.iter_mut().find(|l| l.handler.same_as(&handler)) {
            Some(existing) => existing.refs += 1,
            None => listeners.push(Listener {
                handler: handler.clone(),
                refs: 1,
            }),
        }

        Subscription {
            registry: Arc::downgrade(&self.state),
            event: event.to_string(),
            handler: Some(handler),
            released: AtomicBool::new(false),
        }
    }

    /// Invokes every handler for `event.name` in registration order.
    ///
    /// A panicking handler is logged and skipped. Returns the number of
    /// handlers invoked.
    pub fn dispatch(&self, event: &InboundEvent) -> usize {
        let handlers: Vec<EventHandler> = self
            .state
            .lock()
            .listeners
            .get(&event.name)
            .map(|listeners| listeners.iter().map(|l| l.handler.clone()).collect())
            .unwrap_or_default();

        if handlers.is_empty() {
            return 0;
        }

        let _span = dispatch_span(&event.name, handlers.len()).entered();
        for handler in &handlers {
            if catch_unwind(AssertUnwindSafe(|| handler.call(event))).is_err() {
                error!(event = %event.name, "Event handler panicked");
            }
        }
        handlers.len()
    }

    /// Number of distinct handlers attached to `event`.
    #[must_use]
    pub fn listener_count(&self, event: &str) -> usize {
        self.state.lock().listeners.get(event).map_or(0, Vec::len)
    }

    /// Event names with at least one handler, in first-registration order.
    #[must_use]
    pub fn event_names(&self) -> Vec<String> {
        self.state.lock().order.clone()
    }

    /// Total number of distinct (event, handler) pairs.
    #[must_use]
    pub fn handler_count(&self) -> usize {
        self.state.lock().listeners.values().map(Vec::len).sum()
    }

    /// Adds a reference to `entity`. Returns true for the first reference.
    pub fn retain_entity(&self, entity: EntityRef) -> bool {
        let mut state = self.state.lock();
        if let Some((_, refs)) = state.entities.iter_mut().find(|(e, _)| *e == entity) {
            *refs += 1;
            return false;
        }
        state.entities.push((entity, 1));
        true
    }

    /// Drops a reference to `entity`. Returns true when the last reference
    /// went away; unknown entities return false.
    pub fn release_entity(&self, entity: &EntityRef) -> bool {
        let mut state = self.state.lock();
        let Some(index) = state.entities.iter().position(|(e, _)| e == entity) else {
            return false;
        };
        state.entities[index].1 -= 1;
        if state.entities[index].1 == 0 {
            state.entities.remove(index);
            return true;
        }
        false
    }

    /// Entities with at least one reference, in subscription order.
    #[must_use]
    pub fn entities(&self) -> Vec<EntityRef> {
        self.state
            .lock()
            .entities
            .iter()
            .map(|(e, _)| e.clone())
            .collect()
    }

    /// Removes every handler and entity subscription.
    pub fn clear(&self) {
        let mut state = self.state.lock();
        state.listeners.clear();
        state.order.clear();
        state.entities.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;

    fn counter() -> (Arc<AtomicUsize>, EventHandler) {
        let count = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&count);
        let handler = EventHandler::new(move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });
        (count, handler)
    }

    #[test]
    fn test_duplicate_subscribe_delivers_once() {
        let registry = SubscriptionRegistry::new();
        let (count, handler) = counter();

        let first = registry.subscribe("lead:created", handler.clone());
        let _second = registry.subscribe("lead:created", handler);
        assert_eq!(registry.listener_count("lead:created"), 1);

        registry.dispatch(&InboundEvent::new("lead:created", json!({})));
        assert_eq!(count.load(Ordering::SeqCst), 1);

        first.unsubscribe();
        assert_eq!(registry.listener_count("lead:created"), 1);
        registry.dispatch(&InboundEvent::new("lead:created", json!({})));
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_unsubscribe_is_idempotent() {
        let registry = SubscriptionRegistry::new();
        let (_, handler) = counter();

        let first = registry.subscribe("deal:updated", handler.clone());
        let second = registry.subscribe("deal:updated", handler);

        first.unsubscribe();
        first.unsubscribe();
        assert_eq!(registry.listener_count("deal:updated"), 1);
        assert!(!first.is_active());

        second.unsubscribe();
        assert_eq!(registry.listener_count("deal:updated"), 0);
        assert!(registry.event_names().is_empty());
    }

    #[test]
    fn test_dispatch_follows_registration_order() {
        let registry = SubscriptionRegistry::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        for tag in ["a", "b", "c"] {
            let seen = Arc::clone(&seen);
            registry.subscribe(
                "load:updated",
                EventHandler::new(move |_| seen.lock().push(tag)),
            );
        }

        let invoked = registry.dispatch(&InboundEvent::new("load:updated", json!(null)));
        assert_eq!(invoked, 3);
        assert_eq!(*seen.lock(), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_panicking_handler_does_not_stop_dispatch() {
        let registry = SubscriptionRegistry::new();
        let (count, handler) = counter();

        registry.subscribe("invoice:paid", EventHandler::new(|_| panic!("handler bug")));
        registry.subscribe("invoice:paid", handler);

        registry.dispatch(&InboundEvent::new("invoice:paid", json!({"id": 1})));
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_unknown_event_and_noop_subscription() {
        let registry = SubscriptionRegistry::new();
        assert_eq!(registry.dispatch(&InboundEvent::new("nobody", json!(1))), 0);

        let noop = Subscription::noop();
        assert!(!noop.is_active());
        noop.unsubscribe();
    }

    #[test]
    fn test_unsubscribe_after_clear_is_silent() {
        let registry = SubscriptionRegistry::new();
        let (_, handler) = counter();
        let sub = registry.subscribe("user:updated", handler);

        registry.clear();
        sub.unsubscribe();
        assert_eq!(registry.handler_count(), 0);
    }

    #[test]
    fn test_entity_reference_counting() {
        let registry = SubscriptionRegistry::new();
        let lead = EntityRef::new("lead", 7);

        assert!(registry.retain_entity(lead.clone()));
        assert!(!registry.retain_entity(lead.clone()));
        assert!(registry.retain_entity(EntityRef::new("load", "L-100")));
        assert_eq!(registry.entities().len(), 2);

        assert!(!registry.release_entity(&lead));
        assert!(registry.release_entity(&lead));
        assert!(!registry.release_entity(&lead));
        assert_eq!(registry.entities(), vec![EntityRef::new("load", "L-100")]);
    }

    #[test]
    fn test_entity_id_from_json() {
        assert_eq!(EntityId::from_json(&json!(7)), Some(EntityId::Int(7)));
        assert_eq!(
            EntityId::from_json(&json!("abc")),
            Some(EntityId::Str("abc".to_string()))
        );
        assert_eq!(EntityId::from_json(&json!("")), None);
        assert_eq!(EntityId::from_json(&json!(null)), None);
        assert_eq!(EntityRef::new("lead", 7).to_string(), "lead:7");
    }
}
