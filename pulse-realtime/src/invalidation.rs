//! Maps inbound server events to query-cache invalidations.

use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

use crate::client::RealtimeClient;
use crate::registry::{EntityId, EventHandler, InboundEvent, Subscription};
use crate::transport::events;

/// The application's query cache.
pub trait QueryCache: Send + Sync {
    /// Marks every cached query whose key starts with `prefix` as stale.
    fn invalidate(&self, prefix: &str);
}

/// One event → cache-prefix mapping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidationRule {
    /// Event name.
    pub event: String,
    /// Prefixes to invalidate. The first one is the entity collection.
    pub prefixes: Vec<String>,
}

/// Immutable table of invalidation rules.
#[derive(Debug, Clone, Default)]
pub struct InvalidationRules {
    rules: Vec<InvalidationRule>,
    index: HashMap<String, usize>,
    collections: HashMap<String, String>,
}

const ENTITY_COLLECTIONS: &[(&str, &str)] = &[
    ("lead", "/api/leads"),
    ("contact", "/api/contacts"),
    ("deal", "/api/deals"),
    ("load", "/api/loads"),
    ("carrier", "/api/carriers"),
    ("driver", "/api/drivers"),
    ("invoice", "/api/invoices"),
    ("payment", "/api/payments"),
    ("employee", "/api/employees"),
    ("user", "/api/users"),
    ("notification", "/api/notifications"),
];

const LIFECYCLE_ACTIONS: &[&str] = &["created", "updated", "deleted"];

impl InvalidationRules {
    /// Creates an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The table used by the business application.
    ///
    /// Every entity type gets `created`, `updated` and `deleted` events
    /// invalidating its collection; a few events fan out to related views.
    #[must_use]
    pub fn standard() -> Self {
        let mut rules = Self::new();
        for (entity_type, collection) in ENTITY_COLLECTIONS {
            rules = rules.collection(*entity_type, *collection);
            for action in LIFECYCLE_ACTIONS {
                rules = rules.rule(format!("{entity_type}:{action}"), [*collection]);
            }
        }

        rules
            .rule("deal:stage_changed", ["/api/deals", "/api/pipeline"])
            .rule("load:status_changed", ["/api/loads", "/api/dispatch"])
            .rule("load:assigned", ["/api/loads", "/api/drivers", "/api/dispatch"])
            .rule("invoice:paid", ["/api/invoices", "/api/payments"])
            .rule("payment:received", ["/api/payments", "/api/invoices"])
            .rule("notification:new", ["/api/notifications"])
    }

    /// Adds (or replaces) the rule for `event`.
    #[must_use]
    pub fn rule<I, S>(mut self, event: impl Into<String>, prefixes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let rule = InvalidationRule {
            event: event.into(),
            prefixes: prefixes.into_iter().map(Into::into).collect(),
        };
        match self.index.get(&rule.event) {
            Some(&i) => self.rules[i] = rule,
            None => {
                self.index.insert(rule.event.clone(), self.rules.len());
                self.rules.push(rule);
            }
        }
        self
    }

    /// Maps an entity type (as carried by `data:updated`) to its collection.
    #[must_use]
    pub fn collection(mut self, entity_type: impl Into<String>, prefix: impl Into<String>) -> Self {
        self.collections.insert(entity_type.into(), prefix.into());
        self
    }

    /// Every event the bridge needs to listen to.
    #[must_use]
    pub fn event_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.rules.iter().map(|r| r.event.clone()).collect();
        if !self.collections.is_empty() && !self.index.contains_key(events::DATA_UPDATED) {
            names.push(events::DATA_UPDATED.to_string());
        }
        names
    }

    /// Looks up the rule for `event`.
    #[must_use]
    pub fn get(&self, event: &str) -> Option<&InvalidationRule> {
        self.index.get(event).map(|&i| &self.rules[i])
    }

    /// Cache keys to invalidate for one inbound event.
    #[must_use]
    pub fn keys_for(&self, event: &InboundEvent) -> Vec<String> {
        let mut keys = Vec::new();

        if let Some(rule) = self.get(&event.name) {
            keys.extend(rule.prefixes.iter().cloned());
            if let (Some(collection), Some(id)) = (rule.prefixes.first(), entity_id(&event.data)) {
                keys.push(format!("{collection}/{id}"));
            }
        } else if event.name == events::DATA_UPDATED {
            let entity_type = event.data.get("entityType").and_then(Value::as_str);
            match entity_type.and_then(|t| self.collections.get(t)) {
                Some(collection) => {
                    keys.push(collection.clone());
                    if let Some(id) = event.data.get("entityId").and_then(EntityId::from_json) {
                        keys.push(format!("{collection}/{id}"));
                    }
                }
                None => debug!(entity_type = ?entity_type, "No collection mapped for data:updated"),
            }
        }

        let mut seen = std::collections::HashSet::new();
        keys.retain(|key| seen.insert(key.clone()));
        keys
    }
}

fn entity_id(data: &Value) -> Option<EntityId> {
    data.get("entityId")
        .and_then(EntityId::from_json)
        .or_else(|| data.get("id").and_then(EntityId::from_json))
}

/// Invalidates cached queries when matching server events arrive.
#[derive(Clone)]
pub struct CacheInvalidationBridge {
    rules: Arc<InvalidationRules>,
    cache: Arc<dyn QueryCache>,
}

impl std::fmt::Debug for CacheInvalidationBridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheInvalidationBridge")
            .field("rules", &self.rules.rules.len())
            .finish_non_exhaustive()
    }
}

impl CacheInvalidationBridge {
    /// Creates a bridge over `cache`.
    pub fn new(rules: InvalidationRules, cache: Arc<dyn QueryCache>) -> Self {
        Self {
            rules: Arc::new(rules),
            cache,
        }
    }

    /// Bridge with [`InvalidationRules::standard`].
    pub fn standard(cache: Arc<dyn QueryCache>) -> Self {
        Self::new(InvalidationRules::standard(), cache)
    }

    /// Invalidates the keys mapped for `event`. Returns how many.
    pub fn handle(&self, event: &InboundEvent) -> usize {
        let keys = self.rules.keys_for(event);
        for key in &keys {
            self.cache.invalidate(key);
        }
        if !keys.is_empty() {
            debug!(event = %event.name, keys = ?keys, "Invalidated cached queries");
        }
        keys.len()
    }

    /// Subscribes the bridge to every mapped event on `client`.
    pub fn install(&self, client: &RealtimeClient) -> Vec<Subscription> {
        let bridge = self.clone();
        let handler = EventHandler::new(move |event| {
            bridge.handle(event);
        });
        self.rules
            .event_names()
            .iter()
            .map(|name| client.subscribe(name, handler.clone()))
            .collect()
    }
}
