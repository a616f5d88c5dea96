//! Entity state machine with domain indexing
//!
//! Holds the current state of every entity the integration exposes and fires
//! `state_changed` on the event bus for each write and removal.

use cct_core::events::StateChangedData;
use cct_core::{Context, EntityId, State};
use cct_event_bus::EventBus;
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, instrument, trace};

/// Current state of all entities
pub struct StateMachine {
    /// All entity states keyed by entity_id string
    states: DashMap<String, State>,
    /// Index of entity_ids by domain
    domain_index: DashMap<String, Vec<String>>,
    event_bus: Arc<EventBus>,
}

impl StateMachine {
    pub fn new(event_bus: Arc<EventBus>) -> Self {
        Self {
            states: DashMap::new(),
            domain_index: DashMap::new(),
            event_bus,
        }
    }

    /// Set the state of an entity
    ///
    /// `last_changed` only moves when the state value differs from the
    /// previous one. Fires STATE_CHANGED with the old and new state.
    #[instrument(skip(self, state, attributes, context), fields(entity_id = %entity_id))]
    pub fn set(
        &self,
        entity_id: EntityId,
        state: impl Into<String>,
        attributes: HashMap<String, serde_json::Value>,
        context: Context,
    ) -> State {
        let key = entity_id.to_string();
        let old_state = self.states.get(&key).map(|s| s.clone());

        let new_state = match &old_state {
            Some(existing) => existing.with_update(state, attributes, context.clone()),
            None => State::new(entity_id.clone(), state, attributes, context.clone()),
        };

        debug!(
            state = %new_state.state,
            changed = old_state.as_ref().map(|s| s.state != new_state.state).unwrap_or(true),
            "Setting entity state"
        );

        self.states.insert(key.clone(), new_state.clone());

        if old_state.is_none() {
            self.domain_index
                .entry(entity_id.domain().to_string())
                .or_default()
                .push(key);
        }

        self.event_bus.fire_typed(
            StateChangedData {
                entity_id,
                old_state,
                new_state: Some(new_state.clone()),
            },
            context,
        );

        new_state
    }

    pub fn get(&self, entity_id: &str) -> Option<State> {
        self.states.get(entity_id).map(|s| s.clone())
    }

    /// Get the state value as a string
    pub fn get_state(&self, entity_id: &str) -> Option<String> {
        self.states.get(entity_id).map(|s| s.state.clone())
    }

    /// Get all entity IDs for a domain
    pub fn entity_ids(&self, domain: &str) -> Vec<String> {
        self.domain_index
            .get(domain)
            .map(|v| v.clone())
            .unwrap_or_default()
    }

    pub fn contains(&self, entity_id: &str) -> bool {
        self.states.contains_key(entity_id)
    }

    /// Get all states
    pub fn all(&self) -> Vec<State> {
        self.states.iter().map(|r| r.value().clone()).collect()
    }

    /// Remove an entity's state, firing STATE_CHANGED with no new state
    #[instrument(skip(self, context), fields(entity_id = %entity_id))]
    pub fn remove(&self, entity_id: &EntityId, context: Context) -> Option<State> {
        let key = entity_id.to_string();
        let old_state = self.states.remove(&key).map(|(_, s)| s);

        if let Some(ref state) = old_state {
            trace!("Removing entity state");

            if let Some(mut ids) = self.domain_index.get_mut(entity_id.domain()) {
                ids.retain(|id| id != &key);
            }

            self.event_bus.fire_typed(
                StateChangedData {
                    entity_id: entity_id.clone(),
                    old_state: Some(state.clone()),
                    new_state: None,
                },
                context,
            );
        }

        old_state
    }

    pub fn entity_count(&self) -> usize {
        self.states.len()
    }
}

/// Thread-safe wrapper for StateMachine
pub type SharedStateMachine = Arc<StateMachine>;

#[cfg(test)]
mod tests {
    use super::*;
    use cct_core::events::STATE_CHANGED;
    use serde_json::json;

    fn setup() -> (Arc<EventBus>, StateMachine) {
        let bus = Arc::new(EventBus::new());
        let sm = StateMachine::new(bus.clone());
        (bus, sm)
    }

    fn sensor(object_id: &str) -> EntityId {
        EntityId::new("sensor", object_id).unwrap()
    }

    #[test]
    fn test_set_and_get() {
        let (_, sm) = setup();
        let attrs = HashMap::from([("icon".to_string(), json!("mdi:counter"))]);

        let state = sm.set(sensor("whiskers_daily_feedings"), "2", attrs.clone(), Context::new());

        assert_eq!(state.state, "2");
        assert_eq!(sm.get_state("sensor.whiskers_daily_feedings").as_deref(), Some("2"));
        assert_eq!(sm.get("sensor.whiskers_daily_feedings").unwrap().attributes, attrs);
    }

    #[test]
    fn test_domain_index_has_no_duplicates_on_rewrite() {
        let (_, sm) = setup();
        sm.set(sensor("a"), "1", HashMap::new(), Context::new());
        sm.set(sensor("a"), "2", HashMap::new(), Context::new());
        sm.set(sensor("b"), "1", HashMap::new(), Context::new());

        let ids = sm.entity_ids("sensor");
        assert_eq!(ids.len(), 2);
        assert_eq!(sm.entity_count(), 2);
    }

    #[tokio::test]
    async fn test_set_fires_state_changed() {
        let (bus, sm) = setup();
        let mut rx = bus.subscribe(STATE_CHANGED);

        sm.set(sensor("whiskers_last_water"), "unknown", HashMap::new(), Context::new());

        let event = rx.recv().await.unwrap();
        assert_eq!(event.data["entity_id"], "sensor.whiskers_last_water");
        assert!(event.data["old_state"].is_null());
        assert_eq!(event.data["new_state"]["state"], "unknown");
    }

    #[tokio::test]
    async fn test_remove() {
        let (bus, sm) = setup();
        let id = sensor("whiskers_last_bg");
        sm.set(id.clone(), "unknown", HashMap::new(), Context::new());

        let mut rx = bus.subscribe(STATE_CHANGED);
        let removed = sm.remove(&id, Context::new());

        assert!(removed.is_some());
        assert!(!sm.contains("sensor.whiskers_last_bg"));
        assert!(sm.entity_ids("sensor").is_empty());
        let event = rx.recv().await.unwrap();
        assert!(event.data["new_state"].is_null());

        assert!(sm.remove(&id, Context::new()).is_none());
    }
}
