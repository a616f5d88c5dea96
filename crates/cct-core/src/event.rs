//! Events fired on the host bus
//!
//! Only two kinds are fired: `state_changed` when a sensor is written and
//! `call_service` when one of the `log_*` services is dispatched. Listeners
//! receive them as JSON; `EventData` ties a payload struct to its type name.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{Context, EntityId, State};

pub const STATE_CHANGED: &str = "state_changed";
pub const CALL_SERVICE: &str = "call_service";

/// Subscribing to this type receives every event
pub const MATCH_ALL: &str = "*";

/// A payload with a fixed event type
pub trait EventData: Serialize + Clone + Send + Sync + 'static {
    fn event_type() -> &'static str;
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventType(String);

impl EventType {
    pub fn new(event_type: impl Into<String>) -> Self {
        Self(event_type.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn match_all() -> Self {
        Self(MATCH_ALL.to_string())
    }

    pub fn is_match_all(&self) -> bool {
        self.0 == MATCH_ALL
    }
}

impl From<&str> for EventType {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event<T = serde_json::Value> {
    pub event_type: EventType,
    pub data: T,
    pub time_fired: DateTime<Utc>,
    pub context: Context,
}

impl<T> Event<T> {
    pub fn new(event_type: impl Into<EventType>, data: T, context: Context) -> Self {
        Self {
            event_type: event_type.into(),
            data,
            time_fired: Utc::now(),
            context,
        }
    }
}

/// A sensor was written, removed or first created
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateChangedData {
    pub entity_id: EntityId,
    /// None when the entity is new
    pub old_state: Option<State>,
    /// None when the entity was removed
    pub new_state: Option<State>,
}

impl EventData for StateChangedData {
    fn event_type() -> &'static str {
        STATE_CHANGED
    }
}

/// A service call passed validation and is about to run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallServiceData {
    pub domain: String,
    pub service: String,
    pub service_data: serde_json::Value,
}

impl EventData for CallServiceData {
    fn event_type() -> &'static str {
        CALL_SERVICE
    }
}
