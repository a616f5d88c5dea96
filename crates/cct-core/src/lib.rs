//! Core host types for Cat Care Tracker
//!
//! The integration runs on a small home-automation host. This crate holds the
//! types every other crate speaks: EntityId, State, Event, Context and
//! ServiceCall.

mod context;
mod entity_id;
mod event;
mod service_call;
mod state;

pub use context::Context;
pub use entity_id::{slugify, EntityId, EntityIdError};
pub use event::{Event, EventData, EventType};
pub use service_call::{ServiceCall, SupportsResponse};
pub use state::State;

/// State value used when an entity has no value yet
pub const STATE_UNKNOWN: &str = "unknown";

/// State value used when an entity's data source is failing
pub const STATE_UNAVAILABLE: &str = "unavailable";

/// Event types and payloads fired by the host
pub mod events {
    pub use crate::event::{CallServiceData, StateChangedData, CALL_SERVICE, MATCH_ALL, STATE_CHANGED};
}
