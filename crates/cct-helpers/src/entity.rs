//! Sensor entity model
//!
//! Integrations implement [`SensorEntity`]; an [`EntityPlatform`] owns the
//! entities of one config entry, assigns their entity ids and writes their
//! rendered state into the state machine.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, Weak};

use cct_core::{slugify, Context, EntityId, EntityIdError, STATE_UNAVAILABLE, STATE_UNKNOWN};
use cct_state_machine::StateMachine;
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::debug;

use crate::update_coordinator::{DataUpdateCoordinator, ListenerId};

pub const SENSOR_DOMAIN: &str = "sensor";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceInfo {
    pub identifiers: Vec<(String, String)>,
    pub name: String,
    pub manufacturer: String,
    pub model: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SensorDeviceClass {
    Timestamp,
}

impl SensorDeviceClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            SensorDeviceClass::Timestamp => "timestamp",
        }
    }
}

pub trait SensorEntity: Send + Sync {
    fn unique_id(&self) -> String;

    fn name(&self) -> String;

    fn device_info(&self) -> Option<DeviceInfo> {
        None
    }

    fn device_class(&self) -> Option<SensorDeviceClass> {
        None
    }

    fn icon(&self) -> Option<&'static str> {
        None
    }

    fn available(&self) -> bool {
        true
    }

    fn native_value(&self) -> Option<Value>;

    fn extra_state_attributes(&self) -> Map<String, Value> {
        Map::new()
    }
}

/// State string and attributes for an entity
///
/// Unavailable entities render as `unavailable` and drop their extra
/// attributes; a missing value renders as `unknown`.
pub fn render_state(entity: &dyn SensorEntity) -> (String, HashMap<String, Value>) {
    let available = entity.available();

    let state = if !available {
        STATE_UNAVAILABLE.to_string()
    } else {
        match entity.native_value() {
            None | Some(Value::Null) => STATE_UNKNOWN.to_string(),
            Some(Value::String(s)) => s,
            Some(other) => other.to_string(),
        }
    };

    let mut attributes: HashMap<String, Value> = if available {
        entity.extra_state_attributes().into_iter().collect()
    } else {
        HashMap::new()
    };
    attributes.insert("friendly_name".into(), Value::String(entity.name()));
    if let Some(icon) = entity.icon() {
        attributes.insert("icon".into(), Value::String(icon.to_string()));
    }
    if let Some(device_class) = entity.device_class() {
        attributes.insert("device_class".into(), Value::String(device_class.as_str().to_string()));
    }

    (state, attributes)
}

struct RegisteredEntity {
    entity_id: EntityId,
    entity: Arc<dyn SensorEntity>,
}

/// Sensor entities of one integration entry
pub struct EntityPlatform {
    platform: String,
    states: Arc<StateMachine>,
    entities: Mutex<Vec<RegisteredEntity>>,
}

impl EntityPlatform {
    pub fn new(platform: impl Into<String>, states: Arc<StateMachine>) -> Self {
        Self {
            platform: platform.into(),
            states,
            entities: Mutex::new(Vec::new()),
        }
    }

    pub fn platform(&self) -> &str {
        &self.platform
    }

    /// Assign entity ids and write initial states
    ///
    /// Ids are `sensor.<slug of name>`; taken ids get `_2`, `_3`, ... appended.
    pub fn add_entities(
        &self,
        new_entities: Vec<Arc<dyn SensorEntity>>,
    ) -> Result<Vec<EntityId>, EntityIdError> {
        let mut added = Vec::with_capacity(new_entities.len());
        {
            let mut entities = self.lock();
            for entity in new_entities {
                let entity_id = self.allocate_entity_id(&entities, &entity.name())?;
                debug!(
                    platform = %self.platform,
                    entity_id = %entity_id,
                    unique_id = %entity.unique_id(),
                    "Adding entity"
                );
                added.push(entity_id.clone());
                entities.push(RegisteredEntity { entity_id, entity });
            }
        }

        self.write_states();
        Ok(added)
    }

    fn allocate_entity_id(
        &self,
        taken: &[RegisteredEntity],
        name: &str,
    ) -> Result<EntityId, EntityIdError> {
        let base = slugify(name);
        let is_free = |candidate: &str| {
            let full = format!("{}.{}", SENSOR_DOMAIN, candidate);
            !self.states.contains(&full)
                && !taken.iter().any(|e| e.entity_id.to_string() == full)
        };

        let mut object_id = base.clone();
        let mut suffix = 2;
        while !is_free(&object_id) {
            object_id = format!("{}_{}", base, suffix);
            suffix += 1;
        }
        EntityId::new(SENSOR_DOMAIN, object_id)
    }

    /// Re-render every entity into the state machine
    pub fn write_states(&self) {
        let entities = self.lock();
        for registered in entities.iter() {
            let (state, attributes) = render_state(registered.entity.as_ref());
            self.states
                .set(registered.entity_id.clone(), state, attributes, Context::new());
        }
    }

    /// Re-render whenever `coordinator` finishes an update
    pub fn track_coordinator<T: Send + Sync + 'static>(
        self: &Arc<Self>,
        coordinator: &DataUpdateCoordinator<T>,
    ) -> ListenerId {
        let platform: Weak<Self> = Arc::downgrade(self);
        coordinator.add_listener(move || {
            if let Some(platform) = platform.upgrade() {
                platform.write_states();
            }
        })
    }

    /// Remove every entity's state
    pub fn remove_all(&self) {
        let mut entities = self.lock();
        for registered in entities.drain(..) {
            self.states.remove(&registered.entity_id, Context::new());
        }
        debug!(platform = %self.platform, "Removed all entities");
    }

    pub fn entity_ids(&self) -> Vec<EntityId> {
        self.lock().iter().map(|e| e.entity_id.clone()).collect()
    }

    /// Entity id assigned to a unique id
    pub fn entity_id_for(&self, unique_id: &str) -> Option<EntityId> {
        self.lock()
            .iter()
            .find(|e| e.entity.unique_id() == unique_id)
            .map(|e| e.entity_id.clone())
    }

    /// Distinct devices the entities belong to
    pub fn devices(&self) -> Vec<DeviceInfo> {
        let mut devices: Vec<DeviceInfo> = Vec::new();
        for registered in self.lock().iter() {
            if let Some(device) = registered.entity.device_info() {
                if !devices.contains(&device) {
                    devices.push(device);
                }
            }
        }
        devices
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<RegisteredEntity>> {
        self.entities.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
