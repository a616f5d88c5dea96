//! `cat_care_tracker.log_*` and `cat_care_tracker.refresh` services

use std::sync::Arc;

use cct_config_entries::ConfigEntries;
use cct_core::{ServiceCall, SupportsResponse};
use cct_service_registry::{ServiceDescription, ServiceError, ServiceRegistry, ServiceResult};
use cct_sheets::{CheckinType, NewEntry};
use serde::de::{self, Deserializer};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{error, info, warn};

use crate::consts::{
    ATTR_BG_LEVEL, ATTR_CHECKIN_TYPES, ATTR_CONFIG_ENTRY_ID, ATTR_TIME, ATTR_WATER_REFILL, DOMAIN,
    SERVICE_LOG_BLOOD_GLUCOSE, SERVICE_LOG_ENTRY, SERVICE_LOG_FEEDING, SERVICE_LOG_INSULIN,
    SERVICE_LOG_WATER, SERVICE_REFRESH,
};
use crate::Runtimes;

fn one_or_many<'de, D>(deserializer: D) -> Result<Vec<CheckinType>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(CheckinType),
        Many(Vec<CheckinType>),
    }

    Ok(match OneOrMany::deserialize(deserializer)? {
        OneOrMany::One(t) => vec![t],
        OneOrMany::Many(ts) => ts,
    })
}

/// Integer, or a string holding one
fn opt_int<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<Value>::deserialize(deserializer)? {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(n)) => n
            .as_i64()
            .map(Some)
            .ok_or_else(|| de::Error::custom(format!("expected an integer, got {}", n))),
        Some(Value::String(s)) => s
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| de::Error::custom(format!("expected an integer, got {:?}", s))),
        Some(other) => Err(de::Error::custom(format!("expected an integer, got {}", other))),
    }
}

/// String, with numbers accepted as their text
fn opt_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<Value>::deserialize(deserializer)? {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s)),
        Some(Value::Number(n)) => Ok(Some(n.to_string())),
        Some(other) => Err(de::Error::custom(format!("expected a string, got {}", other))),
    }
}

#[derive(Debug, Deserialize)]
struct LogEntryData {
    #[serde(deserialize_with = "one_or_many")]
    checkin_types: Vec<CheckinType>,
    #[serde(default, deserialize_with = "opt_string")]
    water_refill: Option<String>,
    #[serde(default, deserialize_with = "opt_int")]
    bg_level: Option<i64>,
    #[serde(default, deserialize_with = "opt_string")]
    time: Option<String>,
    #[serde(default)]
    config_entry_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RefreshData {
    #[serde(default)]
    config_entry_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct LogTimeData {
    #[serde(default, deserialize_with = "opt_string")]
    time: Option<String>,
    #[serde(default)]
    config_entry_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct LogWaterData {
    #[serde(default, deserialize_with = "opt_string")]
    water_refill: Option<String>,
    #[serde(default, deserialize_with = "opt_string")]
    time: Option<String>,
    #[serde(default)]
    config_entry_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct LogBloodGlucoseData {
    #[serde(default, deserialize_with = "opt_int")]
    bg_level: Option<i64>,
    #[serde(default, deserialize_with = "opt_string")]
    time: Option<String>,
    #[serde(default)]
    config_entry_id: Option<String>,
}

fn integer_field() -> Value {
    json!({"anyOf": [
        {"type": "integer"},
        {"type": "string", "pattern": "^\\s*-?[0-9]+\\s*$"}
    ]})
}

fn text_field() -> Value {
    json!({"type": ["string", "number"]})
}

fn schema(properties: Value, required: &[&str]) -> Value {
    let mut properties = properties;
    if let Some(map) = properties.as_object_mut() {
        map.insert(ATTR_TIME.into(), text_field());
        map.insert(ATTR_CONFIG_ENTRY_ID.into(), json!({"type": "string"}));
    }
    let mut schema = json!({
        "type": "object",
        "properties": properties,
        "additionalProperties": false
    });
    if !required.is_empty() {
        schema["required"] = json!(required);
    }
    schema
}

fn log_entry_schema() -> Value {
    let types: Vec<&str> = CheckinType::ALL.iter().map(CheckinType::as_str).collect();
    let one_type = json!({"type": "string", "enum": types});
    schema(
        json!({
            ATTR_CHECKIN_TYPES: {"anyOf": [one_type, {"type": "array", "items": one_type}]},
            ATTR_WATER_REFILL: text_field(),
            ATTR_BG_LEVEL: integer_field(),
        }),
        &[ATTR_CHECKIN_TYPES],
    )
}

/// Shared state the handlers resolve their target entry from
#[derive(Clone)]
struct ServiceContext {
    config_entries: Arc<ConfigEntries>,
    runtimes: Runtimes,
}

impl ServiceContext {
    /// Append `entry` to the target entry's sheet, then refresh its sensors
    async fn log(&self, what: &str, target: Option<String>, entry: NewEntry) -> ServiceResult {
        let entry_id = self.resolve(target)?;
        let (source, coordinator) = {
            let runtime = self
                .runtimes
                .get(&entry_id)
                .ok_or_else(|| ServiceError::CallFailed(format!("config entry {} is not loaded", entry_id)))?;
            (runtime.source.clone(), runtime.coordinator.clone())
        };

        let client = source.client().await.map_err(|e| {
            error!(entry_id = %entry_id, "Failed to log {}: {}", what, e);
            ServiceError::CallFailed(e.to_string())
        })?;

        if client.append_entry(&entry).await {
            info!(entry_id = %entry_id, "Logged {}", what);
            coordinator.refresh().await;
        } else {
            error!(entry_id = %entry_id, "Failed to log {}", what);
        }
        Ok(None)
    }

    /// Debounced re-read of the target entry's sheet
    ///
    /// Responds with when the sheet was last read successfully.
    async fn refresh(&self, target: Option<String>) -> ServiceResult {
        let entry_id = self.resolve(target)?;
        let coordinator = self
            .runtimes
            .get(&entry_id)
            .map(|runtime| runtime.coordinator.clone())
            .ok_or_else(|| ServiceError::CallFailed(format!("config entry {} is not loaded", entry_id)))?;

        coordinator.request_refresh().await;
        Ok(Some(json!({
            "config_entry_id": entry_id,
            "last_update": coordinator.last_update().map(|t| t.to_rfc3339()),
            "last_update_success": coordinator.last_update_success(),
        })))
    }

    /// Requested entry id, or the oldest entry that finished setup
    fn resolve(&self, target: Option<String>) -> Result<String, ServiceError> {
        if let Some(entry_id) = target {
            return Ok(entry_id);
        }
        self.config_entries
            .get_by_domain(DOMAIN)
            .into_iter()
            .map(|entry| entry.entry_id)
            .find(|entry_id| self.runtimes.contains_key(entry_id))
            .ok_or_else(|| ServiceError::CallFailed("no Cat Care Tracker entry is loaded".into()))
    }
}

fn parse<T: serde::de::DeserializeOwned>(call: &ServiceCall) -> Result<T, ServiceError> {
    call.data()
        .map_err(|e| ServiceError::InvalidData(e.to_string()))
}

/// Register the domain services unless another entry already did
pub fn register_services(
    services: &ServiceRegistry,
    config_entries: Arc<ConfigEntries>,
    runtimes: Runtimes,
) -> Result<(), ServiceError> {
    if services.has_service(DOMAIN, SERVICE_LOG_ENTRY) {
        return Ok(());
    }
    let ctx = ServiceContext {
        config_entries,
        runtimes,
    };

    let c = ctx.clone();
    services.register_with_description(
        ServiceDescription::new(DOMAIN, SERVICE_LOG_ENTRY)
            .with_name("Log entry")
            .with_description("Log a check-in with any combination of types")
            .with_schema(log_entry_schema()),
        move |call| {
            let c = c.clone();
            async move {
                let data: LogEntryData = parse(&call)?;
                if data.checkin_types.is_empty() {
                    error!("No check-in types provided");
                    return Ok(None);
                }
                let entry = NewEntry::new(data.checkin_types)
                    .with_water_refill(data.water_refill)
                    .with_bg_level(data.bg_level)
                    .with_time(data.time);
                c.log("entry", data.config_entry_id, entry).await
            }
        },
    )?;

    for (service, what, checkin_type) in [
        (SERVICE_LOG_FEEDING, "feeding", CheckinType::Food),
        (SERVICE_LOG_INSULIN, "insulin", CheckinType::Insulin),
    ] {
        let c = ctx.clone();
        services.register_with_description(
            ServiceDescription::new(DOMAIN, service)
                .with_name(format!("Log {}", what))
                .with_schema(schema(json!({}), &[])),
            move |call| {
                let c = c.clone();
                async move {
                    let data: LogTimeData = parse(&call)?;
                    let entry = NewEntry::new(vec![checkin_type]).with_time(data.time);
                    c.log(what, data.config_entry_id, entry).await
                }
            },
        )?;
    }

    let c = ctx.clone();
    services.register_with_description(
        ServiceDescription::new(DOMAIN, SERVICE_LOG_WATER)
            .with_name("Log water")
            .with_schema(schema(json!({ATTR_WATER_REFILL: text_field()}), &[])),
        move |call| {
            let c = c.clone();
            async move {
                let data: LogWaterData = parse(&call)?;
                let entry = NewEntry::new(vec![CheckinType::Water])
                    .with_water_refill(data.water_refill)
                    .with_time(data.time);
                c.log("water", data.config_entry_id, entry).await
            }
        },
    )?;

    let c = ctx.clone();
    services.register_with_description(
        ServiceDescription::new(DOMAIN, SERVICE_LOG_BLOOD_GLUCOSE)
            .with_name("Log blood glucose")
            .with_schema(schema(json!({ATTR_BG_LEVEL: integer_field()}), &[ATTR_BG_LEVEL])),
        move |call| {
            let c = c.clone();
            async move {
                let data: LogBloodGlucoseData = parse(&call)?;
                let Some(bg_level) = data.bg_level.filter(|level| *level != 0) else {
                    error!("Blood glucose level is required");
                    return Ok(None);
                };
                let entry = NewEntry::new(vec![CheckinType::BloodGlucose])
                    .with_bg_level(Some(bg_level))
                    .with_time(data.time);
                c.log("blood glucose", data.config_entry_id, entry).await
            }
        },
    )?;

    let c = ctx;
    services.register_with_description(
        ServiceDescription::new(DOMAIN, SERVICE_REFRESH)
            .with_name("Refresh")
            .with_description("Re-read the sheet, at most once per cooldown")
            .with_schema(json!({
                "type": "object",
                "properties": {ATTR_CONFIG_ENTRY_ID: {"type": "string"}},
                "additionalProperties": false
            }))
            .with_supports_response(SupportsResponse::Optional),
        move |call| {
            let c = c.clone();
            async move {
                let data: RefreshData = parse(&call)?;
                c.refresh(data.config_entry_id).await
            }
        },
    )?;

    Ok(())
}

/// Remove the domain services
pub fn unregister_services(services: &ServiceRegistry) {
    let removed = services.unregister_domain(DOMAIN);
    if removed == 0 {
        warn!("No {} services were registered", DOMAIN);
    }
}
