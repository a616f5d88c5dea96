//! Sensors exposing the latest poll of an entry

use std::sync::Arc;

use cct_helpers::{DeviceInfo, SensorDeviceClass, SensorEntity};
use cct_sheets::{CheckinType, COL_BG_LEVEL, COL_CHECKIN_TYPE, COL_WATER_REFILL};
use chrono::{Local, TimeZone};
use serde_json::{json, Map, Value};

use crate::consts::{ATTR_BG_LEVEL, ATTR_CHECKIN_TYPES, ATTR_WATER_REFILL, DOMAIN};
use crate::coordinator::{TrackerCoordinator, TrackerData};

/// Identity shared by all sensors of one entry
#[derive(Clone)]
struct SensorBase {
    coordinator: Arc<TrackerCoordinator>,
    entry_id: String,
    cat_name: String,
    sensor_id: &'static str,
    name: &'static str,
}

impl SensorBase {
    fn unique_id(&self) -> String {
        format!("{}_{}", self.entry_id, self.sensor_id)
    }

    fn name(&self) -> String {
        format!("{} {}", self.cat_name, self.name)
    }

    fn device_info(&self) -> DeviceInfo {
        DeviceInfo {
            identifiers: vec![(DOMAIN.to_string(), self.entry_id.clone())],
            name: format!("{} Care Tracker", self.cat_name),
            manufacturer: "Cat Care Tracker".to_string(),
            model: "Google Sheets Integration".to_string(),
        }
    }

    fn available(&self) -> bool {
        self.coordinator.last_update_success()
    }

    fn data(&self) -> Option<Arc<TrackerData>> {
        self.coordinator.data()
    }
}

/// When a check-in type was last logged
pub struct LastCheckinSensor {
    base: SensorBase,
    checkin_type: CheckinType,
}

impl SensorEntity for LastCheckinSensor {
    fn unique_id(&self) -> String {
        self.base.unique_id()
    }

    fn name(&self) -> String {
        self.base.name()
    }

    fn device_info(&self) -> Option<DeviceInfo> {
        Some(self.base.device_info())
    }

    fn device_class(&self) -> Option<SensorDeviceClass> {
        Some(SensorDeviceClass::Timestamp)
    }

    fn available(&self) -> bool {
        self.base.available()
    }

    fn native_value(&self) -> Option<Value> {
        let data = self.base.data()?;
        let naive = data.last_entry(self.checkin_type)?.parsed_date()?;
        let local = Local.from_local_datetime(&naive).earliest()?;
        Some(Value::String(local.to_rfc3339()))
    }

    fn extra_state_attributes(&self) -> Map<String, Value> {
        let mut attrs = Map::new();
        let Some(data) = self.base.data() else {
            return attrs;
        };
        let Some(entry) = data.last_entry(self.checkin_type) else {
            return attrs;
        };

        attrs.insert(ATTR_CHECKIN_TYPES.into(), json!(entry.get(COL_CHECKIN_TYPE).unwrap_or_default()));
        match self.checkin_type {
            CheckinType::Water => {
                attrs.insert(ATTR_WATER_REFILL.into(), json!(entry.get(COL_WATER_REFILL).unwrap_or_default()));
            }
            CheckinType::BloodGlucose => {
                attrs.insert(ATTR_BG_LEVEL.into(), json!(entry.get(COL_BG_LEVEL).unwrap_or_default()));
            }
            _ => {}
        }
        attrs
    }
}

/// How many times a check-in type was logged today
pub struct DailyCountSensor {
    base: SensorBase,
    checkin_type: CheckinType,
}

impl SensorEntity for DailyCountSensor {
    fn unique_id(&self) -> String {
        self.base.unique_id()
    }

    fn name(&self) -> String {
        self.base.name()
    }

    fn device_info(&self) -> Option<DeviceInfo> {
        Some(self.base.device_info())
    }

    fn icon(&self) -> Option<&'static str> {
        Some("mdi:counter")
    }

    fn available(&self) -> bool {
        self.base.available()
    }

    fn native_value(&self) -> Option<Value> {
        let count = self
            .base
            .data()
            .map(|data| data.today_count(self.checkin_type))
            .unwrap_or_default();
        Some(json!(count))
    }
}

/// Every entry logged today
pub struct TodayEntriesSensor {
    base: SensorBase,
}

impl SensorEntity for TodayEntriesSensor {
    fn unique_id(&self) -> String {
        self.base.unique_id()
    }

    fn name(&self) -> String {
        self.base.name()
    }

    fn device_info(&self) -> Option<DeviceInfo> {
        Some(self.base.device_info())
    }

    fn icon(&self) -> Option<&'static str> {
        Some("mdi:clipboard-list")
    }

    fn available(&self) -> bool {
        self.base.available()
    }

    fn native_value(&self) -> Option<Value> {
        let count = self
            .base
            .data()
            .map(|data| data.today_entries.len())
            .unwrap_or_default();
        Some(json!(count))
    }

    fn extra_state_attributes(&self) -> Map<String, Value> {
        let mut attrs = Map::new();
        let Some(data) = self.base.data() else {
            attrs.insert("entries".into(), json!([]));
            return attrs;
        };

        attrs.insert("entries".into(), json!(data.today_entries));
        attrs.insert("food_count".into(), json!(data.today_count(CheckinType::Food)));
        attrs.insert("insulin_count".into(), json!(data.today_count(CheckinType::Insulin)));
        attrs.insert("water_count".into(), json!(data.today_count(CheckinType::Water)));
        attrs.insert("bg_count".into(), json!(data.today_count(CheckinType::BloodGlucose)));
        attrs
    }
}

/// The seven sensors of one entry
pub fn sensors(
    coordinator: Arc<TrackerCoordinator>,
    entry_id: &str,
    cat_name: &str,
) -> Vec<Arc<dyn SensorEntity>> {
    let base = |sensor_id: &'static str, name: &'static str| SensorBase {
        coordinator: coordinator.clone(),
        entry_id: entry_id.to_string(),
        cat_name: cat_name.to_string(),
        sensor_id,
        name,
    };
    let last = |checkin_type, sensor_id, name| -> Arc<dyn SensorEntity> {
        Arc::new(LastCheckinSensor {
            base: base(sensor_id, name),
            checkin_type,
        })
    };
    let daily = |checkin_type, sensor_id, name| -> Arc<dyn SensorEntity> {
        Arc::new(DailyCountSensor {
            base: base(sensor_id, name),
            checkin_type,
        })
    };

    vec![
        last(CheckinType::Food, "last_feeding", "Last Feeding"),
        last(CheckinType::Insulin, "last_insulin", "Last Insulin"),
        last(CheckinType::Water, "last_water", "Last Water"),
        last(CheckinType::BloodGlucose, "last_bg", "Last Blood Glucose"),
        daily(CheckinType::Food, "daily_feedings", "Daily Feedings"),
        daily(CheckinType::Insulin, "daily_insulin", "Daily Insulin"),
        Arc::new(TodayEntriesSensor {
            base: base("today_entries", "Today's Entries"),
        }),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coordinator::new_coordinator;
    use crate::testing::FakeLog;
    use cct_helpers::render_state;
    use std::time::Duration;

    fn today() -> String {
        Local::now().format("%m/%d/%Y").to_string()
    }

    async fn polled(log: &FakeLog) -> Vec<Arc<dyn SensorEntity>> {
        let coordinator = Arc::new(new_coordinator(Arc::new(log.source()), Duration::from_secs(600)));
        coordinator.refresh().await;
        sensors(coordinator, "entry1", "Whiskers")
    }

    fn by_id<'a>(sensors: &'a [Arc<dyn SensorEntity>], sensor_id: &str) -> &'a dyn SensorEntity {
        sensors
            .iter()
            .find(|s| s.unique_id() == format!("entry1_{}", sensor_id))
            .unwrap()
            .as_ref()
    }

    #[tokio::test]
    async fn test_identity() {
        let sensors = polled(&FakeLog::default()).await;
        assert_eq!(sensors.len(), 7);

        let feeding = by_id(&sensors, "last_feeding");
        assert_eq!(feeding.name(), "Whiskers Last Feeding");
        assert_eq!(feeding.device_class(), Some(SensorDeviceClass::Timestamp));

        let device = feeding.device_info().unwrap();
        assert_eq!(device.name, "Whiskers Care Tracker");
        assert_eq!(device.identifiers, vec![("cat_care_tracker".to_string(), "entry1".to_string())]);
        assert_eq!(device.model, "Google Sheets Integration");

        assert_eq!(by_id(&sensors, "today_entries").name(), "Whiskers Today's Entries");
        assert_eq!(by_id(&sensors, "daily_feedings").icon(), Some("mdi:counter"));
    }

    #[tokio::test]
    async fn test_values_from_poll() {
        let day = today();
        let (food, water, bg) = (
            format!("{} 07:45", day),
            format!("{} 08:10", day),
            format!("{} 08:15", day),
        );
        let log = FakeLog::with_rows(vec![
            vec!["01/01/2024 08:00:00", "01/01/2024 08:00", "Insulin", "", ""],
            vec!["x", food.as_str(), "Food, Insulin", "", ""],
            vec!["x", water.as_str(), "Water", "Full", ""],
            vec!["x", bg.as_str(), "Blood Glucose Measurement", "", "165"],
        ]);
        let sensors = polled(&log).await;

        let feeding = by_id(&sensors, "last_feeding");
        let value = feeding.native_value().unwrap();
        let parsed = chrono::DateTime::parse_from_rfc3339(value.as_str().unwrap()).unwrap();
        assert_eq!(parsed.with_timezone(&Local).format("%H:%M").to_string(), "07:45");
        assert_eq!(feeding.extra_state_attributes()["checkin_types"], "Food, Insulin");

        assert_eq!(by_id(&sensors, "last_water").extra_state_attributes()["water_refill"], "Full");
        assert_eq!(by_id(&sensors, "last_bg").extra_state_attributes()["bg_level"], "165");

        assert_eq!(by_id(&sensors, "daily_feedings").native_value(), Some(json!(1)));
        assert_eq!(by_id(&sensors, "daily_insulin").native_value(), Some(json!(1)));

        let today_sensor = by_id(&sensors, "today_entries");
        assert_eq!(today_sensor.native_value(), Some(json!(3)));
        let attrs = today_sensor.extra_state_attributes();
        assert_eq!(attrs["entries"].as_array().unwrap().len(), 3);
        assert_eq!(attrs["entries"][0]["Checkin Type"], "Blood Glucose Measurement");
        assert_eq!(attrs["water_count"], 1);
        assert_eq!(attrs["bg_count"], 1);
    }

    #[tokio::test]
    async fn test_no_data_rendering() {
        let sensors = polled(&FakeLog::default()).await;

        let (state, attrs) = render_state(by_id(&sensors, "last_insulin"));
        assert_eq!(state, "unknown");
        assert!(!attrs.contains_key("checkin_types"));

        assert_eq!(render_state(by_id(&sensors, "daily_insulin")).0, "0");
        assert_eq!(render_state(by_id(&sensors, "today_entries")).0, "0");
    }

    #[tokio::test]
    async fn test_unparsable_date_is_unknown() {
        let log = FakeLog::with_rows(vec![vec!["x", "last tuesday", "Food"]]);
        let sensors = polled(&log).await;
        assert!(by_id(&sensors, "last_feeding").native_value().is_none());
        assert_eq!(
            by_id(&sensors, "last_feeding").extra_state_attributes()["checkin_types"],
            "Food"
        );
    }

    #[tokio::test]
    async fn test_unavailable_after_failed_poll() {
        let log = FakeLog::with_rows(vec![vec!["x", "03/10/2024", "Food"]]);
        let coordinator = Arc::new(new_coordinator(Arc::new(log.source()), Duration::from_secs(600)));
        coordinator.refresh().await;
        let sensors = sensors(coordinator.clone(), "entry1", "Whiskers");
        assert!(sensors.iter().all(|s| s.available()));

        log.fail_reads(true);
        coordinator.refresh().await;
        for sensor in &sensors {
            assert_eq!(render_state(sensor.as_ref()).0, "unavailable");
        }
    }
}
