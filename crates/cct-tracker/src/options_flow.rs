//! Options flow: rename the cat or switch sheet

use std::sync::{Arc, Weak};

use async_trait::async_trait;
use cct_config_entries::{
    ConfigEntryUpdate, ConfigFlow, FlowContext, FlowError, FlowResult, FlowSource, FormField,
};
use cct_helpers::Hass;
use cct_sheets::DEFAULT_SHEET_NAME;
use serde_json::{Map, Value};
use tracing::{info, warn};

use crate::consts::{CONF_CAT_NAME, CONF_SHEET_NAME, DEFAULT_CAT_NAME};

pub const STEP_INIT: &str = "init";

pub struct CatCareTrackerOptionsFlow {
    hass: Weak<Hass>,
    entry_id: Option<String>,
}

impl CatCareTrackerOptionsFlow {
    pub fn new(hass: Weak<Hass>, context: &FlowContext) -> Self {
        let entry_id = match &context.source {
            FlowSource::Options { entry_id } => Some(entry_id.clone()),
            FlowSource::User => None,
        };
        Self { hass, entry_id }
    }

    async fn step_init(&mut self, input: Option<Value>) -> Result<FlowResult, FlowError> {
        let hass = self
            .hass
            .upgrade()
            .ok_or_else(|| FlowError::InvalidInput("host is shutting down".into()))?;
        let Some(entry_id) = self.entry_id.clone() else {
            return Ok(FlowResult::abort("unknown_entry"));
        };
        let Some(entry) = hass.config_entries.get(&entry_id) else {
            return Ok(FlowResult::abort("unknown_entry"));
        };

        let Some(input) = input else {
            let cat_name = entry.data_str(CONF_CAT_NAME).unwrap_or(DEFAULT_CAT_NAME);
            let sheet_name = entry.data_str(CONF_SHEET_NAME).unwrap_or(DEFAULT_SHEET_NAME);
            return Ok(FlowResult::form(
                STEP_INIT,
                vec![
                    FormField::optional(CONF_CAT_NAME, cat_name),
                    FormField::optional(CONF_SHEET_NAME, sheet_name),
                ],
            ));
        };

        let Value::Object(options) = input else {
            return Err(FlowError::InvalidInput("expected an object".into()));
        };
        let options: Map<String, Value> = options
            .into_iter()
            .filter(|(key, _)| key == CONF_CAT_NAME || key == CONF_SHEET_NAME)
            .collect();

        let mut data = entry.data.clone();
        data.extend(options.clone());
        hass.config_entries
            .update(&entry_id, ConfigEntryUpdate::new().data(data))
            .await?;
        info!(entry_id = %entry_id, "Updated Cat Care Tracker options, reloading");

        if let Err(err) = hass.config_entries.reload(&entry_id).await {
            warn!(entry_id = %entry_id, error = %err, "Reload after options change failed");
        }
        Ok(FlowResult::create_entry("", options, None))
    }
}

#[async_trait]
impl ConfigFlow for CatCareTrackerOptionsFlow {
    async fn async_step(
        &mut self,
        step_id: &str,
        input: Option<Value>,
    ) -> Result<FlowResult, FlowError> {
        match step_id {
            STEP_INIT => self.step_init(input).await,
            other => Err(FlowError::UnknownStep(other.to_string())),
        }
    }
}

/// Build an options flow factory bound to `hass`
pub fn options_flow_factory(hass: Weak<Hass>) -> cct_config_entries::FlowFactory {
    Arc::new(move |context: &FlowContext| {
        Box::new(CatCareTrackerOptionsFlow::new(hass.clone(), context)) as Box<dyn ConfigFlow>
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use cct_config_entries::ConfigEntry;
    use crate::consts::DOMAIN;
    use serde_json::json;

    async fn hass_with_entry() -> (Arc<Hass>, String, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let hass = Arc::new(Hass::new(dir.path(), "http://localhost:8123"));
        let mut data = Map::new();
        data.insert(CONF_CAT_NAME.into(), json!("Whiskers"));
        data.insert("spreadsheet_id".into(), json!("sheet123"));
        let entry = hass
            .config_entries
            .add(ConfigEntry::new(DOMAIN, "Cat Care Tracker - Whiskers").with_data(data))
            .await
            .unwrap();
        (hass, entry.entry_id, dir)
    }

    fn context(entry_id: &str) -> FlowContext {
        FlowContext {
            flow_id: "flow1".into(),
            handler: DOMAIN.into(),
            source: FlowSource::Options {
                entry_id: entry_id.into(),
            },
        }
    }

    #[tokio::test]
    async fn test_form_defaults_from_entry() {
        let (hass, entry_id, _dir) = hass_with_entry().await;
        let mut flow = CatCareTrackerOptionsFlow::new(Arc::downgrade(&hass), &context(&entry_id));

        match flow.async_step(STEP_INIT, None).await.unwrap() {
            FlowResult::Form { data_schema, .. } => {
                assert_eq!(data_schema[0].default, Some(json!("Whiskers")));
                assert_eq!(data_schema[1].default, Some(json!("Sheet1")));
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_submit_merges_into_data() {
        let (hass, entry_id, _dir) = hass_with_entry().await;
        let mut flow = CatCareTrackerOptionsFlow::new(Arc::downgrade(&hass), &context(&entry_id));

        let result = flow
            .async_step(STEP_INIT, Some(json!({"cat_name": "Mittens", "sheet_name": "Log", "bogus": 1})))
            .await
            .unwrap();
        assert!(matches!(result, FlowResult::CreateEntry { ref title, .. } if title.is_empty()));

        let entry = hass.config_entries.get(&entry_id).unwrap();
        assert_eq!(entry.data_str(CONF_CAT_NAME), Some("Mittens"));
        assert_eq!(entry.data_str(CONF_SHEET_NAME), Some("Log"));
        assert_eq!(entry.data_str("spreadsheet_id"), Some("sheet123"));
        assert!(!entry.data.contains_key("bogus"));
    }
}
