//! Config flow: Google sign-in, then the spreadsheet to log to

use std::collections::BTreeMap;
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use cct_config_entries::{ConfigFlow, FlowContext, FlowError, FlowResult, FormField};
use cct_helpers::{Hass, LocalOAuth2Implementation, OAuth2Token};
use cct_sheets::{CheckinLog, ConnectionError, GoogleSheetsOAuthClient, DEFAULT_SHEET_NAME, SHEETS_SCOPE};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tracing::{error, info, warn};

use crate::application_credentials::{description_placeholders, implementation, GoogleEndpoints};
use crate::consts::{
    CONF_AUTH_IMPLEMENTATION, CONF_CAT_NAME, CONF_SHEET_NAME, CONF_SPREADSHEET_ID, CONF_TOKEN,
    DEFAULT_CAT_NAME, DOMAIN, ENTRY_TITLE_PREFIX,
};

pub const STEP_USER: &str = "user";
/// External step completed by the OAuth2 callback
pub const STEP_AUTH: &str = "auth";
pub const STEP_CONFIGURE: &str = "configure";

const SPREADSHEET_URL_EXAMPLE: &str = "https://docs.google.com/spreadsheets/d/YOUR_SPREADSHEET_ID/edit";

fn default_cat_name() -> String {
    DEFAULT_CAT_NAME.to_string()
}

fn default_sheet_name() -> String {
    DEFAULT_SHEET_NAME.to_string()
}

/// Reply from the authorize redirect
#[derive(Debug, Deserialize)]
struct AuthInput {
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ConfigureInput {
    spreadsheet_id: String,
    #[serde(default = "default_cat_name")]
    cat_name: String,
    #[serde(default = "default_sheet_name")]
    sheet_name: String,
}

/// Form error key for a failed connection test
fn connection_error_key(err: ConnectionError) -> &'static str {
    match err {
        ConnectionError::NotFound => "spreadsheet_not_found",
        ConnectionError::PermissionDenied => "no_permission",
        ConnectionError::InvalidCredentials => "invalid_auth",
        ConnectionError::CannotConnect => "cannot_connect",
    }
}

pub struct CatCareTrackerFlow {
    hass: Weak<Hass>,
    endpoints: GoogleEndpoints,
    flow_id: String,
    implementation: Option<Arc<LocalOAuth2Implementation>>,
    token: Option<OAuth2Token>,
}

impl CatCareTrackerFlow {
    pub fn new(hass: Weak<Hass>, endpoints: GoogleEndpoints, context: &FlowContext) -> Self {
        Self {
            hass,
            endpoints,
            flow_id: context.flow_id.clone(),
            implementation: None,
            token: None,
        }
    }

    fn hass(&self) -> Result<Arc<Hass>, FlowError> {
        self.hass
            .upgrade()
            .ok_or_else(|| FlowError::InvalidInput("host is shutting down".into()))
    }

    /// Pick the application credentials and send the user to Google
    async fn step_user(&mut self) -> Result<FlowResult, FlowError> {
        let hass = self.hass()?;
        let Some(imp) = implementation(&hass, &self.endpoints) else {
            warn!("No application credentials configured for {}", DOMAIN);
            return Ok(FlowResult::abort("missing_credentials").with_placeholders(description_placeholders()));
        };
        let imp = Arc::new(imp);
        self.implementation = Some(imp);
        self.external_step(&hass)
    }

    fn external_step(&self, hass: &Hass) -> Result<FlowResult, FlowError> {
        let Some(imp) = &self.implementation else {
            return Ok(FlowResult::abort("missing_credentials"));
        };
        let url = imp
            .authorize_url(
                &hass.redirect_uri(),
                &self.flow_id,
                &[
                    ("scope", SHEETS_SCOPE),
                    ("access_type", "offline"),
                    ("prompt", "consent"),
                ],
            )
            .map_err(|e| FlowError::InvalidInput(e.to_string()))?;
        Ok(FlowResult::external_step(STEP_AUTH, url))
    }

    /// Exchange the authorization code, then ask for the spreadsheet
    async fn step_auth(&mut self, input: Option<Value>) -> Result<FlowResult, FlowError> {
        let hass = self.hass()?;
        let Some(input) = input else {
            return self.external_step(&hass);
        };
        let input: AuthInput =
            serde_json::from_value(input).map_err(|e| FlowError::InvalidInput(e.to_string()))?;

        if let Some(err) = input.error {
            warn!(flow_id = %self.flow_id, error = %err, "Authorization was rejected");
            return Ok(FlowResult::abort("user_rejected_authorize"));
        }
        let Some(code) = input.code else {
            return Err(FlowError::InvalidInput("missing authorization code".into()));
        };
        let Some(imp) = self.implementation.clone() else {
            return Ok(FlowResult::abort("missing_credentials"));
        };

        match imp.exchange_code(&code, &hass.redirect_uri()).await {
            Ok(token) => {
                self.token = Some(token);
                Ok(self.configure_form(BTreeMap::new()))
            }
            Err(err) => {
                error!(flow_id = %self.flow_id, "Token exchange failed: {}", err);
                Ok(FlowResult::abort("oauth_error"))
            }
        }
    }

    fn configure_form(&self, errors: BTreeMap<String, String>) -> FlowResult {
        FlowResult::form(
            STEP_CONFIGURE,
            vec![
                FormField::required(CONF_SPREADSHEET_ID),
                FormField::optional(CONF_CAT_NAME, DEFAULT_CAT_NAME),
                FormField::optional(CONF_SHEET_NAME, DEFAULT_SHEET_NAME),
            ],
        )
        .with_errors(errors)
        .with_placeholders(BTreeMap::from([(
            "spreadsheet_url".to_string(),
            SPREADSHEET_URL_EXAMPLE.to_string(),
        )]))
    }

    /// Check the spreadsheet is reachable and create the entry
    async fn step_configure(&mut self, input: Option<Value>) -> Result<FlowResult, FlowError> {
        let Some(input) = input else {
            return Ok(self.configure_form(BTreeMap::new()));
        };
        let Some(token) = self.token.clone() else {
            return Err(FlowError::UnknownStep(STEP_CONFIGURE.to_string()));
        };
        let input: ConfigureInput =
            serde_json::from_value(input).map_err(|e| FlowError::InvalidInput(e.to_string()))?;

        let spreadsheet_id = input.spreadsheet_id.trim().to_string();
        let sheet_name = input.sheet_name.trim().to_string();

        let client = GoogleSheetsOAuthClient::new(
            token.access_token.clone(),
            spreadsheet_id.clone(),
            Some(sheet_name.clone()),
        )
        .with_base_url(&self.endpoints.sheets_base_url);

        if let Err(err) = client.test_connection().await {
            let key = connection_error_key(err);
            warn!(spreadsheet_id = %spreadsheet_id, error = %key, "Spreadsheet connection test failed");
            return Ok(self.configure_form(BTreeMap::from([("base".to_string(), key.to_string())])));
        }

        let hass = self.hass()?;
        if hass
            .config_entries
            .get_by_unique_id(DOMAIN, &spreadsheet_id)
            .is_some()
        {
            return Ok(FlowResult::abort("already_configured"));
        }

        let token = match serde_json::to_value(&token) {
            Ok(token) => token,
            Err(err) => {
                error!("Unexpected error storing token: {}", err);
                return Ok(self.configure_form(BTreeMap::from([(
                    "base".to_string(),
                    "unknown".to_string(),
                )])));
            }
        };

        let mut data = Map::new();
        data.insert(CONF_AUTH_IMPLEMENTATION.into(), json!(DOMAIN));
        data.insert(CONF_TOKEN.into(), token);
        data.insert(CONF_SPREADSHEET_ID.into(), json!(spreadsheet_id));
        data.insert(CONF_CAT_NAME.into(), json!(input.cat_name));
        data.insert(CONF_SHEET_NAME.into(), json!(sheet_name));

        info!(spreadsheet_id = %spreadsheet_id, cat_name = %input.cat_name, "Creating Cat Care Tracker entry");
        Ok(FlowResult::create_entry(
            format!("{} - {}", ENTRY_TITLE_PREFIX, input.cat_name),
            data,
            Some(spreadsheet_id),
        ))
    }
}

#[async_trait]
impl ConfigFlow for CatCareTrackerFlow {
    async fn async_step(
        &mut self,
        step_id: &str,
        input: Option<Value>,
    ) -> Result<FlowResult, FlowError> {
        match step_id {
            STEP_USER => self.step_user().await,
            STEP_AUTH => self.step_auth(input).await,
            STEP_CONFIGURE => self.step_configure(input).await,
            other => Err(FlowError::UnknownStep(other.to_string())),
        }
    }
}
