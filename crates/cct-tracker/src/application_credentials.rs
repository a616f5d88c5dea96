//! Google as the OAuth2 provider

use std::collections::BTreeMap;

use cct_helpers::{AuthorizationServer, Hass, LocalOAuth2Implementation};
use cct_sheets::DEFAULT_BASE_URL;

use crate::consts::DOMAIN;

pub const AUTHORIZE_URL: &str = "https://accounts.google.com/o/oauth2/auth";
pub const TOKEN_URL: &str = "https://oauth2.googleapis.com/token";

/// Where the integration talks to Google
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GoogleEndpoints {
    pub authorization_server: AuthorizationServer,
    pub sheets_base_url: String,
}

impl Default for GoogleEndpoints {
    fn default() -> Self {
        Self {
            authorization_server: authorization_server(),
            sheets_base_url: DEFAULT_BASE_URL.to_string(),
        }
    }
}

pub fn authorization_server() -> AuthorizationServer {
    AuthorizationServer {
        authorize_url: AUTHORIZE_URL.to_string(),
        token_url: TOKEN_URL.to_string(),
    }
}

/// Links shown next to the credentials dialog
pub fn description_placeholders() -> BTreeMap<String, String> {
    BTreeMap::from([
        (
            "oauth_consent_url".to_string(),
            "https://console.cloud.google.com/apis/credentials/consent".to_string(),
        ),
        (
            "more_info_url".to_string(),
            "https://github.com/adierkens/ha-google-sheets#configuration".to_string(),
        ),
        (
            "oauth_creds_url".to_string(),
            "https://console.cloud.google.com/apis/credentials".to_string(),
        ),
    ])
}

/// OAuth2 implementation built from the imported application credentials
pub fn implementation(hass: &Hass, endpoints: &GoogleEndpoints) -> Option<LocalOAuth2Implementation> {
    let credential = hass.client_credential(DOMAIN)?;
    Some(LocalOAuth2Implementation::new(
        DOMAIN,
        credential,
        endpoints.authorization_server.clone(),
    ))
}
