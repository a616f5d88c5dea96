//! Typed view over configuration.yaml
//!
//! Only the sections the host reads are modelled; everything else in the
//! file is ignored.

use serde::{Deserialize, Deserializer, Serialize};
use serde_yaml::{Mapping, Value};
use std::collections::BTreeMap;
use std::path::Path;

use crate::error::{ConfigError, ConfigResult};
use crate::loader::load_yaml;

/// Name of the main configuration file inside the config directory
pub const CONFIG_FILE: &str = "configuration.yaml";

/// The `homeassistant:` section
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HomeAssistantConfig {
    #[serde(default = "default_name")]
    pub name: String,

    /// Base URL the OAuth redirect URI is built from
    #[serde(default)]
    pub internal_url: Option<String>,
}

impl Default for HomeAssistantConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
            internal_url: None,
        }
    }
}

fn default_name() -> String {
    "Home".to_string()
}

/// The `http:` section
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    #[serde(default = "default_host")]
    pub server_host: String,

    #[serde(default = "default_port", deserialize_with = "port_from_yaml")]
    pub server_port: u16,
}

impl HttpConfig {
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.server_host, self.server_port)
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            server_host: default_host(),
            server_port: default_port(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8123
}

/// Accepts `8123` as well as `"8123"` (the latter comes from `!env_var`)
fn port_from_yaml<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u16, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Port {
        Number(u16),
        Text(String),
    }

    match Port::deserialize(deserializer)? {
        Port::Number(port) => Ok(port),
        Port::Text(text) => text.trim().parse().map_err(serde::de::Error::custom),
    }
}

/// The `logger:` section
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggerConfig {
    #[serde(default = "default_level")]
    pub default: String,

    /// Per-target overrides, e.g. `cct_sheets: debug`
    #[serde(default)]
    pub logs: BTreeMap<String, String>,
}

impl LoggerConfig {
    /// Render as an `EnvFilter` directive string: `info,cct_sheets=debug`
    pub fn filter_directives(&self) -> String {
        let mut directives = vec![self.default.to_lowercase()];
        directives.extend(
            self.logs
                .iter()
                .map(|(target, level)| format!("{}={}", target, level.to_lowercase())),
        );
        directives.join(",")
    }
}

impl Default for LoggerConfig {
    fn default() -> Self {
        Self {
            default: default_level(),
            logs: BTreeMap::new(),
        }
    }
}

fn default_level() -> String {
    "info".to_string()
}

/// The `cat_care_tracker:` section: Google OAuth application credentials
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplicationCredentialsConfig {
    pub client_id: String,
    pub client_secret: String,
}

/// Everything the host reads from configuration.yaml
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TrackerConfig {
    #[serde(default)]
    pub homeassistant: HomeAssistantConfig,

    #[serde(default)]
    pub http: HttpConfig,

    #[serde(default)]
    pub logger: LoggerConfig,

    /// Absent when no application credentials are configured
    #[serde(default)]
    pub cat_care_tracker: Option<ApplicationCredentialsConfig>,
}

impl TrackerConfig {
    /// Load configuration.yaml from the config directory
    pub fn load(config_dir: impl AsRef<Path>) -> ConfigResult<Self> {
        let yaml = load_yaml(config_dir.as_ref(), CONFIG_FILE)?;
        Self::from_yaml(&yaml)
    }

    /// Parse each known section, reporting the section that failed
    pub fn from_yaml(yaml: &Value) -> ConfigResult<Self> {
        let root = match yaml {
            Value::Mapping(map) => map,
            Value::Null => return Ok(Self::default()),
            _ => {
                return Err(ConfigError::InvalidValue {
                    key: "root".to_string(),
                    reason: "configuration must be a mapping".to_string(),
                })
            }
        };

        Ok(Self {
            homeassistant: section(root, "homeassistant")?.unwrap_or_default(),
            http: section(root, "http")?.unwrap_or_default(),
            logger: section(root, "logger")?.unwrap_or_default(),
            cat_care_tracker: section(root, "cat_care_tracker")?,
        })
    }
}

fn section<T: serde::de::DeserializeOwned>(root: &Mapping, key: &str) -> ConfigResult<Option<T>> {
    match root.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(value) => serde_yaml::from_value(value.clone())
            .map(Some)
            .map_err(|e| ConfigError::InvalidValue {
                key: key.to_string(),
                reason: e.to_string(),
            }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = TrackerConfig::from_yaml(&Value::Null).unwrap();
        assert_eq!(config.homeassistant.name, "Home");
        assert_eq!(config.http.bind_address(), "0.0.0.0:8123");
        assert_eq!(config.logger.filter_directives(), "info");
        assert!(config.cat_care_tracker.is_none());
    }

    #[test]
    fn test_full_configuration() {
        let yaml: Value = serde_yaml::from_str(
            r#"
homeassistant:
  name: Cat House
  internal_url: http://192.168.1.20:8123
http:
  server_port: 8300
logger:
  default: WARNING
  logs:
    cct_sheets: debug
    cct_helpers: info
cat_care_tracker:
  client_id: abc.apps.googleusercontent.com
  client_secret: shh
frontend:
  themes: {}
"#,
        )
        .unwrap();

        let config = TrackerConfig::from_yaml(&yaml).unwrap();
        assert_eq!(config.homeassistant.name, "Cat House");
        assert_eq!(
            config.homeassistant.internal_url.as_deref(),
            Some("http://192.168.1.20:8123")
        );
        assert_eq!(config.http.bind_address(), "0.0.0.0:8300");
        assert_eq!(
            config.logger.filter_directives(),
            "warning,cct_helpers=info,cct_sheets=debug"
        );
        let creds = config.cat_care_tracker.unwrap();
        assert_eq!(creds.client_id, "abc.apps.googleusercontent.com");
    }

    #[test]
    fn test_invalid_section_names_the_section() {
        let yaml: Value = serde_yaml::from_str("http:\n  server_port: not-a-port\n").unwrap();
        match TrackerConfig::from_yaml(&yaml) {
            Err(ConfigError::InvalidValue { key, .. }) => assert_eq!(key, "http"),
            other => panic!("expected InvalidValue, got {:?}", other),
        }
    }

    #[test]
    fn test_load_with_secrets_and_env_port() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("secrets.yaml"), "google_secret: s3cr3t\n").unwrap();
        std::env::set_var("CCT_TEST_HTTP_PORT", "8999");
        fs::write(
            dir.path().join(CONFIG_FILE),
            "http:\n  server_port: !env_var CCT_TEST_HTTP_PORT\ncat_care_tracker:\n  client_id: id\n  client_secret: !secret google_secret\n",
        )
        .unwrap();

        let config = TrackerConfig::load(dir.path()).unwrap();
        assert_eq!(config.http.server_port, 8999);
        assert_eq!(config.cat_care_tracker.unwrap().client_secret, "s3cr3t");
        std::env::remove_var("CCT_TEST_HTTP_PORT");
    }
}
