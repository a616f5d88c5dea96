//! Configuration loading for the Cat Care Tracker host
//!
//! `configuration.yaml` is read from the config directory with support for
//! the usual custom tags:
//!
//! - `!include path` - Include another YAML file
//! - `!secret key` - Substitute from secrets.yaml
//! - `!env_var VAR [default]` - Environment variable substitution
//!
//! # Example
//!
//! ```ignore
//! use cct_config::TrackerConfig;
//!
//! let config = TrackerConfig::load("/config")?;
//! println!("listening on {}", config.http.bind_address());
//! ```

mod config;
mod error;
mod loader;
mod secrets;

pub use config::{
    ApplicationCredentialsConfig, HomeAssistantConfig, HttpConfig, LoggerConfig, TrackerConfig,
    CONFIG_FILE,
};
pub use error::{ConfigError, ConfigResult};
pub use loader::{load_yaml, YamlLoader};
pub use secrets::Secrets;

pub use serde_yaml::Value;
