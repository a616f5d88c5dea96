//! Handle on the running host
//!
//! Bundles the event bus, state machine, service registry, config entries and
//! flows together with the host-level registries integrations write into
//! during setup: static HTTP paths and application credentials.

use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};

use cct_config_entries::{ConfigEntries, FlowManager, Storage};
use cct_event_bus::EventBus;
use cct_service_registry::ServiceRegistry;
use cct_state_machine::StateMachine;
use dashmap::DashMap;
use tracing::{debug, info};

use crate::oauth2::ClientCredential;

/// Path the OAuth2 provider redirects back to
pub const AUTH_CALLBACK_PATH: &str = "/auth/external/callback";

/// Directory served over HTTP under `url_path`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StaticPathConfig {
    pub url_path: String,
    pub path: PathBuf,
    pub cache_headers: bool,
}

impl StaticPathConfig {
    pub fn new(url_path: impl Into<String>, path: impl Into<PathBuf>, cache_headers: bool) -> Self {
        Self {
            url_path: url_path.into(),
            path: path.into(),
            cache_headers,
        }
    }
}

pub struct Hass {
    pub bus: Arc<EventBus>,
    pub states: Arc<StateMachine>,
    pub services: Arc<ServiceRegistry>,
    pub config_entries: Arc<ConfigEntries>,
    pub flows: Arc<FlowManager>,
    config_dir: PathBuf,
    internal_url: String,
    static_paths: RwLock<Vec<StaticPathConfig>>,
    application_credentials: DashMap<String, ClientCredential>,
}

impl Hass {
    pub fn new(config_dir: impl Into<PathBuf>, internal_url: impl Into<String>) -> Self {
        let config_dir = config_dir.into();
        let config_entries = Arc::new(ConfigEntries::new(Storage::new(&config_dir)));
        Self::with_config_entries(config_dir, internal_url, config_entries)
    }

    /// Build around an existing config entry manager
    pub fn with_config_entries(
        config_dir: impl Into<PathBuf>,
        internal_url: impl Into<String>,
        config_entries: Arc<ConfigEntries>,
    ) -> Self {
        let bus = Arc::new(EventBus::new());
        Self {
            states: Arc::new(StateMachine::new(bus.clone())),
            services: Arc::new(ServiceRegistry::with_event_bus(bus.clone())),
            flows: Arc::new(FlowManager::new(config_entries.clone())),
            config_entries,
            bus,
            config_dir: config_dir.into(),
            internal_url: internal_url.into().trim_end_matches('/').to_string(),
            static_paths: RwLock::new(Vec::new()),
            application_credentials: DashMap::new(),
        }
    }

    pub fn config_dir(&self) -> &Path {
        &self.config_dir
    }

    /// Path relative to the config directory
    pub fn path(&self, relative: impl AsRef<Path>) -> PathBuf {
        self.config_dir.join(relative)
    }

    pub fn internal_url(&self) -> &str {
        &self.internal_url
    }

    pub fn redirect_uri(&self) -> String {
        format!("{}{}", self.internal_url, AUTH_CALLBACK_PATH)
    }

    pub fn register_static_paths(&self, paths: Vec<StaticPathConfig>) {
        let mut registered = self.static_paths.write().unwrap_or_else(PoisonError::into_inner);
        for path in paths {
            debug!(url_path = %path.url_path, dir = %path.path.display(), "Registering static path");
            registered.retain(|p| p.url_path != path.url_path);
            registered.push(path);
        }
    }

    pub fn static_paths(&self) -> Vec<StaticPathConfig> {
        self.static_paths
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Store application credentials for an OAuth2 integration
    pub fn import_client_credential(&self, domain: impl Into<String>, credential: ClientCredential) {
        let domain = domain.into();
        info!(domain = %domain, "Imported application credentials");
        self.application_credentials.insert(domain, credential);
    }

    pub fn client_credential(&self, domain: &str) -> Option<ClientCredential> {
        self.application_credentials.get(domain).map(|c| c.clone())
    }
}

pub type SharedHass = Arc<Hass>;
