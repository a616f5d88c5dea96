//! Cat Care Tracker integration
//!
//! Logs feedings, insulin, water refills and blood glucose readings to a
//! Google Sheet and exposes the latest state of the sheet as sensors.
//!
//! Per config entry the integration keeps an OAuth2 session, a coordinator
//! polling the sheet and the platform holding the entry's seven sensors.
//! The `log_*` and `refresh` services are shared by all entries and
//! registered once.

pub mod application_credentials;
pub mod config_flow;
pub mod consts;
pub mod coordinator;
pub mod options_flow;
pub mod sensor;
pub mod services;

#[cfg(test)]
mod testing;

use std::path::Path;
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use cct_config_entries::{
    ConfigEntries, ConfigEntry, ConfigEntryNotReady, ConfigEntryUpdate, ConfigFlow, FlowContext,
    IntegrationHandler, SetupOutcome,
};
use cct_helpers::{
    EntityPlatform, Hass, ListenerId, OAuth2Session, OAuth2Token, StaticPathConfig,
    TokenUpdateCallback, REQUEST_REFRESH_COOLDOWN,
};
use dashmap::DashMap;
use futures::future::BoxFuture;
use tracing::{debug, error, info, warn};

pub use application_credentials::GoogleEndpoints;
pub use config_flow::CatCareTrackerFlow;
pub use consts::DOMAIN;
pub use coordinator::{ClientSource, OAuthClientSource, TrackerCoordinator, TrackerData};
pub use options_flow::CatCareTrackerOptionsFlow;

use crate::application_credentials::implementation;
use crate::consts::{
    CARD_FILE, CONF_CAT_NAME, CONF_SHEET_NAME, CONF_SPREADSHEET_ID, CONF_TOKEN,
    DEFAULT_CAT_NAME, DEFAULT_UPDATE_INTERVAL, STATIC_DIR, STATIC_URL_PATH,
};
use crate::coordinator::new_coordinator;
use crate::options_flow::options_flow_factory;
use crate::sensor::sensors;
use crate::services::{register_services, unregister_services};

/// What a loaded entry keeps alive
pub struct EntryRuntime {
    pub coordinator: Arc<TrackerCoordinator>,
    pub source: Arc<dyn ClientSource>,
    pub platform: Arc<EntityPlatform>,
    pub listener: ListenerId,
}

/// Loaded entries by entry id
pub type Runtimes = Arc<DashMap<String, EntryRuntime>>;

/// Replaces the OAuth2-backed client source of an entry
pub type SourceBuilder = Arc<dyn Fn(&ConfigEntry) -> Arc<dyn ClientSource> + Send + Sync>;

#[derive(Clone)]
pub struct TrackerOptions {
    pub endpoints: GoogleEndpoints,
    pub update_interval: Duration,
    /// Debounce window of the `refresh` service
    pub refresh_cooldown: Duration,
    pub source_builder: Option<SourceBuilder>,
}

impl Default for TrackerOptions {
    fn default() -> Self {
        Self {
            endpoints: GoogleEndpoints::default(),
            update_interval: DEFAULT_UPDATE_INTERVAL,
            refresh_cooldown: REQUEST_REFRESH_COOLDOWN,
            source_builder: None,
        }
    }
}

impl TrackerOptions {
    pub fn with_endpoints(mut self, endpoints: GoogleEndpoints) -> Self {
        self.endpoints = endpoints;
        self
    }

    pub fn with_update_interval(mut self, update_interval: Duration) -> Self {
        self.update_interval = update_interval;
        self
    }

    pub fn with_refresh_cooldown(mut self, refresh_cooldown: Duration) -> Self {
        self.refresh_cooldown = refresh_cooldown;
        self
    }

    pub fn with_source_builder(mut self, builder: SourceBuilder) -> Self {
        self.source_builder = Some(builder);
        self
    }
}

pub struct CatCareTracker {
    hass: Weak<Hass>,
    options: TrackerOptions,
    runtimes: Runtimes,
}

/// Dashboard card bundled with the integration
pub const CARD_JS: &str = include_str!("../www/cat-care-tracker-card.js");

/// Copy the bundled card into `dir` unless a card is already there
async fn install_card(dir: &Path) -> std::io::Result<bool> {
    let card = dir.join(CARD_FILE);
    if tokio::fs::try_exists(&card).await? {
        return Ok(false);
    }
    tokio::fs::create_dir_all(dir).await?;
    tokio::fs::write(&card, CARD_JS).await?;
    Ok(true)
}

/// Register the integration with the host
///
/// Installs and serves the dashboard card, then registers the entry
/// handler and the config and options flows.
pub async fn async_setup(hass: &Arc<Hass>, options: TrackerOptions) -> Arc<CatCareTracker> {
    let static_dir = hass.path(STATIC_DIR);
    match install_card(&static_dir).await {
        Ok(true) => info!(path = %static_dir.display(), "Installed dashboard card"),
        Ok(false) => debug!(path = %static_dir.display(), "Keeping existing dashboard card"),
        Err(err) => warn!(path = %static_dir.display(), "Failed to install dashboard card: {}", err),
    }
    hass.register_static_paths(vec![StaticPathConfig::new(STATIC_URL_PATH, static_dir, false)]);

    let tracker = Arc::new(CatCareTracker {
        hass: Arc::downgrade(hass),
        options,
        runtimes: Arc::new(DashMap::new()),
    });
    hass.config_entries
        .register_integration(DOMAIN, tracker.clone());

    let flow_hass = Arc::downgrade(hass);
    let endpoints = tracker.options.endpoints.clone();
    hass.flows.register_config_flow(
        DOMAIN,
        Arc::new(move |context: &FlowContext| {
            Box::new(CatCareTrackerFlow::new(flow_hass.clone(), endpoints.clone(), context))
                as Box<dyn ConfigFlow>
        }),
    );
    hass.flows
        .register_options_flow(DOMAIN, options_flow_factory(Arc::downgrade(hass)));

    debug!("Cat Care Tracker integration registered");
    tracker
}

/// Write refreshed tokens back into the entry
fn persist_token(config_entries: &Arc<ConfigEntries>, entry_id: &str) -> TokenUpdateCallback {
    let config_entries: Weak<ConfigEntries> = Arc::downgrade(config_entries);
    let entry_id = entry_id.to_string();

    Arc::new(move |token: OAuth2Token| -> BoxFuture<'static, ()> {
        let config_entries = config_entries.clone();
        let entry_id = entry_id.clone();
        Box::pin(async move {
            let Some(config_entries) = config_entries.upgrade() else {
                return;
            };
            let Some(entry) = config_entries.get(&entry_id) else {
                return;
            };
            let token = match serde_json::to_value(&token) {
                Ok(token) => token,
                Err(err) => {
                    warn!(entry_id = %entry_id, "Failed to serialize refreshed token: {}", err);
                    return;
                }
            };

            let mut data = entry.data;
            data.insert(CONF_TOKEN.into(), token);
            if let Err(err) = config_entries
                .update(&entry_id, ConfigEntryUpdate::new().data(data))
                .await
            {
                warn!(entry_id = %entry_id, "Failed to persist refreshed token: {}", err);
            }
        })
    })
}

impl CatCareTracker {
    pub fn runtimes(&self) -> &Runtimes {
        &self.runtimes
    }

    pub fn coordinator(&self, entry_id: &str) -> Option<Arc<TrackerCoordinator>> {
        self.runtimes.get(entry_id).map(|r| r.coordinator.clone())
    }

    pub fn platform(&self, entry_id: &str) -> Option<Arc<EntityPlatform>> {
        self.runtimes.get(entry_id).map(|r| r.platform.clone())
    }

    /// OAuth2 session with a valid token, wrapped as a client source
    async fn oauth_source(
        &self,
        hass: &Hass,
        entry: &ConfigEntry,
    ) -> Result<Arc<dyn ClientSource>, SetupOutcome> {
        let imp = implementation(hass, &self.options.endpoints).ok_or_else(|| {
            SetupOutcome::Failed(format!("application credentials for {} are not configured", DOMAIN))
        })?;
        let token: OAuth2Token = entry
            .data
            .get(CONF_TOKEN)
            .cloned()
            .and_then(|token| serde_json::from_value(token).ok())
            .ok_or_else(|| SetupOutcome::Failed("config entry has no OAuth2 token".into()))?;
        let spreadsheet_id = entry
            .data_str(CONF_SPREADSHEET_ID)
            .ok_or_else(|| SetupOutcome::Failed("config entry has no spreadsheet id".into()))?;

        let session = OAuth2Session::new(Arc::new(imp), &entry.entry_id, token)
            .with_token_update(persist_token(&hass.config_entries, &entry.entry_id));
        let session = Arc::new(session);

        if let Err(err) = session.ensure_token_valid().await {
            return Err(ConfigEntryNotReady(format!("Failed to refresh OAuth2 token: {}", err)).into());
        }

        Ok(Arc::new(OAuthClientSource::new(
            session,
            spreadsheet_id,
            entry.data_str(CONF_SHEET_NAME).map(str::to_string),
            self.options.endpoints.sheets_base_url.clone(),
        )))
    }
}

#[async_trait]
impl IntegrationHandler for CatCareTracker {
    async fn setup_entry(&self, entry: ConfigEntry) -> SetupOutcome {
        let Some(hass) = self.hass.upgrade() else {
            return SetupOutcome::Failed("host is shutting down".into());
        };

        let source = match &self.options.source_builder {
            Some(builder) => builder(&entry),
            None => match self.oauth_source(&hass, &entry).await {
                Ok(source) => source,
                Err(outcome) => return outcome,
            },
        };

        let coordinator = Arc::new(
            new_coordinator(source.clone(), self.options.update_interval)
                .with_cooldown(self.options.refresh_cooldown),
        );
        if let Err(err) = coordinator.config_entry_first_refresh().await {
            return err.into();
        }

        let cat_name = entry.data_str(CONF_CAT_NAME).unwrap_or(DEFAULT_CAT_NAME);
        let platform = Arc::new(EntityPlatform::new(DOMAIN, hass.states.clone()));
        if let Err(err) = platform.add_entities(sensors(coordinator.clone(), &entry.entry_id, cat_name)) {
            return SetupOutcome::Failed(format!("failed to add sensors: {}", err));
        }
        let listener = platform.track_coordinator(&coordinator);

        self.runtimes.insert(
            entry.entry_id.clone(),
            EntryRuntime {
                coordinator: coordinator.clone(),
                source,
                platform,
                listener,
            },
        );

        if let Err(err) = register_services(
            &hass.services,
            hass.config_entries.clone(),
            self.runtimes.clone(),
        ) {
            error!("Failed to register {} services: {}", DOMAIN, err);
        }

        coordinator.start();
        info!(entry_id = %entry.entry_id, cat_name, "Cat Care Tracker set up");
        SetupOutcome::Loaded
    }

    async fn unload_entry(&self, entry: ConfigEntry) -> bool {
        let Some((_, runtime)) = self.runtimes.remove(&entry.entry_id) else {
            return true;
        };

        runtime.coordinator.shutdown().await;
        runtime.coordinator.remove_listener(runtime.listener);
        runtime.platform.remove_all();

        if self.runtimes.is_empty() {
            if let Some(hass) = self.hass.upgrade() {
                unregister_services(&hass.services);
            }
        }
        info!(entry_id = %entry.entry_id, "Cat Care Tracker unloaded");
        true
    }
}
