//! Config entries manager
//!
//! Owns every config entry, persists them to `.storage/core.config_entries`
//! and drives their lifecycle through the integration handlers.

use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::entry::{ConfigEntry, ConfigEntryState, ConfigEntryUpdate};
use crate::state_machine::{retry_delay, InvalidTransition};
use crate::storage::{Storable, Storage, StorageError};

pub const STORAGE_KEY: &str = "core.config_entries";
pub const STORAGE_VERSION: u32 = 1;
pub const STORAGE_MINOR_VERSION: u32 = 1;

/// Base delay between setup retries
const DEFAULT_RETRY_BASE: Duration = Duration::from_secs(5);

#[derive(Debug, Error)]
pub enum ConfigEntriesError {
    #[error("entry not found: {0}")]
    NotFound(String),

    #[error("entry already exists for domain {domain} with unique_id {unique_id}")]
    AlreadyExists { domain: String, unique_id: String },

    #[error("cannot unload entry in state {0:?}")]
    CannotUnload(ConfigEntryState),

    #[error("setup failed: {0}")]
    SetupFailed(String),

    #[error("unload failed for entry {0}")]
    UnloadFailed(String),

    #[error(transparent)]
    InvalidTransition(#[from] InvalidTransition),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
}

pub type ConfigEntriesResult<T> = Result<T, ConfigEntriesError>;

/// Raised by an integration when a dependency is temporarily unavailable
///
/// The entry moves to SetupRetry and setup is attempted again later.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{0}")]
pub struct ConfigEntryNotReady(pub String);

/// Result of an integration's entry setup
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SetupOutcome {
    Loaded,
    /// Transient failure, retried with backoff
    NotReady(String),
    /// Permanent failure, entry stays in SetupError until reloaded
    Failed(String),
}

impl From<ConfigEntryNotReady> for SetupOutcome {
    fn from(err: ConfigEntryNotReady) -> Self {
        SetupOutcome::NotReady(err.0)
    }
}

/// Entry setup and unload for one integration domain
#[async_trait]
pub trait IntegrationHandler: Send + Sync {
    async fn setup_entry(&self, entry: ConfigEntry) -> SetupOutcome;

    /// Returns false if the entry could not be unloaded
    async fn unload_entry(&self, entry: ConfigEntry) -> bool;
}

/// Persisted form of all entries
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConfigEntriesData {
    pub entries: Vec<ConfigEntry>,
}

impl Storable for ConfigEntriesData {
    const KEY: &'static str = STORAGE_KEY;
    const VERSION: u32 = STORAGE_VERSION;
    const MINOR_VERSION: u32 = STORAGE_MINOR_VERSION;
}

pub struct ConfigEntries {
    storage: Storage,

    /// entry_id -> ConfigEntry
    entries: DashMap<String, ConfigEntry>,

    /// domain -> entry_ids in creation order
    by_domain: DashMap<String, Vec<String>>,

    /// (domain, unique_id) -> entry_id
    by_unique_id: DashMap<(String, String), String>,

    handlers: DashMap<String, Arc<dyn IntegrationHandler>>,

    /// Pending setup retries by entry_id
    retry_tasks: DashMap<String, JoinHandle<()>>,

    /// Serializes setup and unload
    setup_lock: Mutex<()>,

    retry_base: Duration,
}

impl ConfigEntries {
    pub fn new(storage: Storage) -> Self {
        Self {
            storage,
            entries: DashMap::new(),
            by_domain: DashMap::new(),
            by_unique_id: DashMap::new(),
            handlers: DashMap::new(),
            retry_tasks: DashMap::new(),
            setup_lock: Mutex::new(()),
            retry_base: DEFAULT_RETRY_BASE,
        }
    }

    /// Override the base retry delay
    pub fn with_retry_base(mut self, retry_base: Duration) -> Self {
        self.retry_base = retry_base;
        self
    }

    /// Load persisted entries
    pub async fn load(&self) -> ConfigEntriesResult<()> {
        if let Some(data) = self.storage.load::<ConfigEntriesData>().await? {
            info!(count = data.entries.len(), "Loading config entries from storage");
            for entry in data.entries {
                self.index_entry(entry);
            }
        }
        Ok(())
    }

    pub async fn save(&self) -> ConfigEntriesResult<()> {
        let mut entries: Vec<ConfigEntry> = self.entries.iter().map(|r| r.value().clone()).collect();
        entries.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.entry_id.cmp(&b.entry_id))
        });

        self.storage.save(&ConfigEntriesData { entries }).await?;
        debug!(count = self.entries.len(), "Saved config entries");
        Ok(())
    }

    fn index_entry(&self, entry: ConfigEntry) {
        let entry_id = entry.entry_id.clone();

        let mut ids = self.by_domain.entry(entry.domain.clone()).or_default();
        if !ids.contains(&entry_id) {
            ids.push(entry_id.clone());
        }
        drop(ids);

        if let Some(ref unique_id) = entry.unique_id {
            self.by_unique_id
                .insert((entry.domain.clone(), unique_id.clone()), entry_id.clone());
        }

        self.entries.insert(entry_id, entry);
    }

    fn unindex_entry(&self, entry: &ConfigEntry) {
        if let Some(mut ids) = self.by_domain.get_mut(&entry.domain) {
            ids.retain(|id| id != &entry.entry_id);
        }
        if let Some(ref unique_id) = entry.unique_id {
            self.by_unique_id
                .remove(&(entry.domain.clone(), unique_id.clone()));
        }
        self.entries.remove(&entry.entry_id);
    }

    pub fn get(&self, entry_id: &str) -> Option<ConfigEntry> {
        self.entries.get(entry_id).map(|r| r.value().clone())
    }

    /// Entries for a domain, oldest first
    pub fn get_by_domain(&self, domain: &str) -> Vec<ConfigEntry> {
        self.by_domain
            .get(domain)
            .map(|ids| ids.iter().filter_map(|id| self.get(id)).collect())
            .unwrap_or_default()
    }

    pub fn get_loaded_by_domain(&self, domain: &str) -> Vec<ConfigEntry> {
        self.get_by_domain(domain)
            .into_iter()
            .filter(ConfigEntry::is_loaded)
            .collect()
    }

    pub fn get_by_unique_id(&self, domain: &str, unique_id: &str) -> Option<ConfigEntry> {
        self.by_unique_id
            .get(&(domain.to_string(), unique_id.to_string()))
            .and_then(|entry_id| self.get(&entry_id))
    }

    /// Add a new entry; its unique_id must not already be taken in the domain
    pub async fn add(&self, entry: ConfigEntry) -> ConfigEntriesResult<ConfigEntry> {
        if let Some(ref unique_id) = entry.unique_id {
            if self.get_by_unique_id(&entry.domain, unique_id).is_some() {
                return Err(ConfigEntriesError::AlreadyExists {
                    domain: entry.domain.clone(),
                    unique_id: unique_id.clone(),
                });
            }
        }

        self.index_entry(entry.clone());
        self.save().await?;

        info!(
            entry_id = %entry.entry_id,
            domain = %entry.domain,
            title = %entry.title,
            "Added config entry"
        );
        Ok(entry)
    }

    /// Apply a partial update and persist it
    pub async fn update(
        &self,
        entry_id: &str,
        update: ConfigEntryUpdate,
    ) -> ConfigEntriesResult<ConfigEntry> {
        let updated = {
            let mut entry = self
                .entries
                .get_mut(entry_id)
                .ok_or_else(|| ConfigEntriesError::NotFound(entry_id.to_string()))?;

            if let Some(title) = update.title {
                entry.title = title;
            }
            if let Some(data) = update.data {
                entry.data = data;
            }
            if let Some(options) = update.options {
                entry.options = options;
            }
            entry.modified_at = Utc::now();
            entry.clone()
        };

        self.save().await?;
        debug!(entry_id, "Updated config entry");
        Ok(updated)
    }

    /// Unload (if needed) and delete an entry
    pub async fn remove(&self, entry_id: &str) -> ConfigEntriesResult<ConfigEntry> {
        {
            let _lock = self.setup_lock.lock().await;
            self.unload_locked(entry_id).await?;
        }

        let entry = self
            .get(entry_id)
            .ok_or_else(|| ConfigEntriesError::NotFound(entry_id.to_string()))?;
        self.unindex_entry(&entry);
        self.save().await?;

        info!(entry_id, domain = %entry.domain, "Removed config entry");
        Ok(entry)
    }

    pub fn register_integration(&self, domain: impl Into<String>, handler: Arc<dyn IntegrationHandler>) {
        let domain = domain.into();
        debug!(domain = %domain, "Registered integration handler");
        self.handlers.insert(domain, handler);
    }

    pub fn has_integration(&self, domain: &str) -> bool {
        self.handlers.contains_key(domain)
    }

    fn transition(
        &self,
        entry_id: &str,
        state: ConfigEntryState,
        reason: Option<String>,
    ) -> ConfigEntriesResult<ConfigEntry> {
        let mut entry = self
            .entries
            .get_mut(entry_id)
            .ok_or_else(|| ConfigEntriesError::NotFound(entry_id.to_string()))?;
        entry.try_set_state(state, reason)?;
        debug!(entry_id, state = ?state, "Config entry state changed");
        Ok(entry.clone())
    }

    /// Set up an entry through its integration handler
    ///
    /// Returns the resulting state. A `NotReady` outcome leaves the entry in
    /// SetupRetry with a retry scheduled; a `Failed` outcome is an error.
    pub async fn setup(self: &Arc<Self>, entry_id: &str) -> ConfigEntriesResult<ConfigEntryState> {
        let _lock = self.setup_lock.lock().await;
        self.setup_locked(entry_id).await
    }

    async fn setup_locked(
        self: &Arc<Self>,
        entry_id: &str,
    ) -> ConfigEntriesResult<ConfigEntryState> {
        let current = self
            .get(entry_id)
            .ok_or_else(|| ConfigEntriesError::NotFound(entry_id.to_string()))?;
        if current.is_loaded() {
            return Ok(ConfigEntryState::Loaded);
        }

        self.cancel_retry(entry_id);
        let entry = self.transition(entry_id, ConfigEntryState::SetupInProgress, None)?;

        let handler = self.handlers.get(&entry.domain).map(|h| h.value().clone());
        let Some(handler) = handler else {
            debug!(domain = %entry.domain, "No integration handler, marking entry loaded");
            self.transition(entry_id, ConfigEntryState::Loaded, None)?;
            return Ok(ConfigEntryState::Loaded);
        };

        match handler.setup_entry(entry.clone()).await {
            SetupOutcome::Loaded => {
                self.transition(entry_id, ConfigEntryState::Loaded, None)?;
                info!(entry_id, title = %entry.title, "Config entry loaded");
                Ok(ConfigEntryState::Loaded)
            }
            SetupOutcome::NotReady(reason) => {
                let updated =
                    self.transition(entry_id, ConfigEntryState::SetupRetry, Some(reason.clone()))?;
                let delay = retry_delay(self.retry_base, updated.tries);
                if let Some(mut entry) = self.entries.get_mut(entry_id) {
                    entry.tries += 1;
                }
                warn!(
                    entry_id,
                    reason = %reason,
                    retry_in = ?delay,
                    "Config entry not ready, retrying later"
                );
                self.schedule_retry(entry_id, delay);
                Ok(ConfigEntryState::SetupRetry)
            }
            SetupOutcome::Failed(reason) => {
                error!(entry_id, reason = %reason, "Config entry setup failed");
                self.transition(entry_id, ConfigEntryState::SetupError, Some(reason.clone()))?;
                Err(ConfigEntriesError::SetupFailed(reason))
            }
        }
    }

    fn schedule_retry(self: &Arc<Self>, entry_id: &str, delay: Duration) {
        let manager: Weak<Self> = Arc::downgrade(self);
        let id = entry_id.to_string();

        let task = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let Some(manager) = manager.upgrade() else {
                return;
            };
            manager.retry_tasks.remove(&id);
            let still_waiting = manager
                .get(&id)
                .map(|e| e.state == ConfigEntryState::SetupRetry)
                .unwrap_or(false);
            if still_waiting {
                if let Err(e) = manager.setup_boxed(id.clone()).await {
                    warn!(entry_id = %id, error = %e, "Setup retry failed");
                }
            }
        });

        if let Some(previous) = self.retry_tasks.insert(entry_id.to_string(), task) {
            previous.abort();
        }
    }

    fn setup_boxed(
        self: Arc<Self>,
        entry_id: String,
    ) -> BoxFuture<'static, ConfigEntriesResult<ConfigEntryState>> {
        Box::pin(async move { self.setup(&entry_id).await })
    }

    fn cancel_retry(&self, entry_id: &str) {
        if let Some((_, task)) = self.retry_tasks.remove(entry_id) {
            task.abort();
        }
    }

    /// Unload an entry; a NotLoaded entry is left alone
    pub async fn unload(&self, entry_id: &str) -> ConfigEntriesResult<()> {
        let _lock = self.setup_lock.lock().await;
        self.unload_locked(entry_id).await
    }

    async fn unload_locked(&self, entry_id: &str) -> ConfigEntriesResult<()> {
        let entry = self
            .get(entry_id)
            .ok_or_else(|| ConfigEntriesError::NotFound(entry_id.to_string()))?;

        if entry.state == ConfigEntryState::NotLoaded {
            return Ok(());
        }
        if !entry.state.is_recoverable() {
            return Err(ConfigEntriesError::CannotUnload(entry.state));
        }

        self.cancel_retry(entry_id);
        let was_loaded = entry.is_loaded();
        self.transition(entry_id, ConfigEntryState::UnloadInProgress, None)?;

        let handler = self.handlers.get(&entry.domain).map(|h| h.value().clone());
        let unloaded = match handler {
            Some(handler) if was_loaded => handler.unload_entry(entry.clone()).await,
            _ => true,
        };

        if unloaded {
            self.transition(entry_id, ConfigEntryState::NotLoaded, None)?;
            info!(entry_id, title = %entry.title, "Config entry unloaded");
            Ok(())
        } else {
            self.transition(
                entry_id,
                ConfigEntryState::FailedUnload,
                Some("integration refused to unload".to_string()),
            )?;
            Err(ConfigEntriesError::UnloadFailed(entry_id.to_string()))
        }
    }

    /// Unload then set up again, without letting another setup interleave
    pub async fn reload(self: &Arc<Self>, entry_id: &str) -> ConfigEntriesResult<ConfigEntryState> {
        let _lock = self.setup_lock.lock().await;
        self.unload_locked(entry_id).await?;
        self.setup_locked(entry_id).await
    }

    /// Set up every stored entry, oldest first
    pub async fn setup_all(self: &Arc<Self>) -> Vec<(String, ConfigEntriesResult<ConfigEntryState>)> {
        let mut results = Vec::new();
        for entry_id in self.entry_ids() {
            let result = self.setup(&entry_id).await;
            results.push((entry_id, result));
        }
        results
    }

    /// Unload every entry, used on shutdown
    pub async fn unload_all(&self) {
        for entry_id in self.entry_ids() {
            if let Err(e) = self.unload(&entry_id).await {
                warn!(entry_id = %entry_id, error = %e, "Failed to unload entry on shutdown");
            }
        }
    }

    /// All entry ids, oldest first
    pub fn entry_ids(&self) -> Vec<String> {
        let mut entries: Vec<_> = self
            .entries
            .iter()
            .map(|r| (r.created_at, r.key().clone()))
            .collect();
        entries.sort();
        entries.into_iter().map(|(_, id)| id).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
