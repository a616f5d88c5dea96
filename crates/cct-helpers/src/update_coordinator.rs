//! Polling coordinator shared by an integration's entities
//!
//! One coordinator per config entry fetches data on a fixed interval and
//! notifies listeners (entity platforms) after every attempt, successful or
//! not. Entities read `data()` and `last_update_success()` when re-rendering.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use cct_config_entries::ConfigEntryNotReady;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use futures::future::BoxFuture;
use thiserror::Error;
use tokio::sync::{Mutex, Notify};
use tokio::task::JoinHandle;
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tracing::{debug, error, info, instrument};

/// Minimum spacing between debounced refreshes
pub const REQUEST_REFRESH_COOLDOWN: Duration = Duration::from_secs(10);

/// Raised by an update method when fetching fails
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{0}")]
pub struct UpdateFailed(pub String);

pub type ListenerId = u64;

type UpdateMethod<T> = Arc<dyn Fn() -> BoxFuture<'static, Result<T, UpdateFailed>> + Send + Sync>;
type Listener = Arc<dyn Fn() + Send + Sync>;

struct Snapshot<T> {
    data: Option<Arc<T>>,
    last_update_success: bool,
    last_error: Option<UpdateFailed>,
    last_update: Option<DateTime<Utc>>,
}

#[derive(Default)]
struct Debounce {
    last_run: Option<Instant>,
    trailing: Option<JoinHandle<()>>,
}

pub struct DataUpdateCoordinator<T> {
    name: String,
    update_interval: Duration,
    cooldown: Duration,
    update_method: UpdateMethod<T>,
    snapshot: RwLock<Snapshot<T>>,
    /// Serializes refreshes
    refresh_lock: Mutex<()>,
    listeners: DashMap<ListenerId, Listener>,
    next_listener_id: AtomicU64,
    debounce: Mutex<Debounce>,
    shutdown: Notify,
    poll_task: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl<T: Send + Sync + 'static> DataUpdateCoordinator<T> {
    pub fn new<F, Fut>(name: impl Into<String>, update_interval: Duration, update_method: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, UpdateFailed>> + Send + 'static,
    {
        let update_method: UpdateMethod<T> =
            Arc::new(move || Box::pin(update_method()) as BoxFuture<'static, _>);

        Self {
            name: name.into(),
            update_interval,
            cooldown: REQUEST_REFRESH_COOLDOWN,
            update_method,
            snapshot: RwLock::new(Snapshot {
                data: None,
                last_update_success: true,
                last_error: None,
                last_update: None,
            }),
            refresh_lock: Mutex::new(()),
            listeners: DashMap::new(),
            next_listener_id: AtomicU64::new(1),
            debounce: Mutex::new(Debounce::default()),
            shutdown: Notify::new(),
            poll_task: std::sync::Mutex::new(None),
        }
    }

    pub fn with_cooldown(mut self, cooldown: Duration) -> Self {
        self.cooldown = cooldown;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn update_interval(&self) -> Duration {
        self.update_interval
    }

    /// Result of the last successful update
    pub fn data(&self) -> Option<Arc<T>> {
        self.read().data.clone()
    }

    pub fn last_update_success(&self) -> bool {
        self.read().last_update_success
    }

    pub fn last_error(&self) -> Option<UpdateFailed> {
        self.read().last_error.clone()
    }

    pub fn last_update(&self) -> Option<DateTime<Utc>> {
        self.read().last_update
    }

    /// Fetch now and notify listeners
    ///
    /// Data from the previous successful update is kept when this one fails.
    #[instrument(skip(self), fields(name = %self.name))]
    pub async fn refresh(&self) {
        let _guard = self.refresh_lock.lock().await;
        let result = (self.update_method)().await;

        {
            let mut snapshot = self.write();
            match result {
                Ok(data) => {
                    if !snapshot.last_update_success {
                        info!("Fetching {} data recovered", self.name);
                    }
                    snapshot.data = Some(Arc::new(data));
                    snapshot.last_update_success = true;
                    snapshot.last_error = None;
                    snapshot.last_update = Some(Utc::now());
                }
                Err(err) => {
                    if snapshot.last_update_success {
                        error!("Error fetching {} data: {}", self.name, err);
                    } else {
                        debug!(error = %err, "Update still failing");
                    }
                    snapshot.last_update_success = false;
                    snapshot.last_error = Some(err);
                }
            }
        }

        self.update_listeners();
    }

    /// Debounced refresh
    ///
    /// Runs immediately unless a refresh ran within the cooldown; calls
    /// inside the cooldown collapse into one refresh at its end.
    pub async fn request_refresh(self: &Arc<Self>) {
        let mut debounce = self.debounce.lock().await;
        let now = Instant::now();

        if let Some(last_run) = debounce.last_run {
            let elapsed = now.duration_since(last_run);
            if elapsed < self.cooldown {
                let idle = debounce
                    .trailing
                    .as_ref()
                    .map_or(true, |handle| handle.is_finished());
                if idle {
                    let wait = self.cooldown - elapsed;
                    let coordinator = Arc::downgrade(self);
                    debounce.trailing = Some(tokio::spawn(async move {
                        tokio::time::sleep(wait).await;
                        if let Some(coordinator) = coordinator.upgrade() {
                            coordinator.debounce.lock().await.last_run = Some(Instant::now());
                            coordinator.refresh().await;
                        }
                    }));
                }
                debug!(name = %self.name, "Refresh request coalesced");
                return;
            }
        }

        debounce.last_run = Some(now);
        drop(debounce);
        self.refresh().await;
    }

    /// First refresh during entry setup; failure means the entry is not ready
    pub async fn config_entry_first_refresh(&self) -> Result<(), ConfigEntryNotReady> {
        self.refresh().await;

        let snapshot = self.read();
        if snapshot.last_update_success {
            Ok(())
        } else {
            let reason = snapshot
                .last_error
                .as_ref()
                .map(ToString::to_string)
                .unwrap_or_else(|| format!("{} update failed", self.name));
            Err(ConfigEntryNotReady(reason))
        }
    }

    pub fn add_listener(&self, listener: impl Fn() + Send + Sync + 'static) -> ListenerId {
        let id = self.next_listener_id.fetch_add(1, Ordering::Relaxed);
        self.listeners.insert(id, Arc::new(listener));
        id
    }

    pub fn remove_listener(&self, id: ListenerId) -> bool {
        self.listeners.remove(&id).is_some()
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }

    fn update_listeners(&self) {
        let listeners: Vec<Listener> = self.listeners.iter().map(|l| l.value().clone()).collect();
        for listener in listeners {
            listener();
        }
    }

    /// Start polling every `update_interval`; the first poll is one interval away
    pub fn start(self: &Arc<Self>) {
        let mut task = self.poll_task.lock().unwrap_or_else(PoisonError::into_inner);
        if task.is_some() {
            return;
        }

        let coordinator = self.clone();
        *task = Some(tokio::spawn(async move {
            let mut interval = interval_with_skipped_ticks(coordinator.update_interval);
            // The first tick completes immediately
            interval.tick().await;

            loop {
                tokio::select! {
                    _ = interval.tick() => coordinator.refresh().await,
                    _ = coordinator.shutdown.notified() => {
                        debug!(name = %coordinator.name, "Polling stopped");
                        break;
                    }
                }
            }
        }));
        debug!(name = %self.name, interval = ?self.update_interval, "Polling started");
    }

    pub fn is_polling(&self) -> bool {
        self.poll_task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Stop polling and drop any pending debounced refresh
    pub async fn shutdown(&self) {
        if let Some(trailing) = self.debounce.lock().await.trailing.take() {
            trailing.abort();
        }

        let task = self
            .poll_task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(task) = task {
            self.shutdown.notify_one();
            let _ = task.await;
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, Snapshot<T>> {
        self.snapshot.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Snapshot<T>> {
        self.snapshot.write().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Interval that skips missed ticks instead of bursting to catch up
fn interval_with_skipped_ticks(period: Duration) -> Interval {
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    interval
}
