//! Config and options flows
//!
//! A flow is a small step machine an integration implements to create (or
//! edit) a config entry. The FlowManager keeps flows in progress between HTTP
//! requests, remembers which step each one is waiting on, and turns a
//! finished flow into a stored config entry. A flow whose step fails is
//! dropped; one left waiting longer than the maximum age is expired.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use serde::Serialize;
use serde_json::{Map, Value};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::entry::{ConfigEntry, ConfigEntryUpdate};
use crate::manager::{ConfigEntries, ConfigEntriesError};

#[derive(Debug, Error)]
pub enum FlowError {
    #[error("no flow handler for {0}")]
    UnknownHandler(String),

    #[error("flow not found: {0}")]
    UnknownFlow(String),

    #[error("unknown step: {0}")]
    UnknownStep(String),

    #[error("invalid user input: {0}")]
    InvalidInput(String),

    #[error(transparent)]
    ConfigEntries(#[from] ConfigEntriesError),
}

/// One field of a form step
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FormField {
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: &'static str,
    pub required: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
}

impl FormField {
    pub fn required(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            field_type: "string",
            required: true,
            default: None,
        }
    }

    pub fn optional(name: impl Into<String>, default: impl Into<Value>) -> Self {
        Self {
            name: name.into(),
            field_type: "string",
            required: false,
            default: Some(default.into()),
        }
    }
}

/// What a flow step asks for next
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FlowResult {
    /// Show a form; submitting it re-enters `step_id`
    Form {
        step_id: String,
        data_schema: Vec<FormField>,
        errors: BTreeMap<String, String>,
        description_placeholders: BTreeMap<String, String>,
    },
    /// Send the user to an external page; completion re-enters `step_id`
    ExternalStep { step_id: String, url: String },
    /// Finish the flow with an entry
    CreateEntry {
        title: String,
        /// Never echoed back to the client
        #[serde(skip)]
        data: Map<String, Value>,
        #[serde(skip)]
        unique_id: Option<String>,
        /// entry_id, filled in once the entry is stored
        #[serde(skip_serializing_if = "Option::is_none")]
        result: Option<String>,
    },
    Abort {
        reason: String,
        description_placeholders: BTreeMap<String, String>,
    },
}

impl FlowResult {
    pub fn form(step_id: impl Into<String>, data_schema: Vec<FormField>) -> Self {
        FlowResult::Form {
            step_id: step_id.into(),
            data_schema,
            errors: BTreeMap::new(),
            description_placeholders: BTreeMap::new(),
        }
    }

    /// Attach field errors to a form (`base` for form-wide errors)
    pub fn with_errors(mut self, new_errors: BTreeMap<String, String>) -> Self {
        if let FlowResult::Form { ref mut errors, .. } = self {
            *errors = new_errors;
        }
        self
    }

    pub fn with_placeholders(mut self, placeholders: BTreeMap<String, String>) -> Self {
        match self {
            FlowResult::Form {
                ref mut description_placeholders,
                ..
            }
            | FlowResult::Abort {
                ref mut description_placeholders,
                ..
            } => *description_placeholders = placeholders,
            _ => {}
        }
        self
    }

    pub fn external_step(step_id: impl Into<String>, url: impl Into<String>) -> Self {
        FlowResult::ExternalStep {
            step_id: step_id.into(),
            url: url.into(),
        }
    }

    pub fn create_entry(
        title: impl Into<String>,
        data: Map<String, Value>,
        unique_id: Option<String>,
    ) -> Self {
        FlowResult::CreateEntry {
            title: title.into(),
            data,
            unique_id,
            result: None,
        }
    }

    pub fn abort(reason: impl Into<String>) -> Self {
        FlowResult::Abort {
            reason: reason.into(),
            description_placeholders: BTreeMap::new(),
        }
    }

    fn step_id(&self) -> Option<&str> {
        match self {
            FlowResult::Form { step_id, .. } | FlowResult::ExternalStep { step_id, .. } => {
                Some(step_id)
            }
            _ => None,
        }
    }
}

/// Which kind of flow is running
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlowSource {
    /// Creating a new entry
    User,
    /// Editing the options of an existing entry
    Options { entry_id: String },
}

#[derive(Debug, Clone)]
pub struct FlowContext {
    pub flow_id: String,
    /// Integration domain
    pub handler: String,
    pub source: FlowSource,
}

/// A running flow
#[async_trait]
pub trait ConfigFlow: Send + Sync {
    /// Handle `step_id`; `input` is `None` when the step is first shown
    async fn async_step(
        &mut self,
        step_id: &str,
        input: Option<Value>,
    ) -> Result<FlowResult, FlowError>;
}

pub type FlowFactory = Arc<dyn Fn(&FlowContext) -> Box<dyn ConfigFlow> + Send + Sync>;

/// Flow state returned to the client
#[derive(Debug, Clone, Serialize)]
pub struct FlowResponse {
    pub flow_id: String,
    pub handler: String,
    #[serde(flatten)]
    pub result: FlowResult,
}

/// Flows started longer ago than this are dropped, e.g. an abandoned OAuth redirect
pub const FLOW_MAX_AGE: Duration = Duration::from_secs(60 * 60);

struct ActiveFlow {
    context: FlowContext,
    flow: Box<dyn ConfigFlow>,
    last_result: FlowResult,
}

struct InProgress {
    started: Instant,
    active: Arc<Mutex<ActiveFlow>>,
}

pub struct FlowManager {
    config_entries: Arc<ConfigEntries>,
    config_flows: DashMap<String, FlowFactory>,
    options_flows: DashMap<String, FlowFactory>,
    progress: DashMap<String, InProgress>,
    max_age: Duration,
}

impl FlowManager {
    pub fn new(config_entries: Arc<ConfigEntries>) -> Self {
        Self {
            config_entries,
            config_flows: DashMap::new(),
            options_flows: DashMap::new(),
            progress: DashMap::new(),
            max_age: FLOW_MAX_AGE,
        }
    }

    pub fn with_max_age(mut self, max_age: Duration) -> Self {
        self.max_age = max_age;
        self
    }

    pub fn register_config_flow(&self, domain: impl Into<String>, factory: FlowFactory) {
        self.config_flows.insert(domain.into(), factory);
    }

    pub fn register_options_flow(&self, domain: impl Into<String>, factory: FlowFactory) {
        self.options_flows.insert(domain.into(), factory);
    }

    /// Start a config flow for `handler` at its `user` step
    pub async fn init(&self, handler: &str) -> Result<FlowResponse, FlowError> {
        let factory = self
            .config_flows
            .get(handler)
            .map(|f| f.value().clone())
            .ok_or_else(|| FlowError::UnknownHandler(handler.to_string()))?;

        let context = FlowContext {
            flow_id: ulid::Ulid::new().to_string(),
            handler: handler.to_string(),
            source: FlowSource::User,
        };
        self.start(context, factory, "user").await
    }

    /// Start an options flow for an existing entry at its `init` step
    pub async fn init_options(&self, entry_id: &str) -> Result<FlowResponse, FlowError> {
        let entry = self
            .config_entries
            .get(entry_id)
            .ok_or_else(|| ConfigEntriesError::NotFound(entry_id.to_string()))?;
        let factory = self
            .options_flows
            .get(&entry.domain)
            .map(|f| f.value().clone())
            .ok_or_else(|| FlowError::UnknownHandler(entry.domain.clone()))?;

        let context = FlowContext {
            flow_id: ulid::Ulid::new().to_string(),
            handler: entry.domain.clone(),
            source: FlowSource::Options {
                entry_id: entry_id.to_string(),
            },
        };
        self.start(context, factory, "init").await
    }

    async fn start(
        &self,
        context: FlowContext,
        factory: FlowFactory,
        first_step: &str,
    ) -> Result<FlowResponse, FlowError> {
        debug!(flow_id = %context.flow_id, handler = %context.handler, "Starting flow");
        self.expire_stale();

        let mut flow = factory(&context);
        let result = flow.async_step(first_step, None).await?;
        let flow_id = context.flow_id.clone();

        let active = Arc::new(Mutex::new(ActiveFlow {
            context,
            flow,
            last_result: result.clone(),
        }));
        self.progress.insert(
            flow_id,
            InProgress {
                started: Instant::now(),
                active: active.clone(),
            },
        );

        let mut guard = active.lock().await;
        self.finish_step(&mut guard, result).await
    }

    /// Feed input to the step the flow is waiting on
    ///
    /// A step that fails ends the flow.
    pub async fn configure(
        &self,
        flow_id: &str,
        input: Option<Value>,
    ) -> Result<FlowResponse, FlowError> {
        let active = self.active(flow_id)?;

        let mut guard = active.lock().await;
        let step_id = guard
            .last_result
            .step_id()
            .map(str::to_string)
            .ok_or_else(|| FlowError::UnknownFlow(flow_id.to_string()))?;

        let result = match guard.flow.async_step(&step_id, input).await {
            Ok(result) => result,
            Err(err) => {
                warn!(flow_id = %flow_id, step_id = %step_id, "Flow step failed: {}", err);
                self.progress.remove(flow_id);
                return Err(err);
            }
        };
        self.finish_step(&mut guard, result).await
    }

    /// Last result of a flow still in progress
    pub async fn get(&self, flow_id: &str) -> Result<FlowResponse, FlowError> {
        let active = self.active(flow_id)?;
        let guard = active.lock().await;
        Ok(FlowResponse {
            flow_id: guard.context.flow_id.clone(),
            handler: guard.context.handler.clone(),
            result: guard.last_result.clone(),
        })
    }

    pub fn abort(&self, flow_id: &str) -> bool {
        self.progress.remove(flow_id).is_some()
    }

    pub fn in_progress(&self) -> usize {
        self.progress.len()
    }

    fn active(&self, flow_id: &str) -> Result<Arc<Mutex<ActiveFlow>>, FlowError> {
        self.expire_stale();
        self.progress
            .get(flow_id)
            .map(|f| f.active.clone())
            .ok_or_else(|| FlowError::UnknownFlow(flow_id.to_string()))
    }

    /// Drop flows older than the maximum age
    fn expire_stale(&self) {
        let max_age = self.max_age;
        self.progress.retain(|flow_id, flow| {
            let fresh = flow.started.elapsed() < max_age;
            if !fresh {
                debug!(flow_id = %flow_id, "Expiring stale flow");
            }
            fresh
        });
    }

    async fn finish_step(
        &self,
        active: &mut ActiveFlow,
        result: FlowResult,
    ) -> Result<FlowResponse, FlowError> {
        let context = active.context.clone();

        let result = match result {
            FlowResult::CreateEntry {
                title,
                data,
                unique_id,
                ..
            } => {
                self.progress.remove(&context.flow_id);
                self.create_entry(&context, title, data, unique_id).await?
            }
            FlowResult::Abort { .. } => {
                self.progress.remove(&context.flow_id);
                result
            }
            pending => {
                active.last_result = pending.clone();
                pending
            }
        };

        Ok(FlowResponse {
            flow_id: context.flow_id,
            handler: context.handler,
            result,
        })
    }

    async fn create_entry(
        &self,
        context: &FlowContext,
        title: String,
        data: Map<String, Value>,
        unique_id: Option<String>,
    ) -> Result<FlowResult, FlowError> {
        match &context.source {
            FlowSource::User => {
                let mut entry = ConfigEntry::new(&context.handler, &title).with_data(data);
                entry.unique_id = unique_id;

                let entry = match self.config_entries.add(entry).await {
                    Ok(entry) => entry,
                    Err(ConfigEntriesError::AlreadyExists { .. }) => {
                        return Ok(FlowResult::abort("already_configured"))
                    }
                    Err(e) => return Err(e.into()),
                };
                info!(entry_id = %entry.entry_id, title = %title, "Flow created config entry");

                if let Err(e) = self.config_entries.setup(&entry.entry_id).await {
                    warn!(entry_id = %entry.entry_id, error = %e, "Setup of new entry failed");
                }

                Ok(FlowResult::CreateEntry {
                    title,
                    data: Map::new(),
                    unique_id: None,
                    result: Some(entry.entry_id),
                })
            }
            FlowSource::Options { entry_id } => {
                if !data.is_empty() {
                    self.config_entries
                        .update(entry_id, ConfigEntryUpdate::new().options(data))
                        .await?;
                }
                Ok(FlowResult::CreateEntry {
                    title,
                    data: Map::new(),
                    unique_id: None,
                    result: Some(entry_id.clone()),
                })
            }
        }
    }
}
