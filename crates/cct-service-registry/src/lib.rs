//! Service registry with async handlers
//!
//! Services are how users act on the integration: every
//! `cat_care_tracker.log_*` call is routed through here. Service data is
//! checked against the registered JSON schema before the handler runs.

use cct_core::events::CallServiceData;
use cct_core::{Context, ServiceCall, SupportsResponse};
use cct_event_bus::EventBus;
use dashmap::DashMap;
use jsonschema::JSONSchema;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, instrument, warn};

/// Result type for service calls
pub type ServiceResult = Result<Option<serde_json::Value>, ServiceError>;

/// Future type for async service handlers
pub type ServiceFuture = Pin<Box<dyn Future<Output = ServiceResult> + Send>>;

/// Service handler function type
pub type ServiceHandler = Arc<dyn Fn(ServiceCall) -> ServiceFuture + Send + Sync>;

/// Why a service could not be registered or called
#[derive(Debug, Clone, Error)]
pub enum ServiceError {
    /// No handler under `domain.service`
    #[error("service not found: {domain}.{service}")]
    NotFound { domain: String, service: String },

    /// The handler ran and reported a failure
    #[error("service call failed: {0}")]
    CallFailed(String),

    /// Service data did not match the schema, or the handler rejected it
    #[error("invalid service data: {0}")]
    InvalidData(String),

    /// The description's schema does not compile
    #[error("invalid schema for {service}: {message}")]
    InvalidSchema { service: String, message: String },

    /// A response was requested from a service that never returns one
    #[error("service does not support responses")]
    ResponseNotSupported,
}

/// Information about a registered service
#[derive(Debug, Clone)]
pub struct ServiceDescription {
    /// Integration owning the service, e.g. `cat_care_tracker`
    pub domain: String,
    /// Service name within the domain, e.g. `log_feeding`
    pub service: String,
    /// Human-readable name
    pub name: Option<String>,
    /// What the service does, shown by `/api/services`
    pub description: Option<String>,
    /// JSON schema the service data must satisfy
    pub schema: Option<serde_json::Value>,
    /// Whether callers may ask for the handler's response
    pub supports_response: SupportsResponse,
}

impl ServiceDescription {
    /// Description with no schema that returns no response
    pub fn new(domain: impl Into<String>, service: impl Into<String>) -> Self {
        Self {
            domain: domain.into(),
            service: service.into(),
            name: None,
            description: None,
            schema: None,
            supports_response: SupportsResponse::None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_schema(mut self, schema: serde_json::Value) -> Self {
        self.schema = Some(schema);
        self
    }

    pub fn with_supports_response(mut self, supports_response: SupportsResponse) -> Self {
        self.supports_response = supports_response;
        self
    }

    fn key(&self) -> String {
        format!("{}.{}", self.domain, self.service)
    }
}

struct RegisteredService {
    handler: ServiceHandler,
    validator: Option<Arc<JSONSchema>>,
    description: ServiceDescription,
}

/// Routes service calls to their handlers
pub struct ServiceRegistry {
    /// Services indexed by "domain.service" key
    services: DashMap<String, RegisteredService>,
    event_bus: Option<Arc<EventBus>>,
}

impl ServiceRegistry {
    pub fn new() -> Self {
        Self {
            services: DashMap::new(),
            event_bus: None,
        }
    }

    /// Create a registry that fires `call_service` for every dispatched call
    pub fn with_event_bus(event_bus: Arc<EventBus>) -> Self {
        Self {
            services: DashMap::new(),
            event_bus: Some(event_bus),
        }
    }

    /// Register a service with its description and handler
    ///
    /// Replaces any service already registered under the same name. Fails if
    /// the description carries a schema that does not compile.
    #[instrument(skip(self, description, handler), fields(domain = %description.domain, service = %description.service))]
    pub fn register_with_description<F, Fut>(
        &self,
        description: ServiceDescription,
        handler: F,
    ) -> Result<(), ServiceError>
    where
        F: Fn(ServiceCall) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ServiceResult> + Send + 'static,
    {
        let key = description.key();

        let validator = match &description.schema {
            Some(schema) => {
                let compiled =
                    JSONSchema::compile(schema).map_err(|e| ServiceError::InvalidSchema {
                        service: key.clone(),
                        message: e.to_string(),
                    })?;
                Some(Arc::new(compiled))
            }
            None => None,
        };

        debug!("Registering service");

        let handler: ServiceHandler =
            Arc::new(move |call| Box::pin(handler(call)) as ServiceFuture);

        self.services.insert(
            key,
            RegisteredService {
                handler,
                validator,
                description,
            },
        );
        Ok(())
    }

    /// Call a service
    ///
    /// Unless `return_response` is set the handler's response is discarded.
    #[instrument(skip(self, service_data, context))]
    pub async fn call(
        &self,
        domain: &str,
        service: &str,
        service_data: serde_json::Value,
        context: Context,
        return_response: bool,
    ) -> ServiceResult {
        let key = format!("{}.{}", domain, service);

        let registered = self.services.get(&key).ok_or_else(|| {
            warn!("Service not found");
            ServiceError::NotFound {
                domain: domain.to_string(),
                service: service.to_string(),
            }
        })?;

        if return_response && registered.description.supports_response == SupportsResponse::None {
            return Err(ServiceError::ResponseNotSupported);
        }

        let service_data = if service_data.is_null() {
            serde_json::Value::Object(Default::default())
        } else {
            service_data
        };

        if let Some(validator) = &registered.validator {
            if let Err(errors) = validator.validate(&service_data) {
                let messages: Vec<String> = errors.map(|e| e.to_string()).collect();
                warn!(errors = ?messages, "Service data failed validation");
                return Err(ServiceError::InvalidData(messages.join("; ")));
            }
        }

        let handler = registered.handler.clone();
        drop(registered); // Release the map guard before awaiting

        if let Some(bus) = &self.event_bus {
            bus.fire_typed(
                CallServiceData {
                    domain: domain.to_string(),
                    service: service.to_string(),
                    service_data: service_data.clone(),
                },
                context.clone(),
            );
        }

        debug!("Calling service");
        let call = ServiceCall::new(domain, service, service_data, context);
        let result = handler(call).await?;

        if return_response {
            Ok(result)
        } else {
            Ok(None)
        }
    }

    pub fn has_service(&self, domain: &str, service: &str) -> bool {
        self.services.contains_key(&format!("{}.{}", domain, service))
    }

    pub fn get_service(&self, domain: &str, service: &str) -> Option<ServiceDescription> {
        self.services
            .get(&format!("{}.{}", domain, service))
            .map(|s| s.description.clone())
    }

    /// Get all services for a domain
    pub fn domain_services(&self, domain: &str) -> Vec<ServiceDescription> {
        let mut services: Vec<_> = self
            .services
            .iter()
            .filter(|s| s.description.domain == domain)
            .map(|s| s.description.clone())
            .collect();
        services.sort_by(|a, b| a.service.cmp(&b.service));
        services
    }

    /// Get all registered services grouped by domain
    pub fn all_services(&self) -> HashMap<String, Vec<ServiceDescription>> {
        let mut result: HashMap<String, Vec<ServiceDescription>> = HashMap::new();
        for entry in self.services.iter() {
            result
                .entry(entry.description.domain.clone())
                .or_default()
                .push(entry.description.clone());
        }
        for services in result.values_mut() {
            services.sort_by(|a, b| a.service.cmp(&b.service));
        }
        result
    }

    #[instrument(skip(self))]
    pub fn unregister(&self, domain: &str, service: &str) -> bool {
        let removed = self
            .services
            .remove(&format!("{}.{}", domain, service))
            .is_some();
        if removed {
            debug!("Unregistered service");
        }
        removed
    }

    /// Unregister all services for a domain, returning how many were removed
    #[instrument(skip(self))]
    pub fn unregister_domain(&self, domain: &str) -> usize {
        let keys: Vec<_> = self
            .services
            .iter()
            .filter(|s| s.description.domain == domain)
            .map(|s| s.description.key())
            .collect();

        let count = keys.len();
        for key in keys {
            self.services.remove(&key);
        }

        debug!(count, "Unregistered domain services");
        count
    }

    pub fn service_count(&self) -> usize {
        self.services.len()
    }
}

impl Default for ServiceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Thread-safe wrapper for ServiceRegistry
pub type SharedServiceRegistry = Arc<ServiceRegistry>;
