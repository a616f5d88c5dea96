//! Cat Care Tracker REST API
//!
//! The HTTP surface of the host, built on axum: entity states, service
//! calls, config and options flows, the OAuth2 redirect target and the static
//! directories integrations register during setup.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::{header, HeaderValue, StatusCode},
    response::{Html, IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use cct_config_entries::{ConfigEntriesError, ConfigEntry, FlowError, FlowResponse};
use cct_core::Context;
use cct_helpers::{Hass, AUTH_CALLBACK_PATH};
use cct_service_registry::ServiceError;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::ServeDir;
use tower_http::set_header::SetResponseHeaderLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub hass: Arc<Hass>,
}

/// API status response
#[derive(Serialize)]
struct ApiStatus {
    message: &'static str,
}

/// State response for a single entity
#[derive(Serialize)]
pub struct StateResponse {
    pub entity_id: String,
    pub state: String,
    pub attributes: HashMap<String, Value>,
    pub last_changed: String,
    pub last_updated: String,
    pub context: ContextResponse,
}

#[derive(Serialize)]
pub struct ContextResponse {
    pub id: String,
    pub parent_id: Option<String>,
    pub user_id: Option<String>,
}

/// Services of one domain
#[derive(Serialize)]
pub struct ServiceResponse {
    pub domain: String,
    pub services: BTreeMap<String, ServiceDescriptionResponse>,
}

#[derive(Serialize)]
pub struct ServiceDescriptionResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Properties of the service's data schema
    pub fields: Value,
}

#[derive(Deserialize)]
struct ServiceCallQuery {
    #[serde(default)]
    return_response: Option<String>,
}

/// Config entry as listed over HTTP
#[derive(Serialize)]
pub struct ConfigEntryResponse {
    pub entry_id: String,
    pub domain: String,
    pub title: String,
    pub source: Value,
    pub state: Value,
    pub reason: Option<String>,
    pub unique_id: Option<String>,
}

impl From<ConfigEntry> for ConfigEntryResponse {
    fn from(entry: ConfigEntry) -> Self {
        Self {
            entry_id: entry.entry_id,
            domain: entry.domain,
            title: entry.title,
            source: serde_json::to_value(entry.source).unwrap_or(Value::Null),
            state: serde_json::to_value(entry.state).unwrap_or(Value::Null),
            reason: entry.reason,
            unique_id: entry.unique_id,
        }
    }
}

/// Request to start a config flow
#[derive(Deserialize)]
pub struct StartFlowRequest {
    pub handler: String,
}

/// Query string the OAuth2 provider redirects back with
#[derive(Debug, Deserialize)]
pub struct CallbackParams {
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

/// Error response
#[derive(Serialize)]
pub struct ErrorResponse {
    pub message: String,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

fn api_error(status: StatusCode, message: impl Into<String>) -> ApiError {
    (
        status,
        Json(ErrorResponse {
            message: message.into(),
        }),
    )
}

fn flow_error(err: FlowError) -> ApiError {
    let status = match &err {
        FlowError::UnknownHandler(_) | FlowError::UnknownFlow(_) => StatusCode::NOT_FOUND,
        FlowError::UnknownStep(_) | FlowError::InvalidInput(_) => StatusCode::BAD_REQUEST,
        FlowError::ConfigEntries(ConfigEntriesError::NotFound(_)) => StatusCode::NOT_FOUND,
        FlowError::ConfigEntries(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    api_error(status, err.to_string())
}

fn service_error(err: ServiceError) -> ApiError {
    let status = match &err {
        ServiceError::NotFound { .. } => StatusCode::NOT_FOUND,
        ServiceError::InvalidData(_) | ServiceError::ResponseNotSupported => StatusCode::BAD_REQUEST,
        ServiceError::CallFailed(_) | ServiceError::InvalidSchema { .. } => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    };
    api_error(status, err.to_string())
}

/// Create the API router
///
/// Static paths are read from the host when the router is built, so
/// integrations must be set up first.
pub fn create_router(hass: Arc<Hass>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let static_paths = hass.static_paths();
    let state = AppState { hass };

    let mut router = Router::new()
        .route("/api/", get(api_status))
        // State endpoints
        .route("/api/states", get(get_states))
        .route("/api/states/:entity_id", get(get_state))
        // Service endpoints
        .route("/api/services", get(get_services))
        .route("/api/services/:domain/:service", post(call_service))
        // Config entries
        .route("/api/config/config_entries/entry", get(get_config_entries))
        .route(
            "/api/config/config_entries/entry/:entry_id",
            delete(delete_config_entry),
        )
        .route(
            "/api/config/config_entries/entry/:entry_id/reload",
            post(reload_config_entry),
        )
        // Config flow routes
        .route("/api/config/config_entries/flow", post(start_config_flow))
        .route(
            "/api/config/config_entries/flow/:flow_id",
            get(get_flow).post(progress_flow).delete(cancel_flow),
        )
        // Options flow routes
        .route(
            "/api/config/config_entries/options/flow",
            post(start_options_flow),
        )
        .route(
            "/api/config/config_entries/options/flow/:flow_id",
            get(get_flow).post(progress_flow).delete(cancel_flow),
        )
        // OAuth2 redirect target
        .route(AUTH_CALLBACK_PATH, get(oauth_callback));

    for path in static_paths {
        info!(url_path = %path.url_path, dir = %path.path.display(), "Serving static path");
        let serve_dir = ServeDir::new(&path.path);
        router = if path.cache_headers {
            router.nest_service(&path.url_path, serve_dir)
        } else {
            router.nest_service(
                &path.url_path,
                ServiceBuilder::new()
                    .layer(SetResponseHeaderLayer::overriding(
                        header::CACHE_CONTROL,
                        HeaderValue::from_static("no-cache"),
                    ))
                    .service(serve_dir),
            )
        };
    }

    router
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Start the API server
pub async fn start_server(
    router: Router,
    addr: &str,
    shutdown: impl std::future::Future<Output = ()> + Send + 'static,
) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("API server listening on {}", addr);
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown)
        .await
}

// ==================== Handlers ====================

/// GET /api/ - Returns API status
async fn api_status() -> Json<ApiStatus> {
    Json(ApiStatus {
        message: "API running.",
    })
}

fn state_to_response(s: &cct_core::State) -> StateResponse {
    StateResponse {
        entity_id: s.entity_id.to_string(),
        state: s.state.clone(),
        attributes: s.attributes.clone(),
        last_changed: s.last_changed.to_rfc3339(),
        last_updated: s.last_updated.to_rfc3339(),
        context: ContextResponse {
            id: s.context.id.clone(),
            parent_id: s.context.parent_id.clone(),
            user_id: s.context.user_id.clone(),
        },
    }
}

/// GET /api/states - Returns all entity states
async fn get_states(State(state): State<AppState>) -> Json<Vec<StateResponse>> {
    let mut states = state.hass.states.all();
    states.sort_by(|a, b| a.entity_id.to_string().cmp(&b.entity_id.to_string()));
    Json(states.iter().map(state_to_response).collect())
}

/// GET /api/states/{entity_id} - Returns a single entity state
async fn get_state(
    State(state): State<AppState>,
    Path(entity_id): Path<String>,
) -> Result<Json<StateResponse>, ApiError> {
    state
        .hass
        .states
        .get(&entity_id)
        .map(|s| Json(state_to_response(&s)))
        .ok_or_else(|| api_error(StatusCode::NOT_FOUND, format!("Entity not found: {}", entity_id)))
}

/// GET /api/services - Returns available services per domain
async fn get_services(State(state): State<AppState>) -> Json<Vec<ServiceResponse>> {
    let mut responses: Vec<ServiceResponse> = state
        .hass
        .services
        .all_services()
        .into_iter()
        .map(|(domain, descriptions)| {
            let services = descriptions
                .into_iter()
                .map(|desc| {
                    let fields = desc
                        .schema
                        .as_ref()
                        .and_then(|schema| schema.get("properties"))
                        .cloned()
                        .unwrap_or_else(|| json!({}));
                    (
                        desc.service,
                        ServiceDescriptionResponse {
                            name: desc.name,
                            description: desc.description,
                            fields,
                        },
                    )
                })
                .collect();
            ServiceResponse { domain, services }
        })
        .collect();
    responses.sort_by(|a, b| a.domain.cmp(&b.domain));
    Json(responses)
}

/// POST /api/services/{domain}/{service} - Calls a service
///
/// Responds with `[]`, or with the service response when the query string
/// carries `return_response`.
async fn call_service(
    State(state): State<AppState>,
    Path((domain, service)): Path<(String, String)>,
    Query(query): Query<ServiceCallQuery>,
    body: Option<Json<Value>>,
) -> Result<Json<Value>, ApiError> {
    let service_data = body.map(|Json(data)| data).unwrap_or(Value::Null);
    let return_response = query.return_response.is_some();
    info!(domain = %domain, service = %service, "HTTP service call");

    let response = state
        .hass
        .services
        .call(&domain, &service, service_data, Context::new(), return_response)
        .await
        .map_err(service_error)?;

    if return_response {
        Ok(Json(json!({
            "changed_states": [],
            "service_response": response.unwrap_or(Value::Null),
        })))
    } else {
        Ok(Json(json!([])))
    }
}

/// GET /api/config/config_entries/entry - Lists config entries
async fn get_config_entries(State(state): State<AppState>) -> Json<Vec<ConfigEntryResponse>> {
    let entries = &state.hass.config_entries;
    Json(
        entries
            .entry_ids()
            .iter()
            .filter_map(|id| entries.get(id))
            .map(ConfigEntryResponse::from)
            .collect(),
    )
}

/// DELETE /api/config/config_entries/entry/{entry_id} - Unloads and deletes an entry
async fn delete_config_entry(
    State(state): State<AppState>,
    Path(entry_id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    info!("HTTP DELETE config entry: {}", entry_id);
    match state.hass.config_entries.remove(&entry_id).await {
        Ok(_) => Ok(Json(json!({ "require_restart": false }))),
        Err(ConfigEntriesError::NotFound(_)) => Err(api_error(
            StatusCode::NOT_FOUND,
            format!("Invalid entry specified: {}", entry_id),
        )),
        Err(e) => {
            warn!("Failed to delete config entry {}: {}", entry_id, e);
            Err(api_error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))
        }
    }
}

/// POST /api/config/config_entries/entry/{entry_id}/reload - Reloads an entry
async fn reload_config_entry(
    State(state): State<AppState>,
    Path(entry_id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    match state.hass.config_entries.reload(&entry_id).await {
        Ok(entry_state) => Ok(Json(json!({ "state": entry_state }))),
        Err(ConfigEntriesError::NotFound(_)) => Err(api_error(
            StatusCode::NOT_FOUND,
            format!("Invalid entry specified: {}", entry_id),
        )),
        Err(e) => Err(api_error(StatusCode::BAD_REQUEST, e.to_string())),
    }
}

/// POST /api/config/config_entries/flow - Start a new config flow
async fn start_config_flow(
    State(state): State<AppState>,
    Json(request): Json<StartFlowRequest>,
) -> Result<Json<FlowResponse>, ApiError> {
    info!("HTTP POST start config flow for handler: {}", request.handler);
    state
        .hass
        .flows
        .init(&request.handler)
        .await
        .map(Json)
        .map_err(flow_error)
}

/// POST /api/config/config_entries/options/flow - Start an options flow
///
/// `handler` is the entry_id of the entry being edited.
async fn start_options_flow(
    State(state): State<AppState>,
    Json(request): Json<StartFlowRequest>,
) -> Result<Json<FlowResponse>, ApiError> {
    info!("HTTP POST start options flow for entry: {}", request.handler);
    state
        .hass
        .flows
        .init_options(&request.handler)
        .await
        .map(Json)
        .map_err(flow_error)
}

/// GET .../flow/{flow_id} - Current step of a flow in progress
async fn get_flow(
    State(state): State<AppState>,
    Path(flow_id): Path<String>,
) -> Result<Json<FlowResponse>, ApiError> {
    state.hass.flows.get(&flow_id).await.map(Json).map_err(flow_error)
}

/// POST .../flow/{flow_id} - Continue a flow with user input
///
/// An empty body re-shows the current step; `{}` is a submitted empty form.
async fn progress_flow(
    State(state): State<AppState>,
    Path(flow_id): Path<String>,
    body: Option<Json<Value>>,
) -> Result<Json<FlowResponse>, ApiError> {
    info!("HTTP POST progress flow: {}", flow_id);
    let input = body.map(|Json(input)| input);
    state
        .hass
        .flows
        .configure(&flow_id, input)
        .await
        .map(Json)
        .map_err(flow_error)
}

/// DELETE .../flow/{flow_id} - Abort a flow in progress
async fn cancel_flow(
    State(state): State<AppState>,
    Path(flow_id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    if state.hass.flows.abort(&flow_id) {
        info!("Flow {} aborted", flow_id);
        Ok(Json(json!({ "message": "Flow aborted" })))
    } else {
        Err(api_error(
            StatusCode::NOT_FOUND,
            format!("Invalid flow specified: {}", flow_id),
        ))
    }
}

/// GET /auth/external/callback - Completes the external step of an OAuth2 flow
///
/// `state` is the flow id; the code (or the provider's error) is fed to the
/// step the flow is waiting on.
async fn oauth_callback(
    State(state): State<AppState>,
    Query(params): Query<CallbackParams>,
) -> Response {
    let Some(flow_id) = params.state else {
        return (StatusCode::BAD_REQUEST, "Missing state parameter").into_response();
    };
    let input = match (params.error, params.code) {
        (Some(error), _) => json!({ "error": error }),
        (None, Some(code)) => json!({ "code": code }),
        (None, None) => {
            return (StatusCode::BAD_REQUEST, "Missing code parameter").into_response()
        }
    };

    match state.hass.flows.configure(&flow_id, Some(input)).await {
        Ok(response) => {
            info!(flow_id = %response.flow_id, "External authorization step completed");
            Html(
                "<html><body>Success! This window can be closed\
                 <script>window.close()</script></body></html>",
            )
            .into_response()
        }
        Err(e) => {
            warn!(flow_id = %flow_id, error = %e, "OAuth2 callback failed");
            flow_error(e).into_response()
        }
    }
}
