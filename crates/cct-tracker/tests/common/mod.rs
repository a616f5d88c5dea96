//! In-process stand-in for Google's OAuth2 token endpoint and Sheets v4

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use axum::extract::{Form, Path, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use cct_helpers::{AuthorizationServer, ClientCredential, Hass};
use cct_tracker::{async_setup, CatCareTracker, GoogleEndpoints, TrackerOptions, DOMAIN};
use serde_json::{json, Value};
use tokio::net::TcpListener;

pub const HEADER: [&str; 5] = ["Timestamp", "Date", "Checkin Type", "Water Refill", "BG (mg/dL)"];
pub const GOOD_CODE: &str = "good-code";

#[derive(Default)]
pub struct GoogleState {
    pub access_token: String,
    pub issued: usize,
    pub fail_refresh: bool,
    pub spreadsheets: HashMap<String, Vec<Vec<String>>>,
    pub private: HashSet<String>,
    pub token_requests: Vec<HashMap<String, String>>,
}

#[derive(Clone, Default)]
pub struct MockGoogle(pub Arc<Mutex<GoogleState>>);

impl MockGoogle {
    pub fn add_sheet(&self, id: &str) {
        let header = vec![HEADER.iter().map(|h| h.to_string()).collect::<Vec<_>>()];
        self.0.lock().unwrap().spreadsheets.insert(id.to_string(), header);
    }

    pub fn add_private_sheet(&self, id: &str) {
        self.add_sheet(id);
        self.0.lock().unwrap().private.insert(id.to_string());
    }

    pub fn rows(&self, id: &str) -> Vec<Vec<String>> {
        self.0.lock().unwrap().spreadsheets.get(id).cloned().unwrap_or_default()
    }

    pub fn token_requests(&self) -> Vec<HashMap<String, String>> {
        self.0.lock().unwrap().token_requests.clone()
    }

    fn check(&self, headers: &HeaderMap, id: &str) -> Option<StatusCode> {
        let state = self.0.lock().unwrap();
        let expected = format!("Bearer {}", state.access_token);
        let authorized = headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| !state.access_token.is_empty() && v == expected);

        if !authorized {
            Some(StatusCode::UNAUTHORIZED)
        } else if state.private.contains(id) {
            Some(StatusCode::FORBIDDEN)
        } else if !state.spreadsheets.contains_key(id) {
            Some(StatusCode::NOT_FOUND)
        } else {
            None
        }
    }
}

fn google_error(status: StatusCode) -> Response {
    let body = json!({"error": {"code": status.as_u16(), "message": format!("mock {}", status.as_u16())}});
    (status, Json(body)).into_response()
}

async fn token(State(mock): State<MockGoogle>, Form(form): Form<HashMap<String, String>>) -> Response {
    let mut state = mock.0.lock().unwrap();
    state.token_requests.push(form.clone());

    let granted = match form.get("grant_type").map(String::as_str) {
        Some("authorization_code") => form.get("code").is_some_and(|c| c == GOOD_CODE),
        Some("refresh_token") => !state.fail_refresh,
        _ => false,
    };
    if !granted {
        return (StatusCode::BAD_REQUEST, Json(json!({"error": "invalid_grant"}))).into_response();
    }

    state.issued += 1;
    state.access_token = format!("access-{}", state.issued);
    let mut body = json!({
        "access_token": state.access_token,
        "expires_in": 3599,
        "token_type": "Bearer",
        "scope": "https://www.googleapis.com/auth/spreadsheets"
    });
    if form.get("grant_type").map(String::as_str) == Some("authorization_code") {
        body["refresh_token"] = json!("refresh-1");
    }
    Json(body).into_response()
}

async fn get_spreadsheet(
    State(mock): State<MockGoogle>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Response {
    match mock.check(&headers, &id) {
        Some(status) => google_error(status),
        None => Json(json!({"spreadsheetId": id})).into_response(),
    }
}

async fn get_values(
    State(mock): State<MockGoogle>,
    Path((id, range)): Path<(String, String)>,
    headers: HeaderMap,
) -> Response {
    if let Some(status) = mock.check(&headers, &id) {
        return google_error(status);
    }
    let values = mock.rows(&id);
    Json(json!({"range": range, "majorDimension": "ROWS", "values": values})).into_response()
}

async fn append_values(
    State(mock): State<MockGoogle>,
    Path((id, _range)): Path<(String, String)>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    if let Some(status) = mock.check(&headers, &id) {
        return google_error(status);
    }
    let rows: Vec<Vec<String>> = serde_json::from_value(body["values"].clone()).unwrap();
    let mut state = mock.0.lock().unwrap();
    state.spreadsheets.get_mut(&id).unwrap().extend(rows);
    Json(json!({"spreadsheetId": id})).into_response()
}

/// Start the mock on an ephemeral port and return its base URL
pub async fn spawn(mock: MockGoogle) -> String {
    let app = Router::new()
        .route("/token", post(token))
        .route("/v4/spreadsheets/:id", get(get_spreadsheet))
        .route("/v4/spreadsheets/:id/values/:range", get(get_values).post(append_values))
        .with_state(mock);

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}", addr)
}

pub struct TestHost {
    pub hass: Arc<Hass>,
    pub tracker: Arc<CatCareTracker>,
    pub google: MockGoogle,
    pub dir: tempfile::TempDir,
}

/// Host with the integration set up against a fresh mock
pub async fn host() -> TestHost {
    let google = MockGoogle::default();
    let base_url = spawn(google.clone()).await;

    let dir = tempfile::tempdir().unwrap();
    let hass = Arc::new(Hass::new(dir.path(), "http://localhost:8123"));
    hass.import_client_credential(
        DOMAIN,
        ClientCredential {
            client_id: "client-id".into(),
            client_secret: "client-secret".into(),
        },
    );

    let endpoints = GoogleEndpoints {
        authorization_server: AuthorizationServer {
            authorize_url: format!("{}/authorize", base_url),
            token_url: format!("{}/token", base_url),
        },
        sheets_base_url: base_url,
    };
    let tracker = async_setup(&hass, TrackerOptions::default().with_endpoints(endpoints)).await;

    TestHost {
        hass,
        tracker,
        google,
        dir,
    }
}
