//! In-process stand-in for the Sheets v4 API and Google's token endpoint

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use axum::extract::{Form, Path, Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};
use tokio::net::TcpListener;

pub const HEADER: [&str; 5] = ["Timestamp", "Date", "Checkin Type", "Water Refill", "BG (mg/dL)"];

#[derive(Default)]
pub struct MockState {
    pub spreadsheets: HashMap<String, Vec<Vec<String>>>,
    pub private: HashSet<String>,
    pub broken: HashSet<String>,
    pub access_token: String,
    /// Lifetime reported for issued tokens, 3599 when unset
    pub expires_in: Option<i64>,
    pub ranges: Vec<String>,
    pub append_queries: Vec<HashMap<String, String>>,
    pub token_requests: Vec<HashMap<String, String>>,
}

#[derive(Clone)]
pub struct MockSheets(pub Arc<Mutex<MockState>>);

impl MockSheets {
    pub fn new(access_token: &str) -> Self {
        let state = MockState {
            access_token: access_token.to_string(),
            ..Default::default()
        };
        MockSheets(Arc::new(Mutex::new(state)))
    }

    pub fn add_sheet(&self, id: &str, rows: Vec<Vec<&str>>) {
        let mut values = vec![HEADER.iter().map(|h| h.to_string()).collect::<Vec<_>>()];
        values.extend(rows.into_iter().map(|r| r.into_iter().map(String::from).collect()));
        self.0.lock().unwrap().spreadsheets.insert(id.to_string(), values);
    }

    pub fn rows(&self, id: &str) -> Vec<Vec<String>> {
        self.0.lock().unwrap().spreadsheets.get(id).cloned().unwrap_or_default()
    }

    fn authorized(&self, headers: &HeaderMap) -> bool {
        let expected = format!("Bearer {}", self.0.lock().unwrap().access_token);
        headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v == expected)
    }

    /// Status to fail with, if any
    fn check(&self, headers: &HeaderMap, id: &str) -> Option<StatusCode> {
        if !self.authorized(headers) {
            return Some(StatusCode::UNAUTHORIZED);
        }
        let state = self.0.lock().unwrap();
        if state.broken.contains(id) {
            Some(StatusCode::INTERNAL_SERVER_ERROR)
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

async fn get_spreadsheet(
    State(mock): State<MockSheets>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Response {
    match mock.check(&headers, &id) {
        Some(status) => google_error(status),
        None => Json(json!({"spreadsheetId": id})).into_response(),
    }
}

async fn get_values(
    State(mock): State<MockSheets>,
    Path((id, range)): Path<(String, String)>,
    headers: HeaderMap,
) -> Response {
    if let Some(status) = mock.check(&headers, &id) {
        return google_error(status);
    }
    let mut state = mock.0.lock().unwrap();
    state.ranges.push(range.clone());
    let values = state.spreadsheets[&id].clone();
    if values.is_empty() {
        Json(json!({"range": range, "majorDimension": "ROWS"})).into_response()
    } else {
        Json(json!({"range": range, "majorDimension": "ROWS", "values": values})).into_response()
    }
}

async fn append_values(
    State(mock): State<MockSheets>,
    Path((id, range)): Path<(String, String)>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    if let Some(status) = mock.check(&headers, &id) {
        return google_error(status);
    }
    let Some(range) = range.strip_suffix(":append") else {
        return google_error(StatusCode::BAD_REQUEST);
    };

    let rows: Vec<Vec<String>> = serde_json::from_value(body["values"].clone()).unwrap();
    let mut state = mock.0.lock().unwrap();
    state.ranges.push(range.to_string());
    state.append_queries.push(query);
    state.spreadsheets.get_mut(&id).unwrap().extend(rows);
    Json(json!({"spreadsheetId": id, "updates": {"updatedRows": 1}})).into_response()
}

async fn token(State(mock): State<MockSheets>, Form(form): Form<HashMap<String, String>>) -> Response {
    let mut state = mock.0.lock().unwrap();
    state.token_requests.push(form);
    Json(json!({
        "access_token": state.access_token,
        "expires_in": state.expires_in.unwrap_or(3599),
        "token_type": "Bearer"
    }))
    .into_response()
}

/// Start the mock on an ephemeral port and return its base URL
pub async fn spawn(mock: MockSheets) -> String {
    let app = Router::new()
        .route("/v4/spreadsheets/:id", get(get_spreadsheet))
        .route("/v4/spreadsheets/:id/values/:range", get(get_values).post(append_values))
        .route("/token", post(token))
        .with_state(mock);

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}", addr)
}
