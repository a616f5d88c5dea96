//! Sheets v4 REST calls shared by both clients

use chrono::Local;
use reqwest::{StatusCode, Url};
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, error, info, instrument, warn};

use crate::entry::{parse_rows, Entry, NewEntry};
use crate::error::{ConnectionError, SheetsError, SheetsResult};
use crate::schema::{data_range, DEFAULT_SHEET_NAME};

/// Sheets v4 endpoint
pub const DEFAULT_BASE_URL: &str = "https://sheets.googleapis.com";

#[derive(Debug, Deserialize)]
struct ValuesResponse {
    #[serde(default)]
    values: Option<Vec<Vec<String>>>,
}

/// One sheet of one spreadsheet
#[derive(Debug, Clone)]
pub struct SheetsApi {
    http: reqwest::Client,
    base_url: String,
    spreadsheet_id: String,
    sheet_name: String,
}

impl SheetsApi {
    /// A blank or missing `sheet_name` falls back to `Sheet1`
    pub fn new(spreadsheet_id: impl Into<String>, sheet_name: Option<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: DEFAULT_BASE_URL.to_string(),
            spreadsheet_id: spreadsheet_id.into(),
            sheet_name: sheet_name
                .filter(|s| !s.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_SHEET_NAME.to_string()),
        }
    }

    /// Point at another Sheets endpoint
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_http_client(mut self, http: reqwest::Client) -> Self {
        self.http = http;
        self
    }

    /// Shared HTTP client, also used for token requests
    pub fn http(&self) -> &reqwest::Client {
        &self.http
    }

    pub fn spreadsheet_id(&self) -> &str {
        &self.spreadsheet_id
    }

    pub fn sheet_name(&self) -> &str {
        &self.sheet_name
    }

    /// A1 range of the data columns, e.g. `Sheet1!A:E`
    pub fn range(&self) -> String {
        data_range(&self.sheet_name)
    }

    fn url(&self, segments: &[&str]) -> SheetsResult<Url> {
        let mut url =
            Url::parse(&self.base_url).map_err(|e| SheetsError::InvalidUrl(e.to_string()))?;
        url.path_segments_mut()
            .map_err(|_| SheetsError::InvalidUrl(self.base_url.clone()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    pub fn spreadsheet_url(&self) -> SheetsResult<Url> {
        self.url(&["v4", "spreadsheets", &self.spreadsheet_id])
    }

    pub fn values_url(&self) -> SheetsResult<Url> {
        self.url(&["v4", "spreadsheets", &self.spreadsheet_id, "values", &self.range()])
    }

    pub fn append_url(&self) -> SheetsResult<Url> {
        let range = format!("{}:append", self.range());
        self.url(&["v4", "spreadsheets", &self.spreadsheet_id, "values", &range])
    }

    /// Append one row after the last row of the data range
    #[instrument(skip(self, token, row), fields(spreadsheet_id = %self.spreadsheet_id))]
    pub async fn append_row(&self, token: &str, row: &[String]) -> SheetsResult<()> {
        let resp = self
            .http
            .post(self.append_url()?)
            .bearer_auth(token)
            .query(&[
                ("valueInputOption", "USER_ENTERED"),
                ("insertDataOption", "INSERT_ROWS"),
            ])
            .json(&json!({ "values": [row] }))
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(SheetsError::api(status.as_u16(), &body));
        }
        Ok(())
    }

    /// Raw cell values of the data range; a blank sheet has none
    #[instrument(skip(self, token), fields(spreadsheet_id = %self.spreadsheet_id))]
    pub async fn read_values(&self, token: &str) -> SheetsResult<Vec<Vec<String>>> {
        let resp = self
            .http
            .get(self.values_url()?)
            .bearer_auth(token)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(SheetsError::api(status.as_u16(), &body));
        }

        let values: ValuesResponse = resp.json().await?;
        let values = values.values.unwrap_or_default();
        debug!(rows = values.len(), "Read sheet values");
        Ok(values)
    }

    pub async fn append_entry(&self, token: &str, entry: &NewEntry) -> bool {
        let row = entry.to_row(Local::now().naive_local());
        match self.append_row(token, &row).await {
            Ok(()) => {
                info!("Successfully appended entry: {:?}", row);
                true
            }
            Err(err) => {
                error!("Failed to append entry: {}", err);
                false
            }
        }
    }

    pub async fn fetch_entries(&self, token: &str, limit: usize) -> SheetsResult<Vec<Entry>> {
        let values = self.read_values(token).await?;
        Ok(parse_rows(&values, limit))
    }

    /// Check the spreadsheet exists and is readable with `token`
    #[instrument(skip(self, token), fields(spreadsheet_id = %self.spreadsheet_id))]
    pub async fn test_connection(&self, token: &str) -> Result<(), ConnectionError> {
        let url = self.spreadsheet_url().map_err(|err| {
            error!("Failed to connect to Google Sheets: {}", err);
            ConnectionError::CannotConnect
        })?;

        let resp = match self.http.get(url).bearer_auth(token).send().await {
            Ok(resp) => resp,
            Err(err) => {
                error!("Failed to connect to Google Sheets: {}", err);
                return Err(ConnectionError::CannotConnect);
            }
        };

        match resp.status() {
            status if status.is_success() => Ok(()),
            status => {
                let err = ConnectionError::from_status(status.as_u16());
                if status == StatusCode::NOT_FOUND {
                    warn!("Spreadsheet not found");
                } else {
                    error!(status = status.as_u16(), "Failed to connect to Google Sheets: {}", err);
                }
                Err(err)
            }
        }
    }
}
