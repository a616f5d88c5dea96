//! The check-in log abstraction and the OAuth2 bearer-token client

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{Local, NaiveDate};
use tracing::error;

use crate::api::SheetsApi;
use crate::entry::{counts_by_type, entries_for_date, last_entry_by_type, Entry, NewEntry};
use crate::error::{ConnectionError, SheetsResult};
use crate::schema::{CheckinType, MAX_ROWS};

/// A spreadsheet used as a check-in log
#[async_trait]
pub trait CheckinLog: Send + Sync {
    /// Append a row; failures are logged and reported as `false`
    async fn append_entry(&self, entry: &NewEntry) -> bool;

    /// Up to `limit` most recent entries, newest first
    async fn fetch_entries(&self, limit: usize) -> SheetsResult<Vec<Entry>>;

    async fn test_connection(&self) -> Result<(), ConnectionError>;

    /// Like `fetch_entries`, but errors are logged and yield no entries
    async fn get_entries(&self, limit: usize) -> Vec<Entry> {
        match self.fetch_entries(limit).await {
            Ok(entries) => entries,
            Err(err) => {
                error!("Failed to get entries: {}", err);
                Vec::new()
            }
        }
    }

    async fn get_entries_for_date(&self, date: NaiveDate) -> Vec<Entry> {
        entries_for_date(&self.get_entries(MAX_ROWS).await, date)
    }

    async fn get_last_entry_by_type(&self, checkin_type: CheckinType) -> Option<Entry> {
        last_entry_by_type(&self.get_entries(MAX_ROWS).await, checkin_type).cloned()
    }

    async fn get_today_counts(&self) -> BTreeMap<CheckinType, usize> {
        counts_by_type(&self.get_entries_for_date(Local::now().date_naive()).await)
    }
}

/// Sheets client authorized with an OAuth2 access token
#[derive(Debug, Clone)]
pub struct GoogleSheetsOAuthClient {
    access_token: String,
    api: SheetsApi,
}

impl GoogleSheetsOAuthClient {
    /// Client for `sheet_name` of `spreadsheet_id`, `Sheet1` when unset
    pub fn new(
        access_token: impl Into<String>,
        spreadsheet_id: impl Into<String>,
        sheet_name: Option<String>,
    ) -> Self {
        Self {
            access_token: access_token.into(),
            api: SheetsApi::new(spreadsheet_id, sheet_name),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.api = self.api.with_base_url(base_url);
        self
    }

    pub fn with_http_client(mut self, http: reqwest::Client) -> Self {
        self.api = self.api.with_http_client(http);
        self
    }

    pub fn spreadsheet_id(&self) -> &str {
        self.api.spreadsheet_id()
    }

    pub fn sheet_name(&self) -> &str {
        self.api.sheet_name()
    }
}

#[async_trait]
impl CheckinLog for GoogleSheetsOAuthClient {
    async fn append_entry(&self, entry: &NewEntry) -> bool {
        self.api.append_entry(&self.access_token, entry).await
    }

    async fn fetch_entries(&self, limit: usize) -> SheetsResult<Vec<Entry>> {
        self.api.fetch_entries(&self.access_token, limit).await
    }

    async fn test_connection(&self) -> Result<(), ConnectionError> {
        self.api.test_connection(&self.access_token).await
    }
}
