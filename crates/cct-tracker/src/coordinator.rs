//! Per-entry polling of the check-in sheet

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use cct_helpers::{DataUpdateCoordinator, OAuth2Error, OAuth2Session, UpdateFailed};
use cct_sheets::{
    counts_by_type, entries_for_date, last_entry_by_type, CheckinLog, CheckinType, Entry,
    GoogleSheetsOAuthClient, MAX_ROWS,
};
use chrono::{Local, NaiveDate};
use serde::Serialize;

use crate::consts::{DOMAIN, RECENT_ENTRIES};

/// Hands out a client with fresh credentials for each batch of calls
#[async_trait]
pub trait ClientSource: Send + Sync {
    async fn client(&self) -> Result<Box<dyn CheckinLog>, OAuth2Error>;
}

/// OAuth2-backed source: refreshes the token, then builds an OAuth client
pub struct OAuthClientSource {
    session: Arc<OAuth2Session>,
    spreadsheet_id: String,
    sheet_name: Option<String>,
    sheets_base_url: String,
    http: reqwest::Client,
}

impl OAuthClientSource {
    pub fn new(
        session: Arc<OAuth2Session>,
        spreadsheet_id: impl Into<String>,
        sheet_name: Option<String>,
        sheets_base_url: impl Into<String>,
    ) -> Self {
        Self {
            session,
            spreadsheet_id: spreadsheet_id.into(),
            sheet_name,
            sheets_base_url: sheets_base_url.into(),
            http: reqwest::Client::new(),
        }
    }

    pub fn session(&self) -> &Arc<OAuth2Session> {
        &self.session
    }
}

#[async_trait]
impl ClientSource for OAuthClientSource {
    async fn client(&self) -> Result<Box<dyn CheckinLog>, OAuth2Error> {
        self.session.ensure_token_valid().await?;
        let client = GoogleSheetsOAuthClient::new(
            self.session.access_token().await,
            &self.spreadsheet_id,
            self.sheet_name.clone(),
        )
        .with_base_url(&self.sheets_base_url)
        .with_http_client(self.http.clone());
        Ok(Box::new(client))
    }
}

/// Result of one poll
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TrackerData {
    /// Most recent entry per type, `None` when the type never occurs
    pub last_entries: BTreeMap<CheckinType, Option<Entry>>,
    pub today_entries: Vec<Entry>,
    pub today_counts: BTreeMap<CheckinType, usize>,
    pub recent_entries: Vec<Entry>,
}

impl TrackerData {
    /// Summarize newest-first `entries` as of `today`
    pub fn from_entries(entries: &[Entry], today: NaiveDate) -> Self {
        let last_entries = CheckinType::ALL
            .into_iter()
            .map(|t| (t, last_entry_by_type(entries, t).cloned()))
            .collect();
        let today_entries = entries_for_date(entries, today);
        let today_counts = counts_by_type(&today_entries);

        Self {
            last_entries,
            today_counts,
            today_entries,
            recent_entries: entries.iter().take(RECENT_ENTRIES).cloned().collect(),
        }
    }

    pub fn last_entry(&self, checkin_type: CheckinType) -> Option<&Entry> {
        self.last_entries.get(&checkin_type).and_then(Option::as_ref)
    }

    pub fn today_count(&self, checkin_type: CheckinType) -> usize {
        self.today_counts.get(&checkin_type).copied().unwrap_or_default()
    }
}

pub type TrackerCoordinator = DataUpdateCoordinator<TrackerData>;

fn communication_error(err: impl std::fmt::Display) -> UpdateFailed {
    UpdateFailed(format!("Error communicating with Google Sheets: {}", err))
}

/// Coordinator reading the sheet once per poll through `source`
pub fn new_coordinator(source: Arc<dyn ClientSource>, update_interval: Duration) -> TrackerCoordinator {
    DataUpdateCoordinator::new(DOMAIN, update_interval, move || {
        let source = source.clone();
        async move {
            let client = source.client().await.map_err(communication_error)?;
            let entries = client
                .fetch_entries(MAX_ROWS)
                .await
                .map_err(communication_error)?;
            Ok(TrackerData::from_entries(&entries, Local::now().date_naive()))
        }
    })
}
