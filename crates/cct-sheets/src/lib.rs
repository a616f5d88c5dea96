//! Google Sheets as a cat care log
//!
//! Every check-in is a row of a spreadsheet whose header row defines the
//! columns. [`GoogleSheetsOAuthClient`] uses an OAuth2 access token,
//! [`GoogleSheetsClient`] a service account key; both implement
//! [`CheckinLog`], which appends rows and reads them back as [`Entry`]
//! records, newest first.

pub mod api;
pub mod client;
pub mod entry;
pub mod error;
pub mod schema;
pub mod service_account;

pub use api::{SheetsApi, DEFAULT_BASE_URL};
pub use client::{CheckinLog, GoogleSheetsOAuthClient};
pub use entry::{counts_by_type, entries_for_date, last_entry_by_type, parse_rows, Entry, NewEntry};
pub use error::{ConnectionError, SheetsError, SheetsResult};
pub use schema::{
    data_range, CheckinType, UnknownCheckinType, COL_BG_LEVEL, COL_CHECKIN_TYPE, COL_DATE,
    COL_TIMESTAMP, COL_WATER_REFILL, DATE_FORMAT, DEFAULT_SHEET_NAME, MAX_ROWS, SHEETS_SCOPE,
    TIMESTAMP_FORMAT,
};
pub use service_account::{GoogleSheetsClient, ServiceAccountKey};
