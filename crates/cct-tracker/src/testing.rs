//! In-memory check-in log for tests

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use cct_helpers::OAuth2Error;
use cct_sheets::{parse_rows, CheckinLog, ConnectionError, Entry, NewEntry, SheetsError, SheetsResult};
use chrono::Local;

use crate::coordinator::ClientSource;

const HEADER: [&str; 5] = ["Timestamp", "Date", "Checkin Type", "Water Refill", "BG (mg/dL)"];

#[derive(Default)]
struct FakeState {
    values: Vec<Vec<String>>,
    fail_reads: bool,
    fail_appends: bool,
    reads: usize,
}

#[derive(Clone, Default)]
pub struct FakeLog {
    inner: Arc<Mutex<FakeState>>,
}

impl FakeLog {
    pub fn with_rows(rows: Vec<Vec<&str>>) -> Self {
        let log = FakeLog::default();
        log.set_rows(
            rows.into_iter()
                .map(|r| r.into_iter().map(String::from).collect())
                .collect(),
        );
        log
    }

    pub fn set_rows(&self, rows: Vec<Vec<String>>) {
        let mut values = vec![HEADER.iter().map(|h| h.to_string()).collect::<Vec<_>>()];
        values.extend(rows);
        self.inner.lock().unwrap().values = values;
    }

    pub fn values(&self) -> Vec<Vec<String>> {
        self.inner.lock().unwrap().values.clone()
    }

    /// Data rows, header excluded
    pub fn rows(&self) -> Vec<Vec<String>> {
        self.values().into_iter().skip(1).collect()
    }

    pub fn fail_reads(&self, fail: bool) {
        self.inner.lock().unwrap().fail_reads = fail;
    }

    pub fn fail_appends(&self, fail: bool) {
        self.inner.lock().unwrap().fail_appends = fail;
    }

    pub fn reads(&self) -> usize {
        self.inner.lock().unwrap().reads
    }

    pub fn source(&self) -> FakeSource {
        FakeSource { log: self.clone() }
    }
}

#[async_trait]
impl CheckinLog for FakeLog {
    async fn append_entry(&self, entry: &NewEntry) -> bool {
        let mut state = self.inner.lock().unwrap();
        if state.fail_appends {
            return false;
        }
        if state.values.is_empty() {
            state.values.push(HEADER.iter().map(|h| h.to_string()).collect());
        }
        state.values.push(entry.to_row(Local::now().naive_local()));
        true
    }

    async fn fetch_entries(&self, limit: usize) -> SheetsResult<Vec<Entry>> {
        let mut state = self.inner.lock().unwrap();
        state.reads += 1;
        if state.fail_reads {
            return Err(SheetsError::Api {
                status: 503,
                message: "backend unavailable".into(),
            });
        }
        Ok(parse_rows(&state.values, limit))
    }

    async fn test_connection(&self) -> Result<(), ConnectionError> {
        Ok(())
    }
}

pub struct FakeSource {
    log: FakeLog,
}

#[async_trait]
impl ClientSource for FakeSource {
    async fn client(&self) -> Result<Box<dyn CheckinLog>, OAuth2Error> {
        Ok(Box::new(self.log.clone()))
    }
}
