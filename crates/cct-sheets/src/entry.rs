//! Sheet rows as records, and the scans over them

use std::collections::BTreeMap;

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::schema::{
    CheckinType, COL_BG_LEVEL, COL_CHECKIN_TYPE, COL_DATE, COL_WATER_REFILL, DATE_FORMAT,
    TIMESTAMP_FORMAT,
};

const DATE_TIME_FORMATS: [&str; 3] = ["%m/%d/%Y %H:%M:%S", "%m/%d/%Y %H:%M", "%m/%d/%Y %I:%M %p"];

/// One data row keyed by the header row, in column order
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Entry(IndexMap<String, String>);

impl Entry {
    /// Pair `row` with `headers`; short rows are padded with `""`, extra
    /// cells are dropped
    pub fn from_row(headers: &[String], row: &[String]) -> Self {
        let cells = headers
            .iter()
            .enumerate()
            .map(|(i, header)| (header.clone(), row.get(i).cloned().unwrap_or_default()))
            .collect();
        Entry(cells)
    }

    /// Cell under `column`, `None` when the header has no such column
    pub fn get(&self, column: &str) -> Option<&str> {
        self.0.get(column).map(String::as_str)
    }

    /// Header and cell pairs in sheet order
    pub fn columns(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// `Date` cell, `""` when the column is missing
    pub fn date(&self) -> &str {
        self.get(COL_DATE).unwrap_or_default()
    }

    /// Raw `Checkin Type` cell
    pub fn checkin_type_cell(&self) -> &str {
        self.get(COL_CHECKIN_TYPE).unwrap_or_default()
    }

    /// Comma-separated check-in types, trimmed, empty parts skipped
    pub fn checkin_types(&self) -> Vec<&str> {
        self.checkin_type_cell()
            .split(',')
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .collect()
    }

    /// True when `checkin_type` is one of the listed types, compared exactly
    pub fn has_type(&self, checkin_type: CheckinType) -> bool {
        self.checkin_types()
            .into_iter()
            .any(|t| t == checkin_type.as_str())
    }

    /// `Water Refill` cell, `None` when missing or empty
    pub fn water_refill(&self) -> Option<&str> {
        self.get(COL_WATER_REFILL).filter(|v| !v.is_empty())
    }

    /// `BG (mg/dL)` cell as an integer, `None` when missing or not a number
    pub fn bg_level(&self) -> Option<i64> {
        self.get(COL_BG_LEVEL).and_then(|v| v.trim().parse().ok())
    }

    /// `Date` cell as a date and time; a bare date is midnight
    pub fn parsed_date(&self) -> Option<NaiveDateTime> {
        let raw = self.date().trim();
        if raw.is_empty() {
            return None;
        }
        DATE_TIME_FORMATS
            .iter()
            .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
            .or_else(|| {
                NaiveDate::parse_from_str(raw, DATE_FORMAT)
                    .ok()
                    .map(|d| d.and_time(NaiveTime::MIN))
            })
    }

    /// Date part of the `Date` cell
    pub fn day(&self) -> Option<NaiveDate> {
        let first = self.date().split_whitespace().next()?;
        NaiveDate::parse_from_str(first, DATE_FORMAT).ok()
    }
}

/// Turn raw sheet values into entries, newest first
///
/// The first row is the header. Rows are appended at the bottom, so the
/// newest are the last `limit` data rows and only those are kept. Taking
/// the first `limit` rows instead would freeze the sensors once the sheet
/// outgrows the limit.
pub fn parse_rows(values: &[Vec<String>], limit: usize) -> Vec<Entry> {
    let Some((headers, rows)) = values.split_first() else {
        return Vec::new();
    };

    let start = rows.len().saturating_sub(limit);
    rows[start..]
        .iter()
        .rev()
        .map(|row| Entry::from_row(headers, row))
        .collect()
}

/// Most recent entry of `checkin_type` in a newest-first slice
pub fn last_entry_by_type(entries: &[Entry], checkin_type: CheckinType) -> Option<&Entry> {
    entries.iter().find(|e| e.has_type(checkin_type))
}

/// Entries whose `Date` falls on `date`
pub fn entries_for_date(entries: &[Entry], date: NaiveDate) -> Vec<Entry> {
    let prefix = date.format(DATE_FORMAT).to_string();
    entries
        .iter()
        .filter(|e| e.day() == Some(date) || e.date().starts_with(&prefix))
        .cloned()
        .collect()
}

/// Count of entries per check-in type; every type is present
pub fn counts_by_type(entries: &[Entry]) -> BTreeMap<CheckinType, usize> {
    let mut counts: BTreeMap<CheckinType, usize> =
        CheckinType::ALL.into_iter().map(|t| (t, 0)).collect();

    for entry in entries {
        for checkin_type in CheckinType::ALL {
            if entry.has_type(checkin_type) {
                *counts.entry(checkin_type).or_default() += 1;
            }
        }
    }
    counts
}

/// A row to append
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NewEntry {
    /// Joined with `, ` into the `Checkin Type` cell
    pub checkin_types: Vec<CheckinType>,
    pub water_refill: Option<String>,
    /// mg/dL; zero is left blank
    pub bg_level: Option<i64>,
    /// Defaults to today
    pub entry_date: Option<NaiveDate>,
    /// Free-form time appended to the date, e.g. `08:30`
    pub entry_time: Option<String>,
}

impl NewEntry {
    pub fn new(checkin_types: Vec<CheckinType>) -> Self {
        Self {
            checkin_types,
            ..Default::default()
        }
    }

    pub fn with_water_refill(mut self, water_refill: Option<String>) -> Self {
        self.water_refill = water_refill;
        self
    }

    pub fn with_bg_level(mut self, bg_level: Option<i64>) -> Self {
        self.bg_level = bg_level;
        self
    }

    pub fn with_date(mut self, entry_date: Option<NaiveDate>) -> Self {
        self.entry_date = entry_date;
        self
    }

    pub fn with_time(mut self, entry_time: Option<String>) -> Self {
        self.entry_time = entry_time;
        self
    }

    /// Cells for columns A..E, stamped with `now`
    ///
    /// Empty water refill and a zero BG level are written as blank cells.
    pub fn to_row(&self, now: NaiveDateTime) -> Vec<String> {
        let entry_date = self.entry_date.unwrap_or_else(|| now.date());
        let date = match self.entry_time.as_deref().filter(|t| !t.is_empty()) {
            Some(time) => format!("{} {}", entry_date.format(DATE_FORMAT), time),
            None => entry_date.format(DATE_FORMAT).to_string(),
        };

        let types: Vec<&str> = self.checkin_types.iter().map(CheckinType::as_str).collect();

        vec![
            now.format(TIMESTAMP_FORMAT).to_string(),
            date,
            types.join(", "),
            self.water_refill.clone().unwrap_or_default(),
            self.bg_level
                .filter(|level| *level != 0)
                .map(|level| level.to_string())
                .unwrap_or_default(),
        ]
    }
}
