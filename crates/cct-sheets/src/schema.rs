//! Sheet layout and check-in types
//!
//! The first row of the sheet is a header naming the columns below; rows are
//! appended in column order A..E.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Column A, when the row was written
pub const COL_TIMESTAMP: &str = "Timestamp";
/// Column B, the date of the check-in plus an optional free-form time
pub const COL_DATE: &str = "Date";
/// Column C, comma-separated check-in types
pub const COL_CHECKIN_TYPE: &str = "Checkin Type";
/// Column D
pub const COL_WATER_REFILL: &str = "Water Refill";
/// Column E, blood glucose in mg/dL
pub const COL_BG_LEVEL: &str = "BG (mg/dL)";

/// Sheet used when an entry names none
pub const DEFAULT_SHEET_NAME: &str = "Sheet1";

/// Columns covered by reads and appends
pub const DATA_COLUMNS: &str = "A:E";

/// Upper bound on rows read per request
pub const MAX_ROWS: usize = 500;

/// `Timestamp` column format
pub const TIMESTAMP_FORMAT: &str = "%m/%d/%Y %H:%M:%S";

/// Date part of the `Date` column
pub const DATE_FORMAT: &str = "%m/%d/%Y";

/// OAuth2 scope for reading and appending rows
pub const SHEETS_SCOPE: &str = "https://www.googleapis.com/auth/spreadsheets";

/// Range of the data columns on `sheet_name`
pub fn data_range(sheet_name: &str) -> String {
    format!("{}!{}", sheet_name, DATA_COLUMNS)
}

/// Kind of check-in recorded in the `Checkin Type` column
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum CheckinType {
    #[serde(rename = "Food")]
    Food,
    #[serde(rename = "Water")]
    Water,
    #[serde(rename = "Insulin")]
    Insulin,
    #[serde(rename = "Blood Glucose Measurement")]
    BloodGlucose,
}

impl CheckinType {
    /// Every type, in column display order
    pub const ALL: [CheckinType; 4] = [
        CheckinType::Food,
        CheckinType::Water,
        CheckinType::Insulin,
        CheckinType::BloodGlucose,
    ];

    /// Text written to and matched in the `Checkin Type` column
    pub fn as_str(&self) -> &'static str {
        match self {
            CheckinType::Food => "Food",
            CheckinType::Water => "Water",
            CheckinType::Insulin => "Insulin",
            CheckinType::BloodGlucose => "Blood Glucose Measurement",
        }
    }
}

impl fmt::Display for CheckinType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A `Checkin Type` value naming no known type
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown check-in type: {0}")]
pub struct UnknownCheckinType(pub String);

impl FromStr for CheckinType {
    type Err = UnknownCheckinType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        CheckinType::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| UnknownCheckinType(s.to_string()))
    }
}
