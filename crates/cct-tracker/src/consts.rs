//! Integration constants

use std::time::Duration;

pub const DOMAIN: &str = "cat_care_tracker";

pub const CONF_SPREADSHEET_ID: &str = "spreadsheet_id";
pub const CONF_CAT_NAME: &str = "cat_name";
pub const CONF_SHEET_NAME: &str = "sheet_name";
pub const CONF_TOKEN: &str = "token";
pub const CONF_AUTH_IMPLEMENTATION: &str = "auth_implementation";

pub const SERVICE_LOG_ENTRY: &str = "log_entry";
pub const SERVICE_LOG_FEEDING: &str = "log_feeding";
pub const SERVICE_LOG_INSULIN: &str = "log_insulin";
pub const SERVICE_LOG_WATER: &str = "log_water";
pub const SERVICE_LOG_BLOOD_GLUCOSE: &str = "log_blood_glucose";
pub const SERVICE_REFRESH: &str = "refresh";

pub const ATTR_CHECKIN_TYPES: &str = "checkin_types";
pub const ATTR_WATER_REFILL: &str = "water_refill";
pub const ATTR_BG_LEVEL: &str = "bg_level";
pub const ATTR_TIME: &str = "time";
pub const ATTR_CONFIG_ENTRY_ID: &str = "config_entry_id";

/// Conservative, the Sheets API is rate limited
pub const DEFAULT_UPDATE_INTERVAL: Duration = Duration::from_secs(600);

pub const DEFAULT_CAT_NAME: &str = "My Cat";

/// Entries shown in `recent_entries`
pub const RECENT_ENTRIES: usize = 20;

/// URL path the dashboard card files are served under
pub const STATIC_URL_PATH: &str = "/cat_care_tracker_static";

/// Card files, relative to the config directory
pub const STATIC_DIR: &str = "www/cat_care_tracker";

/// Dashboard card installed into `STATIC_DIR`
pub const CARD_FILE: &str = "cat-care-tracker-card.js";

pub const ENTRY_TITLE_PREFIX: &str = "Cat Care Tracker";
