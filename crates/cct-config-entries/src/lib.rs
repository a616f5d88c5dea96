//! Config entries
//!
//! Config entries are the configured instances of an integration; for Cat
//! Care Tracker, one per tracked spreadsheet. This crate persists them in
//! `.storage/core.config_entries`, drives their setup/unload lifecycle
//! (including scheduled retries when setup is not ready) and runs the config
//! and options flows that create and edit them.

pub mod entry;
pub mod flow;
pub mod manager;
pub mod state_machine;
pub mod storage;

pub use entry::{ConfigEntry, ConfigEntrySource, ConfigEntryState, ConfigEntryUpdate};
pub use flow::{
    ConfigFlow, FlowContext, FlowError, FlowFactory, FlowManager, FlowResponse, FlowResult,
    FlowSource, FormField, FLOW_MAX_AGE,
};
pub use manager::{
    ConfigEntries, ConfigEntriesData, ConfigEntriesError, ConfigEntriesResult, ConfigEntryNotReady,
    IntegrationHandler, SetupOutcome, STORAGE_KEY, STORAGE_MINOR_VERSION, STORAGE_VERSION,
};
pub use state_machine::{retry_delay, InvalidTransition};
pub use storage::{Storable, Storage, StorageError, StorageFile, StorageResult};
