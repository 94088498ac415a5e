//! Settings Module
//!
//! Runtime-reloadable YAML settings: document types, the fingerprinting
//! reader and the periodic refresher.

pub mod reader;
pub mod refresher;
pub mod types;

pub use reader::{read_settings, Fingerprint};
pub use refresher::{
    CycleReport, RefreshOutcome, SettingsKind, SettingsRefresher, WatchedSettings,
    SETTINGS_POLL_INTERVAL, SETTINGS_RELOADS_METRIC,
};
pub use types::{ApiSettings, ManagerSettings, RoutingRule};
