//! Manager Module
//!
//! The alert manager service and its queue message types.

pub mod service;
pub mod types;

pub use service::{validate_settings, AlertManager, ManagerBackends, ManagerOptions};
pub use types::{AlertOutcome, Command, CommandOutcome};
