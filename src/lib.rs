//! Alert Host Library
//!
//! Wires the alert manager and the alert API server to queue, database and
//! channel locker backends, keeps their settings documents hot-reloaded from
//! disk, and supervises both services until shutdown.

pub mod api;
pub mod aws;
pub mod bootstrap;
pub mod config;
pub mod error;
pub mod locker;
pub mod logging;
pub mod manager;
pub mod metrics;
pub mod queue;
pub mod routing;
pub mod service;
pub mod settings;
pub mod shutdown;
pub mod store;
pub mod supervisor;

pub use config::{ConfigManager, StartupConfig};
pub use error::Error;
pub use shutdown::ShutdownCoordinator;
pub use supervisor::Supervisor;

/// Result type used by the host's top-level operations.
pub type Result<T> = std::result::Result<T, Error>;
