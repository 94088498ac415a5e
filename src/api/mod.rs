//! API Module
//!
//! REST API through which clients submit alerts.

pub mod handlers;
pub mod server;
pub mod types;

pub use server::ApiServer;
pub use types::*;
